//! Effective page sizes from `qpdf --json` output.
//!
//! Both JSON layouts qpdf has shipped are accepted:
//!
//! * v2: `{"qpdf": [header, {"obj:3 0 R": {"value": {...}}, ...}], "pages": [...]}`
//! * v1: `{"objects": {"3 0 R": {...}, ...}, "pages": [...]}`
//!
//! Stream objects carry their dictionary under `stream.dict`. `/MediaBox`,
//! `/Rotate` and `/UserUnit` may be inherited through `/Parent`; the walk
//! stops at the first ancestor defining the key or at an id already seen.

use crate::error::{PrepError, PrepResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

static REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s+(\d+)\s+R\s*$").unwrap());

/// Visible page size in PDF points, rotation applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub width: f64,
    pub height: f64,
}

/// Canonical `"n g R"` form of an object reference, if `text` is one.
fn reference_key(text: &str) -> Option<String> {
    REFERENCE
        .captures(text)
        .map(|c| format!("{} {} R", &c[1], &c[2]))
}

/// Flattened object table: reference → dictionary.
struct ObjectIndex<'a> {
    objects: HashMap<String, &'a Value>,
}

impl<'a> ObjectIndex<'a> {
    fn from_json(json: &'a Value) -> Option<Self> {
        let mut objects = HashMap::new();
        if let Some(table) = json
            .get("qpdf")
            .and_then(Value::as_array)
            .and_then(|sections| sections.get(1))
            .and_then(Value::as_object)
        {
            for (key, value) in table {
                if let Some(key) = key.strip_prefix("obj:").and_then(reference_key) {
                    objects.insert(key, unwrap_object(value));
                }
            }
            return Some(Self { objects });
        }
        if let Some(table) = json.get("objects").and_then(Value::as_object) {
            for (key, value) in table {
                if let Some(key) = reference_key(key) {
                    objects.insert(key, unwrap_object(value));
                }
            }
            return Some(Self { objects });
        }
        None
    }

    fn dict(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.objects.get(key).and_then(|v| v.as_object())
    }

    /// Follow one level of indirection.
    fn deref(&self, value: &'a Value) -> &'a Value {
        value
            .as_str()
            .and_then(reference_key)
            .and_then(|key| self.objects.get(&key).copied())
            .unwrap_or(value)
    }

    /// `key` from the page dictionary or the nearest ancestor defining it.
    fn inherited(&self, page: &str, key: &str) -> Option<&'a Value> {
        let mut visited = HashSet::new();
        let mut current = Some(page.to_string());
        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                break;
            }
            let dict = self.dict(&id)?;
            if let Some(value) = dict.get(key) {
                return Some(self.deref(value));
            }
            current = dict
                .get("/Parent")
                .and_then(Value::as_str)
                .and_then(reference_key);
        }
        None
    }
}

/// `{"value": v}` → v, `{"stream": {"dict": d}}` → d, else the value.
fn unwrap_object(value: &Value) -> &Value {
    if let Some(inner) = value.get("value") {
        return unwrap_object(inner);
    }
    if let Some(dict) = value.get("stream").and_then(|s| s.get("dict")) {
        return dict;
    }
    value
}

fn number(index: &ObjectIndex<'_>, value: &Value) -> Option<f64> {
    index.deref(value).as_f64().filter(|n| n.is_finite())
}

/// One [`PageBox`] per page, in document order.
pub fn page_boxes(json: &Value, path: &Path) -> PrepResult<Vec<PageBox>> {
    let invalid = |detail: &str| PrepError::InvalidIntrospection {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };

    let pages = json
        .get("pages")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing pages array"))?;
    let index = ObjectIndex::from_json(json).ok_or_else(|| invalid("missing object table"))?;

    let mut boxes = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let page_num = i + 1;
        let bad_box = |detail: String| PrepError::InvalidMediaBox {
            path: path.to_path_buf(),
            page: page_num,
            detail,
        };

        let id = page
            .get("object")
            .and_then(Value::as_str)
            .and_then(reference_key)
            .ok_or_else(|| invalid(&format!("page {page_num} has no object reference")))?;
        if index.dict(&id).is_none() {
            return Err(invalid(&format!("page object {id} not found")));
        }

        let media_box = index
            .inherited(&id, "/MediaBox")
            .and_then(Value::as_array)
            .ok_or_else(|| bad_box("missing".into()))?;
        let coords: Vec<f64> = media_box.iter().filter_map(|v| number(&index, v)).collect();
        if media_box.len() != 4 || coords.len() != 4 {
            return Err(bad_box(format!("expected 4 numbers, got {media_box:?}")));
        }

        let unit = index
            .inherited(&id, "/UserUnit")
            .and_then(|v| number(&index, v))
            .filter(|u| *u > 0.0)
            .unwrap_or(1.0);
        let rotate = index
            .inherited(&id, "/Rotate")
            .and_then(|v| number(&index, v))
            .map(|r| (r.round() as i64).rem_euclid(360))
            .unwrap_or(0);

        let mut width = (coords[2] - coords[0]).abs() * unit;
        let mut height = (coords[3] - coords[1]).abs() * unit;
        if width == 0.0 || height == 0.0 {
            return Err(bad_box(format!("zero-area box {coords:?}")));
        }
        if rotate == 90 || rotate == 270 {
            std::mem::swap(&mut width, &mut height);
        }
        boxes.push(PageBox { width, height });
    }
    Ok(boxes)
}

/// Largest font size in `[12, 48]`, stepping down by 2pt, for which
/// `len × size × 0.6` fits in 80% of `page_width`. The 0.6 factor is an
/// average Helvetica-Bold advance, not real glyph metrics.
pub fn font_size(label_len: usize, page_width: f64) -> f64 {
    const START: f64 = 48.0;
    const STEP: f64 = 2.0;
    const FLOOR: f64 = 12.0;

    let mut size = START;
    while label_len as f64 * size * 0.6 > 0.8 * page_width && size - STEP >= FLOOR {
        size -= STEP;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v2(objects: Value, pages: &[&str]) -> Value {
        json!({
            "version": 2,
            "pages": pages.iter().map(|p| json!({"object": p})).collect::<Vec<_>>(),
            "qpdf": [{"jsonversion": 2}, objects],
        })
    }

    #[test]
    fn reads_direct_media_box_v2() {
        let doc = v2(
            json!({
                "obj:3 0 R": {"value": {"/Type": "/Page", "/MediaBox": [0, 0, 612, 792]}}
            }),
            &["3 0 R"],
        );
        let boxes = page_boxes(&doc, Path::new("a.pdf")).unwrap();
        assert_eq!(boxes, vec![PageBox { width: 612.0, height: 792.0 }]);
    }

    #[test]
    fn inherits_through_parent_and_applies_rotation_and_unit() {
        let doc = v2(
            json!({
                "obj:1 0 R": {"value": {"/Type": "/Pages", "/MediaBox": [0, 0, 595, 842], "/Rotate": 450}},
                "obj:2 0 R": {"value": {"/Type": "/Pages", "/Parent": "1 0 R", "/UserUnit": 2}},
                "obj:3 0 R": {"value": {"/Type": "/Page", "/Parent": "2 0 R"}}
            }),
            &["3 0 R"],
        );
        let boxes = page_boxes(&doc, Path::new("a.pdf")).unwrap();
        assert_eq!(boxes, vec![PageBox { width: 1684.0, height: 1190.0 }]);
    }

    #[test]
    fn dereferences_indirect_media_box_v1() {
        let doc = json!({
            "pages": [{"object": "4 0 R"}],
            "objects": {
                "4 0 R": {"/Type": "/Page", "/MediaBox": "9 0 R", "/UserUnit": -3},
                "9 0 R": [10, 20, 210, 120]
            }
        });
        let boxes = page_boxes(&doc, Path::new("a.pdf")).unwrap();
        assert_eq!(boxes, vec![PageBox { width: 200.0, height: 100.0 }]);
    }

    #[test]
    fn parent_cycle_terminates() {
        let doc = v2(
            json!({
                "obj:1 0 R": {"value": {"/Parent": "2 0 R"}},
                "obj:2 0 R": {"value": {"/Parent": "1 0 R"}}
            }),
            &["1 0 R"],
        );
        let err = page_boxes(&doc, Path::new("a.pdf")).unwrap_err();
        assert!(matches!(err, PrepError::InvalidMediaBox { page: 1, .. }));
    }

    #[test]
    fn stream_page_dictionary_is_unwrapped() {
        let doc = v2(
            json!({
                "obj:5 0 R": {"stream": {"dict": {"/MediaBox": [0, 0, 300, 400]}}}
            }),
            &["5 0 R"],
        );
        assert_eq!(page_boxes(&doc, Path::new("a.pdf")).unwrap().len(), 1);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = page_boxes(&json!({"foo": 1}), Path::new("a.pdf")).unwrap_err();
        assert!(matches!(err, PrepError::InvalidIntrospection { .. }));

        let doc = v2(json!({"obj:3 0 R": {"value": {"/MediaBox": [0, 0, 10]}}}), &["3 0 R"]);
        assert!(matches!(
            page_boxes(&doc, Path::new("a.pdf")).unwrap_err(),
            PrepError::InvalidMediaBox { .. }
        ));
    }

    #[test]
    fn font_size_bounds() {
        assert_eq!(font_size(5, 612.0), 48.0);
        // 40 chars on a narrow page would need < 12pt: clamp.
        assert_eq!(font_size(40, 100.0), 12.0);
        // 20 × size × 0.6 ≤ 0.8 × 612 = 489.6 → size ≤ 40.8 → 40.
        assert_eq!(font_size(20, 612.0), 40.0);
    }
}
