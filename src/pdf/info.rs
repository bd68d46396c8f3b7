//! Info dictionary and trailer surgery on a decomposed (QDF) file.
//!
//! The edit is textual: the Info object's dictionary and the trailer
//! dictionary are re-serialized in place, so object offsets after them
//! shift. The file is rebuilt by qpdf afterwards, which regenerates the
//! cross-reference table.
//!
//! The scanner understands just enough syntax to find where a dictionary
//! value ends: literal strings with nesting and escapes, hex strings,
//! names, arrays, nested dictionaries, numbers and `n g R` references.

use crate::pdf::escape_literal;
use once_cell::sync::Lazy;
use regex::bytes::{Regex, RegexBuilder};
use std::ops::Range;

/// Entries removed from the Info dictionary before `/Subject` is set.
const STRIPPED_KEYS: [&[u8]; 4] = [b"/Author", b"/Producer", b"/Title", b"/Subject"];

static INFO_REF: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"/Info\s+(\d+)\s+(\d+)\s+R")
        .unicode(false)
        .build()
        .unwrap()
});

static OBJ_HEADER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(?m)^(\d+)\s+(\d+)\s+obj\b")
        .unicode(false)
        .build()
        .unwrap()
});

// ── Scanner ──────────────────────────────────────────────────────────────

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\0')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Skip whitespace and comments.
fn skip_ws(b: &[u8], mut i: usize) -> usize {
    while i < b.len() {
        if is_whitespace(b[i]) {
            i += 1;
        } else if b[i] == b'%' {
            while i < b.len() && b[i] != b'\n' && b[i] != b'\r' {
                i += 1;
            }
        } else {
            break;
        }
    }
    i
}

fn regular_end(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && !is_whitespace(b[i]) && !is_delimiter(b[i]) {
        i += 1;
    }
    i
}

fn is_integer(token: &[u8]) -> bool {
    !token.is_empty() && token.iter().all(u8::is_ascii_digit)
}

fn literal_end(b: &[u8], start: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut i = start;
    while i < b.len() {
        match b[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(format!("unterminated string at byte {start}"))
}

fn array_end(b: &[u8], start: usize) -> Result<usize, String> {
    let mut i = start + 1;
    loop {
        i = skip_ws(b, i);
        match b.get(i) {
            None => return Err(format!("unterminated array at byte {start}")),
            Some(b']') => return Ok(i + 1),
            Some(_) => i = value_end(b, i)?,
        }
    }
}

/// Index just past the value starting at `i`.
fn value_end(b: &[u8], i: usize) -> Result<usize, String> {
    match b.get(i) {
        None => Err("unexpected end of data".into()),
        Some(b'(') => literal_end(b, i),
        Some(b'<') if b.get(i + 1) == Some(&b'<') => dict_entries(b, i).map(|(_, end)| end),
        Some(b'<') => b[i..]
            .iter()
            .position(|c| *c == b'>')
            .map(|p| i + p + 1)
            .ok_or_else(|| format!("unterminated hex string at byte {i}")),
        Some(b'[') => array_end(b, i),
        Some(b'/') => Ok(regular_end(b, i + 1)),
        Some(c) if is_delimiter(*c) => Err(format!("unexpected '{}' at byte {i}", *c as char)),
        Some(_) => {
            let end = regular_end(b, i);
            if is_integer(&b[i..end]) {
                let gen_start = skip_ws(b, end);
                let gen_end = regular_end(b, gen_start);
                if is_integer(&b[gen_start..gen_end]) {
                    let r = skip_ws(b, gen_end);
                    if b.get(r) == Some(&b'R') && regular_end(b, r) == r + 1 {
                        return Ok(r + 1);
                    }
                }
            }
            Ok(end)
        }
    }
}

/// One `/Key value` pair: `key` covers the name, `span` the whole pair.
#[derive(Debug, Clone)]
struct Entry {
    key: Range<usize>,
    span: Range<usize>,
}

/// Entries of the dictionary opening at `open` (`<<`), and the index just
/// past its closing `>>`.
fn dict_entries(b: &[u8], open: usize) -> Result<(Vec<Entry>, usize), String> {
    let mut entries = Vec::new();
    let mut i = open + 2;
    loop {
        i = skip_ws(b, i);
        if i >= b.len() {
            return Err(format!("unterminated dictionary at byte {open}"));
        }
        if b[i..].starts_with(b">>") {
            return Ok((entries, i + 2));
        }
        if b[i] != b'/' {
            return Err(format!("expected a name at byte {i}"));
        }
        let key_end = regular_end(b, i + 1);
        let end = value_end(b, skip_ws(b, key_end))?;
        entries.push(Entry {
            key: i..key_end,
            span: i..end,
        });
        i = end;
    }
}

/// `<< kept entries… extra… >>` on one line.
fn rebuild_dict(b: &[u8], entries: &[Entry], drop: impl Fn(&[u8]) -> bool, extra: &[String]) -> Vec<u8> {
    let mut out = b"<<".to_vec();
    for entry in entries {
        if drop(&b[entry.key.clone()]) {
            continue;
        }
        out.push(b' ');
        out.extend_from_slice(&b[entry.span.clone()]);
    }
    for item in extra {
        out.push(b' ');
        out.extend_from_slice(item.as_bytes());
    }
    out.extend_from_slice(b" >>");
    out
}

fn rfind(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).rposition(|w| w == needle)
}

fn parse_u64(b: &[u8]) -> Option<u64> {
    std::str::from_utf8(b).ok()?.parse().ok()
}

/// Offset of the `<<` opening object `id gen`'s dictionary.
fn object_dict(b: &[u8], id: u64, gen: u64) -> Option<usize> {
    let header = RegexBuilder::new(&format!(r"(?m)^{id}\s+{gen}\s+obj\b"))
        .unicode(false)
        .build()
        .ok()?;
    let m = header.find_iter(b).last()?;
    let open = skip_ws(b, m.end());
    b[open..].starts_with(b"<<").then_some(open)
}

/// Start of an `xref` table that runs directly into the trailer at
/// `trailer_at`, if there is one.
fn xref_before(b: &[u8], trailer_at: usize) -> Option<usize> {
    let head = &b[..trailer_at];
    let at = rfind(head, b"xref")?;
    let at_line_start = at == 0 || matches!(head[at - 1], b'\n' | b'\r');
    let table_only = head[at + 4..]
        .iter()
        .all(|c| c.is_ascii_digit() || matches!(c, b' ' | b'\n' | b'\r' | b'f' | b'n'));
    (at_line_start && table_only).then_some(at)
}

// ── Patch ────────────────────────────────────────────────────────────────

/// Rewrite the document Info so that it holds no author, producer or title
/// and its `/Subject` reads `subject`.
///
/// An existing Info dictionary keeps its other entries. Without one, a new
/// object numbered one past the highest object id is inserted ahead of the
/// final xref table (or the trailer) and linked from the trailer. The
/// trailer `/Size` is raised to cover every object id.
pub fn patch_info(bytes: &[u8], subject: &str) -> Result<Vec<u8>, String> {
    let trailer_at = rfind(bytes, b"trailer").ok_or("no trailer")?;
    let trailer_open = skip_ws(bytes, trailer_at + b"trailer".len());
    if !bytes[trailer_open..].starts_with(b"<<") {
        return Err("trailer has no dictionary".into());
    }
    let (trailer_entries, trailer_end) = dict_entries(bytes, trailer_open)?;
    let trailer = &bytes[trailer_open..trailer_end];

    let max_id = OBJ_HEADER
        .captures_iter(&bytes[..trailer_at])
        .filter_map(|c| parse_u64(&c[1]))
        .max()
        .unwrap_or(0);
    let current_size = trailer_entries
        .iter()
        .find(|e| &bytes[e.key.clone()] == b"/Size")
        .and_then(|e| {
            let value = skip_ws(bytes, e.key.end);
            parse_u64(&bytes[value..e.span.end])
        })
        .unwrap_or(0);

    let subject_entry = format!("/Subject ({})", escape_literal(subject));
    let existing = INFO_REF
        .captures(trailer)
        .and_then(|c| Some((parse_u64(&c[1])?, parse_u64(&c[2])?)))
        .and_then(|(id, gen)| object_dict(&bytes[..trailer_at], id, gen).map(|open| (id, open)));

    let mut edits: Vec<(Range<usize>, Vec<u8>)> = Vec::new();
    let mut trailer_extra = Vec::new();
    let info_id = match existing {
        Some((id, open)) => {
            let (entries, end) = dict_entries(bytes, open)?;
            let dict = rebuild_dict(
                bytes,
                &entries,
                |key| STRIPPED_KEYS.contains(&key),
                &[subject_entry],
            );
            edits.push((open..end, dict));
            id
        }
        None => {
            let id = max_id + 1;
            let object = format!("{id} 0 obj\n<< {subject_entry} >>\nendobj\n");
            let at = xref_before(bytes, trailer_at).unwrap_or(trailer_at);
            edits.push((at..at, object.into_bytes()));
            trailer_extra.push(format!("/Info {id} 0 R"));
            id
        }
    };

    let size = current_size.max(max_id + 1).max(info_id + 1);
    trailer_extra.insert(0, format!("/Size {size}"));
    let replaces_info = existing.is_none();
    let new_trailer = rebuild_dict(
        bytes,
        &trailer_entries,
        |key| key == b"/Size" || (replaces_info && key == b"/Info"),
        &trailer_extra,
    );
    edits.push((trailer_open..trailer_end, new_trailer));

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = bytes.to_vec();
    for (range, replacement) in edits {
        out.splice(range, replacement);
    }
    Ok(out)
}
