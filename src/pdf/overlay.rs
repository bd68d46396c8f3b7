//! Minimal watermark PDF writer.
//!
//! Object layout:
//!
//! ```text
//! 1        Catalog
//! 2        Pages
//! 3        Font      Helvetica-Bold (standard 14, not embedded)
//! 4        ExtGState /ca 0.2 /CA 0.2 /BM /Multiply
//! 5 + 2k   Page k
//! 6 + 2k   Contents of page k
//! ```
//!
//! Page k has the size of source page k, so qpdf's overlay maps one onto
//! the other without scaling.

use crate::pdf::escape_literal;
use crate::pdf::geometry::{font_size, PageBox};
use std::fmt::Write as _;

const FIXED_OBJECTS: usize = 4;

fn num(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Content stream drawing `label` centred and rotated 45° on a page.
pub fn page_content(label: &str, page: &PageBox) -> String {
    let size = font_size(label.chars().count(), page.width);
    let text_width = label.chars().count() as f64 * size * 0.6;
    let mut s = String::new();
    let _ = writeln!(s, "q");
    let _ = writeln!(s, "/GS1 gs");
    let _ = writeln!(s, "0.85 0.15 0.15 rg");
    let _ = writeln!(s, "1 0 0 1 {} {} cm", num(page.width / 2.0), num(page.height / 2.0));
    let _ = writeln!(s, "0.7071 0.7071 -0.7071 0.7071 0 0 cm");
    let _ = writeln!(s, "BT");
    let _ = writeln!(s, "/F1 {} Tf", num(size));
    let _ = writeln!(s, "{} {} Td", num(-text_width / 2.0), num(-size * 0.35));
    let _ = writeln!(s, "({}) Tj", escape_literal(label));
    let _ = writeln!(s, "ET");
    let _ = write!(s, "Q");
    s
}

/// Complete overlay document, one page per entry of `pages`.
pub fn build_overlay(label: &str, pages: &[PageBox]) -> Vec<u8> {
    let total = FIXED_OBJECTS + 2 * pages.len();
    let page_id = |k: usize| FIXED_OBJECTS + 1 + 2 * k;

    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(total);
    bodies.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    let kids: Vec<String> = (0..pages.len()).map(|k| format!("{} 0 R", page_id(k))).collect();
    bodies.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
    );
    bodies.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );
    bodies.push(b"<< /Type /ExtGState /ca 0.2 /CA 0.2 /BM /Multiply >>".to_vec());

    for (k, page) in pages.iter().enumerate() {
        bodies.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R >> /ExtGState << /GS1 4 0 R >> >> \
                 /Contents {} 0 R >>",
                num(page.width),
                num(page.height),
                page_id(k) + 1
            )
            .into_bytes(),
        );
        let content = page_content(label, page);
        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(content.as_bytes());
        stream.extend_from_slice(b"\nendstream");
        bodies.push(stream);
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(total);
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", total + 1);
    for offset in offsets {
        let _ = write!(xref, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        total + 1,
        xref_offset
    );
    out.extend_from_slice(xref.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
        hay.windows(needle.len()).position(|w| w == needle)
    }

    fn a4() -> PageBox {
        PageBox { width: 595.0, height: 842.0 }
    }

    #[test]
    fn number_formatting() {
        assert_eq!(num(612.0), "612");
        assert_eq!(num(297.5), "297.5");
        assert_eq!(num(-0.001), "0");
        assert_eq!(num(-12.25), "-12.25");
    }

    #[test]
    fn content_stream_draws_rotated_label() {
        let c = page_content("JEAN (DUPONT)", &a4());
        assert!(c.starts_with("q\n/GS1 gs\n"));
        assert!(c.contains("1 0 0 1 297.5 421 cm"));
        assert!(c.contains("0.7071 0.7071 -0.7071 0.7071 0 0 cm"));
        assert!(c.contains("/F1 48 Tf"));
        assert!(c.contains(r"(JEAN \(DUPONT\)) Tj"));
        assert!(c.ends_with("ET\nQ"));
    }

    #[test]
    fn one_overlay_page_per_source_page() {
        let pdf = build_overlay("A", &[a4(), a4(), PageBox { width: 842.0, height: 595.0 }]);
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("/Count 3"));
        assert!(text.contains("/Kids [5 0 R 7 0 R 9 0 R]"));
        assert!(text.contains("/MediaBox [0 0 842 595]"));
        assert!(text.contains("<< /Size 11 /Root 1 0 R >>"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let pdf = build_overlay("WATERMARK", &[a4(), a4()]);
        let start = find(&pdf, b"startxref\n").unwrap() + b"startxref\n".len();
        let end = start + pdf[start..].iter().position(|b| *b == b'\n').unwrap();
        let xref_at: usize = std::str::from_utf8(&pdf[start..end]).unwrap().parse().unwrap();
        assert!(pdf[xref_at..].starts_with(b"xref\n0 9\n"));

        let table_start = xref_at + b"xref\n0 9\n".len();
        for i in 1..9 {
            let entry = &pdf[table_start + 20 * i..table_start + 20 * (i + 1)];
            assert_eq!(entry.len(), 20);
            assert!(entry.ends_with(b" n \n"));
            let offset: usize = std::str::from_utf8(&entry[..10]).unwrap().parse().unwrap();
            assert!(pdf[offset..].starts_with(format!("{i} 0 obj\n").as_bytes()));
        }
        assert!(pdf.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn stream_length_is_exact() {
        let pdf = build_overlay("X", &[a4()]);
        let len_at = find(&pdf, b"/Length ").unwrap() + b"/Length ".len();
        let len_end = len_at + pdf[len_at..].iter().position(|b| *b == b' ').unwrap();
        let declared: usize = std::str::from_utf8(&pdf[len_at..len_end]).unwrap().parse().unwrap();
        let data_at = find(&pdf, b"stream\n").unwrap() + b"stream\n".len();
        let data_end = find(&pdf, b"\nendstream").unwrap();
        assert_eq!(data_end - data_at, declared);
    }
}
