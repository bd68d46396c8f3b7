//! Narrow, byte-level PDF helpers.
//!
//! Nothing here parses a whole document. Each helper touches only the
//! structure one stage needs, on files qpdf has already normalized:
//!
//! * [`redact`]   — pattern masking over raw token bytes
//! * [`geometry`] — page sizes from `qpdf --json`
//! * [`overlay`]  — a hand-written watermark PDF
//! * [`info`]     — Info dictionary and trailer surgery on QDF output

pub mod geometry;
pub mod info;
pub mod overlay;
pub mod redact;

/// Recipient name as printed on the page: ASCII transliteration, trimmed,
/// upper-cased. May be empty.
pub fn display_name(recipient: &str) -> String {
    deunicode::deunicode(recipient).trim().to_uppercase()
}

/// Escape `text` for use inside a PDF literal string `( … )`.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_transliterates() {
        assert_eq!(display_name("  Zoë Ångström "), "ZOE ANGSTROM");
        assert_eq!(display_name("   "), "");
    }

    #[test]
    fn escape_literal_handles_delimiters() {
        assert_eq!(escape_literal(r"a(b)c\d"), r"a\(b\)c\\d");
    }
}
