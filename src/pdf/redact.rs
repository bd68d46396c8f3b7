//! Sensitive-identifier masking over raw PDF bytes.
//!
//! Patterns run as byte regexes with Unicode mode off, so `\b`, `\s` and
//! classes are ASCII-only and the buffer is never decoded. Masking never
//! changes length: every replaced byte becomes `X`, which keeps stream
//! `/Length` values and xref offsets of the decomposed file valid.
//!
//! The buffer is read as one byte per character (latin1), so pattern
//! characters in U+0080..=U+00FF are rewritten to the matching `\xNN` byte
//! escape before compiling. Characters above U+00FF cannot occur and are
//! rejected.

use regex::bytes::{Regex, RegexBuilder};

/// Compiled contiguous pattern plus optional split-token pattern.
#[derive(Debug, Clone)]
pub struct RedactionPatterns {
    contiguous: Regex,
    split: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&latin1_pattern(pattern)?)
        .unicode(false)
        .build()
}

/// `pattern` with every non-ASCII latin1 character written as `\xNN`.
fn latin1_pattern(pattern: &str) -> Result<String, regex::Error> {
    let mut out = String::with_capacity(pattern.len());
    let mut escaped = false;
    for ch in pattern.chars() {
        let code = u32::from(ch);
        if code < 0x80 {
            escaped = ch == '\\' && !escaped;
            out.push(ch);
            continue;
        }
        if code > 0xFF {
            return Err(regex::Error::Syntax(format!(
                "'{ch}' (U+{code:04X}) is outside latin1 and cannot match a PDF byte"
            )));
        }
        // `\é` is a literal `é`, same as the bare character.
        if escaped {
            out.pop();
            escaped = false;
        }
        out.push_str(&format!("\\x{code:02X}"));
    }
    Ok(out)
}

impl RedactionPatterns {
    pub fn compile(contiguous: &str, split: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            contiguous: compile(contiguous)?,
            split: split.map(compile).transpose()?,
        })
    }

    /// Mask every occurrence in place and return how many were masked.
    ///
    /// Contiguous matches are replaced with `X` over their full length. Then
    /// split-token matches have only the ASCII letters and digits inside
    /// their capture groups replaced, leaving string delimiters, kerning
    /// numbers and separators as they were.
    pub fn apply(&self, bytes: &mut [u8]) -> usize {
        let ranges: Vec<_> = self.contiguous.find_iter(bytes).map(|m| m.range()).collect();
        for range in &ranges {
            bytes[range.clone()].fill(b'X');
        }
        let mut count = ranges.len();

        if let Some(ref split) = self.split {
            let mut groups = Vec::new();
            for caps in split.captures_iter(bytes) {
                count += 1;
                groups.extend(caps.iter().skip(1).flatten().map(|m| m.range()));
            }
            for range in groups {
                for b in &mut bytes[range] {
                    if b.is_ascii_alphanumeric() {
                        *b = b'X';
                    }
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_split_token_pattern, DEFAULT_REDACTION_PATTERN};

    fn defaults() -> RedactionPatterns {
        let split = default_split_token_pattern();
        RedactionPatterns::compile(DEFAULT_REDACTION_PATTERN, Some(&split)).unwrap()
    }

    #[test]
    fn contiguous_match_is_masked_to_same_length() {
        let mut buf = b"BT (Ref FR A 12 34567 ABC end) Tj ET".to_vec();
        let n = defaults().apply(&mut buf);
        assert_eq!(n, 1);
        assert_eq!(buf, b"BT (Ref XXXXXXXXXXXXXXXXX end) Tj ET".to_vec());
    }

    #[test]
    fn separators_are_optional() {
        let mut buf = b"(FRA1234567ABC)".to_vec();
        assert_eq!(defaults().apply(&mut buf), 1);
        assert_eq!(buf, b"(XXXXXXXXXXXXX)".to_vec());
    }

    #[test]
    fn split_tokens_keep_kerning_and_delimiters() {
        let mut buf = b"[(FR)-120(A)(12) (34567)(ABC)] TJ".to_vec();
        let n = defaults().apply(&mut buf);
        assert_eq!(n, 1);
        assert_eq!(buf, b"[(XX)-120(X)(XX) (XXXXX)(XXX)] TJ".to_vec());
    }

    #[test]
    fn split_tokens_with_anchor_characters() {
        let mut buf = b"[(FR-)-33.5(A )(12.)(34567)( ABC)] TJ".to_vec();
        assert_eq!(defaults().apply(&mut buf), 1);
        assert_eq!(buf, b"[(XX-)-33.5(X )(XX.)(XXXXX)( XXX)] TJ".to_vec());
    }

    #[test]
    fn no_match_leaves_bytes_untouched() {
        let original = b"BT (Quarterly report 2024) Tj ET".to_vec();
        let mut buf = original.clone();
        assert_eq!(defaults().apply(&mut buf), 0);
        assert_eq!(buf, original);
    }

    #[test]
    fn lowercase_does_not_match() {
        let mut buf = b"(fr a 12 34567 abc)".to_vec();
        assert_eq!(defaults().apply(&mut buf), 0);
    }

    #[test]
    fn non_utf8_bytes_are_fine() {
        let mut buf = vec![0xff, 0xfe, b' '];
        buf.extend_from_slice(b"FR A 12 34567 ABC");
        buf.push(0x80);
        assert_eq!(defaults().apply(&mut buf), 1);
        assert_eq!(&buf[3..20], b"XXXXXXXXXXXXXXXXX");
        assert_eq!(buf[0], 0xff);
    }

    #[test]
    fn custom_pattern_without_split() {
        let p = RedactionPatterns::compile(r"\d{3}-\d{2}-\d{4}", None).unwrap();
        let mut buf = b"(ssn 123-45-6789)".to_vec();
        assert_eq!(p.apply(&mut buf), 1);
        assert_eq!(buf, b"(ssn XXXXXXXXXXX)".to_vec());
    }

    #[test]
    fn latin1_pattern_characters_match_single_bytes() {
        let p = RedactionPatterns::compile(r"Né \d{5}", None).unwrap();
        let mut buf = b"(N\xE9 12345) Tj".to_vec();
        assert_eq!(p.apply(&mut buf), 1);
        assert_eq!(buf, b"(XXXXXXXX) Tj".to_vec());

        // The UTF-8 spelling of the same text is not what a QDF stream holds.
        let mut utf8 = "(Né 12345)".as_bytes().to_vec();
        assert_eq!(p.apply(&mut utf8), 0);
    }

    #[test]
    fn latin1_characters_in_classes_and_escapes() {
        let p = RedactionPatterns::compile(r"[àé]\ç\d", None).unwrap();
        let mut buf = b"(a\xE0\xE71 \xE9\xE72)".to_vec();
        assert_eq!(p.apply(&mut buf), 2);
        assert_eq!(buf, b"(aXXX XXX)".to_vec());
    }

    #[test]
    fn escaped_backslash_before_latin1_stays_a_backslash() {
        assert_eq!(latin1_pattern(r"\\é").unwrap(), r"\\\xE9");
        assert_eq!(latin1_pattern(r"\é").unwrap(), r"\xE9");
        assert_eq!(latin1_pattern(r"a\d").unwrap(), r"a\d");
    }

    #[test]
    fn characters_beyond_latin1_are_rejected() {
        assert!(RedactionPatterns::compile("€ \\d+", None).is_err());
    }

    #[test]
    fn malformed_pattern_is_an_error() {
        assert!(RedactionPatterns::compile("([unclosed", None).is_err());
    }
}
