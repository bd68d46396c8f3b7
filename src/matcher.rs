//! Fuzzy person-name to file matching.
//!
//! Files are matched on the stem of their last path component, folded to
//! lowercase ASCII words: `Dupont_Jéan-Marc.pdf` becomes ` dupont jean marc `
//! (padded so word-boundary checks are plain substring searches).

use crate::cancel::CancelSignal;
use crate::error::PrepResult;
use deunicode::deunicode;
use tracing::debug;

const LAST_HIT: i32 = 20;
const FIRST_HIT: i32 = 10;
const BOTH_HIT: i32 = 100;
const ADJACENT: i32 = 5;
const NEARBY: i32 = 2;
const LAST_FIRST_ORDER: i32 = 3;
const FIRST_LAST_ORDER: i32 = 1;

/// Transliterate to ASCII, lowercase, and collapse every run of
/// non-alphanumeric characters into one space.
pub fn normalize_token(s: &str) -> String {
    let ascii = deunicode(s).to_lowercase();
    let mut out = String::with_capacity(ascii.len());
    let mut gap = false;
    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push(' ');
            }
            gap = false;
            out.push(ch);
        } else {
            gap = true;
        }
    }
    out
}

/// Stem of the last path component, e.g. `a/b/Dupont.Jean.pdf` → `Dupont.Jean`.
fn file_stem(candidate: &str) -> &str {
    let name = candidate.rsplit(['/', '\\']).next().unwrap_or(candidate);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn file_name(candidate: &str) -> &str {
    candidate.rsplit(['/', '\\']).next().unwrap_or(candidate)
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    /// ` word word `
    token: String,
}

/// Scores candidate file names against first/last name pairs.
#[derive(Debug, Clone, Default)]
pub struct PdfFileMatcher {
    candidates: Vec<Candidate>,
}

impl PdfFileMatcher {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates = names
            .into_iter()
            .map(|n| {
                let name = n.into();
                let token = format!(" {} ", normalize_token(file_stem(&name)));
                Candidate { name, token }
            })
            .collect();
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Score of one candidate name. Zero means no match.
    pub fn score(first: &str, last: &str, candidate: &str) -> i32 {
        let token = format!(" {} ", normalize_token(file_stem(candidate)));
        score_token(&padded(first), &padded(last), &token)
    }

    /// Highest-scoring candidate for a (first, last) pair.
    pub fn find_best_match(&self, first: &str, last: &str) -> Option<&str> {
        self.best(first, last, None).ok().flatten()
    }

    /// [`Self::find_best_match`], checking `cancel` for every candidate.
    pub fn find_best_match_cancellable(
        &self,
        first: &str,
        last: &str,
        cancel: &CancelSignal,
    ) -> PrepResult<Option<&str>> {
        self.best(first, last, Some(cancel))
    }

    /// Resolve a free-text person reference such as `"Jean Dupont"`.
    ///
    /// Tries `first last`, then `last first`, then the whole string as a
    /// single last-name token.
    pub fn find_by_name_reference(&self, reference: &str) -> Option<&str> {
        self.by_reference(reference, None).ok().flatten()
    }

    pub fn find_by_name_reference_cancellable(
        &self,
        reference: &str,
        cancel: &CancelSignal,
    ) -> PrepResult<Option<&str>> {
        self.by_reference(reference, Some(cancel))
    }

    fn by_reference(
        &self,
        reference: &str,
        cancel: Option<&CancelSignal>,
    ) -> PrepResult<Option<&str>> {
        let reference = reference.trim();
        if let Some((a, b)) = reference.split_once(' ') {
            if let Some(hit) = self.best(a, b, cancel)? {
                return Ok(Some(hit));
            }
            if let Some(hit) = self.best(b, a, cancel)? {
                return Ok(Some(hit));
            }
        }
        self.best("", reference, cancel)
    }

    fn best(
        &self,
        first: &str,
        last: &str,
        cancel: Option<&CancelSignal>,
    ) -> PrepResult<Option<&str>> {
        let first = padded(first);
        let last = padded(last);
        let mut best: Option<(i32, &Candidate)> = None;
        for candidate in &self.candidates {
            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            let score = score_token(&first, &last, &candidate.token);
            if score <= 0 {
                continue;
            }
            best = match best {
                Some((top, current)) if !better(score, candidate, top, current) => {
                    Some((top, current))
                }
                _ => Some((score, candidate)),
            };
        }
        if let Some((score, c)) = best {
            debug!("Matched '{}' '{}' → {} (score {})", first.trim(), last.trim(), c.name, score);
        }
        Ok(best.map(|(_, c)| c.name.as_str()))
    }
}

/// `" token "` for a non-empty normalized token, else empty.
fn padded(s: &str) -> String {
    let t = normalize_token(s);
    if t.is_empty() {
        t
    } else {
        format!(" {t} ")
    }
}

fn better(score: i32, c: &Candidate, top: i32, current: &Candidate) -> bool {
    if score != top {
        return score > top;
    }
    let (a, b) = (file_name(&c.name).len(), file_name(&current.name).len());
    if a != b {
        return a < b;
    }
    c.name.to_lowercase() < current.name.to_lowercase()
}

fn score_token(first: &str, last: &str, token: &str) -> i32 {
    let first_at = (!first.is_empty()).then(|| token.find(first)).flatten();
    let last_at = (!last.is_empty()).then(|| token.find(last)).flatten();
    let both_supplied = !first.is_empty() && !last.is_empty();

    match (first_at, last_at) {
        (None, None) => 0,
        (Some(_), None) | (None, Some(_)) if both_supplied => 0,
        (None, Some(_)) => LAST_HIT,
        (Some(_), None) => FIRST_HIT,
        (Some(f), Some(l)) => {
            let mut score = LAST_HIT + FIRST_HIT + BOTH_HIT;
            let distance = f.abs_diff(l);
            if distance <= first.len().max(last.len()) {
                score += ADJACENT;
            } else if distance <= token.len() / 2 {
                score += NEARBY;
            }
            score += if l < f { LAST_FIRST_ORDER } else { FIRST_LAST_ORDER };
            score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_accents_and_separators() {
        assert_eq!(normalize_token("Jean-Marc"), "jean marc");
        assert_eq!(normalize_token("  Éloïse__O'Brien  "), "eloise o brien");
        assert_eq!(normalize_token("--"), "");
    }

    #[test]
    fn stem_uses_last_component() {
        assert_eq!(file_stem("board/Dupont.Jean.pdf"), "Dupont.Jean");
        assert_eq!(file_stem(r"a\b\x.pdf"), "x");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[test]
    fn best_match_prefers_both_names() {
        let m = PdfFileMatcher::new(["dupont_jean.pdf", "martin_jean.pdf"]);
        assert_eq!(m.find_best_match("Jean", "Dupont"), Some("dupont_jean.pdf"));
    }

    #[test]
    fn hyphenated_first_name_reference() {
        let m = PdfFileMatcher::new(["martin_jean-marc.pdf"]);
        assert_eq!(m.find_by_name_reference("Jean-Marc Martin"), Some("martin_jean-marc.pdf"));
    }

    #[test]
    fn scores() {
        // last, first, adjacent, last-before-first
        assert_eq!(PdfFileMatcher::score("Jean", "Dupont", "dupont_jean.pdf"), 138);
        // first-before-last
        assert_eq!(PdfFileMatcher::score("Jean", "Dupont", "jean_dupont.pdf"), 136);
        assert_eq!(PdfFileMatcher::score("", "Dupont", "dupont_jean.pdf"), 20);
        assert_eq!(PdfFileMatcher::score("Jean", "", "dupont_jean.pdf"), 10);
        assert_eq!(PdfFileMatcher::score("Jean", "Durand", "dupont_jean.pdf"), 0);
        assert_eq!(PdfFileMatcher::score("Ann", "Dupont", "dupont_anne.pdf"), 0);
    }

    #[test]
    fn partial_words_do_not_match() {
        let m = PdfFileMatcher::new(["dupontel.pdf"]);
        assert_eq!(m.find_by_name_reference("Dupont"), None);
    }

    #[test]
    fn ties_prefer_shorter_then_lexicographic() {
        let m = PdfFileMatcher::new(["b/dupont_extra.pdf", "a/dupont.pdf", "z/Dupont.pdf"]);
        assert_eq!(m.find_by_name_reference("Dupont"), Some("a/dupont.pdf"));
    }

    #[test]
    fn reversed_reference_order_is_tried() {
        let m = PdfFileMatcher::new(["reports/dupont_jean.pdf"]);
        assert_eq!(m.find_by_name_reference("Dupont Jean"), Some("reports/dupont_jean.pdf"));
        assert_eq!(m.find_by_name_reference("Nobody Here"), None);
    }

    #[test]
    fn cancellable_lookup_stops() {
        let m = PdfFileMatcher::new(["dupont_jean.pdf"]);
        let cancel = CancelSignal::new();
        assert_eq!(
            m.find_best_match_cancellable("Jean", "Dupont", &cancel).unwrap(),
            Some("dupont_jean.pdf")
        );
        cancel.cancel();
        assert!(m
            .find_by_name_reference_cancellable("Jean Dupont", &cancel)
            .unwrap_err()
            .is_cancelled());
    }
}
