//! Multi-term matching over an Aho-Corasick automaton.
//!
//! A hit counts as a whole word when the characters on either side of it
//! are not alphanumeric (or are the ends of the text). The check looks at
//! the neighbors instead of the term, so terms such as `c++` or `.net` match
//! like any other. Case-insensitive matchers lowercase both the terms and
//! the text.

use aho_corasick::{AhoCorasick, MatchKind};

/// One hit: the index of the term that matched and its byte span in the
/// (possibly lowercased) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordMatch {
    pub term: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct WordMatcher {
    automaton: AhoCorasick,
    ignore_case: bool,
    whole_words: bool,
}

impl WordMatcher {
    /// Build a whole-word matcher. Empty terms are rejected.
    pub fn new<S: AsRef<str>>(terms: &[S], ignore_case: bool) -> Result<Self, String> {
        if let Some(index) = terms.iter().position(|t| t.as_ref().is_empty()) {
            return Err(format!("term {} is empty", index));
        }
        let patterns: Vec<String> = terms
            .iter()
            .map(|t| {
                if ignore_case {
                    t.as_ref().to_lowercase()
                } else {
                    t.as_ref().to_string()
                }
            })
            .collect();
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            automaton,
            ignore_case,
            whole_words: true,
        })
    }

    /// Also accept hits inside longer words.
    pub fn with_whole_words(mut self, whole_words: bool) -> Self {
        self.whole_words = whole_words;
        self
    }

    pub fn is_match(&self, text: &str) -> bool {
        let text = self.normalize(text);
        self.automaton
            .find_overlapping_iter(text.as_str())
            .any(|m| self.accepts(&text, m.start(), m.end()))
    }

    /// Every accepted hit, ordered by position. With `ignore_overlaps`,
    /// overlapping hits are resolved leftmost first, then longest.
    pub fn find_all(&self, text: &str, ignore_overlaps: bool) -> Vec<WordMatch> {
        let text = self.normalize(text);
        let mut hits: Vec<WordMatch> = self
            .automaton
            .find_overlapping_iter(text.as_str())
            .filter(|m| self.accepts(&text, m.start(), m.end()))
            .map(|m| WordMatch {
                term: m.pattern().as_usize(),
                start: m.start(),
                end: m.end(),
            })
            .collect();
        hits.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        if !ignore_overlaps {
            return hits;
        }

        let mut kept: Vec<WordMatch> = Vec::with_capacity(hits.len());
        for hit in hits {
            if kept.last().map_or(true, |last| hit.start >= last.end) {
                kept.push(hit);
            }
        }
        kept
    }

    fn normalize(&self, text: &str) -> String {
        if self.ignore_case {
            text.to_lowercase()
        } else {
            text.to_string()
        }
    }

    fn accepts(&self, text: &str, start: usize, end: usize) -> bool {
        if !self.whole_words {
            return true;
        }
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_terms_match_as_words() {
        let m = WordMatcher::new(&["c++", ".net"], true).unwrap();
        assert!(m.is_match("I write c++ daily"));
        assert!(m.is_match("C++"));
        assert!(m.is_match("moved to .NET, then back"));
        assert!(!m.is_match("c++x"));
        assert!(!m.is_match("asp.net"));
    }

    #[test]
    fn test_whole_word_rejects_inner_hits() {
        let m = WordMatcher::new(&["rust"], false).unwrap();
        assert!(!m.is_match("trusty rusty"));
        assert!(m.is_match("rust-lang"));
        assert!(!m.is_match("Rust"));
        let partial = WordMatcher::new(&["rust"], false)
            .unwrap()
            .with_whole_words(false);
        assert!(partial.is_match("trusty"));
    }

    #[test]
    fn test_inner_hit_does_not_hide_a_later_word() {
        let m = WordMatcher::new(&["new", "new york"], true).unwrap();
        let hits = m.find_all("renew in New York", true);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, 1);
    }

    #[test]
    fn test_find_all_overlaps() {
        let m = WordMatcher::new(&["united states", "states", "china"], true).unwrap();
        let text = "United States and China";
        let terms: Vec<usize> = m.find_all(text, true).iter().map(|h| h.term).collect();
        assert_eq!(terms, vec![0, 2]);
        let all: Vec<usize> = m.find_all(text, false).iter().map(|h| h.term).collect();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_term_rejected() {
        assert!(WordMatcher::new(&["ok", ""], false).is_err());
    }
}
