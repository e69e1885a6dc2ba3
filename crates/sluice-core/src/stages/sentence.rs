//! Rule-based sentence boundary detection.
//!
//! A boundary follows a run of `.`, `!` or `?` (plus any closing quotes or
//! brackets) when whitespace or end of text comes next. A period does not
//! end a sentence after a known abbreviation, after a single-letter
//! initial, or when the next word starts in lower case.

use std::collections::HashSet;

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "ft", "vs", "etc", "e.g", "i.e",
    "cf", "al", "approx", "dept", "est", "fig", "inc", "ltd", "co", "corp", "no", "vol", "pp",
    "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec", "u.s",
    "u.k", "gen", "gov", "sen", "rep", "rev", "capt", "col", "lt", "sgt",
];

const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}'];

#[derive(Debug, Clone)]
pub struct SentenceDetector {
    abbreviations: HashSet<String>,
}

impl SentenceDetector {
    pub fn new() -> Self {
        Self {
            abbreviations: ABBREVIATIONS.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split `text` into trimmed, non-empty sentences.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < chars.len() {
            let (_, c) = chars[i];
            if !matches!(c, '.' | '!' | '?') {
                i += 1;
                continue;
            }

            let term_start = chars[i].0;
            let mut j = i;
            while j < chars.len() && matches!(chars[j].1, '.' | '!' | '?') {
                j += 1;
            }
            while j < chars.len() && CLOSERS.contains(&chars[j].1) {
                j += 1;
            }
            let end = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());
            let at_boundary = j == chars.len() || chars[j].1.is_whitespace();

            if at_boundary && !self.suppressed(text, start, term_start, c, &chars[j..]) {
                push_trimmed(&mut sentences, &text[start..end]);
                start = end;
            }
            i = j.max(i + 1);
        }

        push_trimmed(&mut sentences, &text[start..]);
        sentences
    }

    fn suppressed(
        &self,
        text: &str,
        sentence_start: usize,
        term_start: usize,
        terminator: char,
        rest: &[(usize, char)],
    ) -> bool {
        if terminator != '.' {
            return false;
        }
        let token = text[sentence_start..term_start]
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or("")
            .trim_start_matches(|c: char| !c.is_alphanumeric());
        let lowered = token.to_lowercase();
        if self.abbreviations.contains(&lowered) {
            return true;
        }
        if token.chars().count() == 1 && token.chars().all(char::is_alphabetic) {
            return true;
        }
        rest.iter()
            .map(|(_, c)| *c)
            .find(|c| !c.is_whitespace())
            .map(|c| c.is_lowercase())
            .unwrap_or(false)
    }
}

impl Default for SentenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}
