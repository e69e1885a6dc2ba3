//! Windowed text chunking.
//!
//! Reads the text in `source`, splits it, post-processes the pieces, and
//! attaches one child record per final chunk. The stage itself never fans
//! out.
//!
//! # Options
//!
//! | Option | Default | Meaning |
//! |--------|---------|---------|
//! | `source` | required | field holding the text |
//! | `dest` | `"chunk"` | child field receiving the chunk text |
//! | `chunking_method` | `sentence` | `fixed`, `paragraph`, `sentence` or `custom` |
//! | `regex` | | separator pattern, required for `custom` |
//! | `length_to_split` | | window size in characters, required for `fixed` |
//! | `clean_chunks` | `false` | collapse line breaks to single spaces and trim |
//! | `pre_merge_min_chunk_len` | | join neighbors until this many characters |
//! | `pre_merge_max_chunk_len` | | truncate before merging |
//! | `chunks_to_merge` | `1` | chunks joined into one output chunk |
//! | `chunks_to_overlap` | | chunks shared by consecutive merge windows |
//! | `overlap_percentage` | `0` | share of each neighbor borrowed after merging |
//! | `character_limit` | | truncate after merging and overlap |
//!
//! # Processing order
//!
//! 1. split
//! 2. clean
//! 3. pre-merge by minimum length
//! 4. pre-merge truncation
//! 5. count-overlap windows, or plain merge followed by percentage overlap
//! 6. final truncation
//!
//! All lengths are counted in characters.
//!
//! # Children
//!
//! Child `n` (1-based) has id `<parent>-<n>` and fields `parent_id`,
//! `chunk_number`, `total_chunks`, `offset` (sum of the lengths of the chunks
//! before it), `length`, and the chunk text under `dest`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::sentence::SentenceDetector;
use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};

/// A line break (`\r\n` or any single terminator) with surrounding ASCII whitespace.
static LINE_BREAK_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\t\n\x0B\x0C\r ]*(?:\r\n|[\n\x0B\x0C\r\x{85}\x{2028}\x{2029}])[\t\n\x0B\x0C\r ]*")
        .expect("static pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkingMethod {
    Fixed,
    Paragraph,
    Sentence,
    Custom,
}

impl ChunkingMethod {
    fn parse(stage: &str, s: &str) -> Result<Self, StageError> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(ChunkingMethod::Fixed),
            "paragraph" => Ok(ChunkingMethod::Paragraph),
            "sentence" => Ok(ChunkingMethod::Sentence),
            "custom" => Ok(ChunkingMethod::Custom),
            other => Err(StageError::config(
                stage,
                format!(
                    "unknown chunking_method '{}': expected fixed, paragraph, sentence, or custom",
                    other
                ),
            )),
        }
    }
}

pub struct ChunkText {
    name: String,
    source: String,
    dest: String,
    method: ChunkingMethod,
    separator: Option<Regex>,
    length_to_split: Option<usize>,
    clean_chunks: bool,
    pre_merge_min_chunk_len: Option<usize>,
    pre_merge_max_chunk_len: Option<usize>,
    chunks_to_merge: usize,
    chunks_to_overlap: Option<usize>,
    overlap_percentage: usize,
    character_limit: Option<usize>,
    sentences: Option<SentenceDetector>,
}

impl ChunkText {
    pub fn spec() -> StageSpec {
        StageSpec::new().required(&["source"]).optional(&[
            "dest",
            "chunking_method",
            "regex",
            "length_to_split",
            "clean_chunks",
            "pre_merge_min_chunk_len",
            "pre_merge_max_chunk_len",
            "chunks_to_merge",
            "chunks_to_overlap",
            "overlap_percentage",
            "character_limit",
        ])
    }

    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        Self::spec().validate(config)?;
        let name = config.label("chunk_text");
        let fail = |message: &str| StageError::config(name.clone(), message);

        let method = match config.get_str("chunking_method")? {
            Some(m) => ChunkingMethod::parse(&name, &m)?,
            None => ChunkingMethod::Sentence,
        };

        let separator = match (method, config.get_str("regex")?) {
            (ChunkingMethod::Custom, Some(pattern)) if !pattern.is_empty() => Some(
                Regex::new(&pattern)
                    .map_err(|e| fail(&format!("invalid regex '{}': {}", pattern, e)))?,
            ),
            (ChunkingMethod::Custom, _) => {
                return Err(fail("custom chunking requires a non-empty regex"))
            }
            _ => None,
        };

        let length_to_split = positive(config, "length_to_split")?;
        if method == ChunkingMethod::Fixed && length_to_split.is_none() {
            return Err(fail(
                "fixed chunking requires a positive length_to_split",
            ));
        }

        let chunks_to_merge = config.get_i64("chunks_to_merge")?.unwrap_or(1);
        if chunks_to_merge < 1 {
            return Err(fail("chunks_to_merge must be at least 1"));
        }

        let overlap_percentage = config.get_i64("overlap_percentage")?.unwrap_or(0);
        if !(0..=100).contains(&overlap_percentage) {
            return Err(fail("overlap_percentage must be between 0 and 100"));
        }

        let chunks_to_overlap = config.get_i64("chunks_to_overlap")?;
        if let Some(overlap) = chunks_to_overlap {
            if overlap_percentage > 0 {
                return Err(fail(
                    "chunks_to_overlap and overlap_percentage cannot both be set",
                ));
            }
            if overlap < 0 || overlap >= chunks_to_merge {
                return Err(fail(
                    "chunks_to_overlap must be at least 0 and smaller than chunks_to_merge",
                ));
            }
        }

        Ok(Self {
            source: config.require_str("source")?,
            dest: config.get_str("dest")?.unwrap_or_else(|| "chunk".to_string()),
            method,
            separator,
            length_to_split: if method == ChunkingMethod::Fixed {
                length_to_split
            } else {
                None
            },
            clean_chunks: config.get_bool("clean_chunks")?.unwrap_or(false),
            pre_merge_min_chunk_len: positive(config, "pre_merge_min_chunk_len")?,
            pre_merge_max_chunk_len: positive(config, "pre_merge_max_chunk_len")?,
            chunks_to_merge: chunks_to_merge as usize,
            chunks_to_overlap: chunks_to_overlap.map(|v| v as usize),
            overlap_percentage: overlap_percentage as usize,
            character_limit: positive(config, "character_limit")?,
            sentences: None,
            name,
        })
    }

    /// Split and post-process `content` into the final chunk texts.
    pub fn chunk(&self, content: &str) -> Result<Vec<String>, StageError> {
        let mut chunks = match self.method {
            ChunkingMethod::Fixed => split_by_size(content, self.length_to_split.unwrap_or(1)),
            ChunkingMethod::Paragraph => split_paragraphs(content),
            ChunkingMethod::Custom => match &self.separator {
                Some(re) => split_with(re, content),
                None => vec![content.to_string()],
            },
            ChunkingMethod::Sentence => {
                let detector = self.sentences.as_ref().ok_or_else(|| {
                    StageError::lifecycle(&self.name, "sentence detector not loaded; call start() first")
                })?;
                detector.detect(content)
            }
        };

        if self.clean_chunks {
            clean(&mut chunks);
        }
        if let Some(min) = self.pre_merge_min_chunk_len {
            chunks = merge_to_min_length(chunks, min);
        }
        if let Some(max) = self.pre_merge_max_chunk_len {
            truncate_all(&mut chunks, max);
        }
        match self.chunks_to_overlap {
            Some(overlap) => chunks = merge_with_overlap(chunks, self.chunks_to_merge, overlap),
            None => {
                if self.chunks_to_merge > 1 {
                    chunks = merge(chunks, self.chunks_to_merge);
                }
                if self.overlap_percentage > 0 {
                    chunks = overlap_by_percentage(&chunks, self.overlap_percentage);
                }
            }
        }
        if let Some(limit) = self.character_limit {
            truncate_all(&mut chunks, limit);
        }
        Ok(chunks)
    }
}

impl Stage for ChunkText {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        if self.method == ChunkingMethod::Sentence {
            self.sentences = Some(SentenceDetector::new());
        }
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let content = match record.get_str(&self.source) {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => {
                debug!(record = record.id(), field = %self.source, "no text to chunk, skipping");
                return Ok(None);
            }
        };

        let chunks = self.chunk(&content)?;
        let parent_id = record.id().to_string();
        let total = chunks.len() as i64;
        let mut offset: i64 = 0;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let number = index as i64 + 1;
            let length = chunk.chars().count() as i64;
            let mut child = Record::new(format!("{}-{}", parent_id, number));
            child.set_field("parent_id", parent_id.as_str())?;
            child.set_field("chunk_number", number)?;
            child.set_field("total_chunks", total)?;
            child.set_field("offset", offset)?;
            child.set_field("length", length)?;
            child.set_field(&self.dest, chunk)?;
            offset += length;
            record.add_child(child);
        }
        Ok(None)
    }
}

/// Optional integer option that must be positive when present.
fn positive(config: &StageConfig, key: &str) -> Result<Option<usize>, StageError> {
    match config.get_i64(key)? {
        None => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as usize)),
        Some(_) => Err(StageError::config(
            config.label("chunk_text"),
            format!("{} must be a positive integer", key),
        )),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn first_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn last_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if n >= len {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

fn split_by_size(content: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
}

/// Split on `re`. A leading empty piece is kept unless it comes from an
/// empty match at the start; trailing empty pieces are dropped.
fn split_with(re: &Regex, content: &str) -> Vec<String> {
    let mut pieces: Vec<String> = re.split(content).map(str::to_string).collect();
    if let Some(m) = re.find(content) {
        if m.start() == 0 && m.end() == 0 && pieces.first().is_some_and(|p| p.is_empty()) {
            pieces.remove(0);
        }
    }
    drop_trailing_empty(&mut pieces);
    pieces
}

fn drop_trailing_empty(pieces: &mut Vec<String>) {
    while pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\x0B' | '\x0C' | '\r' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn is_separator_space(c: char) -> bool {
    matches!(c, ' ' | '\t') || is_line_break(c)
}

/// Split where a whitespace run holds two or more line breaks (`\r\n`
/// counting as one). The whole run is the separator.
fn split_paragraphs(content: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !is_separator_space(chars[i].1) {
            i += 1;
            continue;
        }
        let run_start = chars[i].0;
        let mut breaks = 0;
        while i < chars.len() && is_separator_space(chars[i].1) {
            let c = chars[i].1;
            if c == '\r' && chars.get(i + 1).map(|(_, n)| *n) == Some('\n') {
                breaks += 1;
                i += 2;
                continue;
            }
            if is_line_break(c) {
                breaks += 1;
            }
            i += 1;
        }
        if breaks >= 2 {
            let run_end = chars.get(i).map(|(b, _)| *b).unwrap_or(content.len());
            pieces.push(content[piece_start..run_start].to_string());
            piece_start = run_end;
        }
    }

    pieces.push(content[piece_start..].to_string());
    drop_trailing_empty(&mut pieces);
    pieces
}

fn clean(chunks: &mut [String]) {
    for chunk in chunks.iter_mut() {
        *chunk = LINE_BREAK_RUN.replace_all(chunk, " ").trim().to_string();
    }
}

/// Join neighbors until each emitted chunk reaches `min` characters. The
/// running length includes one pending separator space. An undersized tail
/// folds onto the previously emitted chunk.
fn merge_to_min_length(chunks: Vec<String>, min: usize) -> Vec<String> {
    if chunks.len() <= 1 {
        return chunks;
    }

    let total = chunks.len();
    let mut merged: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for (i, chunk) in chunks.into_iter().enumerate() {
        current_len += char_len(&chunk) + 1;
        current.push_str(&chunk);
        current.push(' ');

        let is_last = i + 1 == total;
        if current_len < min && !is_last {
            continue;
        }
        if current_len < min && is_last {
            match merged.pop() {
                Some(previous) => current = format!("{} {}", previous, current),
                None => warn!(
                    min,
                    "all chunks combined stay below pre_merge_min_chunk_len; merging into one"
                ),
            }
        }
        merged.push(current.trim().to_string());
        current.clear();
        current_len = 0;
    }
    merged
}

fn truncate_all(chunks: &mut [String], limit: usize) {
    for chunk in chunks.iter_mut() {
        if char_len(chunk) > limit {
            *chunk = first_chars(chunk, limit).trim().to_string();
        }
    }
}

/// Windows of `size` chunks advancing by `size - overlap`. Left unchanged
/// when there are fewer chunks than one window.
fn merge_with_overlap(chunks: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    if chunks.is_empty() || size > chunks.len() {
        return chunks;
    }
    let step = size - overlap;
    let end = chunks.len() - overlap;
    (0..end)
        .step_by(step)
        .map(|start| {
            let stop = (start + size).min(chunks.len());
            chunks[start..stop].join(" ").trim().to_string()
        })
        .collect()
}

fn merge(chunks: Vec<String>, size: usize) -> Vec<String> {
    chunks
        .chunks(size)
        .map(|group| group.join(" ").trim().to_string())
        .collect()
}

/// Extend each chunk with the tail of the previous chunk and the head of the
/// next, each `len * percentage / 100` characters of the current chunk.
fn overlap_by_percentage(chunks: &[String], percentage: usize) -> Vec<String> {
    if chunks.len() <= 1 {
        return chunks.to_vec();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let borrow = char_len(chunk) * percentage / 100;
            let mut out = String::new();
            if i > 0 {
                out.push_str(last_chars(&chunks[i - 1], borrow));
                out.push(' ');
            }
            out.push_str(chunk);
            if let Some(next) = chunks.get(i + 1) {
                out.push(' ');
                out.push_str(first_chars(next, borrow));
            }
            out.trim().to_string()
        })
        .collect()
}
