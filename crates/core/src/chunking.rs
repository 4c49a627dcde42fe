use crate::error::IndexError;
use crate::models::{Chunk, SourceRecord};
use std::iter::FusedIterator;
use std::ops::Range;

/// Boundaries tried from largest to smallest before falling back to a hard cut.
const PARAGRAPH_SEPARATORS: &[&str] = &["\n\n"];
const LINE_SEPARATORS: &[&str] = &["\n"];
const SENTENCE_SEPARATORS: &[&str] = &[". ", "! ", "? "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.max_chars == 0 {
            return Err(IndexError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IndexError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a document into sections, each starting at an occurrence of
/// `delimiter` (the delimiter stays with the section it opens). Sections are
/// trimmed and blank ones dropped.
pub fn split_sections<'a>(text: &'a str, delimiter: &str) -> Vec<&'a str> {
    if delimiter.is_empty() {
        return match text.trim() {
            "" => Vec::new(),
            trimmed => vec![trimmed],
        };
    }

    let mut sections = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(delimiter) {
        if index > start {
            sections.push(&text[start..index]);
        }
        start = index;
    }
    sections.push(&text[start..]);

    sections
        .into_iter()
        .map(str::trim)
        .filter(|section| !section.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkingConfig::default(),
        }
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IndexError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Byte ranges of each chunk within `text`. Each call starts a fresh pass.
    pub fn spans<'a>(&self, text: &'a str) -> Spans<'a> {
        let end = text.trim_end().len();
        let cursor = text.len() - text.trim_start().len();
        Spans {
            text,
            cursor: cursor.min(end),
            end,
            config: self.config,
        }
    }

    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            spans: self.spans(text),
        }
    }

    /// Chunks of `text`, each carrying a copy of the record it came from.
    pub fn chunk_record<'a>(
        &self,
        text: &'a str,
        record: &'a SourceRecord,
    ) -> impl Iterator<Item = Chunk> + 'a {
        self.chunks(text).map(move |piece| Chunk {
            text: piece.to_string(),
            metadata: record.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Spans<'a> {
    text: &'a str,
    cursor: usize,
    end: usize,
    config: ChunkingConfig,
}

impl<'a> Iterator for Spans<'a> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let start = self.cursor;
        let rest = &self.text[start..self.end];
        let window_end = match rest.char_indices().nth(self.config.max_chars) {
            Some((offset, _)) => start + offset,
            None => {
                self.cursor = self.end;
                return Some(start..self.end);
            }
        };

        // The cut has to leave more than the overlap behind, or the next
        // chunk would start where this one did.
        let min_cut = rest
            .char_indices()
            .nth(self.config.overlap_chars + 1)
            .map_or(window_end, |(offset, _)| start + offset)
            .min(window_end);

        let window = &self.text[start..window_end];
        let cut = find_cut(window, min_cut - start).map_or(window_end, |offset| start + offset);

        let chunk_end = start + self.text[start..cut].trim_end().len();
        self.cursor = self.next_start(start, cut);
        Some(start..chunk_end)
    }
}

impl<'a> Spans<'a> {
    fn next_start(&self, start: usize, cut: usize) -> usize {
        let overlap = self.config.overlap_chars;
        let candidate = if overlap == 0 {
            cut
        } else {
            self.text[start..cut]
                .char_indices()
                .rev()
                .nth(overlap - 1)
                .map_or(cut, |(offset, _)| start + offset)
        };

        let at_word_start = self.text[..candidate]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);

        let aligned = if at_word_start {
            candidate
        } else {
            match self.text[candidate..cut].find(char::is_whitespace) {
                Some(offset) => candidate + offset,
                None => candidate,
            }
        };

        let rest = &self.text[aligned..self.end];
        let skipped = rest.len() - rest.trim_start().len();
        (aligned + skipped).min(self.end)
    }
}

impl FusedIterator for Spans<'_> {}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    spans: Spans<'a>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.spans.text;
        self.spans.next().map(|range| &text[range])
    }
}

impl FusedIterator for Chunks<'_> {}

/// Byte offset just past the largest structural boundary in `window` that
/// lies at or beyond `min`.
fn find_cut(window: &str, min: usize) -> Option<usize> {
    for separators in [PARAGRAPH_SEPARATORS, LINE_SEPARATORS, SENTENCE_SEPARATORS] {
        let best = separators
            .iter()
            .filter_map(|separator| {
                window
                    .rmatch_indices(separator)
                    .map(|(index, matched)| index + matched.len())
                    .find(|cut| *cut >= min)
            })
            .max();
        if best.is_some() {
            return best;
        }
    }

    window
        .char_indices()
        .rev()
        .find(|(index, ch)| ch.is_whitespace() && *index >= min)
        .map(|(index, _)| index)
}
