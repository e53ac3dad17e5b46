use crate::error::RagError;
use std::collections::VecDeque;
use std::ops::Range;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidChunkConfig(format!(
                "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkingConfig,
    separators: Vec<&'static str>,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl TextSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.to_vec(),
        }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_spans(text)
            .into_iter()
            .map(|span| text[span].to_string())
            .collect()
    }

    /// Byte ranges of each chunk in `text`, in order.
    pub fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        if char_len(text) <= self.config.chunk_size {
            return vec![0..text.len()];
        }

        let mut spans = Vec::new();
        self.split_recursive(text, 0..text.len(), &self.separators, &mut spans);
        spans
    }

    fn split_recursive(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&'static str],
        out: &mut Vec<Range<usize>>,
    ) {
        let segment = &text[range.clone()];
        let position = separators
            .iter()
            .position(|separator| separator.is_empty() || segment.contains(separator))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let mut small = Vec::new();
        for piece in split_keeping_separator(segment, separator, range.start) {
            if char_len(&text[piece.clone()]) < self.config.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                self.merge(text, &small, out);
                small.clear();
            }

            if remaining.is_empty() {
                out.push(piece);
            } else {
                self.split_recursive(text, piece, remaining, out);
            }
        }

        if !small.is_empty() {
            self.merge(text, &small, out);
        }
    }

    fn merge(&self, text: &str, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(&text[piece.clone()]);

            if total + len > self.config.chunk_size {
                if let Some(span) = window_span(&window) {
                    out.push(span);
                }
                while total > self.config.chunk_overlap
                    || (total + len > self.config.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece.clone(), len));
            total += len;
        }

        if let Some(span) = window_span(&window) {
            out.push(span);
        }
    }
}

pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>, RagError> {
    let config = ChunkingConfig::new(chunk_size, chunk_overlap)?;
    Ok(TextSplitter::new(config).split(text))
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    let first = window.front()?;
    let last = window.back()?;
    Some(first.0.start..last.0.end)
}

fn split_keeping_separator(segment: &str, separator: &str, offset: usize) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return segment
            .char_indices()
            .map(|(index, ch)| offset + index..offset + index + ch.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (index, _) in segment.match_indices(separator) {
        if index > start {
            pieces.push(offset + start..offset + index);
        }
        start = index;
    }
    if start < segment.len() {
        pieces.push(offset + start..offset + segment.len());
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
