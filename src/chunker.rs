use serde::{Deserialize, Serialize};

/// A contiguous character range of a file, ready to be embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub char_offset: usize,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
}

/// Splits file content into fixed-size, overlapping chunks. Deliberately not
/// AST-aware: arithmetic slicing only, so chunk sizes stay consistent
/// regardless of source language or formatting.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        assert!(chunk_overlap < chunk_size, "chunk_overlap must be smaller than chunk_size");
        Chunker { chunk_size, chunk_overlap }
    }

    pub fn chunk(&self, content: &str) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = content.chars().collect();
        let stride = self.chunk_size - self.chunk_overlap;

        let mut starts = Vec::new();
        let mut start = 0usize;
        loop {
            starts.push(start);
            if start + self.chunk_size >= chars.len() {
                break;
            }
            start += stride;
        }

        let total = starts.len();
        let line_offsets = Self::line_offsets(&chars);

        starts
            .into_iter()
            .enumerate()
            .map(|(i, start)| {
                let end = (start + self.chunk_size).min(chars.len());
                let text: String = chars[start..end].iter().collect();
                let line_start = Self::line_for_offset(&line_offsets, start);
                let line_end = Self::line_for_offset(&line_offsets, end.saturating_sub(1).max(start));
                Chunk {
                    chunk_index: i,
                    total_chunks: total,
                    char_offset: start,
                    line_start,
                    line_end,
                    content: text,
                }
            })
            .collect()
    }

    /// Character offsets (0-based) where each line begins; line_offsets[0] == 0.
    fn line_offsets(chars: &[char]) -> Vec<usize> {
        let mut offsets = vec![0usize];
        for (i, c) in chars.iter().enumerate() {
            if *c == '\n' {
                offsets.push(i + 1);
            }
        }
        offsets
    }

    fn line_for_offset(line_offsets: &[usize], offset: usize) -> u32 {
        match line_offsets.binary_search(&offset) {
            Ok(idx) => (idx + 1) as u32,
            Err(idx) => idx as u32,
        }
    }
}
