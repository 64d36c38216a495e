//! Recursive overlapping text splitter.
//!
//! Splits page text into [`DocumentChunk`]s of at most `chunk_size`
//! characters, where consecutive chunks share up to `chunk_overlap`
//! characters of trailing context.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` always matches and splits into characters).
//! 2. Split on it. Pieces shorter than `chunk_size` are collected; a piece
//!    that is too long flushes the collected pieces and is split again with
//!    the remaining, finer separators.
//! 3. Collected pieces are merged greedily up to `chunk_size`. When a chunk
//!    is emitted, pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain; those carry into the next chunk.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is never
//! cut inside a code point.
//!
//! Each chunk receives a deterministic UUID v5 derived from its source key,
//! index and SHA-256 content hash, so re-ingesting identical content
//! overwrites the same points.
//!
//! # Example
//!
//! ```rust
//! use multi_kb_rag_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(1000, 200);
//! let chunks = splitter.split_text("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph."]);
//! ```

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{DocumentChunk, Payload};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`; a zero size is raised to 1.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text into chunk strings. Empty or whitespace-only input
    /// yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split a page and wrap each piece as a [`DocumentChunk`] carrying a
    /// copy of `metadata`.
    ///
    /// `source_key` identifies the page (e.g. `"report.pdf#3"`) and seeds the
    /// chunk ids.
    pub fn split_page(
        &self,
        source_key: &str,
        text: &str,
        metadata: &Payload,
    ) -> Vec<DocumentChunk> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| make_chunk(source_key, i, piece, metadata.clone()))
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            } else {
                out.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(&pending, separator));
        }
        out
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |window: &VecDeque<&str>, total: usize| {
                total + len + if window.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&window, total) > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window, separator);

                // Shrink the window to the overlap, and further if the next
                // piece still would not fit.
                while total > self.chunk_overlap
                    || (joined_len(&window, total) > self.chunk_size && total > 0)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
                }
            }

            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push_back(piece);
        }

        push_joined(&mut docs, &window, separator);
        docs
    }
}

fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    if window.is_empty() {
        return;
    }
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Create a single [`DocumentChunk`] with a deterministic id and SHA-256
/// content hash.
fn make_chunk(source_key: &str, index: usize, text: String, metadata: Payload) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}:{}", source_key, index, hash).as_bytes(),
    );

    DocumentChunk {
        id: id.to_string(),
        chunk_index: index,
        text,
        hash,
        metadata,
    }
}
