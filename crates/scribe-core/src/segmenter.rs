//! **Segmenter** — split a raw audio buffer into indexed chunks.
//!
//! Chunks carry a stable `index` matching their position in the original
//! buffer; the Assembler reorders by this index no matter in which order
//! recognition completes. Chunks may overlap when the policy asks for it
//! (some recognizers clip words at hard chunk boundaries).

use crate::error::{ScribeError, ScribeResult};

/// How to cut the buffer: fixed chunk size, optional overlap between
/// consecutive chunks. `overlap = 0` is a strict partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    /// Maximum bytes per chunk. The last chunk may be shorter.
    pub chunk_size: usize,
    /// Bytes shared between chunk i's tail and chunk i+1's head. Must be
    /// strictly smaller than `chunk_size`.
    pub overlap: usize,
}

impl SegmentPolicy {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    fn validate(&self) -> ScribeResult<()> {
        if self.chunk_size == 0 {
            return Err(ScribeError::InvalidPolicy(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ScribeError::InvalidPolicy(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// One slice of the original audio buffer. `index` is strictly increasing
/// by 1 starting at 0; byte ranges may overlap depending on the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start_offset: usize,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Split `buffer` according to `policy`. Pure and deterministic: the same
/// buffer and policy always yield the same chunk sequence.
///
/// An empty buffer yields no chunks; `chunk_size >= buffer.len()` yields a
/// single chunk containing the whole buffer.
pub fn segment(buffer: &[u8], policy: SegmentPolicy) -> ScribeResult<Vec<Chunk>> {
    policy.validate()?;

    let stride = policy.chunk_size - policy.overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < buffer.len() {
        let end = (start + policy.chunk_size).min(buffer.len());
        chunks.push(Chunk {
            index: chunks.len(),
            start_offset: start,
            bytes: buffer[start..end].to_vec(),
        });
        start += stride;
    }

    Ok(chunks)
}
