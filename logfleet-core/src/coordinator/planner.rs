//! Chunk planning
//!
//! Splits a file's byte range into fixed-size, contiguous chunks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, Result};

/// Chunk identifier, unique within one job and ordered by offset
pub type ChunkId = u64;

/// A contiguous byte range of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk identifier
    pub chunk_id: ChunkId,
    /// Byte offset of the first byte
    pub offset: u64,
    /// Number of bytes (always > 0)
    pub length: u64,
}

impl Chunk {
    /// One past the last byte of the chunk
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Plan the chunks covering `[0, file_size)`
///
/// Deterministic: the same inputs always yield the same chunk list, so
/// chunks can be referenced by id across reassignments.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(FleetError::InvalidChunkSize { chunk_size });
    }

    let chunks: Vec<Chunk> = (0..file_size.div_ceil(chunk_size))
        .map(|chunk_id| {
            let offset = chunk_id * chunk_size;
            Chunk {
                chunk_id,
                offset,
                length: chunk_size.min(file_size - offset),
            }
        })
        .collect();

    debug!(
        "Planned {} chunks for {} bytes (chunk_size={})",
        chunks.len(),
        file_size,
        chunk_size
    );

    Ok(chunks)
}
