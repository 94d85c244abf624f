//! Unit tests for chunk planning
//!
//! Tests that chunks tile the file exactly and edge sizes.

use logfleet_core::coordinator::{plan, Chunk};
use logfleet_core::FleetError;

fn assert_tiles(chunks: &[Chunk], file_size: u64, chunk_size: u64) {
    let mut expected_offset = 0;
    for (idx, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_id, idx as u64, "ids must be dense");
        assert_eq!(chunk.offset, expected_offset, "chunks must be contiguous");
        assert!(chunk.length > 0 && chunk.length <= chunk_size);
        if idx + 1 < chunks.len() {
            assert_eq!(chunk.length, chunk_size, "only the last chunk may be short");
        }
        expected_offset = chunk.end();
    }
    assert_eq!(expected_offset, file_size, "chunks must cover the file");
}

#[test]
fn test_tiling_over_many_sizes() {
    for file_size in [0, 1, 2, 9, 10, 11, 99, 100, 101, 4096, 65_537] {
        for chunk_size in [1, 2, 3, 10, 100, 4096, 1 << 20] {
            if file_size / chunk_size > 10_000 {
                continue;
            }
            let chunks = plan(file_size, chunk_size).unwrap();
            assert_eq!(chunks.len() as u64, file_size.div_ceil(chunk_size));
            assert_tiles(&chunks, file_size, chunk_size);
        }
    }
}

#[test]
fn test_three_megabyte_file() {
    let chunks = plan(3_000_000, 1_048_576).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].offset, 2_097_152);
    assert_eq!(chunks[2].length, 902_848);
}

#[test]
fn test_empty_file() {
    assert!(plan(0, 1024).unwrap().is_empty());
}

#[test]
fn test_zero_chunk_size_rejected() {
    let err = plan(100, 0).unwrap_err();
    assert!(matches!(err, FleetError::InvalidChunkSize { chunk_size: 0 }));
}
