//! Chunk metrics extraction
//!
//! A line belongs to the chunk it starts in: a chunk skips a partial first
//! line and reads past its end to finish its last one, so every line of
//! the file is counted by exactly one chunk.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::protocol::ChunkMetrics;

const ERROR_MARKER: &str = "ERROR";
const WARNING_MARKER: &str = "WARNING";

/// Count lines, error lines and warning lines in a buffer
pub fn count_lines(data: &[u8]) -> ChunkMetrics {
    let mut metrics = ChunkMetrics {
        bytes: data.len() as u64,
        ..Default::default()
    };

    for line in data.split_inclusive(|&b| b == b'\n') {
        let text = String::from_utf8_lossy(line);
        metrics.lines += 1;
        if text.contains(ERROR_MARKER) {
            metrics.errors += 1;
        }
        if text.contains(WARNING_MARKER) {
            metrics.warnings += 1;
        }
    }
    metrics
}

/// Read the lines starting in `[offset, offset + length)`
fn read_owned_lines(path: &Path, offset: u64, length: u64) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);

    let starts_at_line = if offset == 0 {
        true
    } else {
        reader.seek(SeekFrom::Start(offset - 1))?;
        let mut prev = [0u8; 1];
        reader.read_exact(&mut prev)?;
        prev[0] == b'\n'
    };

    let mut region = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut region)?;

    let head = if starts_at_line {
        0
    } else {
        match region.iter().position(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => return Ok(Vec::new()),
        }
    };
    if head >= region.len() {
        // The next line starts at the following chunk
        return Ok(Vec::new());
    }

    let mut owned = region.split_off(head);
    if owned.last() != Some(&b'\n') {
        reader.read_until(b'\n', &mut owned)?;
    }
    Ok(owned)
}

/// Compute metrics for one chunk of a file
///
/// An unreadable range yields zero counts instead of an error, so one bad
/// chunk never aborts a job.
pub async fn analyze_chunk(path: impl Into<PathBuf>, offset: u64, length: u64) -> ChunkMetrics {
    let path = path.into();
    let shown = path.display().to_string();

    let read = tokio::task::spawn_blocking(move || read_owned_lines(&path, offset, length)).await;
    match read {
        Ok(Ok(data)) => {
            let metrics = count_lines(&data);
            debug!(
                "Chunk {}@{}+{}: {} lines, {} errors, {} warnings",
                shown, offset, length, metrics.lines, metrics.errors, metrics.warnings
            );
            metrics
        }
        Ok(Err(e)) => {
            warn!("Error processing chunk {}@{}+{}: {}", shown, offset, length, e);
            ChunkMetrics::default()
        }
        Err(e) => {
            warn!("Chunk reader task failed for {}: {}", shown, e);
            ChunkMetrics::default()
        }
    }
}
