//! Range Planning
//!
//! Splits a resource of known size into contiguous, inclusive byte ranges,
//! one per segment.

use crate::error::{EngineError, Result};

/// Plan `segment_count` ordered byte ranges covering a resource of
/// `size_bytes` bytes.
///
/// Ranges are inclusive on both ends. Every range after the first starts
/// one byte past the arithmetic boundary, and the last range's end lands
/// on `size_bytes` rather than `size_bytes - 1`.
// TODO: the +1 start shift and the one-past end are carried over verbatim
// from the original planner for resume-state compatibility; revisit once
// persisted states from it no longer need to round-trip.
pub fn plan(size_bytes: u64, segment_count: usize) -> Result<Vec<(u64, u64)>> {
    if size_bytes == 0 {
        return Err(EngineError::invalid_input(
            "size_bytes",
            "must be greater than zero",
        ));
    }
    if segment_count == 0 {
        return Err(EngineError::invalid_input(
            "segment_count",
            "must be greater than zero",
        ));
    }

    let part_size = size_bytes.div_ceil(segment_count as u64);
    let ranges = (0..segment_count as u64)
        .map(|i| {
            let start = i * part_size + i.min(1);
            let end = ((i + 1) * part_size).min(size_bytes);
            (start, end)
        })
        .collect();

    Ok(ranges)
}
