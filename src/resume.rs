//! Resume-State Serialization
//!
//! Encodes the segment descriptors of a session as a portable JSON array
//! and reloads them in the next process run. The caller is responsible
//! for storing and retrieving the text between runs.

use crate::error::{EngineError, Result};
use crate::segment::SegmentDescriptor;
use crate::types::TransferState;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted form of one segment. Field names match the records written
/// by earlier versions of this engine, so old state files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    #[serde(rename = "Start")]
    pub start: u64,
    #[serde(rename = "End")]
    pub end: u64,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "TotalReadBytes")]
    pub total_read_bytes: u64,
    #[serde(rename = "LocalTempFileLocation")]
    pub temp_file: PathBuf,
}

impl From<&SegmentDescriptor> for SegmentRecord {
    fn from(d: &SegmentDescriptor) -> Self {
        Self {
            start: d.start,
            end: d.end,
            size: d.size,
            total_read_bytes: d.transferred,
            temp_file: d.temp_path.clone(),
        }
    }
}

/// Serialize descriptors into the portable resume state.
pub fn encode(descriptors: &[SegmentDescriptor]) -> Result<String> {
    let records: Vec<SegmentRecord> = descriptors.iter().map(SegmentRecord::from).collect();
    serde_json::to_string(&records)
        .map_err(|e| EngineError::Internal(format!("failed to encode resume state: {}", e)))
}

/// Deserialize a resume state back into descriptors.
///
/// Records are re-ordered by start offset and ids re-derived 1-based
/// from that order. The persisted `TotalReadBytes` is not trusted: each
/// descriptor's progress is re-measured from its temp file, which may
/// have grown or been truncated between sessions. Range coverage is not
/// validated here; that is the coordinator's concern.
pub async fn decode(text: &str) -> Result<Vec<SegmentDescriptor>> {
    let mut records: Vec<SegmentRecord> = serde_json::from_str(text)
        .map_err(|e| EngineError::invalid_input("resume state", e.to_string()))?;
    records.sort_by_key(|r| r.start);

    let mut descriptors = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let on_disk = match tokio::fs::metadata(&record.temp_file).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let state = if record.size > 0 && on_disk >= record.size {
            TransferState::Done
        } else {
            TransferState::Idle
        };
        descriptors.push(SegmentDescriptor {
            id: index + 1,
            start: record.start,
            end: record.end,
            size: record.size,
            temp_path: record.temp_file,
            transferred: on_disk,
            state,
        });
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn descriptor(id: usize, start: u64, end: u64, size: u64, temp: &str) -> SegmentDescriptor {
        SegmentDescriptor {
            id,
            start,
            end,
            size,
            temp_path: PathBuf::from(temp),
            transferred: 42,
            state: TransferState::Fetching,
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_identity_fields() {
        let descriptors = vec![
            descriptor(1, 0, 250_000, 250_001, "/tmp/prodl-missing-a.part1"),
            descriptor(2, 250_001, 500_000, 250_000, "/tmp/prodl-missing-b.part2"),
        ];

        let encoded = encode(&descriptors).unwrap();
        let decoded = decode(&encoded).await.unwrap();

        assert_eq!(decoded.len(), descriptors.len());
        for (before, after) in descriptors.iter().zip(&decoded) {
            assert_eq!(after.id, before.id);
            assert_eq!(after.start, before.start);
            assert_eq!(after.end, before.end);
            assert_eq!(after.size, before.size);
            assert_eq!(after.temp_path, before.temp_path);
            // Temp files do not exist, so progress resets to zero.
            assert_eq!(after.transferred, 0);
            assert_eq!(after.state, TransferState::Idle);
        }
    }

    #[tokio::test]
    async fn decode_orders_by_start_and_rederives_ids() {
        let descriptors = vec![
            descriptor(2, 500, 999, 500, "/tmp/prodl-missing-c"),
            descriptor(1, 0, 499, 500, "/tmp/prodl-missing-d"),
        ];

        let decoded = decode(&encode(&descriptors).unwrap()).await.unwrap();
        assert_eq!(decoded[0].start, 0);
        assert_eq!(decoded[0].id, 1);
        assert_eq!(decoded[1].start, 500);
        assert_eq!(decoded[1].id, 2);
    }

    #[tokio::test]
    async fn decode_measures_the_temp_file_not_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("seg.part1");
        let mut file = std::fs::File::create(&temp_path).unwrap();
        file.write_all(&[0u8; 300]).unwrap();

        // The record claims 42 bytes; the file holds 300.
        let d = SegmentDescriptor {
            id: 1,
            start: 0,
            end: 999,
            size: 1000,
            temp_path: temp_path.clone(),
            transferred: 42,
            state: TransferState::Idle,
        };

        let decoded = decode(&encode(&[d]).unwrap()).await.unwrap();
        assert_eq!(decoded[0].transferred, 300);
        assert_eq!(decoded[0].state, TransferState::Idle);
    }

    #[tokio::test]
    async fn fully_written_temp_file_decodes_as_done() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("seg.part1");
        std::fs::write(&temp_path, vec![7u8; 100]).unwrap();

        let d = SegmentDescriptor {
            id: 1,
            start: 0,
            end: 99,
            size: 100,
            temp_path,
            transferred: 0,
            state: TransferState::Idle,
        };

        let decoded = decode(&encode(&[d]).unwrap()).await.unwrap();
        assert_eq!(decoded[0].state, TransferState::Done);
        assert_eq!(decoded[0].transferred, 100);
    }

    #[test]
    fn wire_format_uses_the_legacy_field_names() {
        let d = descriptor(1, 0, 9, 10, "/tmp/t.part1");
        let encoded = encode(&[d]).unwrap();
        for field in [
            "\"Start\"",
            "\"End\"",
            "\"Size\"",
            "\"TotalReadBytes\"",
            "\"LocalTempFileLocation\"",
        ] {
            assert!(encoded.contains(field), "missing {field} in {encoded}");
        }
    }
}
