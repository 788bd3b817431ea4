//! Segment Reconstruction
//!
//! Merges the completed segment temp files into the final output file at
//! their byte offsets and removes the temp files. The output file is
//! owned exclusively by this pass; no transfer stage ever touches it.

use crate::coordinator::DownloadSession;
use crate::error::{EngineError, Result};
use crate::segment::SegmentDescriptor;
use crate::types::TransferState;

use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// Merge all segment temp files into the session's output file.
///
/// Precondition: every descriptor is `Done`. Fails with
/// [`EngineError::Reconstruction`] when a temp file is missing or holds
/// fewer bytes than its segment's effective size; the output file is
/// left incomplete in that case.
pub async fn reconstruct(session: &DownloadSession) -> Result<PathBuf> {
    for d in &session.descriptors {
        if d.state != TransferState::Done {
            return Err(EngineError::reconstruction(
                &d.temp_path,
                format!("segment {} is {:?}, not done", d.id, d.state),
            ));
        }
    }

    let mut ordered: Vec<&SegmentDescriptor> = session.descriptors.iter().collect();
    ordered.sort_by_key(|d| d.start);

    let mut output = File::create(&session.output_path).await.map_err(|e| {
        EngineError::reconstruction(&session.output_path, format!("create failed: {}", e))
    })?;

    for d in &ordered {
        let meta = tokio::fs::metadata(&d.temp_path).await.map_err(|_| {
            EngineError::reconstruction(
                &d.temp_path,
                format!("segment {} temp file is missing", d.id),
            )
        })?;
        if meta.len() < d.size {
            return Err(EngineError::reconstruction(
                &d.temp_path,
                format!(
                    "segment {} temp file holds {} bytes, expected {}",
                    d.id,
                    meta.len(),
                    d.size
                ),
            ));
        }

        output.seek(SeekFrom::Start(d.start)).await.map_err(|e| {
            EngineError::reconstruction(&session.output_path, format!("seek failed: {}", e))
        })?;

        let mut temp = File::open(&d.temp_path).await.map_err(|e| {
            EngineError::reconstruction(&d.temp_path, format!("open failed: {}", e))
        })?;
        tokio::io::copy(&mut temp, &mut output).await.map_err(|e| {
            EngineError::reconstruction(&d.temp_path, format!("copy failed: {}", e))
        })?;
    }

    output.flush().await.map_err(|e| {
        EngineError::reconstruction(&session.output_path, format!("flush failed: {}", e))
    })?;
    output.sync_all().await.map_err(|e| {
        EngineError::reconstruction(&session.output_path, format!("sync failed: {}", e))
    })?;

    for d in &ordered {
        if let Err(e) = tokio::fs::remove_file(&d.temp_path).await {
            tracing::warn!(path = ?d.temp_path, error = %e, "failed to remove temp file");
        }
    }

    tracing::debug!(path = ?session.output_path, segments = ordered.len(), "reconstructed output file");
    Ok(session.output_path.clone())
}
