//! Segment Transfer Pipeline
//!
//! One [`SegmentTransfer`] owns one byte range of the resource. It runs
//! two cooperating stages: a network reader pulling chunks off the
//! response stream, and a disk writer appending them to the segment's
//! temp file. The stages are joined by a bounded chunk queue, so a slow
//! disk suspends the network read instead of buffering unboundedly.

use crate::error::{EngineError, Result, TransferStage};
use crate::types::{DownloadProgress, TransferState};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::path::PathBuf;
use std::time::Instant;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Depth of the chunk queue joining the two stages. Response chunks are
/// typically a few KiB, which bounds in-flight memory per segment to
/// tens of KiB.
pub(crate) const PIPE_DEPTH: usize = 8;

/// One byte range of the resource and its on-disk partial artifact.
#[derive(Debug, Clone)]
pub struct SegmentDescriptor {
    /// 1-based id, stable across resume cycles.
    pub id: usize,
    /// First byte offset of the range (inclusive).
    pub start: u64,
    /// Last byte offset as produced by the planner. For the trailing
    /// segment this may sit one past the resource's final byte; `size`
    /// is the authoritative byte count.
    pub end: u64,
    /// Effective number of bytes this segment is responsible for.
    pub size: u64,
    /// Temp file backing this segment. Serialized and reloaded verbatim.
    pub temp_path: PathBuf,
    /// Bytes received so far.
    pub transferred: u64,
    /// Pipeline state.
    pub state: TransferState,
}

impl SegmentDescriptor {
    /// Create a fresh descriptor for a planned range.
    ///
    /// `resource_size` clamps the planner's one-past end boundary when
    /// computing the effective size.
    pub fn new(id: usize, start: u64, end: u64, resource_size: u64, temp_path: PathBuf) -> Self {
        let last_byte = end.min(resource_size.saturating_sub(1));
        let size = (last_byte + 1).saturating_sub(start);
        Self {
            id,
            start,
            end,
            size,
            temp_path,
            transferred: 0,
            state: TransferState::Idle,
        }
    }

    /// A descriptor spanning the whole resource, for the single-stream path.
    pub fn whole_resource(size_bytes: u64, path: PathBuf) -> Self {
        Self {
            id: 1,
            start: 0,
            end: size_bytes.saturating_sub(1),
            size: size_bytes,
            temp_path: path,
            transferred: 0,
            state: TransferState::Idle,
        }
    }

    /// Whether every byte of the span is accounted for.
    pub fn is_complete(&self) -> bool {
        self.size > 0 && self.transferred >= self.size
    }

    /// Bytes still to fetch.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.transferred)
    }

    /// Percentage of the span that has been received.
    pub fn percent(&self) -> f64 {
        if self.size == 0 {
            // Degenerate or unknown-size span: only a terminal Done counts.
            return if self.state == TransferState::Done {
                100.0
            } else {
                0.0
            };
        }
        (self.transferred as f64 / self.size as f64 * 100.0).min(100.0)
    }
}

/// Transfer for one segment: ranged fetch, bounded buffer, temp file.
pub struct SegmentTransfer {
    client: Client,
    url: String,
    descriptor: SegmentDescriptor,
}

impl SegmentTransfer {
    pub fn new(client: Client, url: String, descriptor: SegmentDescriptor) -> Self {
        Self {
            client,
            url,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    /// Run the pipeline until it reaches a terminal state.
    ///
    /// Returns the (possibly updated) descriptor together with the run's
    /// outcome. On any error the descriptor is `Failed` and its temp file
    /// keeps the prefix written so far.
    pub async fn run<F>(
        mut self,
        cancel: CancellationToken,
        on_progress: F,
    ) -> (SegmentDescriptor, Result<()>)
    where
        F: Fn(usize, DownloadProgress) + Send + Sync,
    {
        let result = self.execute(&cancel, &on_progress).await;
        if let Err(ref e) = result {
            self.descriptor.state = TransferState::Failed;
            tracing::error!(segment = self.descriptor.id, error = %e, "segment transfer failed");
        }
        (self.descriptor, result)
    }

    async fn execute<F>(&mut self, cancel: &CancellationToken, on_progress: &F) -> Result<()>
    where
        F: Fn(usize, DownloadProgress) + Send + Sync,
    {
        let id = self.descriptor.id;

        // Whatever is on disk is the resumable prefix; the encoded value
        // is never trusted since the file may have changed between runs.
        let on_disk = match tokio::fs::metadata(&self.descriptor.temp_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        self.descriptor.transferred = on_disk;

        // Covers both a fully-downloaded temp file and a degenerate
        // zero-size range, neither of which needs a request.
        if self.descriptor.remaining() == 0 {
            self.descriptor.state = TransferState::Done;
            tracing::debug!(segment = id, "segment already complete on disk");
            return Ok(());
        }

        if cancel.is_cancelled() {
            self.descriptor.state = TransferState::Cancelled;
            return Ok(());
        }

        let resume_start = self.descriptor.start + self.descriptor.transferred;
        let range = format!("bytes={}-{}", resume_start, self.descriptor.end);
        tracing::debug!(segment = id, range = %range, "requesting segment");

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, &range)
            .send()
            .await
            .map_err(|e| {
                EngineError::transfer(TransferStage::Network, id, format!("request failed: {}", e))
            })?;

        // Anything but 206 means the server ignored the Range header;
        // appending its body at this offset would corrupt the segment.
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(EngineError::transfer(
                TransferStage::Network,
                id,
                format!("expected 206 Partial Content for range {}, got HTTP {}", range, status),
            ));
        }

        // A server may clamp the end of the range, but it must honor the
        // start or the bytes would land at the wrong offset.
        if let Some(value) = response.headers().get(CONTENT_RANGE) {
            match value.to_str().ok().and_then(parse_content_range) {
                Some((served_start, _)) if served_start == resume_start => {}
                Some((served_start, _)) => {
                    return Err(EngineError::transfer(
                        TransferStage::Network,
                        id,
                        format!(
                            "Content-Range starts at {}, requested {}",
                            served_start, resume_start
                        ),
                    ));
                }
                None => {
                    return Err(EngineError::transfer(
                        TransferStage::Network,
                        id,
                        format!("invalid Content-Range header: {:?}", value),
                    ));
                }
            }
        }

        drain_response(response, &mut self.descriptor, cancel, on_progress).await
    }
}

/// Parse a `bytes <start>-<end>/<total>` Content-Range value into its
/// start and end byte positions.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let rest = value.strip_prefix("bytes ")?;
    let (span, _total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Run the fetch -> buffer -> disk pipeline for one response body.
///
/// The reader stage pulls chunks off the network and pushes them into a
/// bounded queue, counting bytes and reporting progress after each read;
/// the writer stage appends queued chunks to `descriptor.temp_path`.
/// Either stage observing the cancellation signal exits at its next
/// suspension point. Shared by segmented and single-stream transfers.
pub(crate) async fn drain_response<F>(
    response: Response,
    descriptor: &mut SegmentDescriptor,
    cancel: &CancellationToken,
    on_progress: &F,
) -> Result<()>
where
    F: Fn(usize, DownloadProgress) + Send + Sync,
{
    let id = descriptor.id;
    descriptor.state = TransferState::Fetching;

    let (tx, mut rx) = mpsc::channel::<Bytes>(PIPE_DEPTH);

    // Disk stage: append queued chunks in arrival order.
    let temp_path = descriptor.temp_path.clone();
    let writer = tokio::spawn(async move {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&temp_path)
            .await
            .map_err(|e| {
                EngineError::transfer(
                    TransferStage::Disk,
                    id,
                    format!("open {:?} failed: {}", temp_path, e),
                )
            })?;

        while let Some(chunk) = rx.recv().await {
            file.write_all(&chunk).await.map_err(|e| {
                EngineError::transfer(TransferStage::Disk, id, format!("write failed: {}", e))
            })?;
        }

        file.flush().await.map_err(|e| {
            EngineError::transfer(TransferStage::Disk, id, format!("flush failed: {}", e))
        })?;
        Result::<()>::Ok(())
    });

    // Network stage. The elapsed clock is scoped to this run so
    // concurrent segments never contend for it.
    let started = Instant::now();
    let mut received_this_run: u64 = 0;
    let mut stream = response.bytes_stream();
    let mut network_error: Option<EngineError> = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            next = stream.next() => match next {
                None => break,
                Some(Err(e)) => {
                    network_error = Some(EngineError::transfer(
                        TransferStage::Network,
                        id,
                        format!("stream error: {}", e),
                    ));
                    break;
                }
                Some(Ok(chunk)) => {
                    let chunk_len = chunk.len() as u64;
                    // Backpressure: suspends while the disk stage is behind.
                    if tx.send(chunk).await.is_err() {
                        // Writer bailed; its error is surfaced below.
                        break;
                    }
                    descriptor.transferred += chunk_len;
                    received_this_run += chunk_len;

                    let elapsed = started.elapsed().as_secs_f64();
                    let speed_bps = if elapsed > 0.0 {
                        (received_this_run as f64 / elapsed) as u64
                    } else {
                        0
                    };
                    on_progress(id, DownloadProgress {
                        percent: descriptor.percent(),
                        transferred: descriptor.transferred,
                        total: descriptor.size,
                        speed_bps,
                    });
                }
            }
        }
    }

    // Network stream is finished one way or another; let the disk stage
    // flush whatever is still queued.
    drop(tx);
    descriptor.state = TransferState::Draining;

    let write_result = match writer.await {
        Ok(result) => result,
        Err(e) => Err(EngineError::transfer(
            TransferStage::Disk,
            id,
            format!("writer task failed: {}", e),
        )),
    };

    if let Some(e) = network_error {
        return Err(e);
    }
    write_result?;

    descriptor.state = if cancelled {
        TransferState::Cancelled
    } else {
        TransferState::Done
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_size_clamps_the_trailing_boundary() {
        // Planner range (750_001, 1_000_000) against a 1_000_000-byte
        // resource: the last real byte index is 999_999.
        let d = SegmentDescriptor::new(4, 750_001, 1_000_000, 1_000_000, PathBuf::from("/tmp/x"));
        assert_eq!(d.size, 249_999);

        let d = SegmentDescriptor::new(1, 0, 250_000, 1_000_000, PathBuf::from("/tmp/x"));
        assert_eq!(d.size, 250_001);
    }

    #[test]
    fn degenerate_range_has_zero_size() {
        // With more segments than bytes the planner can emit start > end.
        let d = SegmentDescriptor::new(3, 3, 1, 2, PathBuf::from("/tmp/x"));
        assert_eq!(d.size, 0);
        assert!(!d.is_complete());
        assert_eq!(d.percent(), 0.0);
    }

    #[test]
    fn percent_tracks_transferred_bytes() {
        let mut d = SegmentDescriptor::new(1, 0, 99, 1_000, PathBuf::from("/tmp/x"));
        assert_eq!(d.size, 100);
        assert_eq!(d.percent(), 0.0);

        d.transferred = 25;
        assert_eq!(d.percent(), 25.0);

        d.transferred = 100;
        assert_eq!(d.percent(), 100.0);
        assert!(d.is_complete());
        assert_eq!(d.remaining(), 0);
    }

    #[test]
    fn content_range_parses_byte_positions() {
        assert_eq!(parse_content_range("bytes 400-999/1000"), Some((400, 999)));
        assert_eq!(parse_content_range("bytes 0-0/1"), Some((0, 0)));
        assert_eq!(parse_content_range("bytes 400-999"), None);
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("items 400-999/1000"), None);
    }
}
