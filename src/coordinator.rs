//! Download Coordination
//!
//! The coordinator plans or reloads a session's segments, launches every
//! segment pipeline concurrently, aggregates their progress into one
//! percentage, and joins completion. Failure isolation is per-segment: a
//! failing segment never cancels its siblings, but the overall run only
//! succeeds when every segment finished.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::planner;
use crate::reconstruct;
use crate::resume;
use crate::segment::{SegmentDescriptor, SegmentTransfer};
use crate::single::SingleStreamTransfer;
use crate::types::{DownloadProgress, RemoteResource, TransferState};

use parking_lot::RwLock;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One download in flight: the probed resource, its segment descriptors
/// (empty on the single-stream path), the output location, and the
/// session-scoped cancellation signal.
#[derive(Debug)]
pub struct DownloadSession {
    pub resource: RemoteResource,
    pub descriptors: Vec<SegmentDescriptor>,
    pub output_path: PathBuf,
    pub cancel: CancellationToken,
}

impl DownloadSession {
    /// Portable resume state for this session's segments.
    pub fn encode_state(&self) -> Result<String> {
        resume::encode(&self.descriptors)
    }

    /// Whether every segment reached `Done`.
    pub fn is_complete(&self) -> bool {
        !self.descriptors.is_empty()
            && self
                .descriptors
                .iter()
                .all(|d| d.state == TransferState::Done)
    }
}

/// Orchestrates probing, planning, transferring, and reconstruction.
pub struct DownloadCoordinator {
    client: Client,
    config: EngineConfig,
}

impl DownloadCoordinator {
    /// Create a coordinator with its own HTTP client.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Probe a remote resource.
    pub async fn probe(&self, url: &str) -> Result<RemoteResource> {
        crate::probe::probe(&self.client, url).await
    }

    /// Build a fresh segmented session: plan ranges and create one empty
    /// temp file per segment next to the output file.
    pub async fn start_fresh(
        &self,
        resource: RemoteResource,
        output_dir: &Path,
        segment_count: usize,
    ) -> Result<DownloadSession> {
        let Some(size) = resource.size_bytes else {
            return Err(EngineError::invalid_input(
                "resource",
                "size unknown; segmentation requires a Content-Length",
            ));
        };
        if !resource.resumable {
            return Err(EngineError::invalid_input(
                "resource",
                "server does not honor range requests; use the single-stream path",
            ));
        }

        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            EngineError::Internal(format!("failed to create {:?}: {}", output_dir, e))
        })?;

        let output_path = output_dir.join(&resource.suggested_name);
        let ranges = planner::plan(size, segment_count)?;

        let mut descriptors = Vec::with_capacity(ranges.len());
        for (index, (start, end)) in ranges.into_iter().enumerate() {
            let id = index + 1;
            let temp_path =
                output_dir.join(format!("{}.part{}", resource.suggested_name, id));
            // Fresh start: truncate any leftover from an earlier attempt.
            tokio::fs::File::create(&temp_path).await.map_err(|e| {
                EngineError::Internal(format!("failed to create {:?}: {}", temp_path, e))
            })?;
            descriptors.push(SegmentDescriptor::new(id, start, end, size, temp_path));
        }

        tracing::debug!(
            url = %resource.url,
            segments = descriptors.len(),
            size,
            "planned fresh segmented session"
        );

        Ok(DownloadSession {
            resource,
            descriptors,
            output_path,
            cancel: CancellationToken::new(),
        })
    }

    /// Reload a session from persisted resume state. Each descriptor's
    /// progress is re-measured from its temp file during decoding, and
    /// segments already complete on disk issue no network request.
    ///
    /// The decoded segment set must cover the resource exactly; a
    /// tampered or truncated state file is rejected before any transfer
    /// starts.
    pub async fn resume(
        &self,
        resource: RemoteResource,
        output_dir: &Path,
        encoded_state: &str,
    ) -> Result<DownloadSession> {
        let Some(size) = resource.size_bytes else {
            return Err(EngineError::invalid_input(
                "resource",
                "size unknown; a segmented session cannot be resumed without it",
            ));
        };
        let descriptors = resume::decode(encoded_state).await?;
        validate_coverage(&descriptors, size)?;
        tracing::debug!(
            url = %resource.url,
            segments = descriptors.len(),
            done = descriptors
                .iter()
                .filter(|d| d.state == TransferState::Done)
                .count(),
            "reloaded session from resume state"
        );

        Ok(DownloadSession {
            output_path: output_dir.join(&resource.suggested_name),
            resource,
            descriptors,
            cancel: CancellationToken::new(),
        })
    }

    /// Build a single-stream session over the whole resource.
    pub fn start_single(&self, resource: RemoteResource, output_dir: &Path) -> DownloadSession {
        DownloadSession {
            output_path: output_dir.join(&resource.suggested_name),
            resource,
            descriptors: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Run every segment of the session concurrently until all reach a
    /// terminal state, reporting aggregate progress along the way.
    ///
    /// The aggregate percentage is the arithmetic mean of the latest
    /// percentage reported by each segment. Callbacks run synchronously
    /// on the reporting segment's task and must not block.
    ///
    /// Degrades to one [`SingleStreamTransfer`] when the session carries
    /// no descriptors.
    pub async fn run<F>(&self, session: &mut DownloadSession, on_progress: F) -> Result<()>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        if session.descriptors.is_empty() {
            return self.run_single(session, on_progress).await;
        }

        let total_size = session.resource.size_bytes.unwrap_or(0);
        let started = Instant::now();

        // Latest (percent, bytes) per segment; unreported segments keep
        // their primed value so resumed progress never jumps backwards.
        let slots: Arc<RwLock<Vec<(f64, u64)>>> = Arc::new(RwLock::new(
            session
                .descriptors
                .iter()
                .map(|d| (d.percent(), d.transferred))
                .collect(),
        ));
        let initial_bytes: u64 = session.descriptors.iter().map(|d| d.transferred).sum();
        let on_progress = Arc::new(on_progress);

        tracing::debug!(segments = session.descriptors.len(), "launching segment transfers");

        let mut handles = Vec::with_capacity(session.descriptors.len());
        for descriptor in session.descriptors.drain(..) {
            let transfer = SegmentTransfer::new(
                self.client.clone(),
                session.resource.url.clone(),
                descriptor,
            );
            let cancel = session.cancel.clone();
            let slots = Arc::clone(&slots);
            let on_progress = Arc::clone(&on_progress);

            handles.push(tokio::spawn(async move {
                transfer
                    .run(cancel, move |id, update| {
                        let (percent, transferred) = {
                            let mut slots = slots.write();
                            if let Some(slot) = slots.get_mut(id - 1) {
                                *slot = (update.percent, update.transferred);
                            }
                            let percent = slots.iter().map(|s| s.0).sum::<f64>()
                                / slots.len() as f64;
                            let transferred = slots.iter().map(|s| s.1).sum::<u64>();
                            (percent, transferred)
                        };
                        let elapsed = started.elapsed().as_secs_f64();
                        let speed_bps = if elapsed > 0.0 {
                            ((transferred.saturating_sub(initial_bytes)) as f64 / elapsed) as u64
                        } else {
                            0
                        };
                        on_progress(DownloadProgress {
                            percent,
                            transferred,
                            total: total_size,
                            speed_bps,
                        });
                    })
                    .await
            }));
        }

        // A failing segment does not cancel its siblings; every pipeline
        // runs to its own terminal state before the result is decided.
        let mut failure: Option<EngineError> = None;
        let mut cancelled = false;
        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((descriptor, result)) => {
                    if let Err(e) = result {
                        failure.get_or_insert(e);
                    }
                    if descriptor.state == TransferState::Cancelled {
                        cancelled = true;
                    }
                    finished.push(descriptor);
                }
                Err(e) => {
                    failure
                        .get_or_insert(EngineError::Internal(format!("segment task failed: {}", e)));
                }
            }
        }
        finished.sort_by_key(|d| d.id);
        session.descriptors = finished;

        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn run_single<F>(&self, session: &mut DownloadSession, on_progress: F) -> Result<()>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        let transfer = SingleStreamTransfer::new(
            self.client.clone(),
            session.resource.clone(),
            session.output_path.clone(),
        );
        let (descriptor, result) = transfer
            .run(session.cancel.clone(), move |_, update| on_progress(update))
            .await;

        let state = descriptor.state;
        result?;
        if state == TransferState::Cancelled {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Probe, plan, transfer, and reconstruct in one call.
    ///
    /// Segmentation is used only when the server is resumable and the
    /// size is known; otherwise the whole resource streams over a single
    /// connection. `name_override` replaces the probed filename before
    /// the first byte is written.
    pub async fn download<F>(
        &self,
        url: &str,
        output_dir: &Path,
        name_override: Option<&str>,
        cancel: CancellationToken,
        on_progress: F,
    ) -> Result<PathBuf>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        let mut resource = self.probe(url).await?;
        if let Some(name) = name_override {
            resource = resource.with_name(name);
        }

        let segmented = resource.resumable
            && resource.size_bytes.is_some()
            && self.config.segment_count > 1;

        let mut session = if segmented {
            self.start_fresh(resource, output_dir, self.config.segment_count)
                .await?
        } else {
            tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
                EngineError::Internal(format!("failed to create {:?}: {}", output_dir, e))
            })?;
            self.start_single(resource, output_dir)
        };
        session.cancel = cancel;

        self.run(&mut session, on_progress).await?;

        if !session.descriptors.is_empty() {
            reconstruct::reconstruct(&session).await?;
        }
        Ok(session.output_path)
    }
}

/// Check that a decoded segment set is ordered, non-overlapping, and
/// covers every byte of a `size`-byte resource.
///
/// Decoding only restores the records; whether they still describe a
/// coherent plan for this resource is decided here. Degenerate zero-size
/// segments (a plan with more segments than bytes) carry no data and do
/// not participate.
fn validate_coverage(descriptors: &[SegmentDescriptor], size: u64) -> Result<()> {
    let spans: Vec<&SegmentDescriptor> = descriptors.iter().filter(|d| d.size > 0).collect();
    if spans.is_empty() {
        return Err(EngineError::invalid_input(
            "resume state",
            "holds no segments",
        ));
    }

    let mut next_start = 0u64;
    for d in &spans {
        if d.start != next_start {
            return Err(EngineError::invalid_input(
                "resume state",
                format!(
                    "segment {} starts at byte {}, expected {} (gap or overlap)",
                    d.id, d.start, next_start
                ),
            ));
        }
        // The recorded byte count must agree with the recorded range,
        // clamped to the resource.
        let effective = (d.end.min(size.saturating_sub(1)) + 1).saturating_sub(d.start);
        if d.size != effective {
            return Err(EngineError::invalid_input(
                "resume state",
                format!(
                    "segment {} claims {} bytes but its range holds {}",
                    d.id, d.size, effective
                ),
            ));
        }
        next_start = d.start + d.size;
    }

    if next_start < size {
        return Err(EngineError::invalid_input(
            "resume state",
            format!("segments cover only {} of {} bytes", next_start, size),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors_for(ranges: &[(u64, u64)], size: u64) -> Vec<SegmentDescriptor> {
        ranges
            .iter()
            .enumerate()
            .map(|(i, &(start, end))| {
                SegmentDescriptor::new(i + 1, start, end, size, PathBuf::from("/tmp/x.part"))
            })
            .collect()
    }

    #[test]
    fn planner_shaped_segments_cover_the_resource() {
        let all = descriptors_for(
            &[(0, 250_000), (250_001, 500_000), (500_001, 750_000), (750_001, 1_000_000)],
            1_000_000,
        );
        assert!(validate_coverage(&all, 1_000_000).is_ok());

        let whole = descriptors_for(&[(0, 1_000)], 1_000);
        assert!(validate_coverage(&whole, 1_000).is_ok());
    }

    #[test]
    fn a_missing_segment_is_rejected() {
        let gappy = descriptors_for(&[(0, 250_000), (500_001, 750_000)], 1_000_000);
        assert!(matches!(
            validate_coverage(&gappy, 1_000_000),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn overlapping_segments_are_rejected() {
        let overlapping = descriptors_for(&[(0, 500), (400, 1_000)], 1_000);
        assert!(matches!(
            validate_coverage(&overlapping, 1_000),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn a_short_tail_is_rejected() {
        let short = descriptors_for(&[(0, 250_000), (250_001, 500_000)], 1_000_000);
        assert!(matches!(
            validate_coverage(&short, 1_000_000),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn a_size_disagreeing_with_its_range_is_rejected() {
        let mut tampered = descriptors_for(&[(0, 500), (501, 1_000)], 1_000);
        tampered[1].size = 400;
        assert!(matches!(
            validate_coverage(&tampered, 1_000),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn an_empty_segment_set_is_rejected() {
        assert!(matches!(
            validate_coverage(&[], 1_000),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn degenerate_segments_do_not_break_coverage() {
        // More segments than bytes: the planner can emit ranges past the
        // end of the resource, which carry no data.
        let tiny = descriptors_for(&[(0, 1), (2, 2), (3, 3), (4, 3)], 3);
        assert!(validate_coverage(&tiny, 3).is_ok());
    }
}
