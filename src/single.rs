//! Single-Stream Transfer
//!
//! The non-segmented path: one fetch -> buffer -> disk pipeline over the
//! whole resource, writing the output file directly. Reuses the segment
//! pipeline with a single span covering `[0, size)`, and honors the same
//! resume contract when the server supports range requests.

use crate::error::{EngineError, Result, TransferStage};
use crate::segment::{drain_response, SegmentDescriptor};
use crate::types::{DownloadProgress, RemoteResource, TransferState};

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Transfer of a whole resource over one connection.
pub struct SingleStreamTransfer {
    client: Client,
    resource: RemoteResource,
    output_path: PathBuf,
}

impl SingleStreamTransfer {
    pub fn new(client: Client, resource: RemoteResource, output_path: PathBuf) -> Self {
        Self {
            client,
            resource,
            output_path,
        }
    }

    /// Run until a terminal state, returning the span descriptor and the
    /// run's outcome.
    pub async fn run<F>(
        self,
        cancel: CancellationToken,
        on_progress: F,
    ) -> (SegmentDescriptor, Result<()>)
    where
        F: Fn(usize, DownloadProgress) + Send + Sync,
    {
        let size = self.resource.size_bytes.unwrap_or(0);
        let mut descriptor = SegmentDescriptor::whole_resource(size, self.output_path.clone());

        let result = self
            .execute(&mut descriptor, &cancel, &on_progress)
            .await;
        if let Err(ref e) = result {
            descriptor.state = TransferState::Failed;
            tracing::error!(error = %e, "single-stream transfer failed");
        }
        (descriptor, result)
    }

    async fn execute<F>(
        &self,
        descriptor: &mut SegmentDescriptor,
        cancel: &CancellationToken,
        on_progress: &F,
    ) -> Result<()>
    where
        F: Fn(usize, DownloadProgress) + Send + Sync,
    {
        let mut existing = match tokio::fs::metadata(&self.output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        // A partial file against a non-resumable server is useless: the
        // whole resource has to be fetched again from byte zero.
        if existing > 0 && !self.resource.resumable {
            tracing::debug!(
                path = ?self.output_path,
                len = existing,
                "server is not resumable, discarding partial file"
            );
            tokio::fs::remove_file(&self.output_path).await.map_err(|e| {
                EngineError::transfer(
                    TransferStage::Disk,
                    descriptor.id,
                    format!("failed to discard partial file: {}", e),
                )
            })?;
            existing = 0;
        }

        descriptor.transferred = existing;

        if descriptor.is_complete() {
            descriptor.state = TransferState::Done;
            tracing::debug!(path = ?self.output_path, "file already complete on disk");
            return Ok(());
        }

        if cancel.is_cancelled() {
            descriptor.state = TransferState::Cancelled;
            return Ok(());
        }

        // Open-ended range when resuming, plain GET otherwise.
        let mut request = self.client.get(&self.resource.url);
        if existing > 0 {
            let range = format!("bytes={}-", existing);
            tracing::debug!(range = %range, "resuming single-stream download");
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(|e| {
            EngineError::transfer(
                TransferStage::Network,
                descriptor.id,
                format!("request failed: {}", e),
            )
        })?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            return Err(EngineError::transfer(
                TransferStage::Network,
                descriptor.id,
                format!("HTTP {}", status),
            ));
        }

        // A 200 to a ranged request means the server ignored the range
        // and is sending the whole resource. Appending that body to the
        // prefix would corrupt the file, so truncate and take the full
        // body from byte zero instead.
        if existing > 0 && status != StatusCode::PARTIAL_CONTENT {
            tracing::debug!(
                path = ?self.output_path,
                "server ignored resume range, restarting from byte zero"
            );
            tokio::fs::File::create(&self.output_path).await.map_err(|e| {
                EngineError::transfer(
                    TransferStage::Disk,
                    descriptor.id,
                    format!("failed to truncate partial file: {}", e),
                )
            })?;
            descriptor.transferred = 0;
        }

        drain_response(response, descriptor, cancel, on_progress).await
    }
}
