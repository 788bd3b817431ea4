//! Core types for prodl

/// Metadata about a remote resource, discovered by [`probe`](crate::probe::probe).
///
/// Immutable once created, except that a consumer may override
/// `suggested_name` before the first byte is written.
#[derive(Debug, Clone)]
pub struct RemoteResource {
    /// Location of the remote resource.
    pub url: String,
    /// Filename suggested by `Content-Disposition`, falling back to the
    /// last path segment of the URL.
    pub suggested_name: String,
    /// Declared media type, without parameters.
    pub media_type: Option<String>,
    /// Declared size in bytes. Authoritative for range math; segmentation
    /// is never attempted when the server omits it.
    pub size_bytes: Option<u64>,
    /// Whether the server answered a 1-byte range probe with 206.
    pub resumable: bool,
}

impl RemoteResource {
    /// Override the suggested filename.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.suggested_name = name.into();
        self
    }

    /// Size in a readable format.
    pub fn readable_size(&self) -> String {
        self.size_bytes.map(human_size).unwrap_or_else(|| "unknown".to_string())
    }
}

/// Lifecycle of one transfer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Not started yet.
    Idle,
    /// Network stage is reading the response body.
    Fetching,
    /// Network stream is done; the disk stage is flushing the buffer.
    Draining,
    /// All bytes for the span are on disk.
    Done,
    /// A stage fault aborted the pipeline; the temp file keeps its prefix.
    Failed,
    /// The cancellation signal was observed mid-transfer.
    Cancelled,
}

impl TransferState {
    /// Whether the pipeline has stopped running.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// A progress sample, either for one segment or aggregated for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Percentage in `[0, 100]`. Reflects bytes received, not bytes synced.
    pub percent: f64,
    /// Bytes received so far.
    pub transferred: u64,
    /// Total bytes of the span, 0 when the size is unknown.
    pub total: u64,
    /// Rolling speed in bytes per second.
    pub speed_bps: u64,
}

/// Render a byte count with a binary-unit suffix.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.00 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Done.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(TransferState::Cancelled.is_terminal());
        assert!(!TransferState::Idle.is_terminal());
        assert!(!TransferState::Fetching.is_terminal());
        assert!(!TransferState::Draining.is_terminal());
    }
}
