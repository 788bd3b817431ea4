//! # prodl
//!
//! A segmented, resumable HTTP(S) download engine.
//!
//! ## Features
//!
//! - **Segmented downloads**: a resource is split into byte ranges that
//!   are fetched concurrently and merged back into one file
//! - **Resume**: segment state serializes to portable text, and an
//!   interrupted transfer continues without re-fetching written bytes
//! - **Backpressure**: each segment streams through a bounded buffer, so
//!   a slow disk suspends the network read instead of growing memory
//! - **Async**: built on Tokio and reqwest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prodl::{DownloadCoordinator, EngineConfig};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = DownloadCoordinator::new(EngineConfig::default())?;
//!
//!     let path = coordinator
//!         .download(
//!             "https://example.com/file.zip",
//!             Path::new("downloads"),
//!             None,
//!             CancellationToken::new(),
//!             |progress| println!("{:.1}%", progress.percent),
//!         )
//!         .await?;
//!
//!     println!("saved to {:?}", path);
//!     Ok(())
//! }
//! ```

// Modules
pub mod config;
pub mod coordinator;
pub mod error;
pub mod planner;
pub mod probe;
pub mod reconstruct;
pub mod resume;
pub mod segment;
pub mod single;
pub mod types;

// Re-exports for convenience
pub use config::EngineConfig;
pub use coordinator::{DownloadCoordinator, DownloadSession};
pub use error::{EngineError, Result, TransferStage};
pub use probe::{is_resumable, probe};
pub use resume::{decode, encode, SegmentRecord};
pub use segment::{SegmentDescriptor, SegmentTransfer};
pub use single::SingleStreamTransfer;
pub use types::{human_size, DownloadProgress, RemoteResource, TransferState};
