//! Engine configuration

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the download engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of segments for a fresh segmented download.
    pub segment_count: usize,

    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Read timeout in seconds, applied per socket read
    pub read_timeout: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_count: 8,
            connect_timeout: 10,
            read_timeout: 30,
            user_agent: format!("prodl/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.segment_count == 0 {
            return Err(EngineError::invalid_input(
                "segment_count",
                "must be at least 1",
            ));
        }
        if self.user_agent.is_empty() {
            return Err(EngineError::invalid_input(
                "user_agent",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_segments_rejected() {
        let config = EngineConfig {
            segment_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
