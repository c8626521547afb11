//! Resolver configuration.
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! history_page_size = 256
//! lock_timeout_ms = 5000
//! max_cached_contexts = 1024
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NdcError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdcConfig {
    /// Events per history read page while rebuilding.
    pub history_page_size: usize,
    /// Upper bound on waiting for a run's context lock.
    pub lock_timeout_ms: u64,
    /// Soft bound on resident contexts in [`ExecutionCache`](crate::ExecutionCache).
    /// Idle entries beyond it are evicted.
    pub max_cached_contexts: usize,
}

impl Default for NdcConfig {
    fn default() -> Self {
        NdcConfig {
            history_page_size: 256,
            lock_timeout_ms: 5_000,
            max_cached_contexts: 1_024,
        }
    }
}

impl NdcConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, NdcError> {
        let config: NdcConfig =
            toml::from_str(source).map_err(|e| NdcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NdcError> {
        if self.history_page_size == 0 {
            return Err(NdcError::Config(
                "history_page_size must be positive".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(NdcError::Config(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_cached_contexts == 0 {
            return Err(NdcError::Config(
                "max_cached_contexts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(NdcConfig::from_toml_str("").unwrap(), NdcConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = NdcConfig::from_toml_str("history_page_size = 16\n").unwrap();
        assert_eq!(config.history_page_size, 16);
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_page_size_rejected() {
        let err = NdcConfig::from_toml_str("history_page_size = 0").unwrap_err();
        assert!(matches!(err, NdcError::Config(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = NdcConfig::from_toml_str("lock_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, NdcError::Config(_)));
    }
}
