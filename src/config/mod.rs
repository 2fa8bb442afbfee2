use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix, e.g. `YARDCORE_LOCK_TIMEOUT_MS=100`.
pub const ENV_PREFIX: &str = "YARDCORE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Longest wait for a per-area lock before reporting `Busy`.
    pub lock_timeout_ms: u64,
    /// Extra attempts for a failed repository write.
    pub persistence_retries: u32,
    /// Base delay between repository attempts, doubled per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 50,
            persistence_retries: 3,
            retry_backoff_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `YARDCORE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms as i64)?
            .set_default("persistence_retries", i64::from(defaults.persistence_retries))?
            .set_default("retry_backoff_ms", defaults.retry_backoff_ms as i64)?
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load engine configuration: {}", e))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid engine configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_timeout_ms == 0 {
            anyhow::bail!("lock_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_millis(50));
        assert_eq!(config.persistence_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let config = EngineConfig {
            retry_backoff_ms: 10,
            ..EngineConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            lock_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
