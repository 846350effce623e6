pub mod model;

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::path::Path;
use tokio::fs;

use crate::constants::*;
use crate::utils::Verbosity;

// Re-export main types
pub use self::model::{
    CacheConfig, Config, LoggingConfig, MappingConfig, PrefilterConfig, ProcessingConfig,
    TelemetryConfig,
};

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let processing = &self.processing;
        if processing.batch_size < MIN_BATCH_SIZE || processing.batch_size > MAX_BATCH_SIZE {
            return Err(anyhow::anyhow!(
                "Batch size must be between {} and {}",
                MIN_BATCH_SIZE, MAX_BATCH_SIZE
            ));
        }

        if processing.pool_size < MIN_POOL_SIZE || processing.pool_size > MAX_POOL_SIZE {
            return Err(anyhow::anyhow!(
                "Pool size must be between {} and {}",
                MIN_POOL_SIZE, MAX_POOL_SIZE
            ));
        }

        if processing.max_pending_batches < MIN_PENDING_BATCHES
            || processing.max_pending_batches > MAX_PENDING_BATCHES {
            return Err(anyhow::anyhow!(
                "Max pending batches must be between {} and {}",
                MIN_PENDING_BATCHES, MAX_PENDING_BATCHES
            ));
        }

        if self.prefilter.expected_elements == 0 {
            return Err(anyhow::anyhow!("Prefilter expected elements must be positive"));
        }

        let rate = self.prefilter.false_positive_rate;
        if !(MIN_FALSE_POSITIVE_RATE..=MAX_FALSE_POSITIVE_RATE).contains(&rate) {
            return Err(anyhow::anyhow!(
                "Prefilter false positive rate must be between {} and {}",
                MIN_FALSE_POSITIVE_RATE, MAX_FALSE_POSITIVE_RATE
            ));
        }

        let tick = self.telemetry.tick_interval_ms;
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&tick) {
            return Err(anyhow::anyhow!(
                "Telemetry tick must be between {} and {} ms",
                MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS
            ));
        }

        if self.telemetry.event_channel_capacity == 0 {
            return Err(anyhow::anyhow!("Event channel capacity must be positive"));
        }

        if self.cache.capacity == 0 {
            return Err(anyhow::anyhow!("Cache capacity must be positive"));
        }

        if self.mapping.default.key_field.trim().is_empty() {
            return Err(anyhow::anyhow!("Default mapping needs a key field"));
        }

        self.logging.verbosity.parse::<Verbosity>()?;

        Ok(())
    }
}
