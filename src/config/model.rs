use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::classify::ClassificationTables;
use crate::constants::*;
use crate::mapping::{ColumnMapping, MappingOverride};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub prefilter: PrefilterConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub classification: ClassificationTables,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub pool_size: usize,
    pub max_pending_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefilterConfig {
    pub expected_elements: usize,
    pub false_positive_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub tick_interval_ms: u64,
    pub event_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub default: ColumnMapping,
    #[serde(default)]
    pub overrides: Vec<MappingOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub verbosity: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pool_size: default_pool_size(),
            max_pending_batches: DEFAULT_MAX_PENDING_BATCHES,
        }
    }
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            expected_elements: DEFAULT_EXPECTED_ELEMENTS,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: "normal".to_string(),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_POOL_SIZE)
        .clamp(MIN_POOL_SIZE, DEFAULT_POOL_SIZE)
}

impl Config {
    /// (total GB, available GB) as reported by the OS.
    pub fn get_memory_info(&self) -> (f64, f64) {
        let mut system = System::new();
        system.refresh_memory();

        let total_ram_gb = system.total_memory() as f64 / BYTES_PER_GB;
        let available_ram_gb = system.available_memory() as f64 / BYTES_PER_GB;
        (total_ram_gb, available_ram_gb)
    }
}
