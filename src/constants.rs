pub const BYTES_PER_GB: f64 = 1_073_741_824.0;
pub const PERCENT_100: f64 = 100.0;

// Matching
pub const ACCEPTANCE_THRESHOLD: f64 = 0.70;
pub const KEY_MATCH_WEIGHT: f64 = 1.0;
pub const CONFIDENCE_COMPONENTS: f64 = 3.0;

/// Rows processed between cooperative scheduling points in ingestion,
/// index building and matching loops.
pub const ROW_YIELD_INTERVAL: usize = 1_000;

// Processing defaults and bounds
pub const DEFAULT_BATCH_SIZE: usize = 5_000;
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 1_000_000;
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MIN_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 64;
pub const DEFAULT_MAX_PENDING_BATCHES: usize = 4;
pub const MIN_PENDING_BATCHES: usize = 1;
pub const MAX_PENDING_BATCHES: usize = 256;

// Prefilter defaults and bounds
pub const DEFAULT_EXPECTED_ELEMENTS: usize = 1_000_000;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;
pub const MIN_FALSE_POSITIVE_RATE: f64 = 1e-9;
pub const MAX_FALSE_POSITIVE_RATE: f64 = 0.5;
pub const PREFILTER_HASH_MULTIPLIER: u64 = 0x0000_0100_0000_01b3;
pub const PREFILTER_HASH_MASK: u64 = 0x7fff_ffff_ffff_ffff;

// Telemetry
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const MIN_TICK_INTERVAL_MS: u64 = 10;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1_024;

// Cache
pub const DEFAULT_CACHE_CAPACITY: usize = 4_096;

// Basis augmentation columns written by phases 1 and 2
pub const MATCHED_SOURCES_COLUMN: &str = "matched_sources";
pub const CLASSIFICATION_COLUMN: &str = "classification";
pub const MULTI_VALUE_SEPARATOR: &str = ";";
pub const CLASSIFIER_CODE_SEPARATORS: &[char] = &[';', '|'];

// Export
pub const GZIP_SUFFIX: &str = ".gz";
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
pub const RESULT_EXPORT_HEADERS: &[&str] = &[
    "id",
    "key",
    "first_name",
    "last_name",
    "source",
    "confidence",
    "row_position",
    "matched_source",
    "matched_row_position",
    "classification",
];

pub const DEFAULT_CONFIG_FILE: &str = "tuonella_match_config.json";
