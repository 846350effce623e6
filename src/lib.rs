// Leaf structures
pub mod cache;
pub mod constants;
pub mod prefilter;
pub mod record;

// Configuration and source description
pub mod classify;
pub mod config;
pub mod mapping;

// Streaming and per-batch work
pub mod builder;
pub mod index;
pub mod ingest;
pub mod matcher;
pub mod pool;

// Orchestration and output
pub mod controller;
pub mod error;
pub mod export;
pub mod utils;

// Re-export main types for convenience
pub use config::Config;
pub use controller::{
    DomainFilter, FilterSummary, Phase, PhaseController, RunRequest, RunSummary, SiftEvent,
};
pub use error::{Result, SiftError};
pub use ingest::{FileSource, InputSource, MemorySource};
pub use mapping::ColumnMapping;
pub use matcher::DuplicateResult;
