use thiserror::Error;

use crate::controller::Phase;

#[derive(Error, Debug)]
pub enum SiftError {
    #[error("Failed to read source {source_name}: {message}")]
    SourceRead { source_name: String, message: String },

    #[error("A run is already active")]
    ConcurrencyMisuse,

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Export precondition not met: {0}")]
    ExportPrecondition(String),

    /// `requested` is `None` when asking for the phase after the last one.
    #[error("{}", phase_mismatch(.current, .requested))]
    InvalidPhase {
        current: Phase,
        requested: Option<Phase>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SiftError {
    pub fn source_read(source_name: impl Into<String>, message: impl ToString) -> Self {
        SiftError::SourceRead {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

fn phase_mismatch(current: &Phase, requested: &Option<Phase>) -> String {
    match requested {
        Some(requested) => format!(
            "Operation requires {} but controller is in {}",
            requested, current
        ),
        None => format!("No phase follows {}", current),
    }
}

pub type Result<T> = std::result::Result<T, SiftError>;
