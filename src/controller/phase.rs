use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Phase1,
    Phase2,
    Phase3,
}

impl Phase {
    /// Transitions are strictly forward.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Phase1 => Some(Phase::Phase2),
            Phase::Phase2 => Some(Phase::Phase3),
            Phase::Phase3 => None,
        }
    }

    /// Whether a run in this phase starts from an empty index and prefilter.
    pub fn resets_index(self) -> bool {
        matches!(self, Phase::Phase1)
    }

    pub fn is_streaming(self) -> bool {
        !matches!(self, Phase::Phase3)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Phase1 => "phase 1",
            Phase::Phase2 => "phase 2",
            Phase::Phase3 => "phase 3",
        };
        f.write_str(label)
    }
}

/// Phase plus its counters. Counters reset whenever the phase is entered
/// and at the start of a phase-1 run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub files_processed: usize,
    pub duplicates_found: usize,
}

impl PhaseState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            files_processed: 0,
            duplicates_found: 0,
        }
    }

    pub fn reset_counters(&mut self) {
        self.files_processed = 0;
        self.duplicates_found = 0;
    }
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new(Phase::Phase1)
    }
}
