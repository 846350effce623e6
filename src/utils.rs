use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How chatty the crate's own log output is. `RUST_LOG` still applies to
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Silent,
    Normal,
    Verbose,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Silent => "tuonella_match=error",
            Verbosity::Normal => "tuonella_match=info",
            Verbosity::Verbose => "tuonella_match=debug",
        }
    }
}

impl FromStr for Verbosity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "silent" => Ok(Verbosity::Silent),
            "normal" => Ok(Verbosity::Normal),
            "verbose" => Ok(Verbosity::Verbose),
            other => Err(anyhow!(
                "Unknown verbosity '{}', expected silent, normal or verbose",
                other
            )),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verbosity::Silent => "silent",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Installs the global subscriber. Source locations are only shown in
/// verbose mode.
pub fn setup_logging(verbosity: Verbosity) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(verbosity.directive().parse()?);
    let detailed = verbosity == Verbosity::Verbose;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(detailed)
        .with_line_number(detailed)
        .try_init()
        .map_err(|e| anyhow!("Logging already initialised: {}", e))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let exponent = if bytes == 0 {
        0
    } else {
        ((bytes as f64).log2() / 10.0).floor() as usize
    }
    .min(UNITS.len() - 1);

    if exponent == 0 {
        return format!("{} B", bytes);
    }
    format!("{:.2} {}", bytes as f64 / 1024f64.powi(exponent as i32), UNITS[exponent])
}

/// `42.0s`, `3m 05s` or `2h 10m`.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds.max(0.0));
    }
    let whole = seconds.round() as u64;
    let (hours, minutes, secs) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m {:02}s", minutes, secs)
    }
}

/// Extrapolates the time left from the fraction done so far. `None` until
/// there is some progress to go on.
pub fn estimate_remaining_time(fraction_done: f64, active: Duration) -> Option<f64> {
    let elapsed = active.as_secs_f64();
    if fraction_done <= 0.0 || elapsed <= 0.0 {
        return None;
    }
    let fraction_done = fraction_done.min(1.0);
    Some(elapsed * (1.0 - fraction_done) / fraction_done)
}
