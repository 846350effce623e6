use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tuonella_match::constants::{DEFAULT_CONFIG_FILE, PERCENT_100};
use tuonella_match::utils::{format_bytes, format_duration, setup_logging, Verbosity};
use tuonella_match::{
    Config, FileSource, InputSource, Phase, PhaseController, RunRequest, SiftEvent,
};

#[derive(Parser)]
#[command(name = "tuonella-match")]
#[command(about = "🧹 Tuonella Match - Streaming cross-source duplicate detection for large CSV datasets")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Configuration file")]
    config: PathBuf,

    #[arg(short, long, help = "Basis source to index (phase 1)")]
    basis: PathBuf,

    #[arg(long = "compare", help = "Comparison source for phase 1 (repeatable)")]
    compare: Vec<PathBuf>,

    #[arg(long = "phase2", help = "Comparison source for a phase 2 pass (repeatable)")]
    phase2: Vec<PathBuf>,

    #[arg(long = "filter-domain", help = "Domain whose keys are cleared in phase 3 (repeatable)")]
    filter_domain: Vec<String>,

    #[arg(short, long, default_value = "duplicates.csv", help = "Output file for duplicate results")]
    output: PathBuf,

    #[arg(long, help = "Output file for the augmented basis")]
    basis_output: Option<PathBuf>,

    #[arg(long, help = "Output file for the phase 3 filtered basis")]
    filtered_output: Option<PathBuf>,

    #[arg(long, help = "Output file for the phase 3 decision log")]
    log_output: Option<PathBuf>,

    #[arg(long, help = "Gzip every output file")]
    gzip: bool,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

fn open_source(path: &Path) -> Result<FileSource> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Source does not exist: {}", path.display()));
    }
    let source = FileSource::new(path)?;
    info!("📄 {} ({})", source.name(), format_bytes(source.size()));
    Ok(source)
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Renders an export in memory and only then creates the file, so a
/// rejected export never leaves one behind.
fn export_to_file<F>(path: &Path, render: F) -> Result<usize>
where
    F: FnOnce(&mut Vec<u8>) -> tuonella_match::Result<usize>,
{
    let mut rendered = Vec::new();
    let count = render(&mut rendered)?;
    let mut out = create_output(path)?;
    out.write_all(&rendered)?;
    out.flush()?;
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Config::load(&args.config).await?
    } else {
        println!("📄 Config file not found, creating default: {}", args.config.display());
        let default_config = Config::default();
        default_config.to_file(&args.config)?;
        default_config
    };

    let verbosity = if args.verbose {
        Verbosity::Verbose
    } else {
        config.logging.verbosity.parse()?
    };
    setup_logging(verbosity)?;

    info!("🧙 Tuonella Match");
    let (total_ram, available_ram) = config.get_memory_info();
    info!("💾 Memory: {:.1} GB total, {:.1} GB available", total_ram, available_ram);
    info!("🔧 Pool units: {}", config.processing.pool_size);

    let default_mapping = config.mapping.default.clone();
    let controller = Arc::new(PhaseController::new(config)?);

    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n🛑 Shutdown signal received. Gracefully stopping...");
                controller.stop();
            }
        });
    }

    let mut events = controller.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SiftEvent::Progress(progress)) => {
                    let eta = progress
                        .estimated_seconds_remaining
                        .map(format_duration)
                        .unwrap_or_else(|| "-".to_string());
                    info!(
                        "⏳ {:.1}% | {} rows | {} duplicates | ETA {}",
                        progress.percent, progress.rows_processed, progress.duplicates_found, eta
                    );
                }
                Ok(SiftEvent::Performance(perf)) => {
                    info!(
                        "📊 {:.0} rows/s | memory {:.1}% | pool {:.0}%",
                        perf.rows_per_second,
                        perf.memory_usage_fraction * PERCENT_100,
                        perf.pool_utilization * PERCENT_100
                    );
                }
                Ok(SiftEvent::Error(message)) => warn!("⚠️ {}", message),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Progress reporter skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut request = RunRequest::new(default_mapping.clone()).basis(open_source(&args.basis)?);
    for path in &args.compare {
        request = request.compare(open_source(path)?);
    }
    let summary = controller.run(request).await?;
    info!(
        "✅ Phase 1: {} files, {} rows, {} duplicates in {}",
        summary.files_processed,
        summary.rows_processed,
        summary.duplicates_found,
        format_duration(summary.elapsed_ms as f64 / 1000.0)
    );

    let mut stopped = summary.stopped;
    if !stopped && (!args.phase2.is_empty() || !args.filter_domain.is_empty()) {
        controller.advance_phase()?;
        if !args.phase2.is_empty() {
            let mut request = RunRequest::new(default_mapping.clone());
            for path in &args.phase2 {
                request = request.compare(open_source(path)?);
            }
            let summary = controller.run(request).await?;
            stopped = summary.stopped;
            info!(
                "✅ Phase 2: {} files, {} duplicates ({} total)",
                summary.files_processed, summary.duplicates_found, summary.total_results
            );
        }
    }

    if !stopped && !args.filter_domain.is_empty() {
        if controller.phase() == Phase::Phase2 {
            controller.advance_phase()?;
        }
        let filtered = controller.filter_domains(&args.filter_domain).await?;
        info!(
            "✅ Phase 3: {} rows cleared, {} results removed",
            filtered.cleared, filtered.results_removed
        );
    }

    let written = controller.export_results(create_output(&args.output)?, args.gzip)?;
    info!("📝 {} results written to {}", written, args.output.display());

    if let Some(path) = &args.basis_output {
        let rows = controller.export_basis(create_output(path)?, args.gzip)?;
        info!("📝 Augmented basis ({} rows) written to {}", rows, path.display());
    }

    if let Some(path) = &args.filtered_output {
        match export_to_file(path, |out| controller.export_filtered(out, args.gzip)) {
            Ok(rows) => info!("📝 Filtered basis ({} rows) written to {}", rows, path.display()),
            Err(e) => warn!("⚠️ Filtered basis not written: {}", e),
        }
    }

    if let Some(path) = &args.log_output {
        match export_to_file(path, |out| controller.export_filter_log(out, args.gzip)) {
            Ok(lines) => info!("📝 Filter log ({} lines) written to {}", lines, path.display()),
            Err(e) => warn!("⚠️ Filter log not written: {}", e),
        }
    }

    controller.shutdown();
    reporter.abort();
    Ok(())
}
