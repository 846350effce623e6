use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;
use tuonella_match::{
    ColumnMapping, Config, FileSource, Phase, PhaseController, RunRequest, SiftError,
};

/// Helper function to write one CSV source into the temp directory
fn write_source(temp_dir: &TempDir, name: &str, content: &str) -> Result<PathBuf> {
    let path = temp_dir.path().join(name);
    fs::write(&path, content)?;
    Ok(path)
}

fn write_gzip_source(temp_dir: &TempDir, name: &str, content: &str) -> Result<PathBuf> {
    let path = temp_dir.path().join(name);
    let mut encoder = GzEncoder::new(fs::File::create(&path)?, Compression::default());
    encoder.write_all(content.as_bytes())?;
    encoder.finish()?;
    Ok(path)
}

/// Helper function to create a test configuration file and load it back
async fn create_test_config(temp_dir: &TempDir) -> Result<Config> {
    let config_content = r#"{
        "processing": {
            "batch_size": 2,
            "pool_size": 2,
            "max_pending_batches": 2
        },
        "prefilter": {
            "expected_elements": 1000,
            "false_positive_rate": 0.01
        },
        "telemetry": {
            "tick_interval_ms": 50,
            "event_channel_capacity": 256
        },
        "classification": {
            "tables": {
                "tier": { "g": "gold", "s": "silver" }
            }
        }
    }"#;

    let config_path = temp_dir.path().join("test_config.json");
    fs::write(&config_path, config_content)?;
    Config::load(&config_path).await
}

const BASIS: &str = "email,first_name,last_name,tier\n\
                     a@x.com,Jon,Doe,g\n\
                     b@y.com,Ann,Lee,s\n";

#[tokio::test]
async fn test_exact_duplicate_across_sources() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_source(&temp_dir, "basis.csv", BASIS)?;
    let crm = write_source(&temp_dir, "crm.csv", "email,first_name,last_name\na@x.com,Jon,Doe\n")?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let request = RunRequest::new(ColumnMapping::default())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&crm)?);
    controller.run(request).await?;

    let results = controller.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].confidence, 1.0);
    assert_eq!(results[0].source_id, "crm.csv");
    assert_eq!(results[0].matched_source, "basis.csv");
    Ok(())
}

#[tokio::test]
async fn test_fuzzy_last_name_is_accepted() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_source(&temp_dir, "basis.csv", BASIS)?;
    let crm = write_source(&temp_dir, "crm.csv", "email,first_name,last_name\nA@X.com,Jon,Doey\n")?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let request = RunRequest::new(ColumnMapping::default())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&crm)?);
    controller.run(request).await?;

    let results = controller.results();
    assert_eq!(results.len(), 1);
    assert!((results[0].confidence - 0.9167).abs() < 1e-3);
    Ok(())
}

#[tokio::test]
async fn test_same_source_name_never_matches() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_source(&temp_dir, "basis.csv", BASIS)?;
    let copy = write_source(&temp_dir, "copy.csv", BASIS)?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let request = RunRequest::new(ColumnMapping::default())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&copy)?.with_name("basis.csv"));
    let summary = controller.run(request).await?;

    assert_eq!(summary.duplicates_found, 0);
    assert!(controller.results().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_three_phases_with_gzip_and_classification() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_gzip_source(&temp_dir, "basis.csv.gz", BASIS)?;
    let crm = write_source(
        &temp_dir,
        "crm.csv",
        "email,first_name,last_name,tier\na@x.com,Jon,Doe,G|S\n",
    )?;
    let shop = write_source(&temp_dir, "shop.csv", "email,first_name,last_name\nb@y.com,Ann,Lee\n")?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let mapping = ColumnMapping::default().with_classifier("tier");

    let request = RunRequest::new(mapping.clone())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&crm)?);
    controller.run(request).await?;
    assert_eq!(controller.results()[0].classification, vec!["gold", "silver"]);

    assert_eq!(controller.advance_phase()?, Phase::Phase2);
    let request = RunRequest::new(mapping).compare(FileSource::new(&shop)?);
    controller.run(request).await?;
    assert_eq!(controller.results().len(), 2);

    assert_eq!(controller.advance_phase()?, Phase::Phase3);
    let summary = controller.filter_domains(["x.com"]).await?;
    assert_eq!(summary.cleared, 1);
    assert_eq!(summary.results_removed, 1);
    assert!(!controller.contains_key("a@x.com").await);

    let results = controller.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "b@y.com");

    let output = temp_dir.path().join("filtered.csv.gz");
    controller.export_filtered(fs::File::create(&output)?, true)?;
    let mut decoded = String::new();
    std::io::Read::read_to_string(
        &mut flate2::read::GzDecoder::new(fs::File::open(&output)?),
        &mut decoded,
    )?;
    let mut lines = decoded.lines();
    assert_eq!(
        lines.next(),
        Some("\"email\",\"first_name\",\"last_name\",\"tier\",\"matched_sources\",\"classification\"")
    );
    assert_eq!(
        lines.next(),
        Some("\"\",\"Jon\",\"Doe\",\"g\",\"crm.csv\",\"gold;silver\"")
    );
    assert_eq!(
        lines.next(),
        Some("\"b@y.com\",\"Ann\",\"Lee\",\"s\",\"shop.csv\",\"\"")
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_or_corrupt_source_fails_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_source(&temp_dir, "basis.csv", BASIS)?;
    let corrupt = write_source(&temp_dir, "corrupt.csv.gz", "plain text, not gzip")?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let request = RunRequest::new(ColumnMapping::default())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&corrupt)?);

    match controller.run(request).await {
        Err(SiftError::SourceRead { source_name, .. }) => assert_eq!(source_name, "corrupt.csv.gz"),
        other => panic!("expected a source read error, got {:?}", other.map(|s| s.phase)),
    }
    assert!(!controller.is_running());
    assert_eq!(controller.index_len().await, 2);

    assert!(FileSource::new(temp_dir.path().join("missing.csv")).is_err());
    Ok(())
}

#[tokio::test]
async fn test_results_export_to_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let basis = write_source(&temp_dir, "basis.csv", BASIS)?;
    let crm = write_source(&temp_dir, "crm.csv", "email,first_name,last_name\nb@y.com,Ann,Lee\n")?;

    let controller = PhaseController::new(create_test_config(&temp_dir).await?)?;
    let request = RunRequest::new(ColumnMapping::default())
        .basis(FileSource::new(&basis)?)
        .compare(FileSource::new(&crm)?);
    controller.run(request).await?;

    let output = temp_dir.path().join("duplicates.csv");
    let written = controller.export_results(fs::File::create(&output)?, false)?;
    assert_eq!(written, 1);

    let content = fs::read_to_string(&output)?;
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("\"b@y.com\",\"Ann\",\"Lee\",\"crm.csv\",\"1.0000\""));
    Ok(())
}
