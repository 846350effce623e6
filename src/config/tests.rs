use crate::config::model::*;
use crate::constants::*;
use tempfile::tempdir;

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.processing.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(config.prefilter.false_positive_rate, DEFAULT_FALSE_POSITIVE_RATE);
    assert!(config.processing.pool_size >= MIN_POOL_SIZE);
    assert_eq!(config.mapping.default.key_field, "email");
}

#[test]
fn test_config_validation() {
    let mut config = Config::default();

    config.processing.batch_size = 0;
    assert!(config.validate().is_err());
    config.processing.batch_size = 100;

    config.processing.pool_size = MAX_POOL_SIZE + 1;
    assert!(config.validate().is_err());
    config.processing.pool_size = 2;

    config.prefilter.false_positive_rate = 0.9;
    assert!(config.validate().is_err());
    config.prefilter.false_positive_rate = 0.001;

    config.telemetry.tick_interval_ms = 1;
    assert!(config.validate().is_err());
    config.telemetry.tick_interval_ms = 500;

    config.cache.capacity = 0;
    assert!(config.validate().is_err());
    config.cache.capacity = 16;

    config.logging.verbosity = "chatty".to_string();
    assert!(config.validate().is_err());
    config.logging.verbosity = "verbose".to_string();

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_deserialization_with_partial_sections() {
    let json_config = r#"
    {
        "processing": {
            "batch_size": 250,
            "pool_size": 2,
            "max_pending_batches": 3
        },
        "mapping": {
            "default": {
                "key_field": "Email",
                "first_name_field": "Full Name",
                "last_name_field": "Full Name",
                "split_combined_name": true
            },
            "overrides": [
                {
                    "pattern": "legacy",
                    "mapping": {
                        "key_field": "mail",
                        "first_name_field": "fn",
                        "last_name_field": "ln",
                        "classifier_field": "tier"
                    }
                }
            ]
        },
        "classification": {
            "tables": { "tier": { "g": "gold" } }
        }
    }
    "#;

    let config: Config = serde_json::from_str(json_config).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.processing.batch_size, 250);
    assert!(config.mapping.default.split_combined_name);
    assert_eq!(config.mapping.overrides[0].mapping.classifier_field.as_deref(), Some("tier"));
    assert!(!config.mapping.overrides[0].mapping.split_combined_name);
    assert_eq!(config.prefilter.expected_elements, DEFAULT_EXPECTED_ELEMENTS);
    assert_eq!(config.logging.verbosity, "normal");
    assert_eq!(config.classification.classify("tier", "G"), vec!["gold"]);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(DEFAULT_CONFIG_FILE);

    let mut config = Config::default();
    config.processing.batch_size = 42;
    config.to_file(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.processing.batch_size, 42);
}

#[tokio::test]
async fn test_async_load_rejects_invalid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{ "processing": { "batch_size": 0, "pool_size": 1, "max_pending_batches": 1 } }"#).unwrap();

    assert!(Config::load(&path).await.is_err());
}

#[test]
fn test_memory_info() {
    let (total, available) = Config::default().get_memory_info();
    assert!(total >= 0.0);
    assert!(available >= 0.0);
}
