use placementd::config::Config;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.replication.max_replicas, 3);
    assert!((config.replication.low_space_ratio - 0.8).abs() < f64::EPSILON);
    assert!(config.microservice.scheduling_fallback_enabled);
    assert!(!config.microservice.tso_dynamic_switching_enabled);
    assert_eq!(config.schedule.store_limit_version, "v1");
}

#[test]
fn test_zero_max_replicas_rejected() {
    let mut config = Config::default();
    config.replication.max_replicas = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_strict_label_without_location_labels_rejected() {
    let mut config = Config::default();
    config.replication.strictly_match_label = true;
    config.replication.location_labels.clear();
    assert!(config.validate().is_err());

    config.replication.location_labels = vec!["zone".to_string()];
    assert!(config.validate().is_ok());
}

#[test]
fn test_isolation_level_must_be_a_location_label() {
    let mut config = Config::default();
    config.replication.location_labels = vec!["zone".to_string(), "rack".to_string()];
    config.replication.isolation_level = "host".to_string();
    assert!(config.validate().is_err());

    config.replication.isolation_level = "rack".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_store_limit_version_rejected() {
    let mut config = Config::default();
    config.schedule.store_limit_version = "v3".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_gc_tuner_threshold_bounds() {
    let mut config = Config::default();
    config.gc_tuner.enable_gc_tuner = true;
    config.gc_tuner.gc_tuner_threshold = 0.0;
    assert!(config.validate().is_err());

    config.gc_tuner.gc_tuner_threshold = 0.6;
    config.gc_tuner.server_memory_limit = 1.5;
    assert!(config.validate().is_err());

    config.gc_tuner.server_memory_limit = 0.8;
    assert!(config.validate().is_ok());
}

#[test]
fn test_effective_min_resolved_ts_interval_substitutes_default() {
    let mut config = Config::default();
    config.min_resolved_ts_persistence_interval = Duration::ZERO;
    assert_eq!(
        config.effective_min_resolved_ts_interval(),
        Duration::from_secs(1)
    );

    config.min_resolved_ts_persistence_interval = Duration::from_secs(7);
    assert_eq!(
        config.effective_min_resolved_ts_interval(),
        Duration::from_secs(7)
    );
}

#[test]
fn test_from_file_parses_toml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
name = "pd-test"
min_resolved_ts_persistence_interval = "2s"

[replication]
max_replicas = 5
location_labels = ["zone", "rack"]
strictly_match_label = true

[schedule]
max_store_preparing_time = "1h"
add_peer_rate = 30.0

[microservice]
enable_keyspace_groups = true
scheduling_fallback_enabled = false
"#
    )
    .unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.name, "pd-test");
    assert_eq!(
        config.min_resolved_ts_persistence_interval,
        Duration::from_secs(2)
    );
    assert_eq!(config.replication.max_replicas, 5);
    assert_eq!(config.replication.location_labels, vec!["zone", "rack"]);
    assert!(config.replication.strictly_match_label);
    assert_eq!(
        config.schedule.max_store_preparing_time,
        Duration::from_secs(3600)
    );
    assert!((config.schedule.add_peer_rate - 30.0).abs() < f64::EPSILON);
    // Unspecified fields keep their defaults.
    assert!((config.schedule.remove_peer_rate - 15.0).abs() < f64::EPSILON);
    assert!(config.microservice.enable_keyspace_groups);
    assert!(!config.microservice.scheduling_fallback_enabled);
}

#[test]
fn test_from_file_rejects_invalid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[replication]
max_replicas = 0
"#
    )
    .unwrap();
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}
