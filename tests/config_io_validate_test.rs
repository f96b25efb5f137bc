use elektra::config::{Config, MeterConfig};
use std::fs;

fn meter(id: &str, ean: &str) -> MeterConfig {
    MeterConfig {
        electrometer_id: id.to_string(),
        ean: ean.to_string(),
    }
}

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.meters.push(meter("784703", "859182400100000000"));
    cfg.mqtt.host = "10.0.0.5".to_string();
    cfg.polling.poll_interval_seconds = 600;

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.mqtt.host, "10.0.0.5");
    assert_eq!(loaded.polling.poll_interval_seconds, 600);
    assert_eq!(loaded.meters[0].electrometer_id, "784703");
    assert_eq!(loaded.meters[0].ean, "859182400100000000");
}

#[test]
fn minimal_yaml_gets_defaults() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    fs::write(
        &path,
        "meters:\n  - electrometer_id: \"784703\"\nmqtt:\n  host: broker.local\n",
    )
    .unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.mqtt.host, "broker.local");
    assert_eq!(loaded.mqtt.port, 1883);
    assert_eq!(loaded.polling.poll_interval_seconds, 900);
    assert_eq!(loaded.session.ttl_hours, 6);
    assert_eq!(loaded.timezone, "Europe/Prague");
    assert_eq!(loaded.meters[0].ean, "");
    assert!(loaded.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    // No meters at all
    let cfg = Config::default();
    assert!(cfg.validate().is_err());

    // Empty meter id
    let mut cfg = Config::default();
    cfg.meters.push(meter("", ""));
    assert!(cfg.validate().is_err());

    // Duplicate EANs
    cfg = Config::default();
    cfg.meters.push(meter("1", "same"));
    cfg.meters.push(meter("2", "same"));
    assert!(cfg.validate().is_err());

    // Broker host missing
    cfg = Config::default();
    cfg.meters.push(meter("784703", ""));
    cfg.mqtt.host.clear();
    assert!(cfg.validate().is_err());

    // Retry budget zero
    cfg = Config::default();
    cfg.meters.push(meter("784703", ""));
    cfg.polling.max_retries = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}
