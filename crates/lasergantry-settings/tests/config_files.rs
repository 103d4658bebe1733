use lasergantry_settings::{Config, SettingsError};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_toml_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.grbl.port = "/dev/ttyACM1".to_string();
    config.limits.port = Some("/dev/ttyACM0".to_string());
    config.homing.x.known_length = 290.5;
    config.motion.rapid_feed = 12000.0;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::default();
    config.homing.y.plus_switches = vec![1];
    config.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"plus_switches\""));
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_invalid_file_is_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[motion]\njog_feed = -5.0\n").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::Config(_)));
}

#[test]
fn test_invalid_config_is_not_saved() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.grbl.baud_rate = 0;
    assert!(config.save_to_file(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_malformed_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[grbl\nport = ").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::TomlError(_))
    ));
}
