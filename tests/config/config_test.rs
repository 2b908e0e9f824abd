//! Coverage for config parsing and path resolution.

use std::path::{Path, PathBuf};

use missive::config::{config_dir, load_config, load_or_default, Config, RuntimePaths};

#[test]
fn config_dir_resolves() {
    let dir = config_dir();
    assert!(dir.is_ok());
    let path = match dir {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".missive"));
}

#[test]
fn parse_full_config() {
    let toml_str = r#"
[store]
path = "/var/lib/missive/messages.db"
max_connections = 8

[dispatch]
batch_size = 5
claim_timeout_secs = 120

[logging]
level = "debug"
dir = "/var/log/missive"
"#;
    let config = match toml::from_str::<Config>(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("full config should parse: {err}"),
    };
    assert_eq!(config.store.max_connections, 8);
    assert_eq!(config.dispatch.batch_size, 5);
    assert_eq!(config.dispatch.claim_timeout_secs, 120);
    assert_eq!(config.logging.level, "debug");

    let paths = RuntimePaths::under(PathBuf::from("/home/u/.missive"));
    assert_eq!(
        config.database_path(&paths),
        PathBuf::from("/var/lib/missive/messages.db")
    );
    assert_eq!(config.logs_dir(&paths), PathBuf::from("/var/log/missive"));
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let config = match toml::from_str::<Config>("[dispatch]\nbatch_size = 7\n") {
        Ok(config) => config,
        Err(err) => panic!("partial config should parse: {err}"),
    };
    assert_eq!(config.dispatch.batch_size, 7);
    assert_eq!(config.store.max_connections, 4);

    let paths = RuntimePaths::under(PathBuf::from("/home/u/.missive"));
    assert_eq!(
        config.database_path(&paths),
        PathBuf::from("/home/u/.missive/missive.db")
    );
}

#[test]
fn load_config_reports_parse_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[dispatch]\nbatch_size = \"lots\"\n").expect("write");

    let err = match load_config(&path) {
        Ok(_) => panic!("invalid batch size should not parse"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("failed to parse config"));
}

#[test]
fn load_or_default_tolerates_missing_file() {
    let config = load_or_default(Path::new("/nonexistent/missive/config.toml"));
    assert!(config.is_ok());
}
