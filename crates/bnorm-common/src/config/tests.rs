//! Configuration tests

use super::*;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 4] = [
    "BNORM_DISPATCH_BACKEND",
    "BNORM_NUM_THREADS",
    "BNORM_UNITS_PER_TASK",
    "BNORM_PARALLEL_THRESHOLD",
];

fn clear_env() {
    for var in &ENV_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
fn default_is_valid() {
    let cfg = DispatchConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend, DispatchBackend::Auto);
    assert_eq!(cfg.parallel_threshold, DEFAULT_PARALLEL_THRESHOLD);
    assert!(cfg.num_threads.is_none());
}

#[test]
fn sequential_is_valid() {
    let cfg = DispatchConfig::sequential();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend, DispatchBackend::Sequential);
}

#[test]
fn backend_display_roundtrip() {
    for b in [DispatchBackend::Auto, DispatchBackend::Sequential, DispatchBackend::Rayon] {
        let parsed: DispatchBackend = b.to_string().parse().unwrap();
        assert_eq!(b, parsed);
    }
    assert_eq!("PARALLEL".parse::<DispatchBackend>().unwrap(), DispatchBackend::Rayon);
}

#[test]
fn unknown_backend_is_error() {
    let r = "opencl".parse::<DispatchBackend>();
    assert!(r.unwrap_err().to_string().contains("unknown backend"));
}

#[test]
fn validation_rejects_zero_counts() {
    let cfg = DispatchConfig { num_threads: Some(0), ..DispatchConfig::default() };
    assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

    let cfg = DispatchConfig { units_per_task: Some(0), ..DispatchConfig::default() };
    assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

    let cfg = DispatchConfig { num_threads: Some(2), ..DispatchConfig::sequential() };
    assert!(cfg.validate().is_err());
}

#[test]
fn toml_roundtrip() {
    let cfg = DispatchConfig {
        backend: DispatchBackend::Rayon,
        num_threads: Some(4),
        units_per_task: Some(8),
        parallel_threshold: 128,
    };
    let text = cfg.to_toml().unwrap();
    assert!(text.contains("[dispatch]"));

    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    file.write_all(text.as_bytes()).unwrap();
    assert_eq!(DispatchConfig::from_toml(file.path()).unwrap(), cfg);
}

#[test]
fn toml_partial_table_uses_defaults() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    file.write_all(b"[dispatch]\nbackend = \"sequential\"\n").unwrap();

    let cfg = DispatchConfig::from_toml(file.path()).unwrap();
    assert_eq!(cfg.backend, DispatchBackend::Sequential);
    assert_eq!(cfg.parallel_threshold, DEFAULT_PARALLEL_THRESHOLD);
    assert_eq!(cfg.units_per_task, None);
}

#[test]
fn toml_missing_file_is_default() {
    let cfg = DispatchConfig::from_toml(Path::new("/nonexistent/bnorm.toml")).unwrap();
    assert_eq!(cfg, DispatchConfig::default());
}

#[test]
fn toml_invalid_is_parse_error() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    file.write_all(b"[dispatch]\nbackend = 3\n").unwrap();
    assert!(matches!(DispatchConfig::from_toml(file.path()), Err(ConfigError::TomlParse(_))));
}

#[test]
#[serial]
fn env_overrides_defaults() {
    clear_env();
    unsafe {
        env::set_var("BNORM_DISPATCH_BACKEND", "rayon");
        env::set_var("BNORM_NUM_THREADS", "3");
        env::set_var("BNORM_UNITS_PER_TASK", "16");
        env::set_var("BNORM_PARALLEL_THRESHOLD", "0");
    }

    let cfg = DispatchConfig::from_env().unwrap();
    clear_env();

    assert_eq!(cfg.backend, DispatchBackend::Rayon);
    assert_eq!(cfg.num_threads, Some(3));
    assert_eq!(cfg.units_per_task, Some(16));
    assert_eq!(cfg.parallel_threshold, 0);
}

#[test]
#[serial]
fn env_invalid_number_is_error() {
    clear_env();
    unsafe {
        env::set_var("BNORM_NUM_THREADS", "many");
    }

    let result = DispatchConfig::from_env();
    clear_env();

    match result {
        Err(ConfigError::InvalidEnvVar { key, value }) => {
            assert_eq!(key, "BNORM_NUM_THREADS");
            assert_eq!(value, "many");
        }
        other => panic!("expected InvalidEnvVar, got {other:?}"),
    }
}

#[test]
#[serial]
fn env_empty_is_default() {
    clear_env();
    assert_eq!(DispatchConfig::from_env().unwrap(), DispatchConfig::default());
}

#[test]
fn merge_prefers_non_default_fields() {
    let base = DispatchConfig {
        backend: DispatchBackend::Rayon,
        num_threads: Some(8),
        units_per_task: None,
        parallel_threshold: 100,
    };
    let overlay = DispatchConfig { units_per_task: Some(2), ..DispatchConfig::default() };

    let merged = base.merge_with(&overlay);
    assert_eq!(merged.backend, DispatchBackend::Rayon);
    assert_eq!(merged.num_threads, Some(8));
    assert_eq!(merged.units_per_task, Some(2));
    assert_eq!(merged.parallel_threshold, 100);
}
