use super::*;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }

    result
}

fn clear_rerank_env() {
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe {
        env::remove_var("RERANK_CONFIG");
        env::remove_var("RERANK_SAVE_DIR");
        env::remove_var("RERANK_MODEL_PATH");
        env::remove_var("RERANK_DEVICE");
    }
}

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.model_type, "modelrerank");
    assert_eq!(config.model.model_name_or_path, "BAAI/bge-reranker-base");
    assert_eq!(config.model.device, DevicePreference::Cpu);
    assert_eq!(config.model.max_seq_len, 512);
    assert_eq!(config.logging.save_dir, PathBuf::from("models"));

    let training = &config.training;
    assert_eq!(training.optimizer_name, "AdamW");
    assert_eq!(training.weight_decay, 1e-4);
    assert_eq!(training.clip_max_norm, 0.5);
    assert_eq!(training.factor, 0.3);
    assert_eq!(training.patience, 15);
    assert_eq!(training.lr, 1e-4);
    assert_eq!(training.total_epoch, 1000);
    assert_eq!(training.eval_interval, 10);
    assert!(training.class_weights.is_none());

    assert!(config.validate().is_ok());
    assert_eq!(config.model_type().unwrap(), ModelType::Roberta);
}

#[test]
fn test_from_toml_file_fills_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rerank.toml");
    std::fs::write(
        &path,
        r#"
model_type = "bert"

[model]
model_name_or_path = "./pretrained"
device = "cuda:1"

[logging]
save_dir = "runs/exp1"

[training]
lr = 2e-5
total_epoch = 3
class_weights = [1.0, 0.5]
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.model_type().unwrap(), ModelType::Bert);
    assert_eq!(config.model.model_name_or_path, "./pretrained");
    assert_eq!(config.model.device, DevicePreference::Cuda(1));
    assert_eq!(config.model.max_seq_len, 512);
    assert_eq!(config.logging.save_dir, PathBuf::from("runs/exp1"));
    assert_eq!(config.training.lr, 2e-5);
    assert_eq!(config.training.total_epoch, 3);
    assert_eq!(config.training.class_weights, Some(vec![1.0, 0.5]));
    assert_eq!(config.training.optimizer_name, "AdamW");
}

#[test]
fn test_from_json_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rerank.json");
    std::fs::write(
        &path,
        r#"{"model_type": "roberta", "training": {"optimizer_name": "Adam", "patience": 2}}"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.training.optimizer_name, "Adam");
    assert_eq!(config.training.patience, 2);
    assert_eq!(config.training.eval_interval, 10);
}

#[test]
fn test_from_file_errors() {
    let temp = TempDir::new().unwrap();

    let missing = Config::from_file(&temp.path().join("absent.toml"));
    assert!(matches!(missing, Err(ConfigError::ReadFailed { .. })));

    let yaml = temp.path().join("rerank.yml");
    std::fs::write(&yaml, "model_type: bert").unwrap();
    assert!(matches!(
        Config::from_file(&yaml),
        Err(ConfigError::UnsupportedFormat { .. })
    ));

    let broken = temp.path().join("broken.toml");
    std::fs::write(&broken, "[training\nlr = ").unwrap();
    assert!(matches!(
        Config::from_file(&broken),
        Err(ConfigError::ParseFailed { .. })
    ));

    let bad_device = temp.path().join("device.json");
    std::fs::write(&bad_device, r#"{"model": {"device": "tpu"}}"#).unwrap();
    assert!(matches!(
        Config::from_file(&bad_device),
        Err(ConfigError::ParseFailed { .. })
    ));
}

#[test]
#[serial]
fn test_from_env_with_defaults() {
    clear_rerank_env();

    let config = Config::from_env().expect("should parse with defaults");
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_rerank_env();

    let config = with_env_vars(
        &[
            ("RERANK_SAVE_DIR", "/tmp/rerank-run"),
            ("RERANK_MODEL_PATH", "  local/model  "),
            ("RERANK_DEVICE", "metal"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.logging.save_dir, PathBuf::from("/tmp/rerank-run"));
    assert_eq!(config.model.model_name_or_path, "local/model");
    assert_eq!(config.model.device, DevicePreference::Metal(0));
}

#[test]
#[serial]
fn test_from_env_reads_config_file_then_overrides() {
    clear_rerank_env();

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rerank.toml");
    std::fs::write(&path, "[logging]\nsave_dir = \"from-file\"\n[training]\nlr = 0.01\n").unwrap();
    let path_str = path.to_str().unwrap().to_string();

    let config = with_env_vars(
        &[("RERANK_CONFIG", path_str.as_str()), ("RERANK_SAVE_DIR", "from-env")],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.training.lr, 0.01);
    assert_eq!(config.logging.save_dir, PathBuf::from("from-env"));
}

#[test]
#[serial]
fn test_invalid_device_env() {
    clear_rerank_env();

    let result = with_env_vars(&[("RERANK_DEVICE", "quantum")], Config::from_env);
    assert!(matches!(result, Err(ConfigError::InvalidDevice { .. })));
}

#[test]
#[serial]
fn test_empty_env_values_are_ignored() {
    clear_rerank_env();

    let config = with_env_vars(&[("RERANK_SAVE_DIR", "   ")], Config::from_env).unwrap();
    assert_eq!(config.logging.save_dir, PathBuf::from("models"));
}

#[test]
fn test_validate_rejects_unknown_model_type() {
    let config = Config {
        model_type: "gpt".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UnknownModelType { .. })
    ));
}

#[test]
fn test_validate_rejects_zero_eval_interval() {
    let mut config = Config::default();
    config.training.eval_interval = 0;

    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "training.eval_interval"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_validate_rejects_bad_hyperparameters() {
    let mut config = Config::default();
    config.training.lr = 0.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.factor = 1.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.weight_decay = -0.1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.class_weights = Some(vec![]);
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.class_weights = Some(vec![0.0, 0.0, 0.0]);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue {
            field: "training.class_weights",
            ..
        })
    ));

    let mut config = Config::default();
    config.model.max_seq_len = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_allows_disabled_clipping() {
    let mut config = Config::default();
    config.training.clip_max_norm = 0.0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_file_as_save_dir() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("not-a-dir");
    std::fs::write(&file, "x").unwrap();

    let config = Config {
        logging: LoggingConfig { save_dir: file },
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::NotADirectory { .. })
    ));
}
