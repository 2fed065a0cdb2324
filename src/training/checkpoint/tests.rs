use super::*;
use candle_core::Device;
use tempfile::TempDir;

use crate::model::MockCrossEncoder;

fn store() -> (TempDir, CheckpointStore) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = CheckpointStore::new(temp.path().join("session"));
    (temp, store)
}

fn optimizer_state() -> OptimizerState {
    OptimizerState {
        kind: "AdamW".to_string(),
        step: 12,
        learning_rate: 3e-5,
        moments: vec![MomentRecord {
            name: "classifier.bias".to_string(),
            shape: vec![1],
            first: vec![0.25],
            second: vec![0.0625],
        }],
    }
}

fn plateau_state() -> PlateauState {
    PlateauState {
        best: 0.8,
        num_bad_epochs: 2,
        cooldown_counter: 0,
        learning_rate: 3e-5,
    }
}

fn full_state() -> SessionState {
    SessionState {
        epoch: 7,
        loss: 1.25,
        best_loss: 0.8,
        optimizer: Some(optimizer_state()),
        lr_scheduler: Some(plateau_state()),
    }
}

#[test]
fn test_fresh_state() {
    let state = SessionState::fresh();
    assert_eq!(state.epoch, 0);
    assert!(state.best_loss.is_infinite());
    assert!(state.optimizer.is_none());
}

#[test]
fn test_save_with_optimizer_state() {
    let (_temp, store) = store();
    let state = full_state();

    store.save(&state, true).unwrap();
    assert_eq!(store.load().unwrap(), state);
}

#[test]
fn test_save_without_optimizer_state() {
    let (_temp, store) = store();

    store.save(&full_state(), false).unwrap();
    let loaded = store.load().unwrap();

    assert_eq!(loaded.epoch, 7);
    assert_eq!(loaded.loss, 1.25);
    assert_eq!(loaded.best_loss, 0.8);
    assert!(loaded.optimizer.is_none());
    assert!(loaded.lr_scheduler.is_none());
}

#[test]
fn test_save_creates_directory_and_leaves_no_temp_file() {
    let (_temp, store) = store();
    assert!(!store.dir().exists());

    store.save(&SessionState::fresh(), false).unwrap();

    assert!(store.checkpoint_path().is_file());
    assert!(!store.temp_checkpoint_path().exists());
}

#[test]
fn test_has_checkpoint_requires_log() {
    let (_temp, store) = store();
    assert!(!store.has_checkpoint());

    store.save(&full_state(), false).unwrap();
    assert!(!store.has_checkpoint());

    fs::write(store.log_path(), "").unwrap();
    assert!(store.has_checkpoint());
}

#[test]
fn test_log_without_checkpoint_is_fresh() {
    let (_temp, store) = store();
    store.ensure_dir().unwrap();
    fs::write(store.log_path(), "Train Epoch: 0\n").unwrap();

    assert!(!store.has_checkpoint());
}

#[test]
fn test_load_missing_checkpoint_is_corrupt() {
    let (_temp, store) = store();
    let err = store.load().unwrap_err();
    assert!(matches!(err, TrainingError::CorruptCheckpoint { .. }));
}

#[test]
fn test_load_garbage_is_corrupt() {
    let (_temp, store) = store();
    store.ensure_dir().unwrap();
    fs::write(store.checkpoint_path(), b"definitely not rkyv").unwrap();

    let err = store.load().unwrap_err();
    match err {
        TrainingError::CorruptCheckpoint { path, .. } => {
            assert_eq!(path, store.checkpoint_path())
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_load_rejects_unknown_version() {
    let (_temp, store) = store();
    store.ensure_dir().unwrap();

    let mut record = full_state().to_record(true);
    record.format_version = CHECKPOINT_FORMAT_VERSION + 1;
    let bytes = to_bytes::<RkyvError>(&record).unwrap();
    fs::write(store.checkpoint_path(), &bytes).unwrap();

    let err = store.load().unwrap_err();
    assert!(matches!(err, TrainingError::CorruptCheckpoint { ref reason, .. } if reason.contains("version")));
}

#[test]
fn test_artifact_round_trip() {
    let (_temp, store) = store();
    let device = Device::Cpu;
    let model = MockCrossEncoder::new(12, 3, &device).unwrap();
    assert!(!store.has_artifact());

    store.save_artifact(&model).unwrap();
    assert!(store.has_artifact());
    assert!(!store.has_checkpoint());

    let other = MockCrossEncoder::new(12, 3, &device).unwrap();
    for (_, var) in other.named_vars().unwrap() {
        var.set(&var.as_tensor().zeros_like().unwrap()).unwrap();
    }
    store.load_artifact(&other).unwrap();
    assert_eq!(other.flat_weights().unwrap(), model.flat_weights().unwrap());
}
