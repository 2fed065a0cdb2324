//! Cross-cutting, shared constants.
//!
//! File names here define the on-disk layout of a session directory. The checkpoint,
//! the running log and the model artifact all live side by side in `logging.save_dir`.

/// Session checkpoint file inside the save directory.
pub const CHECKPOINT_FILENAME: &str = "checkpoint.pth";

/// Append-only running log inside the save directory.
pub const TRAIN_LOG_FILENAME: &str = "train.log";

/// Backbone configuration (Hugging Face `config.json` layout).
pub const MODEL_CONFIG_FILENAME: &str = "config.json";

/// Backbone weights.
pub const WEIGHTS_FILENAME: &str = "model.safetensors";

/// Serialized tokenizer.
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// Bumped whenever the checkpoint record layout changes.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

pub const DEFAULT_MODEL_NAME: &str = "BAAI/bge-reranker-base";

/// `bge-reranker-base` is an XLM-RoBERTa sequence classifier.
pub const DEFAULT_MODEL_TYPE: &str = "modelrerank";

pub const DEFAULT_SAVE_DIR: &str = "models";

pub const DEFAULT_MAX_SEQ_LEN: usize = 512;

pub const DEFAULT_OPTIMIZER_NAME: &str = "AdamW";
pub const DEFAULT_WEIGHT_DECAY: f64 = 1e-4;
pub const DEFAULT_CLIP_MAX_NORM: f64 = 0.5;
pub const DEFAULT_LR_FACTOR: f64 = 0.3;
pub const DEFAULT_LR_PATIENCE: u64 = 15;
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;
pub const DEFAULT_TOTAL_EPOCH: u64 = 1000;
pub const DEFAULT_EVAL_INTERVAL: u64 = 10;

/// Relative improvement a plateau scheduler requires before it counts a new best.
pub const PLATEAU_THRESHOLD: f64 = 1e-4;

/// Learning-rate changes smaller than this are ignored by the plateau scheduler.
pub const PLATEAU_EPS: f64 = 1e-8;
