use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("Unknown sent_type '{0}'. Must be one of [bow, rnn, bi_rnn]")]
    UnknownSentType(String),
    #[error("Unknown cell_type '{0}'. Must be one of [gru, lstm]")]
    UnknownCellType(String),
    #[error("Unknown op '{0}'. Must be one of [adam, rmsprop, sgd]")]
    UnknownOptimizer(String),
    #[error("vocabulary error: {0}")]
    Vocab(String),
    #[error("invalid model input: {0}")]
    InvalidInput(String),
    #[error("graph built for {built} cannot run {requested}")]
    WrongMode {
        built: &'static str,
        requested: &'static str,
    },
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported checkpoint version: {0}")]
    UnsupportedCheckpoint(u32),
    #[error("missing metadata key: {0}")]
    MissingKey(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("truncated tensor data for '{0}'")]
    TruncatedTensor(String),
    #[error("tensor error: {0}")]
    TensorError(#[from] hred_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
