use hred_model::ModelError;
use hred_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{operation} needs a {required} graph, but this model was built for {built}")]
    WrongMode {
        operation: &'static str,
        required: &'static str,
        built: &'static str,
    },
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, TrainError>;
