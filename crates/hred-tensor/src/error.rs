use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("cannot broadcast shapes {a:?} and {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("index {index} out of range for {len} rows")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("parameter '{name}' already exists with shape {existing:?}, requested {requested:?}")]
    ParamShapeConflict {
        name: String,
        existing: Vec<usize>,
        requested: Vec<usize>,
    },
    #[error("unknown parameter: {0}")]
    UnknownParam(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
