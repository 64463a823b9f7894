//! `hred-model` - Hierarchical recurrent encoder-decoder for dialogue
//! response generation.
//!
//! This crate provides:
//! - `HredConfig`, the typed hyperparameter set with TOML/JSON loading
//! - The HRED graph: sentence encoders, the context RNN, teacher-forced and
//!   free-running decoders, and the masked reconstruction loss
//! - Adam/RMSProp/SGD optimizers with exportable slot state
//! - GGUF checkpoints carrying config, vocabulary, weights and slots

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gguf;
pub mod hred;
pub mod nn;
pub mod optim;
pub mod vocab;

pub use checkpoint::{Checkpoint, CheckpointRef};
pub use config::{CellType, DecodeStrategy, HredConfig, OptimizerKind, SentType};
pub use error::{ModelError, Result};
pub use hred::{HredModel, LossOutputs, LossReport, Mode, ModelInputs, SampledResponses};
pub use nn::ParamBuilder;
pub use optim::Optimizer;
pub use vocab::{Vocab, VocabSource};
