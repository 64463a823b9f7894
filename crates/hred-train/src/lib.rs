//! `hred-train` - Sessions and loops for training and sampling the HRED
//! dialogue model.
//!
//! This crate provides:
//! - `Session`, the explicit context that owns parameters, optimizer state,
//!   the learning rate and the RNG
//! - The `BatchFeed` contract with an in-memory implementation
//! - `Hred`, which runs `train`, `valid` and `test` passes over a feed
//! - Loss tracking, JSON-lines scalar summaries and tracing setup

pub mod error;
pub mod feed;
pub mod report;
pub mod session;
pub mod summary;
pub mod telemetry;
pub mod trainer;

pub use error::{Result, TrainError};
pub use feed::{BatchFeed, Dialog, DialogBatch, InMemoryFeed};
pub use report::LossTracker;
pub use session::Session;
pub use summary::{ScalarSummary, SummaryWriter};
pub use trainer::Hred;
