//! Versioned GGUF checkpoints of a training session.

use std::path::Path;

use tracing::info;

use hred_tensor::{DType, ParamStore};

use crate::config::HredConfig;
use crate::error::{ModelError, Result};
use crate::gguf::{GgufFile, GgufMetadata, GgufWriter};
use crate::optim::Optimizer;
use crate::vocab::Vocab;

pub const ARCHITECTURE: &str = "hred";
pub const CHECKPOINT_VERSION: u32 = 1;

/// Borrowed view of everything a checkpoint stores.
pub struct CheckpointRef<'a> {
    pub config: &'a HredConfig,
    pub vocab: Option<&'a Vocab>,
    pub params: &'a ParamStore,
    pub optimizer: &'a Optimizer,
    pub global_step: u64,
    pub learning_rate: f32,
}

/// A checkpoint read back from disk.
pub struct Checkpoint {
    pub config: HredConfig,
    pub vocab: Option<Vocab>,
    pub params: ParamStore,
    pub optimizer: Optimizer,
    pub global_step: u64,
    pub learning_rate: f32,
}

/// Write parameters and optimizer slots as `dtype`, returning bytes written.
pub fn save(path: &Path, state: &CheckpointRef<'_>, dtype: DType) -> Result<usize> {
    let mut metadata = GgufMetadata::new();
    state.config.write_metadata(&mut metadata);

    let mut writer = GgufWriter::new();
    writer.add_metadata("general.architecture", ARCHITECTURE);
    writer.add_metadata("hred.checkpoint_version", CHECKPOINT_VERSION);
    writer.add_metadata("hred.global_step", state.global_step);
    writer.add_metadata("hred.learning_rate", state.learning_rate);
    writer.add_metadata("hred.optimizer_step", state.optimizer.step());
    let mut config_keys: Vec<_> = metadata.entries.into_iter().collect();
    config_keys.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in config_keys {
        writer.add_metadata(key, value);
    }
    if let Some(vocab) = state.vocab {
        let (key, value) = vocab.to_metadata();
        writer.add_metadata(key, value);
    }

    for (_, name, tensor) in state.params.iter() {
        writer.add_tensor(name, tensor, dtype);
    }
    for (name, tensor) in state.optimizer.export_slots(state.params) {
        writer.add_tensor(&name, &tensor, dtype);
    }

    let bytes = writer.write(path)?;
    info!(
        path = %path.display(),
        global_step = state.global_step,
        tensors = writer.n_tensors(),
        bytes,
        "saved checkpoint"
    );
    Ok(bytes)
}

/// Read a checkpoint written by [`save`].
pub fn load(path: &Path) -> Result<Checkpoint> {
    let file = GgufFile::open(path)?;
    let md = &file.metadata;

    let arch = md.get_string("general.architecture")?;
    if arch != ARCHITECTURE {
        return Err(ModelError::Other(format!(
            "checkpoint architecture is '{}', expected '{}'",
            arch, ARCHITECTURE
        )));
    }
    let version = md.get_u32("hred.checkpoint_version")?;
    if version != CHECKPOINT_VERSION {
        return Err(ModelError::UnsupportedCheckpoint(version));
    }

    let config = HredConfig::from_gguf(md)?;
    let vocab = if md.contains_key("tokenizer.hred.tokens") {
        Some(Vocab::from_gguf(md)?)
    } else {
        None
    };

    let mut params = ParamStore::new();
    let mut slots = Vec::new();
    for name in file.tensor_names() {
        let tensor = file.get_tensor(name)?;
        if name.starts_with("opt.") {
            slots.push((name.to_string(), tensor));
        } else {
            params.insert(name, tensor);
        }
    }

    let mut optimizer = Optimizer::new(config.op);
    for (name, tensor) in slots {
        if !optimizer.import_slot(&name, tensor, &params)? {
            return Err(ModelError::Other(format!(
                "slot '{}' does not belong to a {} optimizer",
                name, config.op
            )));
        }
    }
    optimizer.set_step(md.get_u64("hred.optimizer_step")?);

    let checkpoint = Checkpoint {
        global_step: md.get_u64("hred.global_step")?,
        learning_rate: md.get_f32("hred.learning_rate")?,
        config,
        vocab,
        params,
        optimizer,
    };
    info!(
        path = %path.display(),
        global_step = checkpoint.global_step,
        params = checkpoint.params.len(),
        "restored checkpoint"
    );
    Ok(checkpoint)
}
