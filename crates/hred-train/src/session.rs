//! The explicit context every model operation runs against.

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use hred_model::checkpoint::{self, CheckpointRef};
use hred_model::{
    HredConfig, HredModel, LossReport, ModelInputs, Optimizer, ParamBuilder, SampledResponses,
    Vocab,
};
use hred_tensor::{CpuBackend, DType, Gradients, Graph, ParamStore};

use crate::error::{Result, TrainError};

/// Owns the backend, the parameters, the optimizer slots, the learning-rate
/// scalar and the RNG behind dropout and sampling.
///
/// Models built against one session share every parameter by name.
pub struct Session {
    backend: Arc<CpuBackend>,
    params: ParamStore,
    optimizer: Optimizer,
    learning_rate: f32,
    rng: StdRng,
    config: HredConfig,
    vocab: Option<Vocab>,
}

impl Session {
    pub fn new(config: &HredConfig) -> Result<Self> {
        config.validate()?;
        Ok(Session {
            backend: Arc::new(CpuBackend::new()),
            params: ParamStore::new(),
            optimizer: Optimizer::new(config.op),
            learning_rate: config.init_lr,
            rng: StdRng::seed_from_u64(config.seed),
            config: config.clone(),
            vocab: None,
        })
    }

    /// Rebuild a session from a checkpoint written by [`Session::save`].
    /// Returns the session and the global step it was saved at.
    pub fn restore(path: &Path) -> Result<(Self, u64)> {
        let ckpt = checkpoint::load(path)?;
        let session = Session {
            backend: Arc::new(CpuBackend::new()),
            rng: StdRng::seed_from_u64(ckpt.config.seed.wrapping_add(ckpt.global_step)),
            params: ckpt.params,
            optimizer: ckpt.optimizer,
            learning_rate: ckpt.learning_rate,
            config: ckpt.config,
            vocab: ckpt.vocab,
        };
        Ok((session, ckpt.global_step))
    }

    /// Redraw every parameter from its initializer and clear the optimizer.
    pub fn init_params(&mut self) {
        self.params.reinitialize(&mut self.rng);
        self.optimizer.reset();
        info!(params = self.params.len(), "initialized parameters");
    }

    /// Write an F32 checkpoint.
    pub fn save(&self, path: &Path, global_step: u64) -> Result<usize> {
        self.save_as(path, global_step, DType::F32)
    }

    /// Write a checkpoint with tensors stored as `dtype`.
    pub fn save_as(&self, path: &Path, global_step: u64, dtype: DType) -> Result<usize> {
        let state = CheckpointRef {
            config: &self.config,
            vocab: self.vocab.as_ref(),
            params: &self.params,
            optimizer: &self.optimizer,
            global_step,
            learning_rate: self.learning_rate,
        };
        Ok(checkpoint::save(path, &state, dtype)?)
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Multiply the learning rate by `factor`, returning the new value.
    pub fn decay_learning_rate(&mut self, factor: f32) -> f32 {
        self.learning_rate *= factor;
        info!(learning_rate = self.learning_rate, "decayed learning rate");
        self.learning_rate
    }

    pub fn config(&self) -> &HredConfig {
        &self.config
    }

    pub fn vocab(&self) -> Option<&Vocab> {
        self.vocab.as_ref()
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    /// Log every parameter shape and the total parameter count.
    pub fn print_model_stats(&self) {
        for (_, name, value) in self.params.iter() {
            info!("{} {}", name, value.shape());
        }
        info!("Total number of trainable parameters is {}", self.params.num_elements());
    }

    /// Build a model whose parameters live in this session. `config` and
    /// `vocab` must match what the session checkpoints.
    pub(crate) fn build_model(
        &mut self,
        config: &HredConfig,
        vocab: &Vocab,
        mode: hred_model::Mode,
    ) -> Result<HredModel> {
        if *config != self.config {
            return Err(TrainError::InvalidArgument(
                "model config differs from the session config".to_string(),
            ));
        }
        match &self.vocab {
            Some(existing) if existing != vocab => {
                return Err(TrainError::InvalidArgument(
                    "model vocabulary differs from the session vocabulary".to_string(),
                ));
            }
            Some(_) => {}
            None => self.vocab = Some(vocab.clone()),
        }
        let mut builder = ParamBuilder::new(&mut self.params, &mut self.rng, config.init_w);
        Ok(HredModel::new(config, vocab, mode, &mut builder)?)
    }

    /// One optimizer step on `inputs`, with dropout.
    pub(crate) fn train_step(&mut self, model: &HredModel, inputs: &ModelInputs) -> Result<LossReport> {
        let (report, grads) = {
            let mut g = Graph::new(&*self.backend, &self.params);
            let out = model.forward_loss(&mut g, inputs, Some(&mut self.rng))?;
            let report = LossReport::from_graph(&g, &out);
            let grads = g.backward(out.avg_rc_loss)?;
            (report, grads)
        };
        self.apply_gradients(grads)?;
        Ok(report)
    }

    /// Clip `grads` to the configured global norm and apply them.
    pub fn apply_gradients(&mut self, mut grads: Gradients) -> Result<f32> {
        let norm = match self.config.grad_clip {
            Some(max) => grads.clip_by_global_norm(max),
            None => grads.global_norm(),
        };
        self.optimizer
            .apply(&mut self.params, &grads, self.learning_rate)?;
        debug!(grad_norm = norm, step = self.optimizer.step(), "applied gradients");
        Ok(norm)
    }

    /// Loss on `inputs` without dropout or updates.
    pub(crate) fn eval_step(&self, model: &HredModel, inputs: &ModelInputs) -> Result<LossReport> {
        let mut g = Graph::new(&*self.backend, &self.params);
        let out = model.forward_loss(&mut g, inputs, None)?;
        Ok(LossReport::from_graph(&g, &out))
    }

    pub(crate) fn generate(
        &mut self,
        model: &HredModel,
        inputs: &ModelInputs,
    ) -> Result<SampledResponses> {
        let mut g = Graph::new(&*self.backend, &self.params);
        Ok(model.generate(&mut g, inputs, &mut self.rng)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hred_model::Mode;

    fn tiny_config() -> HredConfig {
        HredConfig {
            max_utt_len: 5,
            cxt_cell_size: 4,
            sent_cell_size: 3,
            dec_cell_size: 4,
            embed_size: 3,
            init_w: 0.2,
            ..HredConfig::default()
        }
    }

    fn vocab() -> Vocab {
        let toks = ["<pad>", "<s>", "</s>", "hi", "there"];
        Vocab::new(toks.iter().map(|t| t.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_models_share_params() {
        let cfg = tiny_config();
        let mut session = Session::new(&cfg).unwrap();
        session.build_model(&cfg, &vocab(), Mode::Train).unwrap();
        let n = session.params().len();
        session.build_model(&cfg, &vocab(), Mode::Inference).unwrap();
        assert_eq!(session.params().len(), n);
        assert!(session.vocab().is_some());
        session.print_model_stats();
    }

    #[test]
    fn test_build_rejects_foreign_config_and_vocab() {
        let cfg = tiny_config();
        let mut session = Session::new(&cfg).unwrap();
        let wider = HredConfig {
            embed_size: 6,
            ..tiny_config()
        };
        assert!(matches!(
            session.build_model(&wider, &vocab(), Mode::Train),
            Err(TrainError::InvalidArgument(_))
        ));
        assert!(session.params().is_empty());

        session.build_model(&cfg, &vocab(), Mode::Train).unwrap();
        let toks = ["<pad>", "<s>", "</s>", "bye"];
        let other = Vocab::new(toks.iter().map(|t| t.to_string()).collect()).unwrap();
        assert!(matches!(
            session.build_model(&cfg, &other, Mode::Inference),
            Err(TrainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decay_learning_rate() {
        let cfg = tiny_config();
        let mut session = Session::new(&cfg).unwrap();
        assert_eq!(session.learning_rate(), cfg.init_lr);
        let lr = session.decay_learning_rate(cfg.lr_decay);
        approx::assert_relative_eq!(lr, cfg.init_lr * cfg.lr_decay);
    }

    #[test]
    fn test_init_params_redraws() {
        let cfg = tiny_config();
        let mut session = Session::new(&cfg).unwrap();
        session.build_model(&cfg, &vocab(), Mode::Train).unwrap();
        let before = session.params().by_name("word_embedding").unwrap().clone();
        session.init_params();
        let after = session.params().by_name("word_embedding").unwrap();
        assert_ne!(before.data_f32(), after.data_f32());
        assert_eq!(session.optimizer().step(), 0);
    }

    #[test]
    fn test_save_restore() {
        let cfg = tiny_config();
        let mut session = Session::new(&cfg).unwrap();
        session.build_model(&cfg, &vocab(), Mode::Train).unwrap();
        session.decay_learning_rate(0.5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hred-12.gguf");
        session.save(&path, 12).unwrap();

        let (restored, step) = Session::restore(&path).unwrap();
        assert_eq!(step, 12);
        assert_eq!(restored.learning_rate(), session.learning_rate());
        assert_eq!(restored.config(), session.config());
        assert_eq!(restored.vocab(), session.vocab());
        assert_eq!(restored.params().len(), session.params().len());
        for (_, name, value) in session.params().iter() {
            assert_eq!(restored.params().by_name(name).unwrap().data_f32(), value.data_f32());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = HredConfig {
            num_layer: 0,
            ..tiny_config()
        };
        assert!(Session::new(&cfg).is_err());
    }
}
