//! The hierarchical recurrent encoder-decoder.
//!
//! A context is encoded bottom-up: every utterance becomes a sentence
//! vector, the sentence vectors (with a one-hot speaker floor) run through
//! the context RNN, and the flattened final state conditions a decoder that
//! either reconstructs the gold response (training) or generates one.

pub mod context;
pub mod decoder;
pub mod encoder;
pub mod inputs;
pub mod loss;

pub use context::ContextAggregator;
pub use decoder::{Decoder, DecoderInit, SampledResponses};
pub use encoder::SentenceEncoder;
pub use inputs::ModelInputs;
pub use loss::{LossOutputs, LossReport};

use std::fmt;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use hred_sampler::SamplerChain;
use hred_tensor::{Graph, Var};

use crate::config::{DecodeStrategy, HredConfig};
use crate::error::{ModelError, Result};
use crate::nn::{self, Embedding, ParamBuilder};
use crate::vocab::Vocab;

use decoder::{DecoderCore, FreeRunningDecoder, TeacherForcedDecoder};

/// Which decoder graph a model carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Teacher-forced decoding with a reconstruction loss.
    Train,
    /// Free-running decoding from `<s>`.
    Inference,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "training",
            Mode::Inference => "inference",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HredModel {
    config: HredConfig,
    go_id: u32,
    eos_id: u32,
    embedding: Embedding,
    encoder: SentenceEncoder,
    context: ContextAggregator,
    init: DecoderInit,
    decoder: Decoder,
}

impl HredModel {
    /// Register every parameter through `builder` and build the decoder
    /// variant for `mode`. Models built on the same store share weights.
    pub fn new(
        config: &HredConfig,
        vocab: &Vocab,
        mode: Mode,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        config.validate()?;
        let embedding = Embedding::new("word_embedding", vocab.len(), config.embed_size, builder)?;
        let encoder = SentenceEncoder::new(config, builder)?;
        let context = ContextAggregator::new(config, encoder.width(), builder)?;
        let init = DecoderInit::new(config, context.width(), builder)?;
        let core = DecoderCore::new(config, context.width(), vocab.len(), builder)?;
        let decoder = match mode {
            Mode::Train => Decoder::TeacherForced(TeacherForcedDecoder::new(core, config)),
            Mode::Inference => Decoder::FreeRunning(FreeRunningDecoder::new(
                core,
                vocab.go_id,
                vocab.eos_id,
                config.max_utt_len,
            )),
        };
        debug!(
            mode = mode.as_str(),
            sent_type = %config.sent_type,
            cell_type = %config.cell_type,
            sent_width = encoder.width(),
            context_width = context.width(),
            "built HRED graph"
        );
        Ok(HredModel {
            config: config.clone(),
            go_id: vocab.go_id,
            eos_id: vocab.eos_id,
            embedding,
            encoder,
            context,
            init,
            decoder,
        })
    }

    pub fn mode(&self) -> Mode {
        match self.decoder {
            Decoder::TeacherForced(_) => Mode::Train,
            Decoder::FreeRunning(_) => Mode::Inference,
        }
    }

    pub fn config(&self) -> &HredConfig {
        &self.config
    }

    pub fn go_id(&self) -> u32 {
        self.go_id
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.vocab_size()
    }

    /// `[batch, context_width]` vector summarizing each dialog's context.
    /// With `rng`, sentence vectors see dropout before the context RNN.
    pub fn encode_context(
        &self,
        g: &mut Graph,
        table: Var,
        inputs: &ModelInputs,
        rng: Option<&mut StdRng>,
    ) -> Result<Var> {
        let lengths = encoder::token_lengths(&inputs.contexts, inputs.max_utt_len);
        let (mut sentences, _) = self.encoder.encode(
            g,
            &self.embedding,
            table,
            &inputs.contexts,
            inputs.max_utt_len,
            &lengths,
        )?;
        if let Some(r) = rng {
            sentences = nn::dropout(g, sentences, self.config.keep_prob, r)?;
        }
        self.context.aggregate(g, sentences, inputs)
    }

    /// Sentence vectors of the gold responses, from the same encoder weights
    /// as the context utterances.
    pub fn encode_response(&self, g: &mut Graph, table: Var, inputs: &ModelInputs) -> Result<(Var, usize)> {
        self.encoder.encode(
            g,
            &self.embedding,
            table,
            &inputs.outputs,
            inputs.max_out_len,
            &inputs.output_lens,
        )
    }

    /// Build the teacher-forced graph and its loss. Dropout applies only
    /// when `rng` is given.
    pub fn forward_loss(
        &self,
        g: &mut Graph,
        inputs: &ModelInputs,
        rng: Option<&mut StdRng>,
    ) -> Result<LossOutputs> {
        let Decoder::TeacherForced(decoder) = &self.decoder else {
            return Err(ModelError::WrongMode {
                built: Mode::Inference.as_str(),
                requested: "a reconstruction loss",
            });
        };
        inputs.validate()?;
        let mut rng = rng;
        let table = self.embedding.masked_table(g)?;
        let context = self.encode_context(g, table, inputs, rng.as_deref_mut())?;
        let init = self.init.initial_state(g, context)?;
        let logits = decoder.run(g, &self.embedding, table, context, init, inputs, rng)?;
        loss::reconstruction_loss(g, &logits, inputs)
    }

    /// Generate one response per row of `inputs`. Token choice follows the
    /// configured decode strategy, seeded from `rng`.
    pub fn generate(
        &self,
        g: &mut Graph,
        inputs: &ModelInputs,
        rng: &mut StdRng,
    ) -> Result<SampledResponses> {
        let Decoder::FreeRunning(decoder) = &self.decoder else {
            return Err(ModelError::WrongMode {
                built: Mode::Train.as_str(),
                requested: "free-running generation",
            });
        };
        inputs.validate()?;
        let mut chain = match self.config.decode {
            DecodeStrategy::Greedy => SamplerChain::greedy(),
            DecodeStrategy::Sample {
                temperature,
                top_k,
                top_p,
            } => SamplerChain::stochastic(temperature, top_k, top_p, rng.gen()),
        };
        let table = self.embedding.masked_table(g)?;
        let context = self.encode_context(g, table, inputs, None)?;
        let init = self.init.initial_state(g, context)?;
        decoder.run(
            g,
            &self.embedding,
            table,
            context,
            init,
            inputs.batch_size,
            &mut chain,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellType, SentType};
    use approx::assert_relative_eq;
    use hred_tensor::{CpuBackend, ParamStore};
    use rand::SeedableRng;

    fn vocab() -> Vocab {
        let toks = ["<pad>", "<s>", "</s>", "a", "b", "c", "d"];
        Vocab::new(toks.iter().map(|t| t.to_string()).collect()).unwrap()
    }

    fn small_config(sent_type: SentType, cell_type: CellType, num_layer: usize) -> HredConfig {
        HredConfig {
            max_utt_len: 6,
            cxt_cell_size: 5,
            sent_cell_size: 4,
            dec_cell_size: 6,
            embed_size: 3,
            sent_type,
            cell_type,
            num_layer,
            init_w: 0.3,
            ..HredConfig::default()
        }
    }

    fn build(cfg: &HredConfig, mode: Mode, store: &mut ParamStore) -> HredModel {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut b = ParamBuilder::new(store, &mut rng, cfg.init_w);
        HredModel::new(cfg, &vocab(), mode, &mut b).unwrap()
    }

    #[test]
    fn test_train_and_inference_share_parameters() {
        let cfg = small_config(SentType::BiRnn, CellType::Gru, 2);
        let mut store = ParamStore::new();
        let train = build(&cfg, Mode::Train, &mut store);
        let n = store.len();
        let infer = build(&cfg, Mode::Inference, &mut store);
        assert_eq!(store.len(), n);
        assert_eq!(train.mode(), Mode::Train);
        assert_eq!(infer.mode(), Mode::Inference);
        assert!(store.id("init_state-1/weights").is_some());
        assert!(store.id("decoder/output_projection/weights").is_some());
    }

    #[test]
    fn test_single_layer_init_name() {
        let cfg = small_config(SentType::Bow, CellType::Lstm, 1);
        let mut store = ParamStore::new();
        build(&cfg, Mode::Train, &mut store);
        assert!(store.id("init_state/weights").is_some());
        assert!(store.id("init_state-0/weights").is_none());
    }

    #[test]
    fn test_loss_is_deterministic_and_finite() {
        for (st, ct) in [
            (SentType::Bow, CellType::Gru),
            (SentType::Rnn, CellType::Lstm),
            (SentType::BiRnn, CellType::Gru),
        ] {
            let cfg = small_config(st, ct, 1);
            let mut store = ParamStore::new();
            let model = build(&cfg, Mode::Train, &mut store);
            let inputs = inputs::fixtures::two_dialogs();
            let backend = CpuBackend::new();
            let run = |rng: Option<&mut StdRng>| {
                let mut g = Graph::new(&backend, &store);
                let out = model.forward_loss(&mut g, &inputs, rng).unwrap();
                LossReport::from_graph(&g, &out)
            };
            let a = run(None);
            let mut rng = StdRng::seed_from_u64(1);
            let b = run(Some(&mut rng));
            assert!(a.avg_rc_loss.is_finite() && a.avg_rc_loss > 0.0);
            assert!(a.rc_ppl >= 1.0);
            // keep_prob and dec_keep_prob are 1.0, so dropout is inert.
            assert_relative_eq!(a.avg_rc_loss, b.avg_rc_loss);
        }
    }

    #[test]
    fn test_gradients_reach_every_trainable_parameter() {
        let cfg = small_config(SentType::BiRnn, CellType::Lstm, 2);
        let mut store = ParamStore::new();
        let model = build(&cfg, Mode::Train, &mut store);
        let inputs = inputs::fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let out = model.forward_loss(&mut g, &inputs, None).unwrap();
        let grads = g.backward(out.avg_rc_loss).unwrap();
        assert_eq!(grads.len(), store.len());
        assert!(grads.global_norm() > 0.0);
    }

    #[test]
    fn test_response_encoding_uses_shared_encoder() {
        let cfg = small_config(SentType::BiRnn, CellType::Gru, 1);
        let mut store = ParamStore::new();
        let model = build(&cfg, Mode::Train, &mut store);
        let n = store.len();
        let inputs = inputs::fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let table = model.embedding.masked_table(&mut g).unwrap();
        let (v, width) = model.encode_response(&mut g, table, &inputs).unwrap();
        assert_eq!(width, 8);
        assert_eq!(g.dims(v), (2, 8));
        assert_eq!(store.len(), n);
    }

    #[test]
    fn test_generate_respects_length_and_eos() {
        let cfg = small_config(SentType::Rnn, CellType::Gru, 1);
        let mut store = ParamStore::new();
        let model = build(&cfg, Mode::Inference, &mut store);
        let inputs = inputs::fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let mut rng = StdRng::seed_from_u64(3);
        let out = model.generate(&mut g, &inputs, &mut rng).unwrap();
        assert!(out.len <= cfg.max_utt_len);
        assert_eq!(out.batch_size, 2);
        for b in 0..2 {
            let mask = out.mask_row(b);
            if let Some(p) = mask.iter().position(|&m| !m) {
                assert!(mask[p..].iter().all(|&m| !m));
            }
            for (&id, &m) in out.row(b).iter().zip(mask) {
                assert!(m || id == 0);
                assert!(!m || id != model.eos_id());
            }
        }
    }

    #[test]
    fn test_wrong_mode_is_rejected() {
        let cfg = small_config(SentType::Bow, CellType::Gru, 1);
        let mut store = ParamStore::new();
        let train = build(&cfg, Mode::Train, &mut store);
        let infer = build(&cfg, Mode::Inference, &mut store);
        let inputs = inputs::fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            train.generate(&mut g, &inputs, &mut rng),
            Err(ModelError::WrongMode { .. })
        ));
        assert!(matches!(
            infer.forward_loss(&mut g, &inputs, None),
            Err(ModelError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_sentence_dropout_needs_rng() {
        let cfg = HredConfig {
            keep_prob: 0.5,
            ..small_config(SentType::BiRnn, CellType::Gru, 1)
        };
        let mut store = ParamStore::new();
        let model = build(&cfg, Mode::Train, &mut store);
        let inputs = inputs::fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let table = model.embedding.masked_table(&mut g).unwrap();

        let plain = model.encode_context(&mut g, table, &inputs, None).unwrap();
        let again = model.encode_context(&mut g, table, &inputs, None).unwrap();
        assert_eq!(g.value(plain).data_f32(), g.value(again).data_f32());

        let mut rng = StdRng::seed_from_u64(21);
        let dropped = model
            .encode_context(&mut g, table, &inputs, Some(&mut rng))
            .unwrap();
        assert_eq!(g.dims(dropped), g.dims(plain));
        assert_ne!(g.value(plain).data_f32(), g.value(dropped).data_f32());
    }
}
