use rand::rngs::StdRng;
use rand::Rng;

use hred_sampler::SamplerChain;
use hred_tensor::{Graph, Var};

use crate::config::{CellType, HredConfig};
use crate::error::{ModelError, Result};
use crate::nn::{dropout, Embedding, LayeredState, Linear, MultiRnnCell, ParamBuilder, RnnState};

use super::inputs::ModelInputs;

/// Projects the context vector into the decoder's initial state, one dense
/// layer per decoder layer (`init_state-<i>`, or `init_state` alone).
#[derive(Debug, Clone)]
pub struct DecoderInit {
    layers: Vec<Linear>,
    cell_type: CellType,
}

impl DecoderInit {
    pub fn new(config: &HredConfig, context_width: usize, builder: &mut ParamBuilder<'_>) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_layer);
        for i in 0..config.num_layer {
            let name = if config.num_layer > 1 {
                format!("init_state-{}", i)
            } else {
                "init_state".to_string()
            };
            layers.push(Linear::new(&name, context_width, config.dec_cell_size, 0.0, builder)?);
        }
        Ok(DecoderInit {
            layers,
            cell_type: config.cell_type,
        })
    }

    /// LSTM layers get the projected vector as both memory and output.
    pub fn initial_state(&self, g: &mut Graph, context: Var) -> Result<LayeredState> {
        let mut states = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let v = layer.forward(g, context)?;
            states.push(RnnState::from_vector(self.cell_type, v));
        }
        Ok(LayeredState(states))
    }
}

/// Decoder cell plus the projection to vocabulary logits. Both decoding
/// paths are built from the same parameter names.
#[derive(Debug, Clone)]
pub struct DecoderCore {
    cell: MultiRnnCell,
    projection: Linear,
    vocab_size: usize,
}

impl DecoderCore {
    pub fn new(
        config: &HredConfig,
        context_width: usize,
        vocab_size: usize,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let cell = MultiRnnCell::new(
            config.cell_type,
            "decoder",
            config.embed_size + context_width,
            config.dec_cell_size,
            config.num_layer,
            config.keep_prob,
            builder,
        )?;
        let projection = Linear::new(
            "decoder/output_projection",
            config.dec_cell_size,
            vocab_size,
            0.0,
            builder,
        )?;
        Ok(DecoderCore {
            cell,
            projection,
            vocab_size,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Teacher forcing: step `t` reads gold token `t` and predicts token `t + 1`.
#[derive(Debug, Clone)]
pub struct TeacherForcedDecoder {
    core: DecoderCore,
    keep_prob: f32,
    dec_keep_prob: f32,
}

impl TeacherForcedDecoder {
    pub fn new(core: DecoderCore, config: &HredConfig) -> Self {
        TeacherForcedDecoder {
            core,
            keep_prob: config.keep_prob,
            dec_keep_prob: config.dec_keep_prob,
        }
    }

    /// Logits for steps `0 .. max_out_len - 1`, each `[batch, vocab]`.
    ///
    /// Dialog `b` decodes `output_lens[b] - 1` steps; its logits are zero
    /// afterwards. With `rng`, embeddings and cell outputs see dropout and
    /// whole input words are dropped with probability `1 - dec_keep_prob`.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        g: &mut Graph,
        embedding: &Embedding,
        table: Var,
        context: Var,
        init: LayeredState,
        inputs: &ModelInputs,
        mut rng: Option<&mut StdRng>,
    ) -> Result<Vec<Var>> {
        if inputs.max_out_len < 2 {
            return Err(ModelError::InvalidInput(format!(
                "responses need at least 2 tokens, got {}",
                inputs.max_out_len
            )));
        }
        let batch = inputs.batch_size;
        let steps = inputs.max_out_len - 1;
        let dec_lens: Vec<usize> = inputs.output_lens.iter().map(|l| l.saturating_sub(1)).collect();

        let mut step_inputs = Vec::with_capacity(steps);
        for t in 0..steps {
            let ids: Vec<u32> = (0..batch).map(|b| inputs.output(b)[t]).collect();
            let mut emb = embedding.lookup(g, table, &ids)?;
            if let Some(r) = rng.as_deref_mut() {
                emb = dropout(g, emb, self.keep_prob, r)?;
                if self.dec_keep_prob < 1.0 {
                    let keep = (0..batch)
                        .map(|_| if r.gen::<f32>() <= self.dec_keep_prob { 1.0 } else { 0.0 })
                        .collect();
                    emb = g.scale_rows(emb, keep)?;
                }
            }
            step_inputs.push(g.concat_cols(&[emb, context])?);
        }

        let (outputs, _) = self.core.cell.unroll(g, &step_inputs, &dec_lens, init, rng)?;

        let mut logits = Vec::with_capacity(steps);
        for (t, out) in outputs.into_iter().enumerate() {
            let l = self.core.projection.forward(g, out)?;
            let active: Vec<f32> = dec_lens
                .iter()
                .map(|&len| if t < len { 1.0 } else { 0.0 })
                .collect();
            logits.push(g.scale_rows(l, active)?);
        }
        Ok(logits)
    }
}

/// Free-running decoding from `<s>`: each chosen token is fed back until
/// every row has produced `</s>` or `max_len` tokens exist.
#[derive(Debug, Clone)]
pub struct FreeRunningDecoder {
    core: DecoderCore,
    go_id: u32,
    eos_id: u32,
    max_len: usize,
}

impl FreeRunningDecoder {
    pub fn new(core: DecoderCore, go_id: u32, eos_id: u32, max_len: usize) -> Self {
        FreeRunningDecoder {
            core,
            go_id,
            eos_id,
            max_len,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        g: &mut Graph,
        embedding: &Embedding,
        table: Var,
        context: Var,
        init: LayeredState,
        batch: usize,
        chain: &mut SamplerChain,
    ) -> Result<SampledResponses> {
        let mut state = init;
        let mut prev = vec![self.go_id; batch];
        let mut finished = vec![false; batch];
        let mut steps: Vec<(Vec<u32>, Vec<bool>)> = Vec::with_capacity(self.max_len);

        for _ in 0..self.max_len {
            let emb = embedding.lookup(g, table, &prev)?;
            let x = g.concat_cols(&[emb, context])?;
            let (out, next) = self.core.cell.step(g, x, &state, None)?;
            let logits = self.core.projection.forward(g, out)?;
            let chosen = chain.sample_rows(g.value(logits).data_f32(), self.core.vocab_size);

            let mut ids = Vec::with_capacity(batch);
            let mut mask = Vec::with_capacity(batch);
            for (b, &id) in chosen.iter().enumerate() {
                let valid = !finished[b] && id != self.eos_id;
                finished[b] |= id == self.eos_id;
                ids.push(if valid { id } else { 0 });
                mask.push(valid);
            }
            steps.push((ids, mask));

            state = next;
            prev = chosen;
            if finished.iter().all(|&f| f) {
                break;
            }
        }

        let len = steps.len();
        let mut ids = vec![0; batch * len];
        let mut mask = vec![false; batch * len];
        for (t, (step_ids, step_mask)) in steps.iter().enumerate() {
            for b in 0..batch {
                ids[b * len + t] = step_ids[b];
                mask[b * len + t] = step_mask[b];
            }
        }
        Ok(SampledResponses {
            batch_size: batch,
            len,
            ids,
            mask,
        })
    }
}

/// The decoder variant is fixed when the model is built.
#[derive(Debug, Clone)]
pub enum Decoder {
    TeacherForced(TeacherForcedDecoder),
    FreeRunning(FreeRunningDecoder),
}

/// Token ids chosen by the free-running decoder, row-major
/// `[batch_size, len]`. Positions at or after a row's first `</s>` are masked
/// out and hold id 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledResponses {
    pub batch_size: usize,
    pub len: usize,
    pub ids: Vec<u32>,
    pub mask: Vec<bool>,
}

impl SampledResponses {
    pub fn row(&self, b: usize) -> &[u32] {
        &self.ids[b * self.len..(b + 1) * self.len]
    }

    pub fn mask_row(&self, b: usize) -> &[bool] {
        &self.mask[b * self.len..(b + 1) * self.len]
    }

    /// Ids of row `b` that survive the mask.
    pub fn valid_tokens(&self, b: usize) -> Vec<u32> {
        self.row(b)
            .iter()
            .zip(self.mask_row(b))
            .filter(|(_, &m)| m)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Undo a `repeat`-fold tiling: group `r` holds rows
    /// `r * n .. (r + 1) * n` with `n = batch_size / repeat`.
    pub fn split(&self, repeat: usize) -> Result<Vec<SampledResponses>> {
        if repeat == 0 || self.batch_size % repeat != 0 {
            return Err(ModelError::InvalidInput(format!(
                "cannot split {} rows into {} groups",
                self.batch_size, repeat
            )));
        }
        let n = self.batch_size / repeat;
        let span = n * self.len;
        Ok((0..repeat)
            .map(|r| SampledResponses {
                batch_size: n,
                len: self.len,
                ids: self.ids[r * span..(r + 1) * span].to_vec(),
                mask: self.mask[r * span..(r + 1) * span].to_vec(),
            })
            .collect())
    }
}
