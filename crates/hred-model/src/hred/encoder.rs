use hred_tensor::{Graph, Var};

use crate::config::{CellType, HredConfig, SentType};
use crate::error::{ModelError, Result};
use crate::nn::{Embedding, MultiRnnCell, ParamBuilder};
use crate::vocab::PAD_ID;

/// Turns padded utterances into fixed-width sentence vectors.
///
/// The variant is chosen once from `sent_type`. The context path and the
/// response path call the same encoder, so they share its weights.
#[derive(Debug, Clone)]
pub enum SentenceEncoder {
    /// Sum (or mean) of word embeddings. Width `embed_size`.
    BagOfWords { embed_size: usize, average: bool },
    /// Final state of a forward recurrent pass. Width `sent_cell_size`.
    UniRnn(MultiRnnCell),
    /// Forward and backward final states concatenated. Width
    /// `2 * sent_cell_size`.
    BiRnn { fw: MultiRnnCell, bw: MultiRnnCell },
}

impl SentenceEncoder {
    /// Recurrent variants always use a single undropped GRU layer;
    /// `cell_type` and `num_layer` only shape the context RNN and decoder.
    pub fn new(config: &HredConfig, builder: &mut ParamBuilder<'_>) -> Result<Self> {
        let cell = |scope: &str, builder: &mut ParamBuilder<'_>| {
            MultiRnnCell::new(
                CellType::Gru,
                scope,
                config.embed_size,
                config.sent_cell_size,
                1,
                1.0,
                builder,
            )
        };
        Ok(match config.sent_type {
            SentType::Bow => SentenceEncoder::BagOfWords {
                embed_size: config.embed_size,
                average: config.bow_avg,
            },
            SentType::Rnn => SentenceEncoder::UniRnn(cell("utt_encoder/rnn", builder)?),
            SentType::BiRnn => SentenceEncoder::BiRnn {
                fw: cell("utt_encoder/fw", builder)?,
                bw: cell("utt_encoder/bw", builder)?,
            },
        })
    }

    pub fn width(&self) -> usize {
        match self {
            SentenceEncoder::BagOfWords { embed_size, .. } => *embed_size,
            SentenceEncoder::UniRnn(cell) => cell.units(),
            SentenceEncoder::BiRnn { fw, bw } => fw.units() + bw.units(),
        }
    }

    /// Encode `ids`, a row-major `[rows, cols]` block of token ids, where row
    /// `u` holds `lengths[u]` real tokens followed by padding.
    ///
    /// Returns the `[rows, width]` sentence vectors and `width`.
    pub fn encode(
        &self,
        g: &mut Graph,
        embedding: &Embedding,
        table: Var,
        ids: &[u32],
        cols: usize,
        lengths: &[usize],
    ) -> Result<(Var, usize)> {
        let rows = lengths.len();
        if ids.len() != rows * cols || lengths.iter().any(|&l| l > cols) {
            return Err(ModelError::InvalidInput(format!(
                "{} token ids with {} lengths do not form rows of {}",
                ids.len(),
                rows,
                cols
            )));
        }
        let column = |t: usize| -> Vec<u32> { (0..rows).map(|u| ids[u * cols + t]).collect() };

        let encoded = match self {
            SentenceEncoder::BagOfWords { average, .. } => {
                let mut steps = Vec::with_capacity(cols);
                for t in 0..cols {
                    steps.push(embedding.lookup(g, table, &column(t))?);
                }
                let sum = g.add_n(&steps)?;
                if *average {
                    let inv = lengths.iter().map(|&l| 1.0 / l.max(1) as f32).collect();
                    g.scale_rows(sum, inv)?
                } else {
                    sum
                }
            }
            SentenceEncoder::UniRnn(cell) => {
                let mut steps = Vec::with_capacity(cols);
                for t in 0..cols {
                    steps.push(embedding.lookup(g, table, &column(t))?);
                }
                final_output(g, cell, &steps, lengths)?
            }
            SentenceEncoder::BiRnn { fw, bw } => {
                let mut forward = Vec::with_capacity(cols);
                let mut backward = Vec::with_capacity(cols);
                for t in 0..cols {
                    forward.push(embedding.lookup(g, table, &column(t))?);
                    // Each row is reversed within its own length.
                    let rev: Vec<u32> = (0..rows)
                        .map(|u| {
                            let len = lengths[u];
                            if t < len {
                                ids[u * cols + len - 1 - t]
                            } else {
                                PAD_ID
                            }
                        })
                        .collect();
                    backward.push(embedding.lookup(g, table, &rev)?);
                }
                let f = final_output(g, fw, &forward, lengths)?;
                let b = final_output(g, bw, &backward, lengths)?;
                g.concat_cols(&[f, b])?
            }
        };
        Ok((encoded, self.width()))
    }
}

/// Output half of the top layer's final state. Sentence vectors never see
/// dropout.
fn final_output(g: &mut Graph, cell: &MultiRnnCell, steps: &[Var], lengths: &[usize]) -> Result<Var> {
    let init = cell.zero_state(g, lengths.len());
    let (_, state) = cell.unroll(g, steps, lengths, init, None)?;
    state
        .layers()
        .last()
        .map(|s| s.output())
        .ok_or_else(|| ModelError::Other("sentence encoder has no layers".to_string()))
}

/// Number of non-padding ids in each `cols`-wide row.
pub fn token_lengths(ids: &[u32], cols: usize) -> Vec<usize> {
    if cols == 0 {
        return Vec::new();
    }
    ids.chunks(cols)
        .map(|row| row.iter().filter(|&&id| id != PAD_ID).count())
        .collect()
}
