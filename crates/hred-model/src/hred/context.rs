use hred_tensor::{Graph, Tensor, Var};

use super::inputs::ModelInputs;
use crate::config::HredConfig;
use crate::error::Result;
use crate::nn::MultiRnnCell;
use crate::nn::ParamBuilder;

/// Width of the one-hot speaker floor appended to every sentence vector.
pub const FLOOR_DEPTH: usize = 2;

/// Runs the context RNN over the turns of each dialog.
#[derive(Debug, Clone)]
pub struct ContextAggregator {
    cell: MultiRnnCell,
}

impl ContextAggregator {
    pub fn new(config: &HredConfig, sent_width: usize, builder: &mut ParamBuilder<'_>) -> Result<Self> {
        let cell = MultiRnnCell::new(
            config.cell_type,
            "contextRNN",
            sent_width + FLOOR_DEPTH,
            config.cxt_cell_size,
            config.num_layer,
            1.0,
            builder,
        )?;
        Ok(ContextAggregator { cell })
    }

    /// Flattened context width: one `cxt_cell_size` block per layer.
    pub fn width(&self) -> usize {
        self.cell.units() * self.cell.num_layers()
    }

    /// `sentences` is `[batch * max_turns, sent_width]`, dialog-major.
    /// Returns the `[batch, width]` context vector: the output half of every
    /// layer's state after each dialog's last valid turn.
    pub fn aggregate(&self, g: &mut Graph, sentences: Var, inputs: &ModelInputs) -> Result<Var> {
        let batch = inputs.batch_size;
        let turns = inputs.max_turns;

        let mut steps = Vec::with_capacity(turns);
        for t in 0..turns {
            let rows: Vec<usize> = (0..batch).map(|b| b * turns + t).collect();
            let sent = g.gather_rows(sentences, &rows)?;

            let mut one_hot = vec![0.0; batch * FLOOR_DEPTH];
            for b in 0..batch {
                one_hot[b * FLOOR_DEPTH + inputs.floor(b, t) as usize] = 1.0;
            }
            let floor = g.constant(Tensor::matrix(one_hot, batch, FLOOR_DEPTH));
            steps.push(g.concat_cols(&[sent, floor])?);
        }

        let init = self.cell.zero_state(g, batch);
        let (_, state) = self.cell.unroll(g, &steps, &inputs.context_lens, init, None)?;
        state.flatten_outputs(g)
    }
}
