use hred_tensor::{Graph, ParamId, Var};

use super::ParamBuilder;
use crate::error::{ModelError, Result};
use crate::vocab::PAD_ID;

/// Word embedding table `[vocab_size, embed_size]`.
///
/// Lookups go through [`Embedding::masked_table`], which multiplies row
/// `PAD_ID` by zero, so padding contributes nothing no matter what value
/// the underlying parameter holds.
#[derive(Debug, Clone)]
pub struct Embedding {
    table: ParamId,
    vocab_size: usize,
    embed_size: usize,
}

impl Embedding {
    pub fn new(
        name: &str,
        vocab_size: usize,
        embed_size: usize,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let table = builder.weight(name, vocab_size, embed_size)?;
        Ok(Embedding {
            table,
            vocab_size,
            embed_size,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    pub fn param(&self) -> ParamId {
        self.table
    }

    /// The table with the padding row zeroed. Build once per graph.
    pub fn masked_table(&self, g: &mut Graph) -> Result<Var> {
        let table = g.param(self.table);
        let mut mask = vec![1.0; self.vocab_size];
        mask[PAD_ID as usize] = 0.0;
        Ok(g.scale_rows(table, mask)?)
    }

    /// Rows of `masked` for `ids`.
    pub fn lookup(&self, g: &mut Graph, masked: Var, ids: &[u32]) -> Result<Var> {
        let idx = ids
            .iter()
            .map(|&id| {
                let id = id as usize;
                if id < self.vocab_size {
                    Ok(id)
                } else {
                    Err(ModelError::InvalidInput(format!(
                        "token id {} outside vocabulary of {}",
                        id, self.vocab_size
                    )))
                }
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(g.gather_rows(masked, &idx)?)
    }
}
