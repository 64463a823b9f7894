//! Batch feeds: where training, validation and test batches come from.

use hred_model::ModelInputs;

use crate::error::{Result, TrainError};

/// One rectangular batch of dialogs.
///
/// `contexts` is `[batch, max_turns, max_utt_len]` row-major with 0 as
/// padding, `floors` is `[batch, max_turns]`, `outputs` is
/// `[batch, max_out_len]` and starts with `<s>`. `topics`, the two profile
/// blocks and `output_das` travel with the batch but the model ignores them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogBatch {
    pub batch_size: usize,
    pub max_turns: usize,
    pub max_utt_len: usize,
    pub max_out_len: usize,
    pub contexts: Vec<u32>,
    pub context_lens: Vec<usize>,
    pub floors: Vec<u32>,
    pub topics: Vec<u32>,
    pub my_profiles: Vec<f32>,
    pub ot_profiles: Vec<f32>,
    pub outputs: Vec<u32>,
    pub output_lens: Vec<usize>,
    pub output_das: Vec<u32>,
}

/// A dialog before padding: `(floor, tokens)` per context turn plus the
/// response, both including their boundary markers.
#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    pub turns: Vec<(u32, Vec<u32>)>,
    pub response: Vec<u32>,
}

impl DialogBatch {
    /// Pad `dialogs` into one batch. Context utterances are cut to
    /// `max_utt_len` tokens and responses to `max_out_len`.
    pub fn pack(dialogs: &[Dialog], max_utt_len: usize, max_out_len: usize) -> Result<Self> {
        if dialogs.is_empty() {
            return Err(TrainError::InvalidBatch("no dialogs to pack".to_string()));
        }
        if let Some(i) = dialogs.iter().position(|d| d.turns.is_empty()) {
            return Err(TrainError::InvalidBatch(format!("dialog {} has no context turns", i)));
        }
        let batch_size = dialogs.len();
        let max_turns = dialogs.iter().map(|d| d.turns.len()).max().unwrap_or(0);

        let mut contexts = vec![0; batch_size * max_turns * max_utt_len];
        let mut floors = vec![0; batch_size * max_turns];
        let mut outputs = vec![0; batch_size * max_out_len];
        let mut context_lens = Vec::with_capacity(batch_size);
        let mut output_lens = Vec::with_capacity(batch_size);

        for (b, dialog) in dialogs.iter().enumerate() {
            for (t, (floor, tokens)) in dialog.turns.iter().enumerate() {
                let start = (b * max_turns + t) * max_utt_len;
                let n = tokens.len().min(max_utt_len);
                contexts[start..start + n].copy_from_slice(&tokens[..n]);
                floors[b * max_turns + t] = *floor;
            }
            context_lens.push(dialog.turns.len());

            let n = dialog.response.len().min(max_out_len);
            outputs[b * max_out_len..b * max_out_len + n].copy_from_slice(&dialog.response[..n]);
            output_lens.push(n);
        }

        Ok(DialogBatch {
            batch_size,
            max_turns,
            max_utt_len,
            max_out_len,
            contexts,
            context_lens,
            floors,
            outputs,
            output_lens,
            ..DialogBatch::default()
        })
    }

    /// The model-facing view of this batch.
    pub fn to_inputs(&self, global_step: Option<u64>, use_prior: bool) -> Result<ModelInputs> {
        let inputs = ModelInputs {
            batch_size: self.batch_size,
            max_turns: self.max_turns,
            max_utt_len: self.max_utt_len,
            max_out_len: self.max_out_len,
            contexts: self.contexts.clone(),
            context_lens: self.context_lens.clone(),
            floors: self.floors.clone(),
            outputs: self.outputs.clone(),
            output_lens: self.output_lens.clone(),
            use_prior,
            global_step,
        };
        inputs
            .validate()
            .map_err(|e| TrainError::InvalidBatch(e.to_string()))?;
        Ok(inputs)
    }
}

/// A source of batches for one pass over a split.
pub trait BatchFeed {
    /// The next batch, or `None` once the pass is exhausted.
    fn next_batch(&mut self) -> Option<DialogBatch>;

    /// Batches in one pass.
    fn num_batch(&self) -> usize;

    fn batch_size(&self) -> usize;

    /// Batches handed out so far in this pass.
    fn ptr(&self) -> usize;

    /// Fraction of the pass consumed, for progress lines.
    fn progress(&self) -> f32 {
        if self.num_batch() == 0 {
            0.0
        } else {
            self.ptr() as f32 / self.num_batch() as f32
        }
    }
}

/// A feed over batches already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeed {
    batches: Vec<DialogBatch>,
    ptr: usize,
}

impl InMemoryFeed {
    pub fn new(batches: Vec<DialogBatch>) -> Self {
        InMemoryFeed { batches, ptr: 0 }
    }

    /// Split `dialogs` into batches of `batch_size`; the last batch may be
    /// smaller.
    pub fn from_dialogs(
        dialogs: &[Dialog],
        batch_size: usize,
        max_utt_len: usize,
        max_out_len: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainError::InvalidArgument("batch_size must be positive".to_string()));
        }
        let batches = dialogs
            .chunks(batch_size)
            .map(|chunk| DialogBatch::pack(chunk, max_utt_len, max_out_len))
            .collect::<Result<Vec<_>>>()?;
        Ok(InMemoryFeed::new(batches))
    }

    /// Start a new pass.
    pub fn rewind(&mut self) {
        self.ptr = 0;
    }
}

impl BatchFeed for InMemoryFeed {
    fn next_batch(&mut self) -> Option<DialogBatch> {
        let batch = self.batches.get(self.ptr).cloned()?;
        self.ptr += 1;
        Some(batch)
    }

    fn num_batch(&self) -> usize {
        self.batches.len()
    }

    fn batch_size(&self) -> usize {
        self.batches.first().map_or(0, |b| b.batch_size)
    }

    fn ptr(&self) -> usize {
        self.ptr
    }
}
