use crate::error::{ModelError, Result};

/// Everything one graph evaluation reads from a batch.
///
/// Token blocks are row-major: `contexts` is `[batch, max_turns, max_utt_len]`,
/// `floors` is `[batch, max_turns]` and `outputs` is `[batch, max_out_len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputs {
    pub batch_size: usize,
    pub max_turns: usize,
    pub max_utt_len: usize,
    pub max_out_len: usize,
    pub contexts: Vec<u32>,
    /// Valid turns per dialog.
    pub context_lens: Vec<usize>,
    /// Speaker floor (0 or 1) of every turn.
    pub floors: Vec<u32>,
    pub outputs: Vec<u32>,
    /// Response length including the boundary markers.
    pub output_lens: Vec<usize>,
    /// Shared by every tiled copy of the batch.
    pub use_prior: bool,
    pub global_step: Option<u64>,
}

impl ModelInputs {
    /// Check that every block agrees with the declared dimensions.
    pub fn validate(&self) -> Result<()> {
        let b = self.batch_size;
        let checks = [
            ("contexts", self.contexts.len(), b * self.max_turns * self.max_utt_len),
            ("context_lens", self.context_lens.len(), b),
            ("floors", self.floors.len(), b * self.max_turns),
            ("outputs", self.outputs.len(), b * self.max_out_len),
            ("output_lens", self.output_lens.len(), b),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(ModelError::InvalidInput(format!(
                    "{} has {} entries, expected {}",
                    name, got, expected
                )));
            }
        }
        if let Some(len) = self.context_lens.iter().find(|&&l| l > self.max_turns) {
            return Err(ModelError::InvalidInput(format!(
                "context length {} exceeds {} turns",
                len, self.max_turns
            )));
        }
        if let Some(len) = self.output_lens.iter().find(|&&l| l > self.max_out_len) {
            return Err(ModelError::InvalidInput(format!(
                "output length {} exceeds {} tokens",
                len, self.max_out_len
            )));
        }
        if let Some(f) = self.floors.iter().find(|&&f| f > 1) {
            return Err(ModelError::InvalidInput(format!("floor {} is not 0 or 1", f)));
        }
        Ok(())
    }

    /// Tokens of turn `turn` in dialog `b`.
    pub fn context_utterance(&self, b: usize, turn: usize) -> &[u32] {
        let start = (b * self.max_turns + turn) * self.max_utt_len;
        &self.contexts[start..start + self.max_utt_len]
    }

    pub fn floor(&self, b: usize, turn: usize) -> u32 {
        self.floors[b * self.max_turns + turn]
    }

    pub fn output(&self, b: usize) -> &[u32] {
        let start = b * self.max_out_len;
        &self.outputs[start..start + self.max_out_len]
    }

    /// Repeat the batch `repeat` times along the batch axis: rows
    /// `r * batch_size .. (r + 1) * batch_size` are copy `r`. `use_prior`
    /// and `global_step` stay scalar.
    pub fn tile(&self, repeat: usize) -> ModelInputs {
        ModelInputs {
            batch_size: self.batch_size * repeat,
            max_turns: self.max_turns,
            max_utt_len: self.max_utt_len,
            max_out_len: self.max_out_len,
            contexts: self.contexts.repeat(repeat),
            context_lens: self.context_lens.repeat(repeat),
            floors: self.floors.repeat(repeat),
            outputs: self.outputs.repeat(repeat),
            output_lens: self.output_lens.repeat(repeat),
            use_prior: self.use_prior,
            global_step: self.global_step,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let inputs = fixtures::two_dialogs();
        assert!(inputs.validate().is_ok());
        let mut bad = inputs.clone();
        bad.context_lens[0] = 4;
        assert!(bad.validate().is_err());
        let mut bad = inputs.clone();
        bad.floors[0] = 2;
        assert!(bad.validate().is_err());
        let mut bad = inputs;
        bad.outputs.pop();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_accessors() {
        let inputs = fixtures::two_dialogs();
        assert_eq!(inputs.context_utterance(0, 1), &[1, 5, 2, 0]);
        assert_eq!(inputs.floor(1, 0), 1);
        assert_eq!(inputs.output(1), &[1, 6, 2, 0, 0]);
    }

    #[test]
    fn test_tile_groups() {
        let inputs = fixtures::two_dialogs();
        let tiled = inputs.tile(3);
        assert!(tiled.validate().is_ok());
        assert_eq!(tiled.batch_size, 6);
        for r in 0..3 {
            for b in 0..2 {
                assert_eq!(tiled.output(r * 2 + b), inputs.output(b));
                assert_eq!(tiled.context_lens[r * 2 + b], inputs.context_lens[b]);
            }
        }
        assert_eq!(tiled.use_prior, inputs.use_prior);
    }
}
