use hred_tensor::{Graph, Var};

use super::inputs::ModelInputs;
use crate::error::{ModelError, Result};
use crate::vocab::PAD_ID;

/// Graph handles of the reconstruction loss.
#[derive(Debug, Clone, Copy)]
pub struct LossOutputs {
    /// `[1, 1]` mean over dialogs of the per-dialog summed cross-entropy.
    pub avg_rc_loss: Var,
    /// `[batch, 1]` summed cross-entropy of each dialog.
    pub per_dialog: Var,
    /// Number of labels that count.
    pub mask_weight: f32,
}

/// Cross-entropy of every step's logits against the response shifted by one.
///
/// A label counts when its id is not padding and it lies inside the
/// dialog's declared response length.
pub fn reconstruction_loss(g: &mut Graph, logits: &[Var], inputs: &ModelInputs) -> Result<LossOutputs> {
    if logits.len() + 1 != inputs.max_out_len {
        return Err(ModelError::InvalidInput(format!(
            "{} decoder steps for responses of {} tokens",
            logits.len(),
            inputs.max_out_len
        )));
    }
    let batch = inputs.batch_size;
    let mut mask_weight = 0.0;
    let mut terms = Vec::with_capacity(logits.len());
    for (t, &step_logits) in logits.iter().enumerate() {
        let mut labels = Vec::with_capacity(batch);
        let mut mask = Vec::with_capacity(batch);
        for b in 0..batch {
            let label = inputs.output(b)[t + 1];
            let counts = label != PAD_ID && t + 1 < inputs.output_lens[b];
            labels.push(label as usize);
            mask.push(if counts { 1.0 } else { 0.0 });
        }
        mask_weight += mask.iter().sum::<f32>();
        let ce = g.softmax_cross_entropy(step_logits, &labels)?;
        terms.push(g.scale_rows(ce, mask)?);
    }
    let per_dialog = g.add_n(&terms)?;
    let avg_rc_loss = g.mean(per_dialog);
    Ok(LossOutputs {
        avg_rc_loss,
        per_dialog,
        mask_weight,
    })
}

/// Scalar statistics of one evaluated batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossReport {
    pub avg_rc_loss: f32,
    /// `exp(total loss / total label count)` over the whole batch. This
    /// normalizes per token while `avg_rc_loss` normalizes per dialog.
    pub rc_ppl: f32,
}

impl LossReport {
    pub fn from_graph(g: &Graph, out: &LossOutputs) -> Self {
        let avg_rc_loss = g.value(out.avg_rc_loss).data_f32()[0];
        let total: f32 = g.value(out.per_dialog).data_f32().iter().sum();
        let rc_ppl = if out.mask_weight > 0.0 {
            (total / out.mask_weight).exp()
        } else {
            1.0
        };
        LossReport { avg_rc_loss, rc_ppl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hred::inputs::fixtures;
    use approx::assert_relative_eq;
    use hred_tensor::{CpuBackend, ParamStore, Tensor};

    #[test]
    fn test_uniform_logits() {
        // Zero logits over 7 tokens give ln 7 per counted label.
        let inputs = fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let store = ParamStore::new();
        let mut g = Graph::new(&backend, &store);
        let logits: Vec<Var> = (0..4)
            .map(|_| g.constant(Tensor::matrix(vec![0.0; 14], 2, 7)))
            .collect();
        let out = reconstruction_loss(&mut g, &logits, &inputs).unwrap();
        let ln7 = 7f32.ln();

        // Dialog 0 counts 3 labels, dialog 1 counts 2.
        assert_eq!(out.mask_weight, 5.0);
        let per = g.value(out.per_dialog).data_f32().to_vec();
        assert_relative_eq!(per[0], 3.0 * ln7, epsilon = 1e-5);
        assert_relative_eq!(per[1], 2.0 * ln7, epsilon = 1e-5);

        let report = LossReport::from_graph(&g, &out);
        assert_relative_eq!(report.avg_rc_loss, 2.5 * ln7, epsilon = 1e-5);
        assert_relative_eq!(report.rc_ppl, 7.0, epsilon = 1e-3);
    }

    #[test]
    fn test_step_count_must_match() {
        let inputs = fixtures::two_dialogs();
        let backend = CpuBackend::new();
        let store = ParamStore::new();
        let mut g = Graph::new(&backend, &store);
        let logits = vec![g.constant(Tensor::matrix(vec![0.0; 14], 2, 7))];
        assert!(reconstruction_loss(&mut g, &logits, &inputs).is_err());
    }
}
