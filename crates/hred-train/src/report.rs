use hred_model::LossReport;
use tracing::info;

/// Running reconstruction statistics for one pass over a feed.
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    rc_losses: Vec<f32>,
    rc_ppls: Vec<f32>,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: LossReport) {
        self.rc_losses.push(report.avg_rc_loss);
        self.rc_ppls.push(report.rc_ppl);
    }

    pub fn len(&self) -> usize {
        self.rc_losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rc_losses.is_empty()
    }

    /// Mean loss and mean perplexity, or `None` before the first step.
    pub fn averages(&self) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let n = self.len() as f32;
        Some((
            self.rc_losses.iter().sum::<f32>() / n,
            self.rc_ppls.iter().sum::<f32>() / n,
        ))
    }

    /// Log `<prefix> rc_loss <mean> rc_perplexity <mean> <postfix>` and
    /// return the mean loss.
    pub fn print(&self, prefix: &str, postfix: &str) -> Option<f32> {
        match self.averages() {
            Some((loss, ppl)) => {
                info!("{} rc_loss {:.4} rc_perplexity {:.4} {}", prefix, loss, ppl, postfix);
                Some(loss)
            }
            None => {
                info!("{} no batches {}", prefix, postfix);
                None
            }
        }
    }
}
