//! The train / valid / test loops around one HRED graph.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use hred_model::vocab::PAD_ID;
use hred_model::{HredConfig, HredModel, Mode, Vocab, VocabSource};

use crate::error::{Result, TrainError};
use crate::feed::BatchFeed;
use crate::report::LossTracker;
use crate::session::Session;
use crate::summary::SummaryWriter;

/// Turns of context rendered before each test response.
const RENDERED_TURNS: usize = 5;

/// An HRED graph bound to a vocabulary, plus its summary writer.
pub struct Hred {
    model: HredModel,
    vocab: Vocab,
    summary: Option<SummaryWriter>,
}

impl Hred {
    /// Build a model in `session`. `forward` selects the free-running
    /// inference graph; otherwise the teacher-forced training graph is built
    /// and, if `log_dir` is given, per-step losses go to its summary file.
    /// `config` must be the session's config so checkpoints stay consistent.
    pub fn new(
        session: &mut Session,
        config: &HredConfig,
        vocab: &dyn VocabSource,
        log_dir: Option<&Path>,
        forward: bool,
    ) -> Result<Self> {
        let vocab = Vocab::from_source(vocab)?;
        let mode = if forward { Mode::Inference } else { Mode::Train };
        let model = session.build_model(config, &vocab, mode)?;
        let summary = match (mode, log_dir) {
            (Mode::Train, Some(dir)) => Some(SummaryWriter::new(dir)?),
            _ => None,
        };
        info!(mode = %mode, vocab = vocab.len(), "created HRED model");
        Ok(Hred {
            model,
            vocab,
            summary,
        })
    }

    pub fn model(&self) -> &HredModel {
        &self.model
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn require(&self, mode: Mode, operation: &'static str) -> Result<()> {
        if self.model.mode() != mode {
            return Err(TrainError::WrongMode {
                operation,
                required: mode.as_str(),
                built: self.model.mode().as_str(),
            });
        }
        Ok(())
    }

    /// One pass of optimizer steps over `feed`, stopping after
    /// `update_limit` updates. Returns the advanced global step and the mean
    /// loss, which is `None` if no batch was consumed.
    pub fn train(
        &mut self,
        mut global_step: u64,
        session: &mut Session,
        feed: &mut dyn BatchFeed,
        update_limit: Option<usize>,
    ) -> Result<(u64, Option<f32>)> {
        self.require(Mode::Train, "train")?;
        let mut tracker = LossTracker::new();
        let mut local_t = 0usize;
        let cadence = (feed.num_batch() / 20).max(1);
        let start = Instant::now();

        loop {
            if update_limit.is_some_and(|limit| local_t >= limit) {
                break;
            }
            let Some(batch) = feed.next_batch() else {
                break;
            };
            let inputs = batch.to_inputs(Some(global_step), false)?;
            let report = session.train_step(&self.model, &inputs)?;
            if let Some(summary) = self.summary.as_mut() {
                summary.add_scalar(global_step, "rc_loss", report.avg_rc_loss)?;
            }
            tracker.push(report);

            global_step += 1;
            local_t += 1;
            if local_t % cadence == 0 {
                tracker.print(&format!("{:.2}", feed.progress()), "");
            }
        }
        if let Some(summary) = self.summary.as_mut() {
            summary.flush()?;
        }

        let step_time = start.elapsed().as_secs_f64() / feed.num_batch().max(1) as f64;
        let avg = tracker.print("Epoch Done", &format!("step time {:.4}", step_time));
        Ok((global_step, avg))
    }

    /// Mean loss over `feed` without updating anything.
    pub fn valid(&self, name: &str, session: &Session, feed: &mut dyn BatchFeed) -> Result<Option<f32>> {
        self.require(Mode::Train, "valid")?;
        let mut tracker = LossTracker::new();
        while let Some(batch) = feed.next_batch() {
            let inputs = batch.to_inputs(None, false)?;
            tracker.push(session.eval_step(&self.model, &inputs)?);
        }
        Ok(tracker.print(name, ""))
    }

    /// Generate `repeat` responses per dialog for at most `num_batches`
    /// batches and write the transcripts to `dest`.
    pub fn test(
        &self,
        session: &mut Session,
        feed: &mut dyn BatchFeed,
        num_batches: Option<usize>,
        repeat: usize,
        dest: &mut dyn Write,
    ) -> Result<()> {
        self.require(Mode::Inference, "test")?;
        if repeat == 0 {
            return Err(TrainError::InvalidArgument("repeat must be at least 1".to_string()));
        }
        let cadence = (feed.num_batch() / 10).max(1);
        let mut local_t = 0usize;

        loop {
            if num_batches.is_some_and(|n| local_t >= n) {
                break;
            }
            let Some(batch) = feed.next_batch() else {
                break;
            };
            let inputs = batch.to_inputs(None, true)?;
            let samples = session.generate(&self.model, &inputs.tile(repeat))?;
            let groups = samples.split(repeat)?;
            local_t += 1;
            if local_t % cadence == 0 {
                debug!("{:.2} >> ", feed.progress());
            }

            for b in 0..inputs.batch_size {
                writeln!(dest, "Batch {} index {}", local_t, b)?;
                let turns = inputs.context_lens[b];
                for t in turns.saturating_sub(RENDERED_TURNS)..turns {
                    let src = self.join(inputs.context_utterance(b, t), &[PAD_ID]);
                    writeln!(dest, "Src {}-{}: {}", t, inputs.floor(b, t), src)?;
                }

                let markers = [PAD_ID, self.vocab.eos_id, self.vocab.go_id];
                let target = contract(&self.join(inputs.output(b), &markers));
                writeln!(dest, "Target >> {}", target)?;

                for (r, group) in groups.iter().enumerate() {
                    let pred = contract(&self.join(&group.valid_tokens(b), &[PAD_ID, self.vocab.eos_id]));
                    writeln!(dest, "Sample {} >> {}", r, pred)?;
                }
                writeln!(dest)?;
            }
        }
        dest.flush()?;
        info!("Done testing");
        Ok(())
    }

    /// Space-joined tokens of `ids`, leaving out the ids in `skip`.
    fn join(&self, ids: &[u32], skip: &[u32]) -> String {
        ids.iter()
            .filter(|&&id| !skip.contains(&id))
            .map(|&id| self.vocab.token(id).unwrap_or("<unk>"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn contract(text: &str) -> String {
    text.replace(" ' ", "'")
}
