// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives a Trainable model through one state machine:
//
//   Initializing → Restoring → Iterating → (Checkpointing)*
//                                        → Converged | Exhausted
//
// Per step i in [0, cycle_stop), with step = i + 1:
//   - one optimiser step on the train slice `i`
//   - every 10th step: measure char/image accuracy on a train
//     batch and on a random verify batch, then apply the two
//     stopping guards
//   - when i % cycle_save == 0: periodic safety checkpoint
//
// Stopping guards, checked in this order on each evaluation:
//   train_streak       train image_acc >= acc_stop five
//                      evaluations in a row (reset on a miss)
//   verify_threshold   verify image_acc >  acc_stop once
// The comparisons differ (>= vs >) in the model this loop
// reproduces; both are kept as-is.
//
// Either guard checkpoints and stops. Running out of steps
// checkpoints once more and stops as Exhausted. A failed save
// aborts the run.

use rand::Rng;

use crate::data::{batcher::CaptchaBatcher, codec::ImageCodec, corpus::CorpusIndex, dataset::ImageSample};
use crate::domain::{
    alphabet::Alphabet,
    error::{CaptchaError, Result},
    sample::Batch,
    traits::{Snapshot, Trainable},
};
use crate::infra::{
    checkpoint::{CheckpointMeta, CheckpointStore},
    metrics::{Accuracy, EvalRecord, MetricsLogger, Split},
};

/// Evaluate every this many steps.
pub const EVAL_EVERY: usize = 10;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Number of optimisation steps before giving up.
    pub cycle_stop:       usize,
    /// Image accuracy target shared by both stopping guards.
    pub acc_stop:         f32,
    /// Save a checkpoint whenever `i % cycle_save == 0`.
    pub cycle_save:       usize,
    /// Files per training batch; also the train evaluation size.
    pub train_batch_size: usize,
    /// Files drawn (with replacement) per verify evaluation.
    pub test_batch_size:  usize,
}

impl LoopSettings {
    /// Reject zero counts and sizes before the loop starts.
    pub fn validate(&self) -> Result<()> {
        if self.cycle_stop == 0 {
            return Err(CaptchaError::config("cycle_stop must be at least 1"));
        }
        if self.cycle_save == 0 {
            return Err(CaptchaError::config("cycle_save must be at least 1"));
        }
        if self.train_batch_size == 0 || self.test_batch_size == 0 {
            return Err(CaptchaError::config("batch sizes must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Restoring,
    Iterating,
    Checkpointing,
    Converged(StopReason),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TrainStreak,
    VerifyThreshold,
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub state:            LoopState,
    pub steps_run:        usize,
    /// Last measured verify image accuracy; `None` if the run ended
    /// before the first evaluation.
    pub verify_image_acc: Option<f32>,
    /// Loop index `i` of every checkpoint written, in order.
    pub checkpoint_steps: Vec<usize>,
}

// ─── Stopping policy ─────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct StopPolicy {
    acc_stop: f32,
    streak:   usize,
}

impl StopPolicy {
    pub const STREAK_TO_STOP: usize = 5;

    pub fn new(acc_stop: f32) -> Self {
        Self { acc_stop, streak: 0 }
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    /// Record one train evaluation; true once the streak reaches five.
    pub fn train_streak_reached(&mut self, train_image_acc: f32) -> bool {
        if train_image_acc >= self.acc_stop {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.streak >= Self::STREAK_TO_STOP
    }

    pub fn verify_threshold_exceeded(&self, verify_image_acc: f32) -> bool {
        verify_image_acc > self.acc_stop
    }
}

/// Periodic checkpoints fall on loop indices 0, cycle_save, 2 * cycle_save, ...
pub fn periodic_save_due(i: usize, cycle_save: usize) -> bool {
    cycle_save > 0 && i % cycle_save == 0
}

/// Initializing: read the first training image to learn the image
/// size and label length the model must be built for.
pub fn derive_meta<R: Rng>(corpus: &CorpusIndex<R>, alphabet: &Alphabet) -> Result<CheckpointMeta> {
    let first = corpus
        .list_train()
        .first()
        .ok_or_else(|| CaptchaError::config("training corpus is empty"))?;
    let sample = ImageSample::load(&ImageCodec::new(), first)?;

    if !matches!(sample.grid.ndim(), 2 | 3) {
        return Err(CaptchaError::config(format!(
            "'{}' decodes to a {}-axis grid, expected 2 or 3",
            first.display(),
            sample.grid.ndim()
        )));
    }

    let max_captcha = sample.label.chars().count();
    if max_captcha == 0 {
        return Err(CaptchaError::config(format!(
            "'{}' carries an empty label",
            first.display()
        )));
    }

    Ok(CheckpointMeta {
        image_height: sample.grid.height,
        image_width:  sample.grid.width,
        max_captcha,
        alphabet:     alphabet.clone(),
    })
}

// ─── TrainingLoop ────────────────────────────────────────────────────────────
/// Drives one training run from restore to a final report.
pub struct TrainingLoop<M, R>
where
    M: Trainable + Snapshot,
    R: Rng,
{
    model:    M,
    corpus:   CorpusIndex<R>,
    batcher:  CaptchaBatcher,
    store:    CheckpointStore,
    meta:     CheckpointMeta,
    settings: LoopSettings,
    policy:   StopPolicy,
    metrics:  Option<MetricsLogger>,
    state:    LoopState,
}

impl<M, R> TrainingLoop<M, R>
where
    M: Trainable + Snapshot,
    R: Rng,
{
    pub fn new(
        model:    M,
        corpus:   CorpusIndex<R>,
        batcher:  CaptchaBatcher,
        store:    CheckpointStore,
        meta:     CheckpointMeta,
        settings: LoopSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let policy = StopPolicy::new(settings.acc_stop);
        Ok(Self {
            model,
            corpus,
            batcher,
            store,
            meta,
            settings,
            policy,
            metrics: None,
            state: LoopState::Initializing,
        })
    }

    pub fn with_metrics(mut self, logger: MetricsLogger) -> Self {
        self.metrics = Some(logger);
        self
    }

    #[cfg(test)]
    pub fn model(&self) -> &M {
        &self.model
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!("Training loop: {:?} → {:?}", self.state, next);
        self.state = next;
    }

    /// Restoring: load the latest compatible checkpoint. Missing or
    /// incompatible checkpoints mean a cold start; returns whether a
    /// checkpoint was loaded.
    pub fn restore(&mut self) -> Result<bool> {
        self.transition(LoopState::Restoring);
        match self.store.load(&mut self.model, &self.meta) {
            Ok(version) => {
                tracing::info!("Resuming from checkpoint version {}", version);
                Ok(true)
            }
            Err(e @ CaptchaError::NotFound { .. }) => {
                tracing::info!("{e}; starting from a fresh model");
                Ok(false)
            }
            Err(e) if e.is_cold_start() => {
                tracing::warn!("Ignoring checkpoint: {e}; starting from a fresh model");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Iterating until one of the stopping guards fires or
    /// `cycle_stop` steps have run.
    pub fn run(mut self) -> Result<TrainReport> {
        self.transition(LoopState::Iterating);

        let cycle_stop = self.settings.cycle_stop;
        let mut verify_image_acc = None;
        let mut checkpoints      = Vec::new();

        for i in 0..cycle_stop {
            let step  = i + 1;
            let batch = self.corpus.batch(i, self.settings.train_batch_size, &self.batcher)?;
            let loss  = self.model.step(&batch)?;

            if step % EVAL_EVERY == 0 {
                // Train split: re-read slice i
                let train_batch = self.corpus.batch(i, self.settings.train_batch_size, &self.batcher)?;
                let train = self.evaluate(Split::Train, step, &train_batch, loss)?;

                println!("Step {}/{} >>>", step, cycle_stop);
                println!(
                    "[train]  char acc {:.5}  image acc {:.5}  >>> loss {:.10}",
                    train.char_acc, train.image_acc, loss
                );

                let converged = self.policy.train_streak_reached(train.image_acc);
                tracing::debug!(
                    "Train streak {}/{}",
                    self.policy.streak(),
                    StopPolicy::STREAK_TO_STOP
                );
                if converged {
                    self.checkpoint(i, &mut checkpoints)?;
                    tracing::info!(
                        "Train image accuracy reached {} {} evaluations in a row; checkpoint saved",
                        self.settings.acc_stop,
                        StopPolicy::STREAK_TO_STOP
                    );
                    return Ok(self.finish(StopReason::TrainStreak.into(), step, verify_image_acc, checkpoints));
                }

                let verify_batch = self.corpus.verify_batch(self.settings.test_batch_size, &self.batcher)?;
                let verify = self.evaluate(Split::Verify, step, &verify_batch, loss)?;
                verify_image_acc = Some(verify.image_acc);

                println!(
                    "[verify] char acc {:.5}  image acc {:.5}  >>> loss {:.10}",
                    verify.char_acc, verify.image_acc, loss
                );

                if self.policy.verify_threshold_exceeded(verify.image_acc) {
                    self.checkpoint(i, &mut checkpoints)?;
                    tracing::info!(
                        "Verify image accuracy {:.5} exceeded {}; checkpoint saved",
                        verify.image_acc,
                        self.settings.acc_stop
                    );
                    return Ok(self.finish(StopReason::VerifyThreshold.into(), step, verify_image_acc, checkpoints));
                }
            }

            if periodic_save_due(i, self.settings.cycle_save) {
                self.checkpoint(i, &mut checkpoints)?;
                tracing::info!("Periodic checkpoint saved at step {}", step);
            }
        }

        self.checkpoint(cycle_stop - 1, &mut checkpoints)?;
        tracing::info!("Ran all {} steps without converging; final checkpoint saved", cycle_stop);
        Ok(self.finish(LoopState::Exhausted, cycle_stop, verify_image_acc, checkpoints))
    }

    fn evaluate(&self, split: Split, step: usize, batch: &Batch, loss: f32) -> Result<Accuracy> {
        let predictions = self.model.forward(&batch.features)?;
        let accuracy    = Accuracy::measure(&predictions, &batch.labels, self.meta.alphabet.len());

        tracing::info!(
            step,
            split = %split,
            char_acc = accuracy.char_acc,
            image_acc = accuracy.image_acc,
            loss,
            "evaluation"
        );

        if let Some(logger) = &self.metrics {
            let record = EvalRecord { step, split, accuracy, loss };
            if let Err(e) = logger.log(&record) {
                tracing::warn!("Could not append to '{}': {e}", logger.csv_path().display());
            }
        }
        Ok(accuracy)
    }

    fn checkpoint(&mut self, i: usize, checkpoints: &mut Vec<usize>) -> Result<()> {
        let resume = self.state;
        self.transition(LoopState::Checkpointing);
        self.store.save(&self.model, &self.meta)?;
        checkpoints.push(i);
        self.transition(resume);
        Ok(())
    }

    fn finish(
        &mut self,
        state:            LoopState,
        steps_run:        usize,
        verify_image_acc: Option<f32>,
        checkpoint_steps: Vec<usize>,
    ) -> TrainReport {
        self.transition(state);
        TrainReport { state, steps_run, verify_image_acc, checkpoint_steps }
    }
}

impl From<StopReason> for LoopState {
    fn from(reason: StopReason) -> Self {
        LoopState::Converged(reason)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{label_codec, meta, write_images, StubModel};
    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::TempDir;

    // StubModel predicts class 0 at every position, i.e. "aa" for
    // alphabet "ab". Labels therefore decide the accuracy:
    // "aa" scores 1.0, anything else 0.0 image accuracy.
    fn build(
        tmp:          &TempDir,
        train_labels: &[&str],
        verify_labels: &[&str],
        settings:     LoopSettings,
    ) -> TrainingLoop<StubModel, StdRng> {
        let train  = tmp.path().join("train");
        let verify = tmp.path().join("verify");
        write_images(&train, train_labels, 8, 8);
        write_images(&verify, verify_labels, 8, 8);

        let corpus  = CorpusIndex::open(&train, &verify, Some("png"), StdRng::seed_from_u64(9)).unwrap();
        let meta    = derive_meta(&corpus, &Alphabet::new("ab").unwrap()).unwrap();
        let batcher = CaptchaBatcher::new(label_codec("ab", 2), meta.image_height, meta.image_width);
        let store   = CheckpointStore::new(tmp.path(), "model");

        TrainingLoop::new(StubModel::with_outputs(4), corpus, batcher, store, meta, settings).unwrap()
    }

    fn settings(cycle_stop: usize, cycle_save: usize) -> LoopSettings {
        LoopSettings {
            cycle_stop,
            acc_stop: 0.95,
            cycle_save,
            train_batch_size: 2,
            test_batch_size: 2,
        }
    }

    #[test]
    fn test_policy_streak_needs_five_in_a_row() {
        let mut p = StopPolicy::new(0.95);
        let fired: Vec<bool> = [0.95, 1.0, 0.5, 0.96, 0.97, 0.99, 1.0, 0.95]
            .iter()
            .map(|&acc| p.train_streak_reached(acc))
            .collect();
        assert_eq!(fired, [false, false, false, false, false, false, false, true]);
    }

    #[test]
    fn test_policy_verify_is_strict_and_independent_of_streak() {
        let p = StopPolicy::new(0.95);
        assert_eq!(p.streak(), 0);
        assert!(p.verify_threshold_exceeded(0.97));
        assert!(!p.verify_threshold_exceeded(0.95));
    }

    #[test]
    fn test_periodic_schedule() {
        let due: Vec<usize> = (0..1200).filter(|&i| periodic_save_due(i, 500)).collect();
        assert_eq!(due, [0, 500, 1000]);
    }

    #[test]
    fn test_derive_meta_reads_first_sample() {
        let tmp  = TempDir::new().unwrap();
        let dir  = tmp.path().join("t");
        write_images(&dir, &["abba"], 12, 20);
        let corpus = CorpusIndex::open(&dir, &dir, None, StdRng::seed_from_u64(0)).unwrap();

        let meta = derive_meta(&corpus, &Alphabet::new("ab").unwrap()).unwrap();
        assert_eq!((meta.image_height, meta.image_width, meta.max_captcha), (12, 20, 4));
    }

    #[test]
    fn test_converges_on_fifth_train_evaluation() {
        let tmp = TempDir::new().unwrap();
        let mut lp = build(&tmp, &["aa", "aa", "aa", "aa"], &["bb", "bb"], settings(3000, 500));
        assert!(!lp.restore().unwrap());

        let report = lp.run().unwrap();
        assert_eq!(report.state, LoopState::Converged(StopReason::TrainStreak));
        assert_eq!(report.steps_run, 50);
        assert_eq!(report.checkpoint_steps, [0, 49]);
        assert_eq!(report.verify_image_acc, Some(0.0));
    }

    #[test]
    fn test_verify_threshold_stops_immediately() {
        let tmp = TempDir::new().unwrap();
        let lp  = build(&tmp, &["ab", "ba", "ab", "bb"], &["aa", "aa"], settings(3000, 500));

        let report = lp.run().unwrap();
        assert_eq!(report.state, LoopState::Converged(StopReason::VerifyThreshold));
        assert_eq!(report.steps_run, 10);
        assert_eq!(report.checkpoint_steps, [0, 9]);
        assert_eq!(report.verify_image_acc, Some(1.0));
    }

    #[test]
    fn test_exhaustion_checkpoints_periodically_and_at_the_end() {
        let tmp = TempDir::new().unwrap();
        let lp  = build(&tmp, &["bb", "ab", "ba", "bb"], &["bb", "ba"], settings(1200, 500));

        let report = lp.run().unwrap();
        assert_eq!(report.state, LoopState::Exhausted);
        assert_eq!(report.checkpoint_steps, [0, 500, 1000, 1199]);
        assert_eq!(report.verify_image_acc, Some(0.0));

        let store = CheckpointStore::new(tmp.path(), "model");
        assert_eq!(store.latest_version(), Some(4));
    }

    #[test]
    fn test_no_evaluation_reports_no_verify_accuracy() {
        let tmp    = TempDir::new().unwrap();
        let lp     = build(&tmp, &["aa", "aa"], &["aa"], settings(5, 500));
        let report = lp.run().unwrap();
        assert_eq!(report.state, LoopState::Exhausted);
        assert_eq!(report.verify_image_acc, None);
        assert_eq!(report.checkpoint_steps, [0, 4]);
    }

    #[test]
    fn test_restore_resumes_from_compatible_checkpoint() {
        let tmp = TempDir::new().unwrap();
        CheckpointStore::new(tmp.path(), "model")
            .save(&StubModel::new(b"earlier-run"), &meta("ab", 2))
            .unwrap();

        let mut lp = build(&tmp, &["ab", "ab"], &["ab"], settings(1, 500));
        assert!(lp.restore().unwrap());
        assert_eq!(lp.model().bytes, b"earlier-run");
    }

    #[test]
    fn test_incompatible_checkpoint_is_cold_start() {
        let tmp = TempDir::new().unwrap();
        CheckpointStore::new(tmp.path(), "model")
            .save(&StubModel::new(b"other"), &meta("abc", 2))
            .unwrap();

        let mut lp = build(&tmp, &["ab", "ab"], &["ab"], settings(1, 500));
        assert!(!lp.restore().unwrap());
        assert_ne!(lp.model().bytes, b"other");
    }

    #[test]
    fn test_failed_save_aborts_the_run() {
        let tmp    = TempDir::new().unwrap();
        let train  = tmp.path().join("train");
        let verify = tmp.path().join("verify");
        write_images(&train, &["ab", "ab"], 8, 8);
        write_images(&verify, &["ab"], 8, 8);

        let corpus  = CorpusIndex::open(&train, &verify, None, StdRng::seed_from_u64(1)).unwrap();
        let meta    = derive_meta(&corpus, &Alphabet::new("ab").unwrap()).unwrap();
        let batcher = CaptchaBatcher::new(label_codec("ab", 2), 8, 8);
        let store   = CheckpointStore::new(tmp.path().join("missing"), "model");

        let lp  = TrainingLoop::new(StubModel::with_outputs(4), corpus, batcher, store, meta, settings(20, 500)).unwrap();
        let err = lp.run().unwrap_err();
        assert!(matches!(err, CaptchaError::Persistence { .. }));
    }

    #[test]
    fn test_batch_larger_than_corpus_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let mut s = settings(10, 500);
        s.train_batch_size = 3;
        let lp = build(&tmp, &["aa", "aa"], &["aa"], s);
        assert!(matches!(lp.run(), Err(CaptchaError::Config(_))));
    }
}
