//! Multi-threaded training over [`Loader`]s.
//!
//! `fit` runs a fixed pool of scoped worker threads per epoch. Workers share the
//! loader (which serializes batch reads) and the engine, guarded by one `RwLock`:
//! forward/backward hold the read lock, the weight update holds the write lock.
//! Each worker owns the `BatchResult` it creates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::thread;

use tracing::{debug, error, info};

use crate::loader::{BatchData, Loader};
use crate::{BatchResult, Engine, Error, Result};

/// Learning rate as a function of the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrSchedule {
    Constant(f64),
    /// Linear decay from `initial` (first epoch) to `last` (final epoch).
    Linear { initial: f64, last: f64 },
}

impl LrSchedule {
    pub fn validate(self) -> Result<()> {
        let ok = |lr: f64| lr.is_finite() && lr > 0.0;
        match self {
            LrSchedule::Constant(lr) if ok(lr) => Ok(()),
            LrSchedule::Linear { initial, last } if ok(initial) && ok(last) => Ok(()),
            other => Err(Error::InvalidConfig(format!(
                "learning rates must be finite and > 0, got {other:?}"
            ))),
        }
    }

    /// Learning rate for `epoch` (0-based) out of `epochs`.
    pub fn rate(self, epoch: usize, epochs: usize) -> f64 {
        match self {
            LrSchedule::Constant(lr) => lr,
            LrSchedule::Linear { initial, last } => {
                if epochs <= 1 {
                    initial
                } else {
                    let t = epoch.min(epochs - 1) as f64 / (epochs - 1) as f64;
                    initial + (last - initial) * t
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    /// Worker threads per pass. Capped at the number of batches.
    pub threads: usize,
    pub lr_schedule: LrSchedule,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            threads: 1,
            lr_schedule: LrSchedule::Constant(0.01),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be > 0".to_owned()));
        }
        self.lr_schedule.validate()
    }
}

/// Item-weighted loss and accuracy over one pass of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalReport {
    pub loss: f64,
    /// Fraction in `[0, 1]`.
    pub percent_correct: f64,
    pub items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 0-based.
    pub epoch: usize,
    pub learning_rate: f64,
    pub train: EvalReport,
    pub test: EvalReport,
}

#[derive(Debug, Clone, Default)]
pub struct FitReport {
    pub epochs: Vec<EpochReport>,
}

#[derive(Debug, Default)]
struct Accumulator {
    loss_sum: f64,
    correct_sum: f64,
    items: usize,
}

impl Accumulator {
    fn add(&mut self, result: &BatchResult) {
        let items = result.batch_size();
        self.loss_sum += result.loss().unwrap_or(0.0) * items as f64;
        self.correct_sum += result.percent_correct().unwrap_or(0.0) * items as f64;
        self.items += items;
    }

    fn merge(&mut self, other: Accumulator) {
        self.loss_sum += other.loss_sum;
        self.correct_sum += other.correct_sum;
        self.items += other.items;
    }

    fn report(&self) -> EvalReport {
        if self.items == 0 {
            return EvalReport::default();
        }
        let n = self.items as f64;
        EvalReport {
            loss: self.loss_sum / n,
            percent_correct: self.correct_sum / n,
            items: self.items,
        }
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Concurrency("engine lock poisoned".to_owned())
}

impl Engine {
    /// Trains for `fit_config().epochs` epochs over `train`, evaluating on `test`
    /// after each epoch.
    ///
    /// Every training batch gets one forward → backward → adjust cycle. The first
    /// error from any worker stops the pass and is returned.
    pub fn fit<T, U>(&mut self, train: &T, test: &U) -> Result<FitReport>
    where
        T: Loader + ?Sized,
        U: Loader + ?Sized,
    {
        let cfg = *self.fit_config();
        cfg.validate()?;
        let dims = (self.input_size(), self.output_size());

        let mut report = FitReport::default();
        for epoch in 0..cfg.epochs {
            let lr = cfg.lr_schedule.rate(epoch, cfg.epochs);

            let train_report = {
                let shared = RwLock::new(&mut *self);
                run_workers(train, dims, cfg.threads, epoch, |batch| {
                    let result = {
                        let engine = shared.read().map_err(poisoned)?;
                        let mut result = engine.run_forwards(&batch.input)?;
                        engine.run_backwards(&mut result, &batch.expected)?;
                        engine.evaluate(&mut result, &batch.expected)?;
                        result
                    };
                    shared.write().map_err(poisoned)?.adjust(&result, lr)?;
                    Ok(result)
                })?
            };

            let test_report = self.evaluate_loader_in_epoch(test, cfg.threads, epoch)?;

            info!(
                epoch = epoch + 1,
                learning_rate = lr,
                train_loss = train_report.loss,
                train_correct = train_report.percent_correct,
                test_loss = test_report.loss,
                test_correct = test_report.percent_correct,
                "epoch complete"
            );
            report.epochs.push(EpochReport {
                epoch,
                learning_rate: lr,
                train: train_report,
                test: test_report,
            });
        }
        Ok(report)
    }

    /// Forward + evaluate over every batch of `loader`, without adjusting weights.
    pub fn evaluate_loader<L>(&self, loader: &L, threads: usize) -> Result<EvalReport>
    where
        L: Loader + ?Sized,
    {
        if threads == 0 {
            return Err(Error::InvalidConfig("threads must be > 0".to_owned()));
        }
        self.evaluate_loader_in_epoch(loader, threads, 0)
    }

    fn evaluate_loader_in_epoch<L>(&self, loader: &L, threads: usize, epoch: usize) -> Result<EvalReport>
    where
        L: Loader + ?Sized,
    {
        let dims = (self.input_size(), self.output_size());
        run_workers(loader, dims, threads, epoch, |batch| {
            let mut result = self.run_forwards(&batch.input)?;
            self.evaluate(&mut result, &batch.expected)?;
            Ok(result)
        })
    }
}

/// Opens `loader`, runs `step` once per batch across `threads` workers, closes it.
fn run_workers<L, F>(
    loader: &L,
    (input_size, output_size): (usize, usize),
    threads: usize,
    epoch: usize,
    step: F,
) -> Result<EvalReport>
where
    L: Loader + ?Sized,
    F: Fn(&BatchData) -> Result<BatchResult> + Sync,
{
    let meta = loader.open()?;
    if meta.input_size != input_size || meta.expected_size != output_size {
        if let Err(e) = loader.close() {
            error!(epoch = epoch + 1, error = %e, "failed to close loader after shape mismatch");
        }
        return Err(Error::DimensionMismatch(format!(
            "loader yields {}-row inputs and {}-row labels, engine expects {input_size} and {output_size}",
            meta.input_size, meta.expected_size
        )));
    }

    let claimed = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let workers = threads.min(meta.number_batches).max(1);

    let outcome = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let (claimed, failed, step) = (&claimed, &failed, &step);
                scope.spawn(move || -> Result<Accumulator> {
                    let mut acc = Accumulator::default();
                    while !failed.load(Ordering::Acquire)
                        && claimed.fetch_add(1, Ordering::AcqRel) < meta.number_batches
                    {
                        let batch = loader.read_batch().map_err(|e| {
                            failed.store(true, Ordering::Release);
                            error!(epoch = epoch + 1, worker, error = %e, "failed to read batch");
                            e
                        })?;
                        let result = step(&batch).map_err(|e| {
                            failed.store(true, Ordering::Release);
                            error!(
                                epoch = epoch + 1,
                                batch = batch.batch_index,
                                worker,
                                error = %e,
                                "batch failed"
                            );
                            e
                        })?;
                        debug!(
                            epoch = epoch + 1,
                            batch = batch.batch_index,
                            items = batch.items_read,
                            loss = result.loss(),
                            "batch done"
                        );
                        acc.add(&result);
                    }
                    Ok(acc)
                })
            })
            .collect();

        let mut total = Accumulator::default();
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(acc)) => total.merge(acc),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error
                        .get_or_insert_with(|| Error::Concurrency("worker thread panicked".to_owned()));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    });

    let closed = loader.close();
    let total = outcome?;
    closed?;
    Ok(total.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{MetaData, SyntheticLoader};
    use crate::{EngineBuilder, Matrix};

    fn small_engine(cfg: FitConfig) -> Engine {
        EngineBuilder::new(6)
            .unwrap()
            .dense(16)
            .unwrap()
            .relu()
            .dense(3)
            .unwrap()
            .softmax()
            .scale_initial_weights(0.3)
            .fit_config(cfg)
            .build_with_seed(11)
            .unwrap()
    }

    #[test]
    fn linear_schedule_hits_both_ends() {
        let s = LrSchedule::Linear {
            initial: 0.02,
            last: 0.001,
        };
        assert_eq!(s.rate(0, 10), 0.02);
        assert!((s.rate(9, 10) - 0.001).abs() < 1e-15);
        assert!(s.rate(5, 10) < s.rate(4, 10));
        assert_eq!(s.rate(0, 1), 0.02);
        assert_eq!(LrSchedule::Constant(0.5).rate(3, 10), 0.5);
    }

    #[test]
    fn config_validation() {
        assert!(FitConfig::default().validate().is_ok());
        let bad = FitConfig {
            epochs: 0,
            ..FitConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FitConfig {
            threads: 0,
            ..FitConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = FitConfig {
            lr_schedule: LrSchedule::Linear {
                initial: 0.1,
                last: -1.0,
            },
            ..FitConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn fit_improves_test_accuracy() {
        let cfg = FitConfig {
            epochs: 8,
            threads: 4,
            lr_schedule: LrSchedule::Linear {
                initial: 0.1,
                last: 0.02,
            },
        };
        let mut engine = small_engine(cfg);
        let train = SyntheticLoader::new(2000, 32, 6, 3, 1).unwrap();
        let test = SyntheticLoader::new(300, 32, 6, 3, 2).unwrap();

        let before = engine.evaluate_loader(&test, 2).unwrap();
        let report = engine.fit(&train, &test).unwrap();

        assert_eq!(report.epochs.len(), 8);
        let last = report.epochs.last().unwrap();
        assert_eq!(last.train.items, 2000);
        assert_eq!(last.test.items, 300);
        assert!((last.learning_rate - 0.02).abs() < 1e-12);
        assert!(last.test.loss < before.loss);
        assert!(last.test.percent_correct > before.percent_correct);
    }

    #[test]
    fn fit_rejects_mismatched_loader() {
        let mut engine = small_engine(FitConfig::default());
        let train = SyntheticLoader::new(10, 5, 4, 3, 0).unwrap();
        let test = SyntheticLoader::new(10, 5, 6, 3, 0).unwrap();
        let err = engine.fit(&train, &test).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(_)));
    }

    /// Fails on a chosen batch, otherwise behaves like its inner loader.
    struct FailingLoader {
        inner: SyntheticLoader,
        fail_at: usize,
        reads: AtomicUsize,
    }

    impl Loader for FailingLoader {
        fn open(&self) -> Result<MetaData> {
            self.reads.store(0, Ordering::SeqCst);
            self.inner.open()
        }

        fn read_batch(&self) -> Result<BatchData> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(Error::Loader("disk on fire".to_owned()));
            }
            self.inner.read_batch()
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }

        fn metadata(&self) -> Result<MetaData> {
            self.inner.metadata()
        }
    }

    #[test]
    fn worker_error_stops_training() {
        let cfg = FitConfig {
            epochs: 3,
            threads: 3,
            lr_schedule: LrSchedule::Constant(0.05),
        };
        let mut engine = small_engine(cfg);
        let train = FailingLoader {
            inner: SyntheticLoader::new(320, 10, 6, 3, 0).unwrap(),
            fail_at: 7,
            reads: AtomicUsize::new(0),
        };
        let test = SyntheticLoader::new(20, 10, 6, 3, 0).unwrap();

        let err = engine.fit(&train, &test).unwrap_err();
        assert!(format!("{err}").contains("disk on fire"));
    }

    /// Serves `inner` but refuses to close.
    struct StuckLoader {
        inner: SyntheticLoader,
    }

    impl Loader for StuckLoader {
        fn open(&self) -> Result<MetaData> {
            self.inner.open()
        }

        fn read_batch(&self) -> Result<BatchData> {
            self.inner.read_batch()
        }

        fn close(&self) -> Result<()> {
            Err(Error::Loader("handle already released".to_owned()))
        }

        fn metadata(&self) -> Result<MetaData> {
            self.inner.metadata()
        }
    }

    #[test]
    fn shape_mismatch_wins_over_close_failure() {
        let engine = small_engine(FitConfig::default());
        let loader = StuckLoader {
            inner: SyntheticLoader::new(10, 5, 4, 3, 0).unwrap(),
        };
        let err = engine.evaluate_loader(&loader, 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(_)), "{err}");
    }

    #[test]
    fn close_failure_after_a_clean_pass_is_reported() {
        let engine = small_engine(FitConfig::default());
        let loader = StuckLoader {
            inner: SyntheticLoader::new(10, 5, 6, 3, 0).unwrap(),
        };
        let err = engine.evaluate_loader(&loader, 2).unwrap_err();
        assert!(matches!(err, Error::Loader(_)), "{err}");
    }

    #[test]
    fn evaluate_loader_does_not_change_weights() {
        let engine = small_engine(FitConfig::default());
        let before: Vec<Matrix> = engine.dense_layers().map(|l| l.weights().clone()).collect();
        let loader = SyntheticLoader::new(50, 8, 6, 3, 4).unwrap();
        let report = engine.evaluate_loader(&loader, 3).unwrap();
        assert_eq!(report.items, 50);
        for (a, b) in before.iter().zip(engine.dense_layers()) {
            assert_eq!(a.data(), b.weights().data());
        }
    }
}
