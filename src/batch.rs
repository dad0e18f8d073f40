//! Per-batch forward/backward state.
//!
//! A [`BatchResult`] is created by [`crate::Engine::run_forwards`], filled in by
//! `run_backwards` / `evaluate`, consumed by `adjust`, and then dropped.
//! It holds one [`StageRecord`] per pipeline stage, so forward and backward
//! produce and consume records in lock-step with the stage list.

use crate::{Matrix, Transform};

/// What one pipeline stage produced for this batch.
#[derive(Debug, Clone)]
pub struct StageRecord {
    transform: Transform,
    output: Matrix,
    /// Dense stages only: the layer delta `dL/d(stage output)`, one column per
    /// sample. Set by `run_backwards`.
    delta: Option<Matrix>,
}

impl StageRecord {
    #[inline]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    #[inline]
    pub fn output(&self) -> &Matrix {
        &self.output
    }

    #[inline]
    pub fn delta(&self) -> Option<&Matrix> {
        self.delta.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    input: Matrix,
    stages: Vec<StageRecord>,
    input_error: Option<Matrix>,
    loss: Option<f64>,
    percent_correct: Option<f64>,
}

impl BatchResult {
    pub(crate) fn new(input: Matrix, capacity: usize) -> Self {
        Self {
            input,
            stages: Vec::with_capacity(capacity),
            input_error: None,
            loss: None,
            percent_correct: None,
        }
    }

    pub(crate) fn push_stage(&mut self, transform: Transform, output: Matrix) {
        self.stages.push(StageRecord {
            transform,
            output,
            delta: None,
        });
    }

    pub(crate) fn set_delta(&mut self, stage: usize, delta: Matrix) {
        self.stages[stage].delta = Some(delta);
    }

    pub(crate) fn set_input_error(&mut self, error: Matrix) {
        self.input_error = Some(error);
    }

    pub(crate) fn set_evaluation(&mut self, loss: f64, percent_correct: f64) {
        self.loss = Some(loss);
        self.percent_correct = Some(percent_correct);
    }

    /// The batch input, `(input_size, batch)`.
    #[inline]
    pub fn input(&self) -> &Matrix {
        &self.input
    }

    /// Number of samples (columns) in the batch.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.input.cols()
    }

    #[inline]
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// The matrix fed into stage `idx`: the batch input for stage 0, otherwise
    /// the previous stage's output.
    pub fn stage_input(&self, idx: usize) -> &Matrix {
        if idx == 0 {
            &self.input
        } else {
            &self.stages[idx - 1].output
        }
    }

    /// Final pipeline output (the batch input if the pipeline is empty).
    pub fn output(&self) -> &Matrix {
        self.stages.last().map_or(&self.input, |s| &s.output)
    }

    /// Input followed by every stage output, in pipeline order.
    pub fn activations(&self) -> impl Iterator<Item = &Matrix> + '_ {
        std::iter::once(&self.input).chain(self.stages.iter().map(|s| &s.output))
    }

    /// The matrix fed into each Dense stage, in forward order.
    pub fn pre_activation_inputs(&self) -> impl Iterator<Item = &Matrix> + '_ {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.transform == Transform::Dense)
            .map(move |(idx, _)| self.stage_input(idx))
    }

    /// The delta of each Dense stage, in forward order. Empty until backward ran.
    pub fn weight_gradients(&self) -> impl Iterator<Item = &Matrix> + '_ {
        self.stages.iter().filter_map(|s| s.delta.as_ref())
    }

    /// `dL/d(input)`, only populated when the engine retains input errors.
    #[inline]
    pub fn input_error(&self) -> Option<&Matrix> {
        self.input_error.as_ref()
    }

    /// Mean cross-entropy over the batch, set by `evaluate`.
    #[inline]
    pub fn loss(&self) -> Option<f64> {
        self.loss
    }

    /// Fraction in `[0, 1]` of columns whose argmax matches the expected class,
    /// set by `evaluate`.
    #[inline]
    pub fn percent_correct(&self) -> Option<f64> {
        self.percent_correct
    }
}
