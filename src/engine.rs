use std::fmt;

use crate::transform::relu_gate;
use crate::{
    BatchResult, DenseLayer, Error, FitConfig, LossFunction, Matrix, Result, Stage, Transform,
};

/// An ordered pipeline of Dense / ReLU / Softmax stages.
///
/// Dense stages own their weights and biases. Batches are matrices with one
/// sample per column; see [`crate::matrix`] for the layout.
///
/// Typical cycle for one batch:
/// - `let mut r = engine.run_forwards(&input)?`
/// - `engine.run_backwards(&mut r, &expected)?`
/// - `engine.adjust(&r, lr)?`
/// - `engine.evaluate(&mut r, &expected)?`
#[derive(Debug, Clone)]
pub struct Engine {
    stages: Vec<Stage>,
    loss_function: LossFunction,
    store_input_error: bool,
    scale_initial_weights: f64,
    fit_config: FitConfig,
}

impl Engine {
    /// Assembles an engine from already-initialized stages.
    ///
    /// Requires at least one Dense stage, and each Dense stage's input size must
    /// equal the previous Dense stage's output size.
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self> {
        let mut prev_out: Option<usize> = None;
        for (idx, stage) in stages.iter().enumerate() {
            if let Stage::Dense(layer) = stage {
                if let Some(prev) = prev_out {
                    if layer.in_dim() != prev {
                        return Err(Error::DimensionMismatch(format!(
                            "stage {idx} expects {} inputs, previous dense layer has {prev} neurons",
                            layer.in_dim()
                        )));
                    }
                }
                prev_out = Some(layer.out_dim());
            }
        }
        if prev_out.is_none() {
            return Err(Error::InvalidConfig(
                "engine must have at least one dense stage".to_owned(),
            ));
        }

        Ok(Self {
            stages,
            loss_function: LossFunction::CrossEntropy,
            store_input_error: false,
            scale_initial_weights: 1.0,
            fit_config: FitConfig::default(),
        })
    }

    #[inline]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Dense layers in forward order.
    pub fn dense_layers(&self) -> impl Iterator<Item = &DenseLayer> + '_ {
        self.stages.iter().filter_map(Stage::as_dense)
    }

    /// Mutable access to the `k`-th Dense layer (counting Dense stages only).
    pub fn dense_mut(&mut self, k: usize) -> Option<&mut DenseLayer> {
        self.stages
            .iter_mut()
            .filter_map(|s| match s {
                Stage::Dense(layer) => Some(layer),
                Stage::Relu | Stage::Softmax => None,
            })
            .nth(k)
    }

    /// Rows expected in the input matrix.
    pub fn input_size(&self) -> usize {
        self.dense_layers().next().map_or(0, DenseLayer::in_dim)
    }

    /// Rows of the final output matrix.
    pub fn output_size(&self) -> usize {
        self.dense_layers().last().map_or(0, DenseLayer::out_dim)
    }

    #[inline]
    pub fn loss_function(&self) -> LossFunction {
        self.loss_function
    }

    #[inline]
    pub fn store_input_error(&self) -> bool {
        self.store_input_error
    }

    /// When set, `run_backwards` propagates all the way to the input and keeps
    /// `dL/d(input)` in the batch result.
    #[inline]
    pub fn set_store_input_error(&mut self, store: bool) {
        self.store_input_error = store;
    }

    #[inline]
    pub fn scale_initial_weights(&self) -> f64 {
        self.scale_initial_weights
    }

    #[inline]
    pub(crate) fn set_scale_initial_weights(&mut self, scale: f64) {
        self.scale_initial_weights = scale;
    }

    #[inline]
    pub fn fit_config(&self) -> &FitConfig {
        &self.fit_config
    }

    pub fn set_fit_config(&mut self, cfg: FitConfig) -> Result<()> {
        cfg.validate()?;
        self.fit_config = cfg;
        Ok(())
    }

    /// Forward pass over a `(input_size, batch)` matrix.
    ///
    /// Records every stage output so the batch can be run backwards.
    /// Does not touch engine state.
    pub fn run_forwards(&self, input: &Matrix) -> Result<BatchResult> {
        self.check_input(input)?;

        let mut result = BatchResult::new(input.clone(), self.stages.len());
        for (idx, stage) in self.stages.iter().enumerate() {
            let output = stage
                .forward(result.stage_input(idx))
                .map_err(|e| stage_error(idx, stage.transform(), e))?;
            result.push_stage(stage.transform(), output);
        }
        Ok(result)
    }

    /// Forward pass returning only the final output.
    pub fn predict(&self, input: &Matrix) -> Result<Matrix> {
        self.check_input(input)?;

        let mut output = input.clone();
        for (idx, stage) in self.stages.iter().enumerate() {
            output = stage
                .forward(&output)
                .map_err(|e| stage_error(idx, stage.transform(), e))?;
        }
        Ok(output)
    }

    /// Backward pass: fills in each Dense stage's delta.
    ///
    /// Only softmax + cross-entropy is differentiable here; the joint derivative
    /// of that pair is `output - expected`, which seeds the pass. Any other final
    /// stage, a softmax anywhere but last, or another loss is rejected.
    pub fn run_backwards(&self, result: &mut BatchResult, expected: &Matrix) -> Result<()> {
        if self.loss_function != LossFunction::CrossEntropy
            || self.stages.last().map(Stage::transform) != Some(Transform::Softmax)
        {
            return Err(Error::UnsupportedConfiguration(
                "loss function must be cross entropy and the last transform must be softmax"
                    .to_owned(),
            ));
        }
        if let Some(idx) = self.stages[..self.stages.len() - 1]
            .iter()
            .position(|s| matches!(s, Stage::Softmax))
        {
            return Err(Error::UnsupportedConfiguration(format!(
                "softmax at stage {idx} is not the final stage"
            )));
        }
        self.check_result(result)?;

        let mut error = result.output().subtract(expected).map_err(|_| {
            Error::DimensionMismatch(format!(
                "expected {} does not match output {}",
                expected.summary(),
                result.output().summary()
            ))
        })?;

        let mut dense_left = self.dense_layers().count();
        for (idx, stage) in self.stages.iter().enumerate().rev() {
            match stage {
                Stage::Dense(layer) => {
                    dense_left -= 1;
                    // Bias has no upstream dependency; only W carries error back.
                    let propagated = if dense_left > 0 || self.store_input_error {
                        Some(layer.backward(&error)?)
                    } else {
                        None
                    };
                    result.set_delta(idx, error);
                    match propagated {
                        Some(next) => error = next,
                        None => return Ok(()),
                    }
                }
                Stage::Relu => {
                    error = result.stage_input(idx).zip_with(&error, relu_gate)?;
                }
                Stage::Softmax => {}
            }
        }

        if self.store_input_error {
            result.set_input_error(error);
        }
        Ok(())
    }

    /// Parameter gradients `delta * input^T` for each Dense layer (summed over the
    /// batch, not averaged). Requires `run_backwards` to have run.
    pub fn weight_gradients(&self, result: &BatchResult) -> Result<Vec<Matrix>> {
        self.check_result(result)?;
        let mut grads = Vec::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.transform() == Transform::Dense {
                let delta = delta_for(result, idx)?;
                grads.push(delta.multiply_transpose(result.stage_input(idx))?);
            }
        }
        Ok(grads)
    }

    /// Gradient descent step using the deltas in `result`.
    ///
    /// Steps are averaged over the batch, so `lr` does not depend on batch size.
    /// Nothing is modified unless every Dense stage has a delta.
    pub fn adjust(&mut self, result: &BatchResult, lr: f64) -> Result<()> {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }
        self.check_result(result)?;
        for (idx, stage) in self.stages.iter().enumerate() {
            if let Stage::Dense(layer) = stage {
                let delta = delta_for(result, idx)?;
                if delta.rows() != layer.out_dim() || delta.cols() != result.batch_size() {
                    return Err(Error::DimensionMismatch(format!(
                        "stage {idx} delta {} does not match layer out_dim {} x batch {}",
                        delta.summary(),
                        layer.out_dim(),
                        result.batch_size()
                    )));
                }
            }
        }

        for (idx, stage) in self.stages.iter_mut().enumerate() {
            if let Stage::Dense(layer) = stage {
                let delta = delta_for(result, idx)?;
                layer.sgd_step(delta, result.stage_input(idx), lr)?;
            }
        }
        Ok(())
    }

    /// Stores mean loss and the fraction of correctly classified columns in `result`.
    pub fn evaluate(&self, result: &mut BatchResult, expected: &Matrix) -> Result<()> {
        let output = result.output();
        let loss = self.loss_function.mean(expected, output)?;

        let cols = output.cols();
        let percent_correct = if cols == 0 {
            0.0
        } else {
            let correct = output
                .argmax_columns()
                .into_iter()
                .zip(expected.argmax_columns())
                .filter(|(a, b)| a == b)
                .count();
            correct as f64 / cols as f64
        };

        result.set_evaluation(loss, percent_correct);
        Ok(())
    }

    fn check_input(&self, input: &Matrix) -> Result<()> {
        if input.rows() != self.input_size() {
            return Err(Error::DimensionMismatch(format!(
                "input has {} rows, engine expects {}",
                input.rows(),
                self.input_size()
            )));
        }
        Ok(())
    }

    fn check_result(&self, result: &BatchResult) -> Result<()> {
        if result.stages().len() != self.stages.len() {
            return Err(Error::DimensionMismatch(format!(
                "batch result has {} stages, engine has {}",
                result.stages().len(),
                self.stages.len()
            )));
        }
        Ok(())
    }
}

fn delta_for(result: &BatchResult, idx: usize) -> Result<&Matrix> {
    result.stages()[idx].delta().ok_or_else(|| {
        Error::InvalidData(format!(
            "dense stage {idx} has no delta; run_backwards must run first"
        ))
    })
}

fn stage_error(idx: usize, transform: Transform, err: Error) -> Error {
    match err {
        Error::DimensionMismatch(msg) => {
            Error::DimensionMismatch(format!("stage {idx} ({transform}): {msg}"))
        }
        other => other,
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scale initial weights: {:.3}",
            self.scale_initial_weights
        )?;
        writeln!(f)?;
        writeln!(f, "Transforms:")?;
        for stage in &self.stages {
            write!(f, "{}", stage.transform())?;
            if let Stage::Dense(layer) = stage {
                write!(f, " {}", layer.weights().summary())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
