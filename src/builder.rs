//! Engine builder.
//!
//! `EngineBuilder` is the recommended way to define a network. It makes the stage
//! sequence explicit and initializes every Dense layer once, at build time, from a
//! scaled standard normal distribution (biases start at zero).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{DenseLayer, Engine, Error, FitConfig, Result, Stage};

#[derive(Debug, Clone, Copy)]
enum StageSpec {
    Dense { neurons: usize },
    Relu,
    Softmax,
}

/// Builder for an [`Engine`].
///
/// ```rust
/// use nn_engine::EngineBuilder;
///
/// # fn main() -> nn_engine::Result<()> {
/// let engine = EngineBuilder::new(10)?
///     .dense(100)?
///     .relu()
///     .dense(3)?
///     .softmax()
///     .scale_initial_weights(0.2)
///     .build_with_seed(0)?;
/// assert_eq!(engine.output_size(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    input_size: usize,
    stages: Vec<StageSpec>,
    scale_initial_weights: f64,
    store_input_error: bool,
    fit_config: FitConfig,
}

impl EngineBuilder {
    /// Start building an engine that accepts `(input_size, batch)` inputs.
    pub fn new(input_size: usize) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::InvalidConfig("input_size must be > 0".to_owned()));
        }
        Ok(Self {
            input_size,
            stages: Vec::new(),
            scale_initial_weights: 1.0,
            store_input_error: false,
            fit_config: FitConfig::default(),
        })
    }

    /// Append a Dense stage with `neurons` outputs.
    ///
    /// Its input size is the previous Dense stage's neuron count (or `input_size`).
    pub fn dense(mut self, neurons: usize) -> Result<Self> {
        if neurons == 0 {
            return Err(Error::InvalidConfig(
                "dense layer neurons must be > 0".to_owned(),
            ));
        }
        self.stages.push(StageSpec::Dense { neurons });
        Ok(self)
    }

    pub fn relu(mut self) -> Self {
        self.stages.push(StageSpec::Relu);
        self
    }

    pub fn softmax(mut self) -> Self {
        self.stages.push(StageSpec::Softmax);
        self
    }

    /// Standard deviation of the initial weights (default `1.0`).
    pub fn scale_initial_weights(mut self, scale: f64) -> Self {
        self.scale_initial_weights = scale;
        self
    }

    pub fn store_input_error(mut self, store: bool) -> Self {
        self.store_input_error = store;
        self
    }

    pub fn fit_config(mut self, cfg: FitConfig) -> Self {
        self.fit_config = cfg;
        self
    }

    /// Build with weights drawn from OS entropy.
    pub fn build(self) -> Result<Engine> {
        let mut rng = StdRng::from_entropy();
        self.build_with_rng(&mut rng)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Engine> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Engine> {
        if !self
            .stages
            .iter()
            .any(|s| matches!(s, StageSpec::Dense { .. }))
        {
            return Err(Error::InvalidConfig(
                "engine must have at least one dense stage".to_owned(),
            ));
        }
        if !(self.scale_initial_weights.is_finite() && self.scale_initial_weights > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "scale_initial_weights must be finite and > 0, got {}",
                self.scale_initial_weights
            )));
        }
        self.fit_config.validate()?;

        let mut stages = Vec::with_capacity(self.stages.len());
        let mut in_dim = self.input_size;
        for spec in &self.stages {
            let stage = match *spec {
                StageSpec::Dense { neurons } => {
                    let layer = DenseLayer::new_with_rng(
                        in_dim,
                        neurons,
                        self.scale_initial_weights,
                        rng,
                    )?;
                    in_dim = neurons;
                    Stage::Dense(layer)
                }
                StageSpec::Relu => Stage::Relu,
                StageSpec::Softmax => Stage::Softmax,
            };
            stages.push(stage);
        }

        let mut engine = Engine::from_stages(stages)?;
        engine.set_scale_initial_weights(self.scale_initial_weights);
        engine.set_store_input_error(self.store_input_error);
        engine.set_fit_config(self.fit_config)?;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_layer_sizes() {
        let engine = EngineBuilder::new(5)
            .unwrap()
            .dense(8)
            .unwrap()
            .relu()
            .dense(5)
            .unwrap()
            .relu()
            .dense(4)
            .unwrap()
            .softmax()
            .build_with_seed(0)
            .unwrap();

        let shapes: Vec<_> = engine
            .dense_layers()
            .map(|l| (l.out_dim(), l.in_dim()))
            .collect();
        assert_eq!(shapes, vec![(8, 5), (5, 8), (4, 5)]);
        assert_eq!(engine.input_size(), 5);
        assert_eq!(engine.output_size(), 4);
        assert_eq!(engine.stages().len(), 6);
    }

    #[test]
    fn seeded_builds_are_identical() {
        let build = || {
            EngineBuilder::new(3)
                .unwrap()
                .dense(4)
                .unwrap()
                .softmax()
                .build_with_seed(42)
                .unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(
            a.dense_layers().next().unwrap().weights().data(),
            b.dense_layers().next().unwrap().weights().data()
        );
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(EngineBuilder::new(0).is_err());
        assert!(EngineBuilder::new(2).unwrap().dense(0).is_err());
        assert!(EngineBuilder::new(2)
            .unwrap()
            .relu()
            .softmax()
            .build_with_seed(0)
            .is_err());
        assert!(EngineBuilder::new(2)
            .unwrap()
            .dense(2)
            .unwrap()
            .scale_initial_weights(f64::NAN)
            .build_with_seed(0)
            .is_err());
    }
}
