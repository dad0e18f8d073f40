//! Model serialization/deserialization (feature: `serde`).
//!
//! This module defines a versioned, stable on-disk format for [`Engine`].
//!
//! Design notes:
//! - Internal `Engine`/`Stage` structs are not serialized directly; the file
//!   format stays fixed even if the in-memory representation changes.
//! - Weights are stored column-major, exactly as [`Matrix::data`] returns them.
//!   `serde_json` is built with `float_roundtrip`, so values survive a
//!   save/load cycle bit-for-bit.
//! - Deserialization validates the version, shapes, layer chaining, and that all
//!   parameters are finite.

use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{DenseLayer, Engine, Error, Matrix, Result, Stage};

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedEngine {
    pub format_version: u32,
    pub scale_initial_weights: f64,
    pub stages: Vec<SerializedStage>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, PartialEq)]
pub enum SerializedStage {
    Dense {
        in_dim: usize,
        out_dim: usize,
        /// Column-major `(out_dim, in_dim)`.
        weights: Vec<f64>,
        biases: Vec<f64>,
    },
    Relu,
    Softmax,
}

impl SerializedEngine {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if !(self.scale_initial_weights.is_finite() && self.scale_initial_weights > 0.0) {
            return Err(Error::InvalidData(format!(
                "scale_initial_weights must be finite and > 0, got {}",
                self.scale_initial_weights
            )));
        }

        let mut prev_out: Option<usize> = None;
        for (i, stage) in self.stages.iter().enumerate() {
            if let SerializedStage::Dense {
                in_dim, out_dim, ..
            } = stage
            {
                stage
                    .validate()
                    .map_err(|e| Error::InvalidData(format!("stage {i} invalid: {e}")))?;
                if let Some(prev) = prev_out {
                    if *in_dim != prev {
                        return Err(Error::InvalidData(format!(
                            "stage {i} in_dim {in_dim} does not match previous out_dim {prev}"
                        )));
                    }
                }
                prev_out = Some(*out_dim);
            }
        }
        if prev_out.is_none() {
            return Err(Error::InvalidData(
                "serialized model must have at least one dense stage".to_owned(),
            ));
        }

        Ok(())
    }
}

impl SerializedStage {
    fn validate(&self) -> Result<()> {
        let SerializedStage::Dense {
            in_dim,
            out_dim,
            weights,
            biases,
        } = self
        else {
            return Ok(());
        };

        if *in_dim == 0 || *out_dim == 0 {
            return Err(Error::InvalidData(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let expected_w = in_dim
            .checked_mul(*out_dim)
            .ok_or_else(|| Error::InvalidData("layer weight shape overflow".to_owned()))?;
        if weights.len() != expected_w {
            return Err(Error::InvalidData(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != *out_dim {
            return Err(Error::InvalidData(format!(
                "biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().chain(biases).any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "parameters must contain only finite values".to_owned(),
            ));
        }
        Ok(())
    }
}

impl From<&Engine> for SerializedEngine {
    fn from(engine: &Engine) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            scale_initial_weights: engine.scale_initial_weights(),
            stages: engine.stages().iter().map(SerializedStage::from).collect(),
        }
    }
}

impl From<&Stage> for SerializedStage {
    fn from(stage: &Stage) -> Self {
        match stage {
            Stage::Dense(layer) => SerializedStage::Dense {
                in_dim: layer.in_dim(),
                out_dim: layer.out_dim(),
                weights: layer.weights().data().to_vec(),
                biases: layer.biases().data().to_vec(),
            },
            Stage::Relu => SerializedStage::Relu,
            Stage::Softmax => SerializedStage::Softmax,
        }
    }
}

impl TryFrom<SerializedEngine> for Engine {
    type Error = Error;

    fn try_from(value: SerializedEngine) -> std::result::Result<Self, Self::Error> {
        value.validate()?;

        let mut stages = Vec::with_capacity(value.stages.len());
        for (i, stage) in value.stages.into_iter().enumerate() {
            stages.push(match stage {
                SerializedStage::Dense {
                    in_dim,
                    out_dim,
                    weights,
                    biases,
                } => {
                    let layer = dense_from_parts(in_dim, out_dim, weights, biases)
                        .map_err(|e| Error::InvalidData(format!("stage {i} invalid: {e}")))?;
                    Stage::Dense(layer)
                }
                SerializedStage::Relu => Stage::Relu,
                SerializedStage::Softmax => Stage::Softmax,
            });
        }

        let mut engine = Engine::from_stages(stages)
            .map_err(|e| Error::InvalidData(format!("invalid stage list: {e}")))?;
        engine.set_scale_initial_weights(value.scale_initial_weights);
        Ok(engine)
    }
}

fn dense_from_parts(
    in_dim: usize,
    out_dim: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
) -> Result<DenseLayer> {
    let weights = Matrix::from_vec(out_dim, in_dim, weights)?;
    let biases = Matrix::from_vec(out_dim, 1, biases)?;
    DenseLayer::from_parts(weights, biases)
}

#[cfg(feature = "serde")]
impl Engine {
    /// Serialize the engine to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        let ser = SerializedEngine::from(self);
        serde_json::to_string_pretty(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Serialize the engine to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        let ser = SerializedEngine::from(self);
        serde_json::to_string(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Parse an engine from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedEngine = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse model json: {e}")))?;
        ser.try_into()
    }

    /// Save the engine to a JSON file (pretty-printed).
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))?;
        Ok(())
    }

    /// Load an engine from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidData(format!("failed to read {}: {e}", p.display())))?;
        Self::from_json_str(&s)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    fn golden_engine() -> Engine {
        let l1 = DenseLayer::from_parts(
            Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            Matrix::from_vec(3, 1, vec![0.1, 0.2, 0.3]).unwrap(),
        )
        .unwrap();
        let l2 = DenseLayer::from_parts(
            Matrix::from_vec(2, 3, vec![0.5, -0.5, 0.25, -1.0, 1.5, 2.0]).unwrap(),
            Matrix::from_vec(2, 1, vec![0.0, -0.1]).unwrap(),
        )
        .unwrap();
        Engine::from_stages(vec![
            Stage::Dense(l1),
            Stage::Relu,
            Stage::Dense(l2),
            Stage::Softmax,
        ])
        .unwrap()
    }

    #[test]
    fn golden_json_is_stable_and_roundtrips() {
        let json = golden_engine().to_json_string_pretty().unwrap();

        let golden = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/golden/engine_v1.json"
        ))
        .trim_end();
        assert_eq!(json, golden);

        let loaded = Engine::from_json_str(golden).unwrap();
        let json2 = loaded.to_json_string_pretty().unwrap();
        assert_eq!(json2, golden);
    }

    #[test]
    fn awkward_floats_survive_bit_for_bit() {
        let weights = Matrix::from_vec(
            2,
            2,
            vec![0.1 + 0.2, std::f64::consts::PI, -1.0e-300, 1.0 / 3.0],
        )
        .unwrap();
        let layer = DenseLayer::from_parts(weights.clone(), Matrix::zeros(2, 1)).unwrap();
        let engine = Engine::from_stages(vec![Stage::Dense(layer), Stage::Softmax]).unwrap();

        let loaded = Engine::from_json_str(&engine.to_json_string().unwrap()).unwrap();
        let got = loaded.dense_layers().next().unwrap().weights();
        for (a, b) in weights.data().iter().zip(got.data()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let bad = r#"{"format_version":999,"scale_initial_weights":1.0,"stages":[]}"#;
        let err = Engine::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_broken_chaining() {
        let bad = r#"{"format_version":1,"scale_initial_weights":1.0,"stages":[
            {"kind":"dense","in_dim":1,"out_dim":2,"weights":[1.0,2.0],"biases":[0.0,0.0]},
            {"kind":"dense","in_dim":3,"out_dim":1,"weights":[1.0,2.0,3.0],"biases":[0.0]}
        ]}"#;
        let err = Engine::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("in_dim 3"));
    }

    #[test]
    fn rejects_wrong_weight_count() {
        let bad = r#"{"format_version":1,"scale_initial_weights":1.0,"stages":[
            {"kind":"dense","in_dim":2,"out_dim":2,"weights":[1.0,2.0,3.0],"biases":[0.0,0.0]}
        ]}"#;
        assert!(matches!(
            Engine::from_json_str(bad),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn rejects_model_without_dense_stage() {
        let bad = r#"{"format_version":1,"scale_initial_weights":1.0,"stages":[{"kind":"softmax"}]}"#;
        assert!(Engine::from_json_str(bad).is_err());
    }
}
