//! Pipeline stages.
//!
//! [`Transform`] is the plain tag (what kind of stage), [`Stage`] is the node the
//! engine actually runs. Dense stages own their parameters, so there is no separate
//! weight list to keep in step with the tag list.

use std::fmt;

use crate::{DenseLayer, Matrix, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Dense,
    Relu,
    Softmax,
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::Dense => "DENSE",
            Transform::Relu => "RELU",
            Transform::Softmax => "SOFTMAX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Dense(DenseLayer),
    Relu,
    Softmax,
}

impl Stage {
    #[inline]
    pub fn transform(&self) -> Transform {
        match self {
            Stage::Dense(_) => Transform::Dense,
            Stage::Relu => Transform::Relu,
            Stage::Softmax => Transform::Softmax,
        }
    }

    #[inline]
    pub fn as_dense(&self) -> Option<&DenseLayer> {
        match self {
            Stage::Dense(layer) => Some(layer),
            Stage::Relu | Stage::Softmax => None,
        }
    }

    /// Runs this stage over a `(features, batch)` matrix.
    pub fn forward(&self, input: &Matrix) -> Result<Matrix> {
        match self {
            Stage::Dense(layer) => layer.forward(input),
            Stage::Relu => Ok(input.map(relu)),
            Stage::Softmax => Ok(input.soft_max()),
        }
    }
}

#[inline]
pub(crate) fn relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// ReLU derivative gate: passes `error` where the stage input was positive.
#[inline]
pub(crate) fn relu_gate(input: f64, error: f64) -> f64 {
    if input > 0.0 {
        error
    } else {
        0.0
    }
}
