//! A small feed-forward network engine.
//!
//! `nn-engine` trains pipelines of Dense / ReLU / Softmax stages with softmax +
//! cross-entropy loss, using plain gradient descent over mini-batches.
//!
//! # Design goals
//!
//! - Batches as matrices: every operation works on a whole batch at once, one
//!   sample per column.
//! - Clear contracts: shapes are validated at every public entry point and errors
//!   come back as [`Result`], never as panics.
//! - Shared training: [`Engine::fit`] drives several worker threads over one
//!   [`Loader`], each worker owning the [`BatchResult`] of its current batch.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`.
//! - [`Matrix`] is column-major: element `(row, col)` lives at `col * rows + row`.
//! - Batches are `(features, batch_size)`; labels are one-hot `(classes, batch_size)`.
//! - Dense weights have shape `(out_dim, in_dim)`, biases `(out_dim, 1)`.
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.

//! # Quick start
//!
//! ```rust
//! use nn_engine::{EngineBuilder, FitConfig, LrSchedule, SyntheticLoader};
//!
//! # fn main() -> nn_engine::Result<()> {
//! let mut engine = EngineBuilder::new(4)?
//!     .dense(16)?
//!     .relu()
//!     .dense(3)?
//!     .softmax()
//!     .scale_initial_weights(0.3)
//!     .fit_config(FitConfig {
//!         epochs: 3,
//!         threads: 2,
//!         lr_schedule: LrSchedule::Constant(0.05),
//!     })
//!     .build_with_seed(0)?;
//!
//! let train = SyntheticLoader::new(256, 32, 4, 3, 1)?;
//! let test = SyntheticLoader::new(64, 32, 4, 3, 2)?;
//! let report = engine.fit(&train, &test)?;
//! assert_eq!(report.epochs.len(), 3);
//! # Ok(())
//! # }
//! ```

//! # Driving a batch by hand
//!
//! ```rust
//! use nn_engine::{EngineBuilder, Matrix};
//!
//! # fn main() -> nn_engine::Result<()> {
//! let mut engine = EngineBuilder::new(2)?
//!     .dense(2)?
//!     .softmax()
//!     .build_with_seed(7)?;
//!
//! let input = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0])?;
//! let expected = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0])?;
//!
//! let mut result = engine.run_forwards(&input)?;
//! engine.run_backwards(&mut result, &expected)?;
//! engine.adjust(&result, 0.1)?;
//! engine.evaluate(&mut result, &expected)?;
//! assert!(result.loss().is_some());
//! # Ok(())
//! # }
//! ```

pub mod approximator;
pub mod batch;
pub mod builder;
pub mod engine;
pub mod error;
pub mod layer;
pub mod loader;
pub mod loss;
pub(crate) mod matmul;
pub mod matrix;
pub mod train;
pub mod transform;

#[cfg(feature = "serde")]
pub mod serde_model;

pub use batch::{BatchResult, StageRecord};
pub use builder::EngineBuilder;
pub use engine::Engine;
pub use error::{Error, Result};
pub use layer::DenseLayer;
pub use loader::{BatchData, IdxLoader, Loader, MetaData, SyntheticLoader};
pub use loss::LossFunction;
pub use matrix::Matrix;
pub use train::{EpochReport, EvalReport, FitConfig, FitReport, LrSchedule};
pub use transform::{Stage, Transform};
