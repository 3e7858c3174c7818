//! # moby-core
//!
//! Shared foundations for the MoBY momentum-contrastive learner.
//!
//! ## Key Components
//!
//! - [`MobyError`] — every failure the training core can report
//! - [`MobyConfig`] — construction-time configuration (JSON loadable)
//! - [`tensor`] — L2 normalization and label grouping helpers
//! - [`persist`] — JSON save/load used by config files and state snapshots
//!
//! ## Architecture Rules
//!
//! - No model code here: heads live in `moby-nn`, queues in `moby-queue`,
//!   the training step in `moby-learn`.
//! - Tensors are `candle_core::Tensor`; backend errors are wrapped in
//!   [`MobyError::Internal`] with the failing operation named.

pub mod config;
pub mod error;
pub mod persist;
pub mod tensor;

pub use config::MobyConfig;
pub use error::MobyError;

/// Default embedding width produced by the projector.
pub const DEFAULT_EMBED_DIM: usize = 128;

/// Default number of columns taken from each other class's queue when
/// assembling class-conditional negatives.
pub const DEFAULT_CLASS_NEGATIVES: usize = 128;

/// Added to L2 norms before division.
pub const NORM_EPS: f64 = 1e-12;
