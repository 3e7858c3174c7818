//! # moby-learn
//!
//! The MoBY training core: an online/momentum dual encoder, the cosine
//! momentum schedule, InfoNCE losses and the five-stage training step.
//!
//! ## Key Components
//!
//! - [`MomentumSchedule`] — `coeff = 1 - (1 - base)(cos(πk/K) + 1)/2`
//! - [`DualEncoder`] — online encoder/projector/predictor and a momentum
//!   encoder/projector in two separate `VarMap`s
//! - [`ContrastiveLoss`] — pairwise, query-only and class-conditional
//!   InfoNCE
//! - [`Moby`] — owns the branches, the [`moby_queue::QueueBank`] and the
//!   schedule; [`Moby::forward`] runs one training step
//!
//! ## Architecture Rules
//!
//! - Only [`Moby::online_vars`] goes to the optimizer. Momentum variables
//!   change through the momentum rule alone.
//! - Momentum outputs and queue snapshots are detached before they reach
//!   a loss.
//! - A step validates labels before touching state and validates all queue
//!   writes before committing any.
//!
//! ## GPU Support
//!
//! With the `gpu` feature, [`default_device`] picks CUDA device 0 when present:
//! ```bash
//! cargo test -p moby-learn --features gpu
//! ```

use candle_core::Device;
use moby_core::MobyError;

pub use moby_core;

pub mod dual;
pub mod loss;
pub mod model;
pub mod schedule;

pub use dual::DualEncoder;
pub use loss::{ClassConditionalLoss, ContrastiveLoss};
pub use model::{Moby, MobyState, StepOutput, StepStage};
pub use schedule::MomentumSchedule;

/// Device training runs on: CUDA 0 if available, otherwise CPU.
///
/// # Errors
///
/// Returns [`MobyError::Internal`] if CUDA initialization fails.
#[cfg(feature = "gpu")]
pub fn default_device() -> Result<Device, MobyError> {
    Device::cuda_if_available(0).map_err(|e| MobyError::Internal {
        message: format!("default_device: {e}"),
    })
}

/// Device training runs on. CPU-only build.
///
/// # Errors
///
/// Never fails without the `gpu` feature.
#[cfg(not(feature = "gpu"))]
pub fn default_device() -> Result<Device, MobyError> {
    Ok(Device::Cpu)
}
