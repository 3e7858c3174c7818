//! # moby-nn
//!
//! Network pieces the MoBY training core calls through a narrow
//! tensor-in/tensor-out contract.
//!
//! ## Key Components
//!
//! - [`encoder::Encoder`] — backbone contract (`num_features` + forward)
//! - [`encoder::MlpEncoder`] — small reference backbone for tests and benches
//! - [`mlp::MobyMlp`] — projection and prediction head
//!   (`[Linear → BatchNorm → ReLU] × (L-1) → Linear`)
//! - [`dino::DinoHead`] — DINO-style head with a weight-normalized last layer
//! - [`multi_crop::MultiCropWrapper`] — one backbone pass per crop resolution
//! - [`init`] — truncated-normal initialization
//!
//! ## Architecture Rules
//!
//! - Every layer is built from a `candle_nn::VarBuilder`, so online and
//!   momentum copies built from two `VarMap`s share variable names.
//! - Forward passes take an explicit `train` flag for BatchNorm.

use candle_core::Tensor;
use moby_core::MobyError;

pub mod dino;
pub mod encoder;
pub mod init;
pub mod mlp;
pub mod multi_crop;

pub use dino::{DinoHead, DinoHeadConfig};
pub use encoder::{Encoder, MlpEncoder, MlpEncoderConfig};
pub use mlp::MobyMlp;
pub use multi_crop::MultiCropWrapper;

/// A head applied on top of backbone features.
pub trait Head {
    /// Maps features `[N, in_dim]` to head outputs `[N, out_dim]`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, MobyError>;
}
