//! Backbone contract and a small MLP backbone.

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use moby_core::MobyError;

/// A backbone feature extractor.
///
/// Maps a batch `[N, ...]` to features `[N, C]` where `C` is
/// [`Encoder::num_features`]. The projection head is sized from
/// `num_features` at construction.
pub trait Encoder {
    /// Width `C` of the feature vectors this encoder produces.
    fn num_features(&self) -> usize;

    /// Runs the backbone on a batch.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, MobyError>;
}

/// Shape of an [`MlpEncoder`].
///
/// # Example
///
/// ```
/// use moby_nn::MlpEncoderConfig;
///
/// let config = MlpEncoderConfig::default();
/// assert_eq!(config.num_features, 64);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MlpEncoderConfig {
    /// Flattened input width.
    pub in_dim: usize,
    /// Hidden layer width.
    pub hidden_dim: usize,
    /// Output feature width.
    pub num_features: usize,
}

impl Default for MlpEncoderConfig {
    fn default() -> Self {
        Self {
            in_dim: 32,
            hidden_dim: 64,
            num_features: 64,
        }
    }
}

/// Two-layer MLP backbone: `flatten → Linear → ReLU → Linear`.
///
/// # Example
///
/// ```
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
/// use moby_nn::{Encoder, MlpEncoder, MlpEncoderConfig};
///
/// let device = Device::Cpu;
/// let var_map = VarMap::new();
/// let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
/// let encoder = MlpEncoder::new(&MlpEncoderConfig::default(), vb).unwrap();
///
/// let xs = Tensor::zeros((4, 32), DType::F32, &device).unwrap();
/// let feats = encoder.forward_t(&xs, true).unwrap();
/// assert_eq!(feats.dims(), &[4, 64]);
/// ```
#[derive(Debug, Clone)]
pub struct MlpEncoder {
    fc1: Linear,
    fc2: Linear,
    num_features: usize,
}

impl MlpEncoder {
    /// Creates the encoder under `vb`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if parameter creation fails.
    pub fn new(config: &MlpEncoderConfig, vb: VarBuilder) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("MlpEncoder new: {e}"),
        };

        let fc1 = linear(config.in_dim, config.hidden_dim, vb.pp("fc1")).map_err(map_err)?;
        let fc2 = linear(config.hidden_dim, config.num_features, vb.pp("fc2")).map_err(map_err)?;
        Ok(Self {
            fc1,
            fc2,
            num_features: config.num_features,
        })
    }
}

impl Encoder for MlpEncoder {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("MlpEncoder forward: {e}"),
        };

        let h = xs.flatten_from(1).map_err(map_err)?;
        let h = self.fc1.forward(&h).map_err(map_err)?;
        let h = h.relu().map_err(map_err)?;
        self.fc2.forward(&h).map_err(map_err)
    }
}
