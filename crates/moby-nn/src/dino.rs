//! DINO-style projection head.
//!
//! ```text
//! x → [Linear → (BatchNorm) → GELU] × (L-1) → Linear(bottleneck) → L2 normalize → WeightNorm Linear(out_dim, no bias)
//! ```
//!
//! The MLP Linear layers start from a truncated normal (std 0.02) with zero
//! bias. The last layer is weight-normalized per output row: `w = g · v / ‖v‖`.
//! With `norm_last_layer` the gain `g` is fixed at 1 and not trainable.

use candle_core::{DType, Tensor};
use candle_nn::{
    batch_norm, linear, linear_no_bias, BatchNorm, BatchNormConfig, Init, Linear, Module,
    ModuleT, VarBuilder,
};
use moby_core::tensor::l2_normalize;
use moby_core::MobyError;

use crate::init::init_linear;
use crate::Head;

/// Configuration for a [`DinoHead`].
///
/// # Example
///
/// ```
/// use moby_nn::DinoHeadConfig;
///
/// let config = DinoHeadConfig::new(384, 65536);
/// assert_eq!(config.num_layers, 3);
/// assert_eq!(config.bottleneck_dim, 256);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DinoHeadConfig {
    /// Input feature width.
    pub in_dim: usize,
    /// Output (prototype) width.
    pub out_dim: usize,
    /// Insert BatchNorm after each hidden Linear (default: false).
    pub use_bn: bool,
    /// Freeze the weight-norm gain at 1 (default: true).
    pub norm_last_layer: bool,
    /// Linear layers before the bottleneck, clamped to at least 1 (default: 3).
    pub num_layers: usize,
    /// Hidden width (default: 2048).
    pub hidden_dim: usize,
    /// Bottleneck width (default: 256).
    pub bottleneck_dim: usize,
}

impl DinoHeadConfig {
    /// Config with DINO defaults for the given input and output widths.
    pub fn new(in_dim: usize, out_dim: usize) -> Self {
        Self {
            in_dim,
            out_dim,
            use_bn: false,
            norm_last_layer: true,
            num_layers: 3,
            hidden_dim: 2048,
            bottleneck_dim: 256,
        }
    }
}

struct DinoBlock {
    linear: Linear,
    norm: Option<BatchNorm>,
}

/// DINO projection head with a weight-normalized last layer.
///
/// # Example
///
/// ```
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
/// use moby_nn::{DinoHead, DinoHeadConfig, Head};
///
/// let device = Device::Cpu;
/// let var_map = VarMap::new();
/// let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
/// let config = DinoHeadConfig { hidden_dim: 32, bottleneck_dim: 16, ..DinoHeadConfig::new(24, 40) };
/// let head = DinoHead::new(&config, vb).unwrap();
///
/// let xs = Tensor::randn(0f32, 1f32, (3, 24), &device).unwrap();
/// assert_eq!(head.forward_t(&xs, true).unwrap().dims(), &[3, 40]);
/// ```
pub struct DinoHead {
    mlp: Vec<DinoBlock>,
    bottleneck: Linear,
    last_v: Tensor,
    last_g: Tensor,
    config: DinoHeadConfig,
}

impl std::fmt::Debug for DinoHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DinoHead({}→{}→{}, norm_last_layer={})",
            self.config.in_dim,
            self.config.bottleneck_dim,
            self.config.out_dim,
            self.config.norm_last_layer
        )
    }
}

impl DinoHead {
    /// Creates the head under `vb` and initializes its MLP weights.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if parameter creation fails.
    pub fn new(config: &DinoHeadConfig, vb: VarBuilder) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DinoHead new: {e}"),
        };

        let num_layers = config.num_layers.max(1);
        let mut mlp = Vec::with_capacity(num_layers - 1);
        for i in 0..num_layers - 1 {
            let block_in = if i == 0 { config.in_dim } else { config.hidden_dim };
            let lin = linear(block_in, config.hidden_dim, vb.pp(format!("mlp.{i}.linear")))
                .map_err(map_err)?;
            let norm = if config.use_bn {
                Some(
                    batch_norm(
                        config.hidden_dim,
                        BatchNormConfig::default(),
                        vb.pp(format!("mlp.{i}.bn")),
                    )
                    .map_err(map_err)?,
                )
            } else {
                None
            };
            init_linear(&lin)?;
            mlp.push(DinoBlock { linear: lin, norm });
        }

        let bottleneck_in = if num_layers == 1 {
            config.in_dim
        } else {
            config.hidden_dim
        };
        let bottleneck = linear(bottleneck_in, config.bottleneck_dim, vb.pp("mlp.bottleneck"))
            .map_err(map_err)?;
        init_linear(&bottleneck)?;

        let last = linear_no_bias(config.bottleneck_dim, config.out_dim, vb.pp("last_layer"))
            .map_err(map_err)?;
        let last_v = last.weight().clone();
        let last_g = if config.norm_last_layer {
            Tensor::ones((config.out_dim, 1), DType::F32, vb.device()).map_err(map_err)?
        } else {
            vb.pp("last_layer")
                .get_with_hints((config.out_dim, 1), "weight_g", Init::Const(1.0))
                .map_err(map_err)?
        };

        Ok(Self {
            mlp,
            bottleneck,
            last_v,
            last_g,
            config: config.clone(),
        })
    }

    /// The configuration this head was built with.
    pub fn config(&self) -> &DinoHeadConfig {
        &self.config
    }

    /// Effective last-layer weight `g · v / ‖v‖`, shape `[out_dim, bottleneck_dim]`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    pub fn last_layer_weight(&self) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DinoHead last_layer_weight: {e}"),
        };

        let direction = l2_normalize(&self.last_v, 1)?;
        direction.broadcast_mul(&self.last_g).map_err(map_err)
    }
}

impl Head for DinoHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DinoHead forward: {e}"),
        };

        let mut h = xs.flatten_from(1).map_err(map_err)?;
        for block in &self.mlp {
            h = block.linear.forward(&h).map_err(map_err)?;
            if let Some(norm) = &block.norm {
                h = norm.forward_t(&h, train).map_err(map_err)?;
            }
            h = h.gelu_erf().map_err(map_err)?;
        }
        h = self.bottleneck.forward(&h).map_err(map_err)?;
        let h = l2_normalize(&h, 1)?;

        let w = self.last_layer_weight()?;
        h.matmul(&w.t().map_err(map_err)?).map_err(map_err)
    }
}
