//! Projection and prediction head.
//!
//! ```text
//! x → flatten → [Linear → BatchNorm1d → ReLU] × (L-1) → Linear(out_dim)
//! ```
//!
//! The first hidden Linear reads `in_dim`, later ones read `inner_dim`.
//! With `L = 1` the head is a single `Linear(in_dim → out_dim)`; with
//! `L = 0` it is the identity.

use candle_core::Tensor;
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder};
use moby_core::MobyError;

use crate::Head;

struct HiddenBlock {
    linear: Linear,
    norm: BatchNorm,
}

/// MLP head used for both the projector and the predictor.
///
/// # Example
///
/// ```
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
/// use moby_nn::{Head, MobyMlp};
///
/// let device = Device::Cpu;
/// let var_map = VarMap::new();
/// let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
/// let projector = MobyMlp::new(64, 256, 128, 2, vb.pp("projector")).unwrap();
///
/// let feats = Tensor::randn(0f32, 1f32, (4, 64), &device).unwrap();
/// let z = projector.forward_t(&feats, true).unwrap();
/// assert_eq!(z.dims(), &[4, 128]);
/// ```
pub struct MobyMlp {
    hidden: Vec<HiddenBlock>,
    out: Option<Linear>,
    in_dim: usize,
    out_dim: usize,
}

impl std::fmt::Debug for MobyMlp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MobyMlp({}→{}, {} hidden blocks)",
            self.in_dim,
            self.out_dim,
            self.hidden.len()
        )
    }
}

impl MobyMlp {
    /// Creates a head with `num_layers` Linear layers under `vb`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] if `num_layers == 0` but
    /// `in_dim != out_dim`, and [`MobyError::Internal`] if parameter
    /// creation fails.
    pub fn new(
        in_dim: usize,
        inner_dim: usize,
        out_dim: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("MobyMlp new: {e}"),
        };

        if num_layers == 0 {
            if in_dim != out_dim {
                return Err(MobyError::Config {
                    message: format!("identity head cannot map {in_dim} to {out_dim}"),
                });
            }
            return Ok(Self {
                hidden: Vec::new(),
                out: None,
                in_dim,
                out_dim,
            });
        }

        let mut hidden = Vec::with_capacity(num_layers - 1);
        for i in 0..num_layers - 1 {
            let block_in = if i == 0 { in_dim } else { inner_dim };
            let prefix = format!("hidden_{i}");
            let lin = linear(block_in, inner_dim, vb.pp(format!("{prefix}.linear")))
                .map_err(map_err)?;
            let norm = batch_norm(
                inner_dim,
                BatchNormConfig::default(),
                vb.pp(format!("{prefix}.bn")),
            )
            .map_err(map_err)?;
            hidden.push(HiddenBlock { linear: lin, norm });
        }

        let out_in = if num_layers == 1 { in_dim } else { inner_dim };
        let out = linear(out_in, out_dim, vb.pp("out")).map_err(map_err)?;

        Ok(Self {
            hidden,
            out: Some(out),
            in_dim,
            out_dim,
        })
    }

    /// Input width.
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// Output width.
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Number of Linear layers (0 for the identity head).
    pub fn num_layers(&self) -> usize {
        self.hidden.len() + usize::from(self.out.is_some())
    }
}

impl Head for MobyMlp {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("MobyMlp forward: {e}"),
        };

        let mut h = xs.flatten_from(1).map_err(map_err)?;
        for block in &self.hidden {
            h = block.linear.forward(&h).map_err(map_err)?;
            h = block.norm.forward_t(&h, train).map_err(map_err)?;
            h = h.relu().map_err(map_err)?;
        }
        match &self.out {
            Some(out) => out.forward(&h).map_err(map_err),
            None => Ok(h),
        }
    }
}
