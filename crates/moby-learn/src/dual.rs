//! Online and momentum branches.
//!
//! ```text
//! online:   x → encoder   → projector   → predictor → L2 normalize
//! momentum: x → encoder_k → projector_k →             L2 normalize → detach
//! ```
//!
//! Each branch owns its own `VarMap`. Both are built through the same
//! variable names (`encoder.*`, `projector.*`), which is how the momentum
//! update pairs parameters. Only [`DualEncoder::online_vars`] is meant to be
//! handed to an optimizer. The momentum map is written exclusively by
//! [`DualEncoder::sync_momentum`] and [`DualEncoder::momentum_update`], and
//! its outputs are always detached.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use moby_core::tensor::l2_normalize;
use moby_core::{MobyConfig, MobyError};
use moby_nn::{Encoder, Head, MobyMlp};

/// BatchNorm buffers: carried by the `VarMap` but never averaged.
const BUFFER_SUFFIXES: [&str; 2] = ["running_mean", "running_var"];

fn is_buffer(name: &str) -> bool {
    BUFFER_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn lock(vars: &Mutex<HashMap<String, Var>>) -> Result<MutexGuard<'_, HashMap<String, Var>>, MobyError> {
    vars.lock().map_err(|e| MobyError::Internal {
        message: format!("VarMap lock poisoned: {e}"),
    })
}

/// Online encoder/projector/predictor plus a momentum encoder/projector.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_core::MobyConfig;
/// use moby_learn::DualEncoder;
/// use moby_nn::{MlpEncoder, MlpEncoderConfig};
///
/// let device = Device::Cpu;
/// let config = MobyConfig { hidden_dim: 32, embed_dim: 8, ..MobyConfig::default() };
/// let dual = DualEncoder::new(&config, &device, |vb| {
///     MlpEncoder::new(&MlpEncoderConfig::default(), vb)
/// })
/// .unwrap();
///
/// let x = Tensor::randn(0f32, 1f32, (4, 32), &device).unwrap();
/// let (pred, feats) = dual.forward_online(&x, true).unwrap();
/// assert_eq!(pred.dims(), &[4, 8]);
/// assert_eq!(feats.dims(), &[4, 64]);
/// assert!(dual.parameter_distance().unwrap() < 1e-6);
/// ```
pub struct DualEncoder<E> {
    online_vars: VarMap,
    momentum_vars: VarMap,
    encoder: E,
    projector: MobyMlp,
    predictor: MobyMlp,
    encoder_k: E,
    projector_k: MobyMlp,
}

impl<E> std::fmt::Debug for DualEncoder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DualEncoder(online={} vars, momentum={} vars, {:?}, {:?})",
            self.online_vars.all_vars().len(),
            self.momentum_vars.all_vars().len(),
            self.projector,
            self.predictor
        )
    }
}

impl<E: Encoder> DualEncoder<E> {
    /// Builds both branches and copies the online weights into the momentum
    /// branch.
    ///
    /// `build_encoder` is called twice, once per branch, with a
    /// `VarBuilder` already scoped to `encoder`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] if the two encoders disagree on
    /// their feature width, or any error from the builder or the heads.
    pub fn new<F>(config: &MobyConfig, device: &Device, mut build_encoder: F) -> Result<Self, MobyError>
    where
        F: FnMut(VarBuilder) -> Result<E, MobyError>,
    {
        let online_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&online_vars, DType::F32, device);
        let encoder = build_encoder(vb.pp("encoder"))?;
        let projector = MobyMlp::new(
            encoder.num_features(),
            config.hidden_dim,
            config.embed_dim,
            config.proj_num_layers,
            vb.pp("projector"),
        )?;
        let predictor = MobyMlp::new(
            config.embed_dim,
            config.hidden_dim,
            config.embed_dim,
            config.pred_num_layers,
            vb.pp("predictor"),
        )?;

        let momentum_vars = VarMap::new();
        let vb_k = VarBuilder::from_varmap(&momentum_vars, DType::F32, device);
        let encoder_k = build_encoder(vb_k.pp("encoder"))?;
        if encoder_k.num_features() != encoder.num_features() {
            return Err(MobyError::shape(
                "momentum encoder features",
                &[encoder.num_features()],
                &[encoder_k.num_features()],
            ));
        }
        let projector_k = MobyMlp::new(
            encoder_k.num_features(),
            config.hidden_dim,
            config.embed_dim,
            config.proj_num_layers,
            vb_k.pp("projector"),
        )?;

        let dual = Self {
            online_vars,
            momentum_vars,
            encoder,
            projector,
            predictor,
            encoder_k,
            projector_k,
        };
        let copied = dual.sync_momentum()?;
        tracing::debug!(copied, features = dual.encoder.num_features(), "dual encoder ready");
        Ok(dual)
    }

    /// Copies every online variable with a momentum twin into the momentum
    /// branch. Returns the number of variables copied.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a write fails.
    pub fn sync_momentum(&self) -> Result<usize, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DualEncoder sync_momentum: {e}"),
        };

        let online = lock(self.online_vars.data())?;
        let momentum = lock(self.momentum_vars.data())?;
        let mut copied = 0;
        for (name, var_k) in momentum.iter() {
            if let Some(var) = online.get(name) {
                var_k.set(&var.as_tensor().detach()).map_err(map_err)?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// `momentum ← momentum · coeff + online · (1 - coeff)` for every paired
    /// encoder and projector parameter. BatchNorm running statistics are
    /// left alone. Returns the number of parameters updated.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    pub fn momentum_update(&mut self, coeff: f64) -> Result<usize, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DualEncoder momentum_update: {e}"),
        };

        let online = lock(self.online_vars.data())?;
        let momentum = lock(self.momentum_vars.data())?;
        let mut updated = 0;
        for (name, var_k) in momentum.iter() {
            if is_buffer(name) {
                continue;
            }
            let Some(var) = online.get(name) else {
                continue;
            };
            let kept = var_k.as_tensor().detach().affine(coeff, 0.0).map_err(map_err)?;
            let pulled = var.as_tensor().detach().affine(1.0 - coeff, 0.0).map_err(map_err)?;
            let next = (kept + pulled).map_err(map_err)?;
            var_k.set(&next).map_err(map_err)?;
            updated += 1;
        }
        tracing::trace!(coeff, updated, "momentum update");
        Ok(updated)
    }

    /// Euclidean distance between the paired online and momentum parameters,
    /// taken over all of them at once.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    pub fn parameter_distance(&self) -> Result<f32, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("DualEncoder parameter_distance: {e}"),
        };

        let online = lock(self.online_vars.data())?;
        let momentum = lock(self.momentum_vars.data())?;
        let mut total = 0f32;
        for (name, var_k) in momentum.iter() {
            if is_buffer(name) {
                continue;
            }
            if let Some(var) = online.get(name) {
                let sq = (var_k.as_tensor() - var.as_tensor())
                    .and_then(|d| d.sqr())
                    .and_then(|d| d.sum_all())
                    .and_then(|d| d.to_dtype(DType::F32))
                    .and_then(|d| d.to_scalar::<f32>())
                    .map_err(map_err)?;
                total += sq;
            }
        }
        Ok(total.sqrt())
    }

    /// Online branch: `(normalized prediction, encoder features)`.
    ///
    /// # Errors
    ///
    /// Returns any error from the encoder or heads.
    pub fn forward_online(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor), MobyError> {
        let feats = self.encoder.forward_t(xs, train)?;
        let proj = self.projector.forward_t(&feats, train)?;
        let pred = self.predictor.forward_t(&proj, train)?;
        Ok((l2_normalize(&pred, 1)?, feats))
    }

    /// Momentum branch: normalized, detached projection.
    ///
    /// # Errors
    ///
    /// Returns any error from the encoder or projector.
    pub fn forward_momentum(&self, xs: &Tensor, train: bool) -> Result<Tensor, MobyError> {
        let feats = self.encoder_k.forward_t(xs, train)?;
        let proj = self.projector_k.forward_t(&feats, train)?;
        Ok(l2_normalize(&proj, 1)?.detach())
    }

    /// Trainable variables: online encoder, projector and predictor.
    pub fn online_vars(&self) -> &VarMap {
        &self.online_vars
    }

    /// Momentum encoder and projector variables.
    pub fn momentum_vars(&self) -> &VarMap {
        &self.momentum_vars
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn momentum_encoder(&self) -> &E {
        &self.encoder_k
    }
}
