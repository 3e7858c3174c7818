//! Truncated-normal weight initialization.
//!
//! Samples are drawn from a normal distribution and any value outside
//! `[a, b]` is redrawn; after a few rounds the stragglers are clamped.
//! Initialization writes in place through `candle_core::Var`, so it only
//! reaches weights that are backed by a `VarMap`.

use candle_core::{Device, Shape, Tensor, Var};
use candle_nn::Linear;
use moby_core::MobyError;

const RESAMPLE_ROUNDS: usize = 4;

/// Standard deviation used for Linear weights in the DINO head.
pub const LINEAR_INIT_STD: f64 = 0.02;

/// Draws an `f32` tensor from `N(mean, std²)` truncated to `[a, b]`.
///
/// # Errors
///
/// Returns [`MobyError::Config`] if `std <= 0` or `a >= b`, and
/// [`MobyError::Internal`] if a tensor operation fails.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use moby_nn::init::trunc_normal;
///
/// let t = trunc_normal(0.0, 1.0, -2.0, 2.0, (64, 64), &Device::Cpu).unwrap();
/// let v = t.flatten_all().unwrap().to_vec1::<f32>().unwrap();
/// assert!(v.iter().all(|x| (-2.0..=2.0).contains(x)));
/// ```
pub fn trunc_normal<S: Into<Shape>>(
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
    shape: S,
    device: &Device,
) -> Result<Tensor, MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("trunc_normal: {e}"),
    };

    if std <= 0.0 || a >= b {
        return Err(MobyError::Config {
            message: format!("trunc_normal needs std > 0 and a < b (std={std}, a={a}, b={b})"),
        });
    }

    let shape = shape.into();
    let lo = Tensor::full(((a - mean) / std) as f32, shape.clone(), device).map_err(map_err)?;
    let hi = Tensor::full(((b - mean) / std) as f32, shape.clone(), device).map_err(map_err)?;

    let mut z = Tensor::randn(0f32, 1f32, shape.clone(), device).map_err(map_err)?;
    for _ in 0..RESAMPLE_ROUNDS {
        let below = z.lt(&lo).map_err(map_err)?;
        let above = z.gt(&hi).map_err(map_err)?;
        let outside = (below + above).map_err(map_err)?;
        let fresh = Tensor::randn(0f32, 1f32, shape.clone(), device).map_err(map_err)?;
        z = outside.where_cond(&fresh, &z).map_err(map_err)?;
    }
    let z = z
        .maximum(&lo)
        .and_then(|z| z.minimum(&hi))
        .map_err(map_err)?;
    z.affine(std, mean).map_err(map_err)
}

/// Overwrites a `VarMap`-backed tensor with truncated-normal samples.
///
/// # Errors
///
/// Returns [`MobyError::Internal`] if the write fails.
pub fn trunc_normal_(t: &Tensor, mean: f64, std: f64, a: f64, b: f64) -> Result<(), MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("trunc_normal_: {e}"),
    };

    let sample = trunc_normal(mean, std, a, b, t.shape().clone(), t.device())?
        .to_dtype(t.dtype())
        .map_err(map_err)?;
    Var::from_tensor(t)
        .and_then(|var| var.set(&sample))
        .map_err(map_err)
}

/// Re-initializes a Linear layer: weight ~ TN(0, 0.02², [-2, 2]), bias = 0.
///
/// # Errors
///
/// Returns [`MobyError::Internal`] if a write fails.
pub fn init_linear(layer: &Linear) -> Result<(), MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("init_linear: {e}"),
    };

    trunc_normal_(layer.weight(), 0.0, LINEAR_INIT_STD, -2.0, 2.0)?;
    if let Some(bias) = layer.bias() {
        let zeros = bias.zeros_like().map_err(map_err)?;
        Var::from_tensor(bias)
            .and_then(|var| var.set(&zeros))
            .map_err(map_err)?;
    }
    Ok(())
}
