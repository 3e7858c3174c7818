//! Multi-crop wrapper: one backbone pass per crop resolution.
//!
//! Crops are grouped into runs of consecutive tensors that share the same
//! trailing (spatial) size. Each run is concatenated along the batch axis
//! and sent through the backbone once; the outputs are concatenated in the
//! original crop order and the head is applied to the whole stack.

use candle_core::Tensor;
use moby_core::MobyError;

use crate::encoder::Encoder;
use crate::Head;

/// Wraps a backbone and a head for multi-resolution crop batches.
///
/// # Example
///
/// ```
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
/// use moby_nn::{MlpEncoder, MlpEncoderConfig, MobyMlp, MultiCropWrapper};
///
/// let device = Device::Cpu;
/// let var_map = VarMap::new();
/// let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
/// let backbone = MlpEncoder::new(&MlpEncoderConfig::default(), vb.pp("backbone")).unwrap();
/// let head = MobyMlp::new(64, 32, 16, 2, vb.pp("head")).unwrap();
/// let wrapper = MultiCropWrapper::new(backbone, head);
///
/// let crops = vec![
///     Tensor::zeros((2, 32), DType::F32, &device).unwrap(),
///     Tensor::zeros((2, 32), DType::F32, &device).unwrap(),
/// ];
/// let (out, feats) = wrapper.forward_t(&crops, true).unwrap();
/// assert_eq!(out.dims(), &[4, 16]);
/// assert_eq!(feats.dims(), &[4, 64]);
/// ```
#[derive(Debug)]
pub struct MultiCropWrapper<B, H> {
    backbone: B,
    head: H,
}

impl<B: Encoder, H: Head> MultiCropWrapper<B, H> {
    /// Wraps `backbone` and `head`.
    pub fn new(backbone: B, head: H) -> Self {
        Self { backbone, head }
    }

    /// The wrapped backbone.
    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    /// The wrapped head.
    pub fn head(&self) -> &H {
        &self.head
    }

    /// Runs every crop through the backbone and the head.
    ///
    /// Returns `(head_output, backbone_features)`, both ordered like `crops`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] for an empty crop list and
    /// [`MobyError::Internal`] if a tensor operation fails.
    pub fn forward_t(&self, crops: &[Tensor], train: bool) -> Result<(Tensor, Tensor), MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("MultiCropWrapper forward: {e}"),
        };

        if crops.is_empty() {
            return Err(MobyError::Config {
                message: "MultiCropWrapper needs at least one crop".to_string(),
            });
        }

        let mut outputs = Vec::new();
        for group in resolution_groups(crops) {
            let batch = if group.len() == 1 {
                group[0].clone()
            } else {
                Tensor::cat(group, 0).map_err(map_err)?
            };
            outputs.push(self.backbone.forward_t(&batch, train)?);
        }
        tracing::trace!(crops = crops.len(), passes = outputs.len(), "multi-crop forward");

        let features = if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            Tensor::cat(&outputs, 0).map_err(map_err)?
        };
        let out = self.head.forward_t(&features, train)?;
        Ok((out, features))
    }
}

/// Splits `crops` into runs of consecutive tensors with equal last dimension.
fn resolution_groups(crops: &[Tensor]) -> Vec<&[Tensor]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for end in 1..=crops.len() {
        if end == crops.len() || crops[end].dims().last() != crops[start].dims().last() {
            groups.push(&crops[start..end]);
            start = end;
        }
    }
    groups
}
