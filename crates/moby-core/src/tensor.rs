//! Tensor helpers shared by the heads, queues and loss engine.

use candle_core::{DType, Tensor};

use crate::error::MobyError;
use crate::NORM_EPS;

/// L2-normalizes `t` along `dim`.
///
/// # Errors
///
/// Returns [`MobyError::Internal`] if a tensor operation fails.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_core::tensor::l2_normalize;
///
/// let t = Tensor::new(&[[3.0f32, 4.0]], &Device::Cpu).unwrap();
/// let n = l2_normalize(&t, 1).unwrap().to_vec2::<f32>().unwrap();
/// assert!((n[0][0] - 0.6).abs() < 1e-6);
/// assert!((n[0][1] - 0.8).abs() < 1e-6);
/// ```
pub fn l2_normalize(t: &Tensor, dim: usize) -> Result<Tensor, MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("l2_normalize: {e}"),
    };

    let norm = t
        .sqr()
        .and_then(|s| s.sum_keepdim(dim))
        .and_then(|s| s.sqrt())
        .map_err(map_err)?;
    let norm = (norm + NORM_EPS).map_err(map_err)?;
    t.broadcast_div(&norm).map_err(map_err)
}

/// Returns `(rows, cols)` of a rank-2 tensor.
///
/// # Errors
///
/// Returns [`MobyError::ShapeMismatch`] if `t` is not rank 2.
pub fn dims2(t: &Tensor, context: &str) -> Result<(usize, usize), MobyError> {
    match t.dims() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(MobyError::shape(context, &[0, 0], other)),
    }
}

/// Copies a rank-1 integer label tensor of length `batch` to the host.
///
/// Accepts `U8`, `U32` and `I64` labels.
///
/// # Errors
///
/// Returns [`MobyError::ShapeMismatch`] if the tensor is not `[batch]`,
/// [`MobyError::Config`] for negative or floating-point labels.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_core::tensor::labels_to_vec;
///
/// let labels = Tensor::new(&[0i64, 2, 1], &Device::Cpu).unwrap();
/// assert_eq!(labels_to_vec(&labels, 3).unwrap(), vec![0, 2, 1]);
/// ```
pub fn labels_to_vec(labels: &Tensor, batch: usize) -> Result<Vec<u32>, MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("labels_to_vec: {e}"),
    };

    if labels.dims() != [batch] {
        return Err(MobyError::shape("labels", &[batch], labels.dims()));
    }

    match labels.dtype() {
        DType::U32 => labels.to_vec1::<u32>().map_err(map_err),
        DType::U8 => Ok(labels
            .to_vec1::<u8>()
            .map_err(map_err)?
            .into_iter()
            .map(u32::from)
            .collect()),
        DType::I64 => labels
            .to_vec1::<i64>()
            .map_err(map_err)?
            .into_iter()
            .map(|v| {
                u32::try_from(v).map_err(|_| MobyError::Config {
                    message: format!("label {v} is not a valid class index"),
                })
            })
            .collect(),
        other => Err(MobyError::Config {
            message: format!("labels must be an integer tensor, got {other:?}"),
        }),
    }
}

/// Groups sample indices by class label.
///
/// Entry `i` holds, in batch order, the indices of samples labeled `i`.
///
/// # Errors
///
/// Returns [`MobyError::LabelOutOfRange`] for a label `>= num_classes`.
///
/// # Example
///
/// ```
/// use moby_core::tensor::group_by_class;
///
/// let groups = group_by_class(&[0, 0, 1, 2, 1], 3).unwrap();
/// assert_eq!(groups, vec![vec![0, 1], vec![2, 4], vec![3]]);
/// ```
pub fn group_by_class(labels: &[u32], num_classes: usize) -> Result<Vec<Vec<u32>>, MobyError> {
    let mut groups = vec![Vec::new(); num_classes];
    for (idx, &label) in labels.iter().enumerate() {
        let class = label as usize;
        let group = groups.get_mut(class).ok_or(MobyError::LabelOutOfRange {
            label: class,
            num_classes,
        })?;
        group.push(idx as u32);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn normalize_columns_gives_unit_norm() {
        let device = Device::Cpu;
        let t = Tensor::randn(0f32, 1f32, (6, 5), &device).unwrap();
        let n = l2_normalize(&t, 0).unwrap();
        let norms = n
            .sqr()
            .unwrap()
            .sum(0)
            .unwrap()
            .sqrt()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(norms.len(), 5);
        for v in norms {
            assert!((v - 1.0).abs() < 1e-5, "column norm {v}");
        }
    }

    #[test]
    fn dims2_rejects_rank_three() {
        let t = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            dims2(&t, "test"),
            Err(MobyError::ShapeMismatch { .. })
        ));
        let t = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(dims2(&t, "test").unwrap(), (2, 3));
    }

    #[test]
    fn labels_wrong_length_rejected() {
        let labels = Tensor::new(&[0u32, 1], &Device::Cpu).unwrap();
        assert!(labels_to_vec(&labels, 3).is_err());
    }

    #[test]
    fn negative_label_rejected() {
        let labels = Tensor::new(&[0i64, -1], &Device::Cpu).unwrap();
        assert!(matches!(
            labels_to_vec(&labels, 2),
            Err(MobyError::Config { .. })
        ));
    }

    #[test]
    fn float_labels_rejected() {
        let labels = Tensor::new(&[0f32, 1.0], &Device::Cpu).unwrap();
        assert!(labels_to_vec(&labels, 2).is_err());
    }

    #[test]
    fn group_by_class_out_of_range() {
        let err = group_by_class(&[0, 5], 3).unwrap_err();
        assert!(matches!(
            err,
            MobyError::LabelOutOfRange {
                label: 5,
                num_classes: 3
            }
        ));
    }

    #[test]
    fn group_counts_sum_to_batch() {
        let labels = [2, 2, 2, 0, 1, 2, 0];
        let groups = group_by_class(&labels, 4).unwrap();
        let total: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(total, labels.len());
        assert!(groups[3].is_empty());
    }
}
