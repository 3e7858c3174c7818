//! Column writes into `[embed_dim × capacity]` queue matrices.

use candle_core::Tensor;
use moby_core::MobyError;

/// Returns `queue` with columns `[start, start + n)` replaced by `rowsᵀ`.
///
/// `rows` is `[n, embed_dim]` and is detached before the write.
pub(crate) fn write_columns(queue: &Tensor, rows: &Tensor, start: usize) -> Result<Tensor, MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("write_columns: {e}"),
    };

    let embed_dim = queue.dim(0).map_err(map_err)?;
    let n = rows.dim(0).map_err(map_err)?;
    let cols = rows.detach().t().map_err(map_err)?;
    queue
        .slice_assign(&[0..embed_dim, start..start + n], &cols)
        .map_err(map_err)
}

/// Writes `rows` at `ptr`, wrapping once to the front when they run past
/// `capacity`. Requires `0 < rows <= capacity` and `ptr < capacity`.
pub(crate) fn write_wrapped(
    queue: &Tensor,
    rows: &Tensor,
    ptr: usize,
    capacity: usize,
) -> Result<Tensor, MobyError> {
    let map_err = |e: candle_core::Error| MobyError::Internal {
        message: format!("write_wrapped: {e}"),
    };

    let n = rows.dim(0).map_err(map_err)?;
    if ptr + n <= capacity {
        return write_columns(queue, rows, ptr);
    }

    let head = capacity - ptr;
    let head_rows = rows.narrow(0, 0, head).map_err(map_err)?;
    let tail_rows = rows.narrow(0, head, n - head).map_err(map_err)?;
    let queue = write_columns(queue, &head_rows, ptr)?;
    write_columns(&queue, &tail_rows, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    /// `[n, 2]` rows where row i is `[i + 1, -(i + 1)]`.
    fn rows(n: usize) -> Tensor {
        let data: Vec<f32> = (0..n)
            .flat_map(|i| [(i + 1) as f32, -((i + 1) as f32)])
            .collect();
        Tensor::from_vec(data, (n, 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn contiguous_write_transposes() {
        let queue = Tensor::zeros((2, 6), DType::F32, &Device::Cpu).unwrap();
        let out = write_columns(&queue, &rows(2), 3).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out[0], vec![0.0, 0.0, 0.0, 1.0, 2.0, 0.0]);
        assert_eq!(out[1], vec![0.0, 0.0, 0.0, -1.0, -2.0, 0.0]);
    }

    #[test]
    fn wrapped_write_splits_head_and_tail() {
        let queue = Tensor::zeros((2, 10), DType::F32, &Device::Cpu).unwrap();
        let out = write_wrapped(&queue, &rows(5), 7, 10)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(
            out[0],
            vec![4.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn exact_fit_does_not_wrap() {
        let queue = Tensor::zeros((2, 4), DType::F32, &Device::Cpu).unwrap();
        let out = write_wrapped(&queue, &rows(2), 2, 4)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(out[0], vec![0.0, 0.0, 1.0, 2.0]);
    }
}
