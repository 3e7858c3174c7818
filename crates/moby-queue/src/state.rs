//! Serializable snapshots of queue state.
//!
//! A snapshot carries everything a checkpoint must restore: both global
//! queue matrices and their shared pointer, and every per-class matrix
//! pair with its pointer.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use moby_core::persist::{load_json, save_json};
use moby_core::MobyError;
use serde::{Deserialize, Serialize};

/// A tensor flattened to row-major `f32` data plus its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorState {
    /// Copies `t` to the host.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if the copy fails.
    pub fn from_tensor(t: &Tensor) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("TensorState from_tensor: {e}"),
        };

        let data = t
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(map_err)?;
        Ok(Self {
            shape: t.dims().to_vec(),
            data,
        })
    }

    /// Rebuilds the tensor on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if the data length does not match
    /// the shape.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, MobyError> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(MobyError::Storage {
                message: format!(
                    "tensor snapshot of shape {:?} holds {} values",
                    self.shape,
                    self.data.len()
                ),
            });
        }
        Tensor::from_vec(self.data.clone(), self.shape.as_slice(), device).map_err(|e| {
            MobyError::Internal {
                message: format!("TensorState to_tensor: {e}"),
            }
        })
    }
}

/// Snapshot of one class queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassQueueState {
    pub queue1: TensorState,
    pub queue2: TensorState,
    pub ptr: usize,
}

/// Snapshot of a whole [`crate::QueueBank`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBankState {
    pub queue1: TensorState,
    pub queue2: TensorState,
    pub ptr: usize,
    pub classes: Vec<ClassQueueState>,
}

impl QueueBankState {
    /// Writes the snapshot to `path` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if serialization or I/O fails.
    pub fn save(&self, path: &Path) -> Result<(), MobyError> {
        save_json(path, self)
    }

    /// Reads a snapshot written by [`QueueBankState::save`].
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if I/O or deserialization fails.
    pub fn load(path: &Path) -> Result<Self, MobyError> {
        load_json(path)
    }
}
