//! Global negative queue: one `[embed_dim × capacity]` matrix per view.
//!
//! Both views share one write pointer. Every enqueue overwrites the next
//! `batch` columns starting at the pointer and advances it modulo
//! `capacity`. The capacity must be a multiple of the batch size so a write
//! never straddles the end of the buffer.

use candle_core::{Device, Tensor};
use moby_core::tensor::{dims2, l2_normalize};
use moby_core::MobyError;

use crate::columns::write_columns;

/// A validated global-queue write, ready to commit.
pub(crate) struct NegativeWrite {
    queue1: Tensor,
    queue2: Tensor,
    ptr: usize,
}

/// Two circular buffers of momentum-branch embeddings, used as negatives.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_queue::NegativeQueue;
///
/// let device = Device::Cpu;
/// let mut queue = NegativeQueue::new(8, 16, &device).unwrap();
/// assert_eq!(queue.ptr(), 0);
///
/// let keys = Tensor::randn(0f32, 1f32, (4, 8), &device).unwrap();
/// queue.enqueue(&keys, &keys).unwrap();
/// assert_eq!(queue.ptr(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct NegativeQueue {
    queue1: Tensor,
    queue2: Tensor,
    ptr: usize,
    capacity: usize,
    embed_dim: usize,
}

impl NegativeQueue {
    /// Creates a queue filled with random unit-norm columns.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] for a zero dimension and
    /// [`MobyError::Internal`] if tensor creation fails.
    pub fn new(embed_dim: usize, capacity: usize, device: &Device) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("NegativeQueue new: {e}"),
        };

        if embed_dim == 0 || capacity == 0 {
            return Err(MobyError::Config {
                message: format!("negative queue needs positive dims, got {embed_dim}×{capacity}"),
            });
        }

        let queue1 = Tensor::randn(0f32, 1f32, (embed_dim, capacity), device).map_err(map_err)?;
        let queue2 = Tensor::randn(0f32, 1f32, (embed_dim, capacity), device).map_err(map_err)?;
        Ok(Self {
            queue1: l2_normalize(&queue1, 0)?,
            queue2: l2_normalize(&queue2, 0)?,
            ptr: 0,
            capacity,
            embed_dim,
        })
    }

    /// Rebuilds a queue from existing matrices and pointer.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] if the matrices differ in shape
    /// and [`MobyError::Config`] if `ptr` is outside the buffer.
    pub fn from_parts(queue1: Tensor, queue2: Tensor, ptr: usize) -> Result<Self, MobyError> {
        let (embed_dim, capacity) = dims2(&queue1, "NegativeQueue queue1")?;
        if queue2.dims() != queue1.dims() {
            return Err(MobyError::shape(
                "NegativeQueue queue2",
                queue1.dims(),
                queue2.dims(),
            ));
        }
        if ptr >= capacity {
            return Err(MobyError::Config {
                message: format!("negative queue pointer {ptr} outside capacity {capacity}"),
            });
        }
        Ok(Self {
            queue1,
            queue2,
            ptr,
            capacity,
            embed_dim,
        })
    }

    /// Overwrites the next `batch` columns of each view and advances the pointer.
    ///
    /// `keys1` and `keys2` are `[batch, embed_dim]`, already L2-normalized.
    /// An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::CapacityMismatch`] if `capacity % batch != 0`,
    /// [`MobyError::ShapeMismatch`] for malformed keys. The queue is left
    /// unchanged on error.
    pub fn enqueue(&mut self, keys1: &Tensor, keys2: &Tensor) -> Result<(), MobyError> {
        if let Some(write) = self.prepare(keys1, keys2)? {
            self.commit(write);
        }
        Ok(())
    }

    /// Validates a write and computes the post-write state without applying it.
    pub(crate) fn prepare(
        &self,
        keys1: &Tensor,
        keys2: &Tensor,
    ) -> Result<Option<NegativeWrite>, MobyError> {
        let (batch, dim) = dims2(keys1, "NegativeQueue keys1")?;
        if keys2.dims() != keys1.dims() {
            return Err(MobyError::shape("NegativeQueue keys2", keys1.dims(), keys2.dims()));
        }
        if dim != self.embed_dim {
            return Err(MobyError::shape(
                "NegativeQueue keys",
                &[batch, self.embed_dim],
                keys1.dims(),
            ));
        }
        if batch == 0 {
            return Ok(None);
        }
        self.check_batch(batch)?;

        Ok(Some(NegativeWrite {
            queue1: write_columns(&self.queue1, keys1, self.ptr)?,
            queue2: write_columns(&self.queue2, keys2, self.ptr)?,
            ptr: (self.ptr + batch) % self.capacity,
        }))
    }

    /// Checks that `batch` columns can be written without straddling the end.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::CapacityMismatch`] if `capacity % batch != 0`.
    pub fn check_batch(&self, batch: usize) -> Result<(), MobyError> {
        if batch != 0 && self.capacity % batch != 0 {
            tracing::warn!(
                capacity = self.capacity,
                batch,
                "rejecting negative queue write"
            );
            return Err(MobyError::CapacityMismatch {
                capacity: self.capacity,
                batch,
            });
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, write: NegativeWrite) {
        tracing::trace!(from = self.ptr, to = write.ptr, "negative queue advanced");
        self.queue1 = write.queue1;
        self.queue2 = write.queue2;
        self.ptr = write.ptr;
    }

    /// Detached snapshot of the view-1 queue, `[embed_dim, capacity]`.
    pub fn queue1(&self) -> Tensor {
        self.queue1.detach()
    }

    /// Detached snapshot of the view-2 queue, `[embed_dim, capacity]`.
    pub fn queue2(&self) -> Tensor {
        self.queue2.detach()
    }

    /// Next write offset, always in `[0, capacity)`.
    pub fn ptr(&self) -> usize {
        self.ptr
    }

    /// Number of columns per view.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Embedding width.
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}
