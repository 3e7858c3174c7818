//! The queue bank: global negatives plus per-class queues, updated together.

use candle_core::{Device, Tensor};
use moby_core::{MobyConfig, MobyError};

use crate::class::ClassQueueBank;
use crate::negative::NegativeQueue;
use crate::state::{ClassQueueState, QueueBankState, TensorState};

/// All memory-queue state of a MoBY model.
///
/// The bank is owned by the model and handed by reference to the loss
/// engine (read) and the queue-update stage (write). A step's writes are
/// validated for both queues before either is modified.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_queue::QueueBank;
///
/// let device = Device::Cpu;
/// let mut bank = QueueBank::new(8, 16, 3, 4, &device).unwrap();
/// let keys = Tensor::randn(0f32, 1f32, (4, 8), &device).unwrap();
///
/// let counts = bank.enqueue(&keys, &keys, Some(&[0, 1, 1, 2])).unwrap();
/// assert_eq!(counts, Some(vec![1, 2, 1]));
/// assert_eq!(bank.negatives().ptr(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct QueueBank {
    negatives: NegativeQueue,
    classes: ClassQueueBank,
}

impl QueueBank {
    /// Creates a bank of randomly initialized unit-norm queues.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] for zero sizes and
    /// [`MobyError::Internal`] if tensor creation fails.
    pub fn new(
        embed_dim: usize,
        negative_capacity: usize,
        num_classes: usize,
        class_capacity: usize,
        device: &Device,
    ) -> Result<Self, MobyError> {
        Ok(Self {
            negatives: NegativeQueue::new(embed_dim, negative_capacity, device)?,
            classes: ClassQueueBank::new(num_classes, embed_dim, class_capacity, device)?,
        })
    }

    /// Creates a bank sized from `config`.
    ///
    /// # Errors
    ///
    /// Same as [`QueueBank::new`].
    pub fn from_config(config: &MobyConfig, device: &Device) -> Result<Self, MobyError> {
        Self::new(
            config.embed_dim,
            config.negative_capacity,
            config.num_classes,
            config.class_capacity,
            device,
        )
    }

    /// Enqueues one step of momentum embeddings.
    ///
    /// Keys always go to the global queue; with `labels` they also go to
    /// the per-class queues, and the per-class write counts are returned.
    ///
    /// # Errors
    ///
    /// Any error from either queue. Neither queue is modified on error.
    pub fn enqueue(
        &mut self,
        keys1: &Tensor,
        keys2: &Tensor,
        labels: Option<&[u32]>,
    ) -> Result<Option<Vec<usize>>, MobyError> {
        let class_write = labels
            .map(|labels| self.classes.prepare(keys1, keys2, labels))
            .transpose()?;
        let negative_write = self.negatives.prepare(keys1, keys2)?;

        let counts = class_write.map(|write| self.classes.commit(write));
        if let Some(write) = negative_write {
            self.negatives.commit(write);
        }
        Ok(counts)
    }

    /// Checks that a batch of `batch` samples with these `labels` would be
    /// accepted by [`QueueBank::enqueue`], without touching any queue.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] if `labels` is not `batch` long,
    /// [`MobyError::LabelOutOfRange`], [`MobyError::ClassOverflow`] or
    /// [`MobyError::CapacityMismatch`].
    pub fn validate(&self, batch: usize, labels: Option<&[u32]>) -> Result<(), MobyError> {
        if let Some(labels) = labels {
            if labels.len() != batch {
                return Err(MobyError::shape("QueueBank labels", &[batch], &[labels.len()]));
            }
            self.classes.check_labels(labels)?;
        }
        self.negatives.check_batch(batch)
    }

    /// The global negative queue.
    pub fn negatives(&self) -> &NegativeQueue {
        &self.negatives
    }

    /// The per-class queues.
    pub fn classes(&self) -> &ClassQueueBank {
        &self.classes
    }

    /// Copies the whole bank to a serializable snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a device-to-host copy fails.
    pub fn snapshot(&self) -> Result<QueueBankState, MobyError> {
        let classes = self
            .classes
            .classes()
            .iter()
            .map(|q| {
                Ok(ClassQueueState {
                    queue1: TensorState::from_tensor(q.queue1())?,
                    queue2: TensorState::from_tensor(q.queue2())?,
                    ptr: q.ptr(),
                })
            })
            .collect::<Result<Vec<_>, MobyError>>()?;

        Ok(QueueBankState {
            queue1: TensorState::from_tensor(&self.negatives.queue1())?,
            queue2: TensorState::from_tensor(&self.negatives.queue2())?,
            ptr: self.negatives.ptr(),
            classes,
        })
    }

    /// Rebuilds a bank from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] for corrupt tensor data,
    /// [`MobyError::ShapeMismatch`] or [`MobyError::Config`] if the
    /// snapshot is internally inconsistent.
    pub fn restore(state: &QueueBankState, device: &Device) -> Result<Self, MobyError> {
        let negatives = NegativeQueue::from_parts(
            state.queue1.to_tensor(device)?,
            state.queue2.to_tensor(device)?,
            state.ptr,
        )?;
        let parts = state
            .classes
            .iter()
            .map(|c| Ok((c.queue1.to_tensor(device)?, c.queue2.to_tensor(device)?, c.ptr)))
            .collect::<Result<Vec<_>, MobyError>>()?;
        let classes = ClassQueueBank::from_parts(parts)?;

        if classes.embed_dim() != negatives.embed_dim() {
            return Err(MobyError::shape(
                "class queue embed dim",
                &[negatives.embed_dim()],
                &[classes.embed_dim()],
            ));
        }
        tracing::debug!(
            ptr = negatives.ptr(),
            classes = classes.num_classes(),
            "restored queue bank"
        );
        Ok(Self { negatives, classes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlabeled_enqueue_leaves_class_queues() {
        let device = Device::Cpu;
        let mut bank = QueueBank::new(4, 8, 2, 4, &device).unwrap();
        let keys = Tensor::randn(0f32, 1f32, (2, 4), &device).unwrap();

        let counts = bank.enqueue(&keys, &keys, None).unwrap();
        assert!(counts.is_none());
        assert_eq!(bank.negatives().ptr(), 2);
        assert_eq!(bank.classes().ptrs(), vec![0, 0]);
    }

    #[test]
    fn class_failure_blocks_negative_write() {
        let device = Device::Cpu;
        let mut bank = QueueBank::new(4, 8, 2, 4, &device).unwrap();
        let keys = Tensor::randn(0f32, 1f32, (2, 4), &device).unwrap();

        assert!(bank.enqueue(&keys, &keys, Some(&[0, 7])).is_err());
        assert_eq!(bank.negatives().ptr(), 0);
    }

    #[test]
    fn negative_failure_blocks_class_write() {
        let device = Device::Cpu;
        let mut bank = QueueBank::new(4, 8, 2, 4, &device).unwrap();
        let keys = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();

        let err = bank.enqueue(&keys, &keys, Some(&[0, 1, 1])).unwrap_err();
        assert!(matches!(err, MobyError::CapacityMismatch { .. }));
        assert_eq!(bank.classes().ptrs(), vec![0, 0]);
    }

    #[test]
    fn validate_matches_enqueue_outcome() {
        let device = Device::Cpu;
        let mut bank = QueueBank::new(4, 8, 2, 2, &device).unwrap();

        assert!(bank.validate(4, Some(&[0, 1, 1, 0])).is_ok());
        assert!(matches!(
            bank.validate(3, None),
            Err(MobyError::CapacityMismatch { capacity: 8, batch: 3 })
        ));
        assert!(matches!(
            bank.validate(4, Some(&[1, 1, 1, 0])),
            Err(MobyError::ClassOverflow { class: 1, count: 3, capacity: 2 })
        ));
        assert!(matches!(
            bank.validate(2, Some(&[0, 5])),
            Err(MobyError::LabelOutOfRange { label: 5, .. })
        ));
        assert!(matches!(
            bank.validate(4, Some(&[0, 1])),
            Err(MobyError::ShapeMismatch { .. })
        ));

        let keys = Tensor::randn(0f32, 1f32, (4, 4), &device).unwrap();
        assert!(bank.enqueue(&keys, &keys, Some(&[0, 1, 1, 0])).is_ok());
        assert_eq!(bank.negatives().ptr(), 4);
    }

    #[test]
    fn snapshot_restore_reproduces_state() {
        let device = Device::Cpu;
        let mut bank = QueueBank::new(4, 8, 3, 4, &device).unwrap();
        let keys = Tensor::randn(0f32, 1f32, (4, 4), &device).unwrap();
        bank.enqueue(&keys, &keys, Some(&[2, 2, 2, 0])).unwrap();

        let state = bank.snapshot().unwrap();
        let restored = QueueBank::restore(&state, &device).unwrap();

        assert_eq!(restored.negatives().ptr(), 4);
        assert_eq!(restored.classes().ptrs(), vec![1, 0, 3]);
        assert_eq!(restored.snapshot().unwrap(), state);
    }

    #[test]
    fn restore_rejects_mismatched_embed_dims() {
        let device = Device::Cpu;
        let bank = QueueBank::new(4, 8, 2, 4, &device).unwrap();
        let mut state = bank.snapshot().unwrap();
        let other = QueueBank::new(6, 8, 2, 4, &device).unwrap();
        state.classes = other.snapshot().unwrap().classes;

        assert!(QueueBank::restore(&state, &device).is_err());
    }
}
