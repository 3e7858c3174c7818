//! Per-class queues for the class-conditional contrastive loss.
//!
//! Each class owns a pair of `[embed_dim × capacity]` buffers and its own
//! write pointer. A step writes only the samples carrying that class's
//! label, so writes are partial and may run past the end of the buffer;
//! they then wrap once to the front, overwriting the oldest columns. A
//! class with no samples in the step is not touched.

use candle_core::{Device, Tensor};
use moby_core::tensor::{dims2, group_by_class, l2_normalize};
use moby_core::MobyError;

use crate::columns::write_wrapped;

/// Buffers and write pointer of a single class.
#[derive(Debug, Clone)]
pub struct ClassQueue {
    queue1: Tensor,
    queue2: Tensor,
    ptr: usize,
}

impl ClassQueue {
    fn random(embed_dim: usize, capacity: usize, device: &Device) -> Result<Self, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ClassQueue new: {e}"),
        };

        let queue1 = Tensor::randn(0f32, 1f32, (embed_dim, capacity), device).map_err(map_err)?;
        let queue2 = Tensor::randn(0f32, 1f32, (embed_dim, capacity), device).map_err(map_err)?;
        Ok(Self {
            queue1: l2_normalize(&queue1, 0)?,
            queue2: l2_normalize(&queue2, 0)?,
            ptr: 0,
        })
    }

    /// View-1 buffer, `[embed_dim, capacity]`.
    pub fn queue1(&self) -> &Tensor {
        &self.queue1
    }

    /// View-2 buffer, `[embed_dim, capacity]`.
    pub fn queue2(&self) -> &Tensor {
        &self.queue2
    }

    /// Next write offset.
    pub fn ptr(&self) -> usize {
        self.ptr
    }
}

/// A validated per-class write: the new state of every touched class.
pub(crate) struct ClassWrite {
    updates: Vec<(usize, ClassQueue)>,
    counts: Vec<usize>,
}

/// Ordered collection of per-class queues, indexed by class label.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_queue::ClassQueueBank;
///
/// let device = Device::Cpu;
/// let mut bank = ClassQueueBank::new(3, 8, 4, &device).unwrap();
///
/// let keys = Tensor::randn(0f32, 1f32, (5, 8), &device).unwrap();
/// let counts = bank.enqueue(&keys, &keys, &[0, 0, 1, 2, 1]).unwrap();
/// assert_eq!(counts, vec![2, 2, 1]);
/// assert_eq!(bank.ptrs(), vec![2, 2, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct ClassQueueBank {
    classes: Vec<ClassQueue>,
    embed_dim: usize,
    capacity: usize,
}

impl ClassQueueBank {
    /// Creates `num_classes` queues of random unit-norm columns.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] for a zero dimension and
    /// [`MobyError::Internal`] if tensor creation fails.
    pub fn new(
        num_classes: usize,
        embed_dim: usize,
        capacity: usize,
        device: &Device,
    ) -> Result<Self, MobyError> {
        if num_classes == 0 || embed_dim == 0 || capacity == 0 {
            return Err(MobyError::Config {
                message: format!(
                    "class queues need positive sizes, got {num_classes} classes of {embed_dim}×{capacity}"
                ),
            });
        }

        let classes = (0..num_classes)
            .map(|_| ClassQueue::random(embed_dim, capacity, device))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            classes,
            embed_dim,
            capacity,
        })
    }

    /// Rebuilds a bank from `(queue1, queue2, ptr)` triples in class order.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] if the buffers disagree in shape
    /// and [`MobyError::Config`] for an empty list or out-of-range pointer.
    pub fn from_parts(parts: Vec<(Tensor, Tensor, usize)>) -> Result<Self, MobyError> {
        let Some((first, _, _)) = parts.first() else {
            return Err(MobyError::Config {
                message: "class queue bank needs at least one class".to_string(),
            });
        };
        let (embed_dim, capacity) = dims2(first, "ClassQueueBank queue")?;

        let mut classes = Vec::with_capacity(parts.len());
        for (class, (queue1, queue2, ptr)) in parts.into_iter().enumerate() {
            for q in [&queue1, &queue2] {
                if q.dims() != [embed_dim, capacity] {
                    return Err(MobyError::shape(
                        format!("class {class} queue"),
                        &[embed_dim, capacity],
                        q.dims(),
                    ));
                }
            }
            if ptr >= capacity {
                return Err(MobyError::Config {
                    message: format!("class {class} pointer {ptr} outside capacity {capacity}"),
                });
            }
            classes.push(ClassQueue {
                queue1,
                queue2,
                ptr,
            });
        }
        Ok(Self {
            classes,
            embed_dim,
            capacity,
        })
    }

    /// Writes each sample into the queues of its class.
    ///
    /// Returns how many samples each class received; the counts sum to the
    /// batch size.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::LabelOutOfRange`] for an unknown label,
    /// [`MobyError::ClassOverflow`] if one class gets more samples than its
    /// capacity, [`MobyError::ShapeMismatch`] for malformed inputs. No queue
    /// is modified on error.
    pub fn enqueue(
        &mut self,
        keys1: &Tensor,
        keys2: &Tensor,
        labels: &[u32],
    ) -> Result<Vec<usize>, MobyError> {
        let write = self.prepare(keys1, keys2, labels)?;
        Ok(self.commit(write))
    }

    pub(crate) fn prepare(
        &self,
        keys1: &Tensor,
        keys2: &Tensor,
        labels: &[u32],
    ) -> Result<ClassWrite, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ClassQueueBank enqueue: {e}"),
        };

        let (batch, dim) = dims2(keys1, "ClassQueueBank keys1")?;
        if keys2.dims() != keys1.dims() {
            return Err(MobyError::shape("ClassQueueBank keys2", keys1.dims(), keys2.dims()));
        }
        if dim != self.embed_dim {
            return Err(MobyError::shape(
                "ClassQueueBank keys",
                &[batch, self.embed_dim],
                keys1.dims(),
            ));
        }
        if labels.len() != batch {
            return Err(MobyError::shape("ClassQueueBank labels", &[batch], &[labels.len()]));
        }

        let groups = self.check_labels(labels)?;

        let mut updates = Vec::new();
        for (class, members) in groups.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let ids = Tensor::new(members.as_slice(), keys1.device()).map_err(map_err)?;
            let rows1 = keys1.index_select(&ids, 0).map_err(map_err)?;
            let rows2 = keys2.index_select(&ids, 0).map_err(map_err)?;

            let current = &self.classes[class];
            updates.push((
                class,
                ClassQueue {
                    queue1: write_wrapped(&current.queue1, &rows1, current.ptr, self.capacity)?,
                    queue2: write_wrapped(&current.queue2, &rows2, current.ptr, self.capacity)?,
                    ptr: (current.ptr + members.len()) % self.capacity,
                },
            ));
        }

        Ok(ClassWrite {
            updates,
            counts: groups.iter().map(Vec::len).collect(),
        })
    }

    /// Groups batch indices by label, checking every class fits its queue.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::LabelOutOfRange`] for an unknown label and
    /// [`MobyError::ClassOverflow`] if one class gets more samples than its
    /// capacity.
    pub fn check_labels(&self, labels: &[u32]) -> Result<Vec<Vec<u32>>, MobyError> {
        let groups = group_by_class(labels, self.classes.len())?;
        if let Some((class, members)) = groups
            .iter()
            .enumerate()
            .find(|(_, members)| members.len() > self.capacity)
        {
            tracing::warn!(class, count = members.len(), capacity = self.capacity, "class queue overflow");
            return Err(MobyError::ClassOverflow {
                class,
                count: members.len(),
                capacity: self.capacity,
            });
        }
        Ok(groups)
    }

    pub(crate) fn commit(&mut self, write: ClassWrite) -> Vec<usize> {
        for (class, queue) in write.updates {
            tracing::trace!(class, from = self.classes[class].ptr, to = queue.ptr, "class queue advanced");
            self.classes[class] = queue;
        }
        write.counts
    }

    /// Concatenated view-2 negatives for `class`: the first
    /// `min(limit, capacity)` columns of every other class, in ascending
    /// class order. `None` when no other class exists.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::LabelOutOfRange`] for an unknown class and
    /// [`MobyError::Internal`] if a tensor operation fails.
    pub fn negatives_for(&self, class: usize, limit: usize) -> Result<Option<Tensor>, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ClassQueueBank negatives_for: {e}"),
        };

        if class >= self.classes.len() {
            return Err(MobyError::LabelOutOfRange {
                label: class,
                num_classes: self.classes.len(),
            });
        }

        let take = limit.min(self.capacity);
        let parts = self
            .classes
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != class)
            .map(|(_, queue)| queue.queue2.narrow(1, 0, take))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?;
        if parts.is_empty() || take == 0 {
            return Ok(None);
        }

        let negatives = Tensor::cat(&parts, 1)
            .and_then(|t| t.contiguous())
            .map_err(map_err)?;
        Ok(Some(negatives.detach()))
    }

    /// Queue of one class.
    pub fn class(&self, class: usize) -> Option<&ClassQueue> {
        self.classes.get(class)
    }

    /// All class queues in label order.
    pub fn classes(&self) -> &[ClassQueue] {
        &self.classes
    }

    /// Write pointer of every class, in label order.
    pub fn ptrs(&self) -> Vec<usize> {
        self.classes.iter().map(|q| q.ptr).collect()
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Columns per class queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Embedding width.
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}
