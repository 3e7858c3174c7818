//! Error types shared by every MoBY crate.

use thiserror::Error;

/// Errors raised by the MoBY training core.
///
/// Empty classes are never an error: they are skipped silently by both the
/// loss engine and the class queues. Everything here aborts the step and is
/// handed back to the training-loop driver.
///
/// # Example
///
/// ```
/// use moby_core::MobyError;
///
/// let err = MobyError::CapacityMismatch { capacity: 4096, batch: 100 };
/// assert!(err.to_string().contains("4096"));
/// ```
#[derive(Debug, Error)]
pub enum MobyError {
    /// The global queue capacity is not a multiple of the incoming batch.
    #[error("queue capacity {capacity} is not divisible by batch size {batch}")]
    CapacityMismatch { capacity: usize, batch: usize },

    /// A class received more samples in one step than its queue can hold.
    #[error("class {class} received {count} samples but its queue holds {capacity}")]
    ClassOverflow {
        class: usize,
        count: usize,
        capacity: usize,
    },

    /// A label does not name a configured class.
    #[error("label {label} out of range (num_classes = {num_classes})")]
    LabelOutOfRange { label: usize, num_classes: usize },

    /// The class-conditional loss was asked for a batch with no class present.
    #[error("batch contains no labeled samples")]
    NoLabeledSamples,

    /// A tensor did not have the shape an operation requires.
    #[error("{context}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The configuration is unusable.
    #[error("invalid config: {message}")]
    Config { message: String },

    /// Snapshot persistence failed.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// A tensor backend operation failed.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl MobyError {
    /// Builds a [`MobyError::ShapeMismatch`] from anything shape-like.
    pub fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
