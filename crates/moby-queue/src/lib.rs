//! # moby-queue
//!
//! Memory queues of past momentum-branch embeddings.
//!
//! ## Key Components
//!
//! - [`NegativeQueue`] — two `[embed_dim × capacity]` circular buffers (one
//!   per augmented view) sharing one write pointer; negatives for the
//!   unlabeled contrastive loss
//! - [`ClassQueueBank`] — one buffer pair and pointer per class label;
//!   partial writes wrap once around the end of the buffer
//! - [`QueueBank`] — both of the above, updated atomically per step
//! - [`QueueBankState`] — serde snapshot for checkpointing
//!
//! ## Invariants
//!
//! - Pointers are always in `[0, capacity)`.
//! - Columns are unit-norm embeddings (random unit vectors until first
//!   overwritten).
//! - A rejected write leaves every buffer and pointer unchanged.

mod bank;
mod class;
mod columns;
mod negative;
pub mod state;

pub use bank::QueueBank;
pub use class::{ClassQueue, ClassQueueBank};
pub use negative::NegativeQueue;
pub use state::{ClassQueueState, QueueBankState, TensorState};
