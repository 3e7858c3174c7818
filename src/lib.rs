//! # moby
//!
//! Momentum-contrastive self-supervised learning (MoBY) with
//! class-conditional memory queues, on candle.
//!
//! This crate re-exports the workspace:
//!
//! - [`moby_core`] — config, errors, tensor helpers, JSON persistence
//! - [`moby_nn`] — encoder contract, heads, multi-crop wrapper
//! - [`moby_queue`] — global and per-class queues
//! - [`moby_learn`] — dual encoder, schedule, losses, [`Moby`]
//!
//! ## Example
//!
//! ```
//! use candle_core::{Device, Tensor};
//! use moby::{MlpEncoder, MlpEncoderConfig, Moby, MobyConfig};
//!
//! let device = Device::Cpu;
//! let config = MobyConfig {
//!     dataset_size: 40,
//!     batch_size: 4,
//!     total_epochs: 1,
//!     negative_capacity: 8,
//!     class_capacity: 4,
//!     hidden_dim: 16,
//!     embed_dim: 8,
//!     num_classes: 2,
//!     ..MobyConfig::default()
//! };
//! let mut model = Moby::new(config, &device, |vb| {
//!     MlpEncoder::new(&MlpEncoderConfig::default(), vb)
//! })
//! .unwrap();
//!
//! let im_1 = Tensor::randn(0f32, 1f32, (4, 32), &device).unwrap();
//! let im_2 = Tensor::randn(0f32, 1f32, (4, 32), &device).unwrap();
//! let labels = Tensor::new(&[0u32, 1, 1, 0], &device).unwrap();
//! let out = model.forward(&im_1, &im_2, Some(&labels), true).unwrap();
//! assert_eq!(out.classes_present, 2);
//! ```

pub use moby_core;
pub use moby_learn;
pub use moby_nn;
pub use moby_queue;

pub use moby_core::{MobyConfig, MobyError};
pub use moby_learn::{
    default_device, ContrastiveLoss, DualEncoder, MomentumSchedule, Moby, MobyState, StepOutput,
    StepStage,
};
pub use moby_nn::{
    DinoHead, DinoHeadConfig, Encoder, Head, MlpEncoder, MlpEncoderConfig, MobyMlp,
    MultiCropWrapper,
};
pub use moby_queue::{ClassQueueBank, NegativeQueue, QueueBank};
