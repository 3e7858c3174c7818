//! The MoBY model and its training step.
//!
//! ## Step protocol
//!
//! 1. **OnlineForward**: labels and batch size are checked against the
//!    queues, then both views go through encoder → projector → predictor
//!    → L2 normalize. A step rejected here changes nothing.
//! 2. **MomentumUpdate**: momentum rule with the current coefficient, then
//!    `k += 1`.
//! 3. **MomentumForward**: both views through the momentum branch, detached.
//! 4. **LossCompute**: cross-view pairwise loss against the global queues,
//!    plus either the query-only term (unlabeled) or the class-conditional
//!    term (labeled).
//! 5. **QueueUpdate**: per-class queues (labeled only) and global queues.
//!
//! The caller owns the optimizer and decides how to combine the returned
//! loss terms.

use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use moby_core::persist::{load_json, save_json};
use moby_core::tensor::labels_to_vec;
use moby_core::{MobyConfig, MobyError};
use moby_nn::Encoder;
use moby_queue::{QueueBank, QueueBankState};
use serde::{Deserialize, Serialize};

use crate::dual::DualEncoder;
use crate::loss::ContrastiveLoss;
use crate::schedule::MomentumSchedule;

/// Where a training step is, or where the last one stopped.
///
/// # Example
///
/// ```
/// use moby_learn::StepStage;
///
/// assert_eq!(StepStage::LossCompute.label(), "loss_compute");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    /// No step in progress; the last one completed.
    Idle,
    OnlineForward,
    MomentumUpdate,
    MomentumForward,
    LossCompute,
    QueueUpdate,
}

impl StepStage {
    /// Returns a short snake_case label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OnlineForward => "online_forward",
            Self::MomentumUpdate => "momentum_update",
            Self::MomentumForward => "momentum_forward",
            Self::LossCompute => "loss_compute",
            Self::QueueUpdate => "queue_update",
        }
    }
}

/// Everything one training step returns.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Cross-view pairwise loss against the global queues (scalar).
    pub unsupervised: Tensor,
    /// Class-conditional loss (scalar), labeled steps only.
    pub supervised: Option<Tensor>,
    /// Per-sample query-only loss `[N]`, unlabeled steps only.
    pub loss_q: Option<Tensor>,
    /// Online encoder features of view 2, `[N, C]`.
    pub features: Tensor,
    /// Classes with at least one sample; 0 on unlabeled steps.
    pub classes_present: usize,
}

/// Checkpointable model state: queues, pointers and the step counter.
///
/// Parameters are not included; they live in the model's `VarMap`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobyState {
    pub step: u64,
    pub total_steps: u64,
    pub queues: QueueBankState,
}

impl MobyState {
    /// Writes the state to `path` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if serialization or I/O fails.
    pub fn save(&self, path: &Path) -> Result<(), MobyError> {
        save_json(path, self)
    }

    /// Reads a state written by [`MobyState::save`].
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if I/O or deserialization fails.
    pub fn load(path: &Path) -> Result<Self, MobyError> {
        load_json(path)
    }
}

/// Momentum-contrastive learner with class-conditional queues.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_core::MobyConfig;
/// use moby_learn::Moby;
/// use moby_nn::{MlpEncoder, MlpEncoderConfig};
///
/// let device = Device::Cpu;
/// let config = MobyConfig {
///     dataset_size: 64,
///     batch_size: 4,
///     total_epochs: 2,
///     negative_capacity: 16,
///     class_capacity: 8,
///     hidden_dim: 32,
///     embed_dim: 8,
///     num_classes: 3,
///     ..MobyConfig::default()
/// };
/// let mut model = Moby::new(config, &device, |vb| {
///     MlpEncoder::new(&MlpEncoderConfig::default(), vb)
/// })
/// .unwrap();
///
/// let im_1 = Tensor::randn(0f32, 1f32, (4, 32), &device).unwrap();
/// let im_2 = Tensor::randn(0f32, 1f32, (4, 32), &device).unwrap();
/// let out = model.forward(&im_1, &im_2, None, true).unwrap();
/// assert_eq!(out.unsupervised.dims(), &[] as &[usize]);
/// assert_eq!(model.schedule().step(), 1);
/// ```
pub struct Moby<E> {
    config: MobyConfig,
    device: Device,
    dual: DualEncoder<E>,
    queues: QueueBank,
    schedule: MomentumSchedule,
    loss: ContrastiveLoss,
    stage: StepStage,
}

impl<E> std::fmt::Debug for Moby<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Moby(embed={}, classes={}, k={}/{}, stage={})",
            self.config.embed_dim,
            self.config.num_classes,
            self.schedule.step(),
            self.schedule.total_steps(),
            self.stage.label()
        )
    }
}

impl<E: Encoder> Moby<E> {
    /// Validates `config` and builds both branches, the queues and the
    /// schedule.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] for an invalid config, or any error
    /// from building the branches or queues.
    pub fn new<F>(config: MobyConfig, device: &Device, build_encoder: F) -> Result<Self, MobyError>
    where
        F: FnMut(VarBuilder) -> Result<E, MobyError>,
    {
        config.validate()?;
        let dual = DualEncoder::new(&config, device, build_encoder)?;
        let queues = QueueBank::from_config(&config, device)?;
        let schedule = MomentumSchedule::from_config(&config)?;
        let loss = ContrastiveLoss::new(config.temperature)?;

        tracing::info!(
            embed_dim = config.embed_dim,
            num_classes = config.num_classes,
            negative_capacity = config.negative_capacity,
            class_capacity = config.class_capacity,
            total_steps = schedule.total_steps(),
            start_step = schedule.step(),
            "MoBY model initialized"
        );

        Ok(Self {
            config,
            device: device.clone(),
            dual,
            queues,
            schedule,
            loss,
            stage: StepStage::Idle,
        })
    }

    /// Runs one training step on two views of a batch.
    ///
    /// `labels`, when given, is an integer tensor `[N]`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::LabelOutOfRange`], [`MobyError::ShapeMismatch`],
    /// [`MobyError::CapacityMismatch`] or [`MobyError::ClassOverflow`] before
    /// any parameter, BatchNorm statistic, queue or step counter changes,
    /// and [`MobyError::Internal`] for tensor failures. [`Moby::stage`]
    /// reports where the step stopped.
    pub fn forward(
        &mut self,
        im_1: &Tensor,
        im_2: &Tensor,
        labels: Option<&Tensor>,
        train: bool,
    ) -> Result<StepOutput, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("Moby forward: {e}"),
        };

        self.enter(StepStage::OnlineForward);
        let batch = im_1.dim(0).map_err(map_err)?;
        let batch_2 = im_2.dim(0).map_err(map_err)?;
        if batch_2 != batch {
            return Err(MobyError::shape("Moby view 2 batch", &[batch], &[batch_2]));
        }
        let labels = labels
            .map(|l| labels_to_vec(l, batch))
            .transpose()?;
        self.queues.validate(batch, labels.as_deref())?;

        let (pred_1, _) = self.dual.forward_online(im_1, train)?;
        let (pred_2, feat_2) = self.dual.forward_online(im_2, train)?;

        self.enter(StepStage::MomentumUpdate);
        let coeff = self.schedule.coefficient();
        self.dual.momentum_update(coeff)?;
        self.schedule.advance();

        self.enter(StepStage::MomentumForward);
        let proj_1_ng = self.dual.forward_momentum(im_1, train)?;
        let proj_2_ng = self.dual.forward_momentum(im_2, train)?;

        self.enter(StepStage::LossCompute);
        let negatives = self.queues.negatives();
        let unsupervised = (self.loss.pairwise(&pred_1, &proj_2_ng, &negatives.queue2())?
            + self.loss.pairwise(&pred_2, &proj_1_ng, &negatives.queue1())?)
        .map_err(map_err)?;
        let (supervised, loss_q, classes_present) = match &labels {
            Some(labels) => {
                let supervised = self.loss.class_conditional(
                    &pred_1,
                    &proj_2_ng,
                    labels,
                    self.queues.classes(),
                    self.config.class_negatives,
                )?;
                (Some(supervised.loss), None, supervised.classes_present)
            }
            None => (None, Some(self.loss.query_only(&pred_2)?), 0),
        };

        self.enter(StepStage::QueueUpdate);
        self.queues
            .enqueue(&proj_1_ng, &proj_2_ng, labels.as_deref())?;

        self.enter(StepStage::Idle);
        tracing::debug!(
            step = self.schedule.step(),
            coeff,
            batch,
            labeled = labels.is_some(),
            classes_present,
            queue_ptr = self.queues.negatives().ptr(),
            "training step complete"
        );

        Ok(StepOutput {
            unsupervised,
            supervised,
            loss_q,
            features: feat_2,
            classes_present,
        })
    }

    fn enter(&mut self, stage: StepStage) {
        tracing::trace!(stage = stage.label(), "step stage");
        self.stage = stage;
    }

    /// Copies queues, pointers and the step counter.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a device-to-host copy fails.
    pub fn snapshot(&self) -> Result<MobyState, MobyError> {
        Ok(MobyState {
            step: self.schedule.step(),
            total_steps: self.schedule.total_steps(),
            queues: self.queues.snapshot()?,
        })
    }

    /// Replaces queues, pointers and the step counter with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] if the snapshot was taken under a
    /// different schedule or queue layout, or any error from rebuilding
    /// the queues. The model is unchanged on error.
    pub fn restore(&mut self, state: &MobyState) -> Result<(), MobyError> {
        if state.total_steps != self.schedule.total_steps() {
            return Err(MobyError::Config {
                message: format!(
                    "snapshot schedule has {} steps, model has {}",
                    state.total_steps,
                    self.schedule.total_steps()
                ),
            });
        }

        let queues = QueueBank::restore(&state.queues, &self.device)?;
        let expected = [
            self.config.embed_dim,
            self.config.negative_capacity,
            self.config.num_classes,
            self.config.class_capacity,
        ];
        let actual = [
            queues.negatives().embed_dim(),
            queues.negatives().capacity(),
            queues.classes().num_classes(),
            queues.classes().capacity(),
        ];
        if expected != actual {
            return Err(MobyError::shape(
                "snapshot queue layout [embed_dim, capacity, classes, class_capacity]",
                &expected,
                &actual,
            ));
        }

        self.queues = queues;
        self.schedule.set_step(state.step);
        self.stage = StepStage::Idle;
        tracing::info!(step = state.step, "restored MoBY state");
        Ok(())
    }

    /// Variables to hand to the optimizer.
    pub fn online_vars(&self) -> &VarMap {
        self.dual.online_vars()
    }

    pub fn dual(&self) -> &DualEncoder<E> {
        &self.dual
    }

    pub fn queues(&self) -> &QueueBank {
        &self.queues
    }

    pub fn schedule(&self) -> &MomentumSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &MobyConfig {
        &self.config
    }

    /// Stage the last step stopped at.
    pub fn stage(&self) -> StepStage {
        self.stage
    }
}
