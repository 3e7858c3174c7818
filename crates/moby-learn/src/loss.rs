//! InfoNCE losses under the three pairing policies.
//!
//! Every policy builds logits whose column 0 is the positive and applies
//! cross-entropy against an all-zero target, so no one-hot labels are
//! materialized. Embeddings are used as given; nothing here re-normalizes.

use candle_core::{DType, Tensor};
use candle_nn::loss::cross_entropy;
use candle_nn::ops::log_softmax;
use moby_core::tensor::{dims2, group_by_class};
use moby_core::MobyError;
use moby_queue::ClassQueueBank;

/// Result of [`ContrastiveLoss::class_conditional`].
#[derive(Debug, Clone)]
pub struct ClassConditionalLoss {
    /// Mean over the classes present in the batch.
    pub loss: Tensor,
    /// Number of classes with at least one sample (the divisor).
    pub classes_present: usize,
}

/// Contrastive loss engine parameterized by its temperature.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use moby_learn::ContrastiveLoss;
///
/// let device = Device::Cpu;
/// let loss = ContrastiveLoss::new(0.2).unwrap();
/// let q = Tensor::new(&[[1.0f32, 0.0, 0.0]], &device).unwrap();
/// let queue = Tensor::new(&[[0.0f32], [1.0], [0.0]], &device).unwrap();
///
/// let l = loss.pairwise(&q, &q, &queue).unwrap().to_scalar::<f32>().unwrap();
/// assert!(l < 0.01);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastiveLoss {
    temperature: f64,
}

impl ContrastiveLoss {
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] unless `temperature` is finite and positive.
    pub fn new(temperature: f64) -> Result<Self, MobyError> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(MobyError::Config {
                message: format!("temperature {temperature} must be positive"),
            });
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Unlabeled loss for queries `q [N, D]`, positives `k [N, D]` and a
    /// negative set `queue [D, M]`. Mean over the batch.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] for inconsistent shapes and
    /// [`MobyError::Internal`] if a tensor operation fails.
    pub fn pairwise(&self, q: &Tensor, k: &Tensor, queue: &Tensor) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ContrastiveLoss pairwise: {e}"),
        };

        let (n, d) = dims2(q, "pairwise queries")?;
        if k.dims() != q.dims() {
            return Err(MobyError::shape("pairwise positives", q.dims(), k.dims()));
        }
        let (queue_d, m) = dims2(queue, "pairwise negatives")?;
        if queue_d != d {
            return Err(MobyError::shape("pairwise negatives", &[d, m], queue.dims()));
        }
        if n == 0 {
            return Err(MobyError::shape("pairwise queries", &[1, d], q.dims()));
        }

        let l_pos = (q * k)
            .and_then(|t| t.sum_keepdim(1))
            .map_err(map_err)?;
        let l_neg = q.matmul(&queue.detach()).map_err(map_err)?;
        self.logits_loss(&l_pos, &l_neg)
    }

    /// Cross-entropy over `[l_pos | l_neg] / temperature` with target 0.
    ///
    /// `l_pos` is `[N, 1]`, `l_neg` is `[N, M]`. Mean over the batch.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::ShapeMismatch`] if the row counts differ.
    pub fn logits_loss(&self, l_pos: &Tensor, l_neg: &Tensor) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ContrastiveLoss logits_loss: {e}"),
        };

        let (n, _) = dims2(l_pos, "positive logits")?;
        let (neg_n, m) = dims2(l_neg, "negative logits")?;
        if neg_n != n {
            return Err(MobyError::shape("negative logits", &[n, m], l_neg.dims()));
        }

        let logits = Tensor::cat(&[l_pos, l_neg], 1)
            .and_then(|t| t.affine(1.0 / self.temperature, 0.0))
            .map_err(map_err)?;
        let targets = Tensor::zeros(n, DType::U32, logits.device()).map_err(map_err)?;
        cross_entropy(&logits, &targets).map_err(map_err)
    }

    /// Query-only loss: the query itself is the logit row, target 0, no
    /// reduction. Returns `[N]`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Internal`] if a tensor operation fails.
    pub fn query_only(&self, q: &Tensor) -> Result<Tensor, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ContrastiveLoss query_only: {e}"),
        };

        dims2(q, "query-only logits")?;
        let logits = q.affine(1.0 / self.temperature, 0.0).map_err(map_err)?;
        log_softmax(&logits, 1)
            .and_then(|t| t.narrow(1, 0, 1))
            .and_then(|t| t.squeeze(1))
            .and_then(|t| t.neg())
            .map_err(map_err)
    }

    /// Label-aware loss.
    ///
    /// For each class present in `labels`, the queries are that class's
    /// rows of `pred`, the positives are the same rows of `keys`, and the
    /// negatives are `bank.negatives_for(class, negatives_per_class)`.
    /// The per-class pairwise losses are averaged over the classes present.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::NoLabeledSamples`] for an empty batch,
    /// [`MobyError::LabelOutOfRange`] for an unknown label and
    /// [`MobyError::Config`] if the bank has a single class.
    pub fn class_conditional(
        &self,
        pred: &Tensor,
        keys: &Tensor,
        labels: &[u32],
        bank: &ClassQueueBank,
        negatives_per_class: usize,
    ) -> Result<ClassConditionalLoss, MobyError> {
        let map_err = |e: candle_core::Error| MobyError::Internal {
            message: format!("ContrastiveLoss class_conditional: {e}"),
        };

        let (batch, _) = dims2(pred, "class-conditional queries")?;
        if labels.len() != batch {
            return Err(MobyError::shape(
                "class-conditional labels",
                &[batch],
                &[labels.len()],
            ));
        }

        let mut total: Option<Tensor> = None;
        let mut classes_present = 0;
        for (class, members) in group_by_class(labels, bank.num_classes())?
            .into_iter()
            .enumerate()
        {
            if members.is_empty() {
                continue;
            }
            let negatives = bank
                .negatives_for(class, negatives_per_class)?
                .ok_or_else(|| MobyError::Config {
                    message: "class-conditional loss needs at least two classes".to_string(),
                })?;

            let count = members.len();
            let index = Tensor::from_vec(members, count, pred.device()).map_err(map_err)?;
            let query = pred.index_select(&index, 0).map_err(map_err)?;
            let positives = keys.index_select(&index, 0).map_err(map_err)?;
            let term = self.pairwise(&query, &positives, &negatives)?;
            tracing::trace!(class, count, "class-conditional term");

            total = Some(match total {
                Some(acc) => (acc + term).map_err(map_err)?,
                None => term,
            });
            classes_present += 1;
        }

        let total = total.ok_or(MobyError::NoLabeledSamples)?;
        let loss = total
            .affine(1.0 / classes_present as f64, 0.0)
            .map_err(map_err)?;
        Ok(ClassConditionalLoss {
            loss,
            classes_present,
        })
    }
}
