//! Run configuration for the MoBY learner.
//!
//! Everything the core consumes at construction time lives here: dataset
//! and schedule sizes for the momentum ramp, queue capacities, head depths
//! and the contrastive temperature. Configs load from JSON; any field left
//! out takes its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MobyError;
use crate::{DEFAULT_CLASS_NEGATIVES, DEFAULT_EMBED_DIM};

/// Construction-time configuration for a MoBY model.
///
/// # Example
///
/// ```
/// use moby_core::MobyConfig;
///
/// let config = MobyConfig::default();
/// assert_eq!(config.embed_dim, 128);
/// assert_eq!(config.negative_capacity, 4096);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobyConfig {
    /// Number of training images in one epoch.
    pub dataset_size: usize,

    /// Samples per training step (default: 256).
    pub batch_size: usize,

    /// Total training epochs, used to size the momentum ramp.
    pub total_epochs: usize,

    /// Epoch the run starts at; non-zero when resuming.
    pub start_epoch: usize,

    /// Momentum coefficient at step 0 (default: 0.99).
    pub base_momentum: f64,

    /// Softmax temperature for every contrastive loss (default: 0.2).
    pub temperature: f64,

    /// Columns in each global negative queue (default: 4096).
    pub negative_capacity: usize,

    /// Columns in each per-class queue (default: 128).
    pub class_capacity: usize,

    /// Columns taken from each other class when assembling negatives (default: 128).
    pub class_negatives: usize,

    /// Depth of the projection head (default: 2).
    pub proj_num_layers: usize,

    /// Depth of the prediction head (default: 2).
    pub pred_num_layers: usize,

    /// Hidden width of both heads (default: 4096).
    pub hidden_dim: usize,

    /// Embedding width produced by the projector (default: 128).
    pub embed_dim: usize,

    /// Number of label classes (default: 10).
    pub num_classes: usize,
}

impl Default for MobyConfig {
    fn default() -> Self {
        Self {
            dataset_size: 50_000,
            batch_size: 256,
            total_epochs: 300,
            start_epoch: 0,
            base_momentum: 0.99,
            temperature: 0.2,
            negative_capacity: 4096,
            class_capacity: 128,
            class_negatives: DEFAULT_CLASS_NEGATIVES,
            proj_num_layers: 2,
            pred_num_layers: 2,
            hidden_dim: 4096,
            embed_dim: DEFAULT_EMBED_DIM,
            num_classes: 10,
        }
    }
}

impl MobyConfig {
    /// Loads a config from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Storage`] if the file cannot be read or parsed,
    /// and [`MobyError::Config`] if the values are invalid.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use moby_core::MobyConfig;
    /// use std::path::Path;
    ///
    /// let config = MobyConfig::from_json_file(Path::new("moby.json")).unwrap();
    /// ```
    pub fn from_json_file(path: &Path) -> Result<Self, MobyError> {
        let config: Self = crate::persist::load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a config from a JSON string and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] on malformed JSON or invalid values.
    ///
    /// # Example
    ///
    /// ```
    /// use moby_core::MobyConfig;
    ///
    /// let config = MobyConfig::from_json_str(r#"{"num_classes": 3, "embed_dim": 8}"#).unwrap();
    /// assert_eq!(config.num_classes, 3);
    /// assert_eq!(config.temperature, 0.2);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, MobyError> {
        let config: Self = serde_json::from_str(json).map_err(|e| MobyError::Config {
            message: format!("parse: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the config can drive a training run.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), MobyError> {
        let fail = |message: String| Err(MobyError::Config { message });

        if self.batch_size == 0 {
            return fail("batch_size must be positive".to_string());
        }
        if self.total_steps() == 0 {
            return fail(format!(
                "momentum schedule is empty: dataset_size={} batch_size={} total_epochs={}",
                self.dataset_size, self.batch_size, self.total_epochs
            ));
        }
        if self.start_epoch > self.total_epochs {
            return fail(format!(
                "start_epoch {} exceeds total_epochs {}",
                self.start_epoch, self.total_epochs
            ));
        }
        if !(0.0..1.0).contains(&self.base_momentum) {
            return fail(format!("base_momentum {} not in [0, 1)", self.base_momentum));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return fail(format!("temperature {} must be positive", self.temperature));
        }
        if self.negative_capacity == 0 || self.class_capacity == 0 {
            return fail("queue capacities must be positive".to_string());
        }
        if self.negative_capacity % self.batch_size != 0 {
            return fail(format!(
                "negative_capacity {} is not divisible by batch_size {}",
                self.negative_capacity, self.batch_size
            ));
        }
        if self.class_negatives == 0 {
            return fail("class_negatives must be positive".to_string());
        }
        if self.embed_dim == 0 || self.hidden_dim == 0 {
            return fail("embed_dim and hidden_dim must be positive".to_string());
        }
        if self.num_classes < 2 {
            return fail(format!(
                "num_classes {} leaves no class to draw negatives from",
                self.num_classes
            ));
        }
        Ok(())
    }

    /// Steps in one epoch: `floor(dataset_size / batch_size)`.
    pub fn steps_per_epoch(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.dataset_size / self.batch_size
    }

    /// Total momentum steps `K` for the whole run.
    ///
    /// # Example
    ///
    /// ```
    /// use moby_core::MobyConfig;
    ///
    /// let config = MobyConfig { dataset_size: 1000, batch_size: 100, total_epochs: 5, ..MobyConfig::default() };
    /// assert_eq!(config.total_steps(), 50);
    /// ```
    pub fn total_steps(&self) -> usize {
        self.steps_per_epoch() * self.total_epochs
    }

    /// Step counter `k` the run starts at.
    pub fn start_step(&self) -> usize {
        self.steps_per_epoch() * self.start_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> MobyConfig {
        MobyConfig {
            dataset_size: 80,
            batch_size: 8,
            total_epochs: 4,
            negative_capacity: 32,
            class_capacity: 16,
            hidden_dim: 16,
            embed_dim: 8,
            num_classes: 3,
            ..MobyConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(MobyConfig::default().validate().is_ok());
    }

    #[test]
    fn schedule_sizes_floor_per_epoch() {
        let config = MobyConfig {
            dataset_size: 85,
            start_epoch: 2,
            ..small()
        };
        assert_eq!(config.steps_per_epoch(), 10);
        assert_eq!(config.total_steps(), 40);
        assert_eq!(config.start_step(), 20);
    }

    #[test]
    fn rejects_indivisible_negative_capacity() {
        let config = MobyConfig {
            negative_capacity: 30,
            ..small()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn rejects_non_positive_temperature() {
        for t in [0.0, -0.1, f64::NAN] {
            let config = MobyConfig {
                temperature: t,
                ..small()
            };
            assert!(config.validate().is_err(), "temperature {t} accepted");
        }
    }

    #[test]
    fn rejects_empty_schedule() {
        let config = MobyConfig {
            dataset_size: 4,
            ..small()
        };
        assert!(matches!(config.validate(), Err(MobyError::Config { .. })));
    }

    #[test]
    fn rejects_single_class() {
        let config = MobyConfig {
            num_classes: 1,
            ..small()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = MobyConfig::from_json_str(
            r#"{"dataset_size": 80, "batch_size": 8, "negative_capacity": 32, "num_classes": 3}"#,
        )
        .unwrap();
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.base_momentum, 0.99);
        assert_eq!(config.proj_num_layers, 2);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = MobyConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, MobyError::Config { .. }));
    }
}
