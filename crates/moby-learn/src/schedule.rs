//! Cosine momentum schedule.
//!
//! `coeff(k) = 1 - (1 - base) · (cos(π·k/K) + 1) / 2`
//!
//! The coefficient starts at `base` for `k = 0` and rises to 1 at `k = K`.
//! Past `K` it stays at 1.

use moby_core::{MobyConfig, MobyError};

/// Step counter and base value for the momentum coefficient.
///
/// # Example
///
/// ```
/// use moby_learn::MomentumSchedule;
///
/// let mut schedule = MomentumSchedule::new(0.99, 100, 0).unwrap();
/// assert!((schedule.coefficient() - 0.99).abs() < 1e-12);
///
/// let used = schedule.advance();
/// assert!((used - 0.99).abs() < 1e-12);
/// assert_eq!(schedule.step(), 1);
/// assert!((schedule.coefficient_at(100) - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumSchedule {
    base: f64,
    step: u64,
    total_steps: u64,
}

impl MomentumSchedule {
    /// Creates a schedule starting at `step` out of `total_steps`.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] if `total_steps == 0` or `base` is
    /// outside `[0, 1)`.
    pub fn new(base: f64, total_steps: u64, step: u64) -> Result<Self, MobyError> {
        if total_steps == 0 {
            return Err(MobyError::Config {
                message: "momentum schedule needs at least one step".to_string(),
            });
        }
        if !(0.0..1.0).contains(&base) {
            return Err(MobyError::Config {
                message: format!("base momentum {base} outside [0, 1)"),
            });
        }
        Ok(Self {
            base,
            step,
            total_steps,
        })
    }

    /// Derives `K` and the starting `k` from dataset size, batch size and epochs.
    ///
    /// # Errors
    ///
    /// Returns [`MobyError::Config`] if the config is invalid.
    pub fn from_config(config: &MobyConfig) -> Result<Self, MobyError> {
        config.validate()?;
        Self::new(
            config.base_momentum,
            config.total_steps() as u64,
            config.start_step() as u64,
        )
    }

    /// Coefficient for an arbitrary step.
    pub fn coefficient_at(&self, step: u64) -> f64 {
        let progress = (step.min(self.total_steps) as f64) / (self.total_steps as f64);
        1.0 - (1.0 - self.base) * ((std::f64::consts::PI * progress).cos() + 1.0) / 2.0
    }

    /// Coefficient for the current step.
    pub fn coefficient(&self) -> f64 {
        self.coefficient_at(self.step)
    }

    /// Returns the current coefficient and moves to the next step.
    pub fn advance(&mut self) -> f64 {
        let coeff = self.coefficient();
        self.step += 1;
        coeff
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Moves the counter, e.g. when restoring a checkpoint.
    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_base_and_ends_at_one() {
        let schedule = MomentumSchedule::new(0.99, 1000, 0).unwrap();
        assert!((schedule.coefficient_at(0) - 0.99).abs() < 1e-12);
        assert!((schedule.coefficient_at(500) - 0.995).abs() < 1e-12);
        assert!((schedule.coefficient_at(1000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn non_decreasing_over_the_run() {
        let schedule = MomentumSchedule::new(0.9, 257, 0).unwrap();
        let coeffs: Vec<f64> = (0..=300).map(|k| schedule.coefficient_at(k)).collect();
        assert!(coeffs.windows(2).all(|w| w[1] >= w[0]));
        assert!(coeffs.iter().all(|c| (0.9..=1.0).contains(c)));
    }

    #[test]
    fn advance_increments_by_one() {
        let mut schedule = MomentumSchedule::new(0.99, 10, 3).unwrap();
        let expected = schedule.coefficient_at(3);
        assert_eq!(schedule.advance(), expected);
        assert_eq!(schedule.step(), 4);
        assert_eq!(schedule.total_steps(), 10);
    }

    #[test]
    fn from_config_uses_start_epoch() {
        let config = MobyConfig {
            dataset_size: 1000,
            batch_size: 100,
            total_epochs: 20,
            start_epoch: 5,
            negative_capacity: 1000,
            ..MobyConfig::default()
        };
        let schedule = MomentumSchedule::from_config(&config).unwrap();
        assert_eq!(schedule.total_steps(), 200);
        assert_eq!(schedule.step(), 50);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(MomentumSchedule::new(0.99, 0, 0).is_err());
        assert!(MomentumSchedule::new(1.0, 10, 0).is_err());
        assert!(MomentumSchedule::new(-0.1, 10, 0).is_err());
    }
}
