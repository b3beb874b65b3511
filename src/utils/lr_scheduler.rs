//! Learning rate policies.
//!
//! The effective learning rate is a function of the number of batches the network
//! has been trained on. A warm-up phase (`burn_in`) ramps the rate up polynomially
//! before the configured policy takes over.

use super::SimpleRng;

/// Decay strategy applied after the warm-up phase.
///
/// # Example
///
/// ```ignore
/// use rust_neural_engine::utils::lr_scheduler::{LearningRatePolicy, LearningRateSchedule};
///
/// let schedule = LearningRateSchedule {
///     base_rate: 0.1,
///     burn_in: 0,
///     power: 4.0,
///     policy: LearningRatePolicy::Step { step: 100, scale: 0.5 },
/// };
/// // 0.1 for batches 0-99, 0.05 for 100-199, ...
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum LearningRatePolicy {
    Constant,
    /// `rate * scale^(batch / step)` with integer division.
    Step { step: usize, scale: f32 },
    /// Piecewise schedule: once `batch` reaches `steps[i]` the rate is multiplied
    /// by `scales[i]`.
    Steps { steps: Vec<usize>, scales: Vec<f32> },
    /// `rate * gamma^batch`.
    Exp { gamma: f32 },
    /// `rate * (1 - batch / max_batches)^power`.
    Poly { max_batches: usize },
    /// `rate * uniform(0, 1)^power`.
    Random,
    /// `rate / (1 + exp(gamma * (batch - step)))`.
    Sigmoid { gamma: f32, step: usize },
}

impl LearningRatePolicy {
    /// Name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            LearningRatePolicy::Constant => "constant",
            LearningRatePolicy::Step { .. } => "step",
            LearningRatePolicy::Steps { .. } => "steps",
            LearningRatePolicy::Exp { .. } => "exp",
            LearningRatePolicy::Poly { .. } => "poly",
            LearningRatePolicy::Random => "random",
            LearningRatePolicy::Sigmoid { .. } => "sigmoid",
        }
    }
}

/// Base rate plus policy, evaluated per batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
    pub base_rate: f32,
    /// Number of warm-up batches.
    pub burn_in: usize,
    /// Exponent shared by the warm-up, `poly` and `random` policies.
    pub power: f32,
    pub policy: LearningRatePolicy,
}

impl LearningRateSchedule {
    pub fn constant(base_rate: f32) -> Self {
        Self {
            base_rate,
            burn_in: 0,
            power: 4.0,
            policy: LearningRatePolicy::Constant,
        }
    }

    /// Learning rate for the given batch number.
    ///
    /// Only the `random` policy draws from `rng`.
    pub fn rate(&self, batch_num: usize, rng: &mut SimpleRng) -> f32 {
        let lr = self.base_rate;
        if batch_num < self.burn_in {
            return lr * (batch_num as f32 / self.burn_in as f32).powf(self.power);
        }
        match &self.policy {
            LearningRatePolicy::Constant => lr,
            LearningRatePolicy::Step { step, scale } => {
                let exponent = batch_num / (*step).max(1);
                lr * scale.powi(exponent as i32)
            }
            LearningRatePolicy::Steps { steps, scales } => {
                let mut rate = lr;
                for (&boundary, &scale) in steps.iter().zip(scales) {
                    if boundary > batch_num {
                        return rate;
                    }
                    rate *= scale;
                }
                rate
            }
            LearningRatePolicy::Exp { gamma } => lr * gamma.powf(batch_num as f32),
            LearningRatePolicy::Poly { max_batches } => {
                let progress = batch_num as f32 / (*max_batches).max(1) as f32;
                lr * (1.0 - progress).max(0.0).powf(self.power)
            }
            LearningRatePolicy::Random => lr * rng.next_f32().powf(self.power),
            LearningRatePolicy::Sigmoid { gamma, step } => {
                lr / (1.0 + (gamma * (batch_num as f32 - *step as f32)).exp())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn schedule(policy: LearningRatePolicy) -> LearningRateSchedule {
        LearningRateSchedule {
            policy,
            ..LearningRateSchedule::constant(0.1)
        }
    }

    #[test]
    fn test_constant_rate() {
        let mut rng = SimpleRng::new(1);
        let s = LearningRateSchedule::constant(0.01);
        assert_eq!(s.rate(0, &mut rng), 0.01);
        assert_eq!(s.rate(10_000, &mut rng), 0.01);
    }

    #[test]
    fn test_step_decay() {
        let mut rng = SimpleRng::new(1);
        let s = schedule(LearningRatePolicy::Step {
            step: 3,
            scale: 0.5,
        });
        assert_relative_eq!(s.rate(2, &mut rng), 0.1);
        assert_relative_eq!(s.rate(3, &mut rng), 0.05);
        assert_relative_eq!(s.rate(7, &mut rng), 0.025);
    }

    #[test]
    fn test_steps_piecewise() {
        let mut rng = SimpleRng::new(1);
        let s = schedule(LearningRatePolicy::Steps {
            steps: vec![10, 20],
            scales: vec![0.1, 0.5],
        });
        assert_relative_eq!(s.rate(9, &mut rng), 0.1);
        assert_relative_eq!(s.rate(10, &mut rng), 0.01, epsilon = 1e-6);
        assert_relative_eq!(s.rate(25, &mut rng), 0.005, epsilon = 1e-6);
    }

    #[test]
    fn test_exp_decay() {
        let mut rng = SimpleRng::new(1);
        let s = schedule(LearningRatePolicy::Exp { gamma: 0.9 });
        assert_relative_eq!(s.rate(2, &mut rng), 0.081, epsilon = 1e-6);
    }

    #[test]
    fn test_poly_reaches_zero_at_max() {
        let mut rng = SimpleRng::new(1);
        let s = schedule(LearningRatePolicy::Poly { max_batches: 100 });
        assert_relative_eq!(s.rate(0, &mut rng), 0.1);
        assert_eq!(s.rate(100, &mut rng), 0.0);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let mut rng = SimpleRng::new(1);
        let s = schedule(LearningRatePolicy::Sigmoid {
            gamma: 1.0,
            step: 50,
        });
        assert_relative_eq!(s.rate(50, &mut rng), 0.05);
    }

    #[test]
    fn test_random_stays_below_base() {
        let mut rng = SimpleRng::new(3);
        let s = schedule(LearningRatePolicy::Random);
        for batch in 0..50 {
            let r = s.rate(batch, &mut rng);
            assert!((0.0..=0.1).contains(&r));
        }
    }

    #[test]
    fn test_burn_in_ramps_up() {
        let mut rng = SimpleRng::new(1);
        let s = LearningRateSchedule {
            burn_in: 10,
            power: 2.0,
            ..LearningRateSchedule::constant(0.1)
        };
        assert_eq!(s.rate(0, &mut rng), 0.0);
        assert_relative_eq!(s.rate(5, &mut rng), 0.025);
        assert_relative_eq!(s.rate(10, &mut rng), 0.1);
    }
}
