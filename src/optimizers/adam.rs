//! Adam (Adaptive Moment Estimation) optimizer implementation
//!
//! Adam keeps per-value first and second moment estimates of the accumulated
//! updates and scales each step by their bias-corrected ratio.

use crate::kernels::axpy;
use crate::optimizers::{Optimizer, UpdateArgs};

/// Adam optimizer state for one tensor.
///
/// ```text
/// updates += -decay * batch * values      (weights only)
/// m = β1 * m + (1 - β1) * updates
/// v = β2 * v + (1 - β2) * updates²
/// values += rate * m̂ / (√v̂ + ε)
/// updates = 0
/// ```
///
/// Because updates hold negative gradients the step is an addition.
///
/// # Reference
///
/// Kingma, D. P., & Ba, J. (2014). Adam: A method for stochastic optimization.
/// arXiv preprint arXiv:1412.6980.
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// First moment estimates
    m: Vec<f32>,
    /// Second moment estimates
    v: Vec<f32>,
    /// Time step counter for bias correction
    t: usize,
}

impl Adam {
    /// Creates Adam state for a tensor of `len` values.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_neural_engine::optimizers::adam::Adam;
    ///
    /// let optimizer = Adam::new(0.9, 0.999, 1e-8, 16);
    /// assert_eq!(optimizer.step_count(), 0);
    /// ```
    pub fn new(beta1: f32, beta2: f32, epsilon: f32, len: usize) -> Self {
        Self {
            beta1,
            beta2,
            epsilon,
            m: vec![0.0; len],
            v: vec![0.0; len],
            t: 0,
        }
    }

    pub fn step_count(&self) -> usize {
        self.t
    }
}

impl Optimizer for Adam {
    fn update(&mut self, values: &mut [f32], updates: &mut [f32], args: &UpdateArgs, decay: bool) {
        assert_eq!(
            values.len(),
            updates.len(),
            "Values and updates must have the same length"
        );

        if self.m.len() != values.len() {
            self.m.resize(values.len(), 0.0);
            self.v.resize(values.len(), 0.0);
        }

        if decay && args.decay != 0.0 {
            let batch = args.batch.max(1) as f32;
            axpy(-args.decay * batch, values, updates);
        }

        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..values.len() {
            let u = updates[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * u;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * u * u;

            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;

            values[i] += args.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }

        updates.fill(0.0);
    }

    fn reset(&mut self) {
        self.m.fill(0.0);
        self.v.fill(0.0);
        self.t = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // With bias correction the first step is ±lr regardless of magnitude.
        let mut adam = Adam::new(0.9, 0.999, 1e-8, 2);
        let mut values = vec![0.0, 0.0];
        let mut updates = vec![3.0, -0.5];
        adam.update(&mut values, &mut updates, &UpdateArgs::new(1, 0.01, 0.0, 0.0), true);
        assert_relative_eq!(values[0], 0.01, epsilon = 1e-6);
        assert_relative_eq!(values[1], -0.01, epsilon = 1e-6);
        assert_eq!(updates, vec![0.0, 0.0]);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn test_reset_restarts_bias_correction() {
        let mut adam = Adam::new(0.9, 0.999, 1e-8, 1);
        let mut values = vec![0.0];
        let mut updates = vec![1.0];
        let args = UpdateArgs::new(1, 0.01, 0.0, 0.0);
        adam.update(&mut values, &mut updates, &args, true);
        adam.reset();
        assert_eq!(adam.step_count(), 0);
    }

    #[test]
    fn test_zero_updates_leave_values() {
        let mut adam = Adam::new(0.9, 0.999, 1e-8, 3);
        let mut values = vec![1.0, 2.0, 3.0];
        let mut updates = vec![0.0; 3];
        adam.update(&mut values, &mut updates, &UpdateArgs::new(1, 0.1, 0.0, 0.0), false);
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }
}
