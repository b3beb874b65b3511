//! Stochastic gradient descent with momentum.
//!
//! The accumulator doubles as the momentum buffer: after each step it is scaled
//! by `momentum` instead of being cleared, so the next backward pass adds fresh
//! gradients on top of the decayed history.

use crate::kernels::{axpy, scal};
use crate::optimizers::{Optimizer, UpdateArgs};

/// Momentum SGD.
///
/// One step applies, in order:
///
/// ```text
/// updates += -decay * batch * values      (weights only)
/// values  += (learning_rate / batch) * updates
/// updates *= momentum
/// ```
///
/// # Example
///
/// ```
/// use rust_neural_engine::optimizers::{Optimizer, UpdateArgs, SGD};
///
/// let mut optimizer = SGD::new();
/// let mut values = vec![0.0];
/// let mut updates = vec![2.0];
/// optimizer.update(&mut values, &mut updates, &UpdateArgs::new(1, 0.1, 0.9, 0.0), true);
/// assert!((values[0] - 0.2).abs() < 1e-6);
/// assert!((updates[0] - 1.8).abs() < 1e-6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SGD;

impl SGD {
    pub fn new() -> Self {
        SGD
    }
}

impl Optimizer for SGD {
    fn update(&mut self, values: &mut [f32], updates: &mut [f32], args: &UpdateArgs, decay: bool) {
        assert_eq!(
            values.len(),
            updates.len(),
            "Values and updates must have the same length"
        );
        let batch = args.batch.max(1) as f32;

        if decay && args.decay != 0.0 {
            axpy(-args.decay * batch, values, updates);
        }
        axpy(args.learning_rate / batch, updates, values);
        scal(updates, args.momentum);
    }

    fn reset(&mut self) {}
}
