//! Parameter update rules.
//!
//! Layers accumulate *negative* gradients (`truth - output` convention) into the
//! `updates` buffer of each [`Parameter`] during backward passes. An optimizer
//! step then folds weight decay into the accumulator, moves the values along it
//! and either decays (momentum SGD) or clears (Adam) the accumulator.
//!
//! # Available Optimizers
//!
//! - SGD: gradient descent with a momentum-decayed accumulator
//! - Adam: adaptive moment estimation with bias correction
//!
//! # Example
//!
//! ```ignore
//! use rust_neural_engine::optimizers::{OptimizerKind, Parameter, UpdateArgs};
//!
//! let mut weights = Parameter::zeros(4, OptimizerKind::Sgd);
//! weights.updates.fill(2.0);
//! weights.apply(&UpdateArgs::new(1, 0.1, 0.9, 0.0), true);
//! // values are now 0.2, updates 1.8
//! ```

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::SGD;

/// Which update rule the network uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerKind {
    Sgd,
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
}

impl OptimizerKind {
    /// Fresh optimizer state for a tensor of `len` values.
    pub fn instantiate(self, len: usize) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(SGD::new()),
            OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(beta1, beta2, epsilon, len)),
        }
    }
}

/// Hyperparameters of one update step.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateArgs {
    /// Samples per step that contributed to the accumulators.
    pub batch: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub decay: f32,
}

impl UpdateArgs {
    pub fn new(batch: usize, learning_rate: f32, momentum: f32, decay: f32) -> Self {
        Self {
            batch,
            learning_rate,
            momentum,
            decay,
        }
    }

    /// Copy of these arguments with the learning rate multiplied by `scale`.
    pub fn scaled(&self, scale: f32) -> Self {
        Self {
            learning_rate: self.learning_rate * scale,
            ..self.clone()
        }
    }
}

/// Core trait for update rules.
///
/// Implementations own whatever per-tensor state they need (moments, step
/// counters); one instance exists per trainable tensor.
pub trait Optimizer: Send {
    /// Apply one step to `values` using the accumulated `updates`.
    ///
    /// `decay` is false for tensors excluded from weight decay (biases, scales).
    fn update(&mut self, values: &mut [f32], updates: &mut [f32], args: &UpdateArgs, decay: bool);

    /// Clear any internal state.
    fn reset(&mut self);
}

/// Trainable tensor: values, accumulated updates and optimizer state.
pub struct Parameter {
    pub values: Vec<f32>,
    pub updates: Vec<f32>,
    optimizer: Box<dyn Optimizer>,
}

impl Parameter {
    pub fn zeros(len: usize, kind: OptimizerKind) -> Self {
        Self::filled(len, 0.0, kind)
    }

    pub fn filled(len: usize, value: f32, kind: OptimizerKind) -> Self {
        Self {
            values: vec![value; len],
            updates: vec![0.0; len],
            optimizer: kind.instantiate(len),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Run one optimizer step on this tensor.
    pub fn apply(&mut self, args: &UpdateArgs, decay: bool) {
        self.optimizer
            .update(&mut self.values, &mut self.updates, args, decay);
    }

    /// Zero the accumulator and reset the optimizer state.
    pub fn reset(&mut self) {
        self.updates.fill(0.0);
        self.optimizer.reset();
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sgd_momentum_scenario() {
        let mut p = Parameter::zeros(1, OptimizerKind::Sgd);
        p.updates[0] = 2.0;
        p.apply(&UpdateArgs::new(1, 0.1, 0.9, 0.0), true);
        assert_relative_eq!(p.values[0], 0.2);
        assert_relative_eq!(p.updates[0], 1.8);
    }

    #[test]
    fn test_scaled_args() {
        let args = UpdateArgs::new(4, 0.5, 0.9, 0.001).scaled(0.1);
        assert_relative_eq!(args.learning_rate, 0.05);
        assert_eq!(args.batch, 4);
    }

    #[test]
    fn test_reset_clears_accumulator() {
        let mut p = Parameter::filled(3, 1.0, OptimizerKind::Sgd);
        p.updates.fill(5.0);
        p.reset();
        assert!(p.updates.iter().all(|&u| u == 0.0));
        assert!(p.values.iter().all(|&v| v == 1.0));
    }
}
