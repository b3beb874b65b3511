//! Shared utilities: random numbers, activation functions and learning-rate
//! policies.

pub mod activations;
pub mod lr_scheduler;
pub mod rng;

pub use activations::Activation;
pub use lr_scheduler::{LearningRatePolicy, LearningRateSchedule};
pub use rng::SimpleRng;
