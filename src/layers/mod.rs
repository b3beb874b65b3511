//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, the buffer and context plumbing shared
//! by every layer, and the layer variants a network can be built from.

mod r#trait;
pub mod activation;
pub mod batchnorm;
pub mod buffers;
pub mod connected;
pub mod context;
pub mod cost;
pub mod dense;
pub mod dropout;
pub mod gru;
pub mod normalization;
pub mod pooling;
pub mod rnn;
pub mod route;
pub mod shortcut;
pub mod softmax;

// Re-export the Layer trait for convenience
pub use r#trait::{Layer, LayerKind, LayerOptions, LayerShape};

pub use activation::ActivationLayer;
pub use batchnorm::BatchNormLayer;
pub use buffers::{LayerBuffers, StepDeltas};
pub(crate) use context::resolve_owner;
pub use context::{BackwardContext, ForwardContext};
pub use connected::ConnectedLayer;
pub use cost::{CostLayer, CostType};
pub use dense::{DenseLayer, DenseUnit, NormState};
pub use dropout::DropoutLayer;
pub use gru::GruLayer;
pub use normalization::NormalizationLayer;
pub use pooling::{AvgPoolLayer, MaxPoolLayer};
pub use rnn::RnnLayer;
pub use route::RouteLayer;
pub use shortcut::ShortcutLayer;
pub use softmax::SoftmaxLayer;
