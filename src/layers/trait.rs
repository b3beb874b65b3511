//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that every layer variant implements,
//! together with the descriptive types shared by all of them: the [`LayerKind`]
//! tag, the [`LayerShape`] produced by shape inference and the per-layer
//! [`LayerOptions`] overrides.

use crate::config::OptionSet;
use crate::error::Result;
use crate::layers::{BackwardContext, ForwardContext, LayerBuffers};
use crate::optimizers::UpdateArgs;
use crate::weights::LoadFlags;
use std::fmt;
use std::io::{self, Read, Write};

/// Identity tag of a layer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Connected,
    Rnn,
    Gru,
    BatchNorm,
    Normalization,
    Softmax,
    MaxPool,
    AvgPool,
    Dropout,
    Activation,
    Cost,
    Route,
    Shortcut,
}

impl LayerKind {
    /// Parse a section name, accepting the short aliases of the classic format.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_neural_engine::layers::LayerKind;
    ///
    /// assert_eq!(LayerKind::from_name("conn"), Some(LayerKind::Connected));
    /// assert_eq!(LayerKind::from_name("[lrn]"), Some(LayerKind::Normalization));
    /// assert_eq!(LayerKind::from_name("convolutional"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('[').trim_end_matches(']');
        let kind = match name {
            "connected" | "conn" => LayerKind::Connected,
            "rnn" => LayerKind::Rnn,
            "gru" => LayerKind::Gru,
            "batchnorm" => LayerKind::BatchNorm,
            "normalization" | "lrn" => LayerKind::Normalization,
            "softmax" | "soft" => LayerKind::Softmax,
            "maxpool" | "max" => LayerKind::MaxPool,
            "avgpool" | "avg" => LayerKind::AvgPool,
            "dropout" => LayerKind::Dropout,
            "activation" => LayerKind::Activation,
            "cost" => LayerKind::Cost,
            "route" => LayerKind::Route,
            "shortcut" => LayerKind::Shortcut,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Connected => "connected",
            LayerKind::Rnn => "rnn",
            LayerKind::Gru => "gru",
            LayerKind::BatchNorm => "batchnorm",
            LayerKind::Normalization => "normalization",
            LayerKind::Softmax => "softmax",
            LayerKind::MaxPool => "maxpool",
            LayerKind::AvgPool => "avgpool",
            LayerKind::Dropout => "dropout",
            LayerKind::Activation => "activation",
            LayerKind::Cost => "cost",
            LayerKind::Route => "route",
            LayerKind::Shortcut => "shortcut",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input and output geometry of a layer.
///
/// `inputs`/`outputs` are per-sample value counts. The spatial fields are zero
/// when the layer does not produce (or consume) an image, e.g. after a route
/// over mismatched spatial sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerShape {
    /// Rows processed per forward pass.
    pub batch: usize,
    pub in_w: usize,
    pub in_h: usize,
    pub in_c: usize,
    pub inputs: usize,
    pub out_w: usize,
    pub out_h: usize,
    pub out_c: usize,
    pub outputs: usize,
}

impl LayerShape {
    /// Flat shape: `1 × 1 × inputs` in, `1 × 1 × outputs` out.
    pub fn flat(batch: usize, inputs: usize, outputs: usize) -> Self {
        Self {
            batch,
            in_w: 1,
            in_h: 1,
            in_c: inputs,
            inputs,
            out_w: 1,
            out_h: 1,
            out_c: outputs,
            outputs,
        }
    }

    /// Shape that keeps the image geometry of its input unchanged.
    pub fn same(batch: usize, w: usize, h: usize, c: usize, inputs: usize) -> Self {
        Self {
            batch,
            in_w: w,
            in_h: h,
            in_c: c,
            inputs,
            out_w: w,
            out_h: h,
            out_c: c,
            outputs: inputs,
        }
    }

    pub fn has_image_output(&self) -> bool {
        self.out_w > 0 && self.out_h > 0 && self.out_c > 0
    }
}

/// Per-layer overrides read from every section after the layer itself.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerOptions {
    /// Multiplier applied to the network learning rate for this layer.
    pub learning_rate_scale: f32,
    pub dontload: bool,
    pub dontloadscales: bool,
    /// Backward propagation stops before this layer.
    pub stopbackward: bool,
    /// Layer is skipped during backward propagation.
    pub onlyforward: bool,
    /// Overrides the truth size when this is the last layer (0 = unset).
    pub truth: usize,
    /// Label smoothing used by cost layers.
    pub smooth: f32,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            learning_rate_scale: 1.0,
            dontload: false,
            dontloadscales: false,
            stopbackward: false,
            onlyforward: false,
            truth: 0,
            smooth: 0.0,
        }
    }
}

impl LayerOptions {
    /// Read the common keys quietly from a section.
    pub fn from_options(options: &mut OptionSet) -> Result<Self> {
        Ok(Self {
            truth: options.find_usize_quiet("truth", 0)?,
            onlyforward: options.find_int_quiet("onlyforward", 0)? != 0,
            stopbackward: options.find_int_quiet("stopbackward", 0)? != 0,
            dontload: options.find_int_quiet("dontload", 0)? != 0,
            dontloadscales: options.find_int_quiet("dontloadscales", 0)? != 0,
            learning_rate_scale: options.find_float_quiet("learning_rate", 1.0)?,
            smooth: options.find_float_quiet("smooth", 0.0)?,
        })
    }
}

/// Core trait for neural network layers.
///
/// A layer reads its input through the [`ForwardContext`] cursor, writes the
/// buffers it owns and, during backward propagation, accumulates parameter
/// updates and adds its input gradient into the upstream delta exposed by the
/// [`BackwardContext`].
///
/// Layers are stored as `Box<dyn Layer>` inside a network; the trait is
/// object safe and `Send` so whole networks can move between threads.
///
/// # Example
///
/// ```ignore
/// let (previous, rest) = layers.split_at_mut(i);
/// let mut ctx = ForwardContext::new(i, &input, previous, &mut workspace, None, &mut rng, true);
/// rest[0].forward(&mut ctx);
/// ```
pub trait Layer: Send {
    fn kind(&self) -> LayerKind;

    fn shape(&self) -> &LayerShape;

    fn options(&self) -> &LayerOptions;

    fn options_mut(&mut self) -> &mut LayerOptions;

    /// Output and delta buffers owned by this layer.
    ///
    /// `None` for in-place layers, which report their owner via [`Layer::alias_of`].
    fn buffers(&self) -> Option<&LayerBuffers>;

    fn buffers_mut(&mut self) -> Option<&mut LayerBuffers>;

    /// Index of the layer whose buffers this layer operates on in place.
    fn alias_of(&self) -> Option<usize> {
        None
    }

    /// Scratch floats this layer needs from the shared workspace.
    fn workspace_size(&self) -> usize {
        0
    }

    /// Forward propagation through the layer.
    ///
    /// Reads the input cursor and writes the owned output. Must not depend on
    /// anything but the input, the parameters and (in training) the RNG.
    fn forward(&mut self, ctx: &mut ForwardContext<'_>);

    /// Backward propagation through the layer.
    ///
    /// Reads the owned delta, accumulates parameter updates (never overwrites
    /// them) and adds the input gradient into the upstream delta when one exists.
    fn backward(&mut self, ctx: &mut BackwardContext<'_>);

    /// One optimizer step over the accumulated updates.
    fn update(&mut self, _args: &UpdateArgs) {}

    /// Total count of trainable values.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Scalar cost computed by the last forward pass, for cost layers.
    fn cost(&self) -> Option<f32> {
        None
    }

    /// Serialize the trainable tensors in their fixed field order.
    fn write_weights(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    /// Restore the tensors written by [`Layer::write_weights`]. The whole block
    /// is always read; `flags` decide transposition and whether normalization
    /// fields are kept.
    fn read_weights(&mut self, _input: &mut dyn Read, _flags: &LoadFlags) -> io::Result<()> {
        Ok(())
    }

    /// Clear carried recurrent state.
    fn reset_state(&mut self) {}

    /// Fold normalization statistics into the weights.
    fn denormalize(&mut self) {}
}
