//! Cost layer: compares the previous layer's output against the truth.
//!
//! The layer output holds the per-element error, its delta the negative
//! gradient `truth - prediction` (or its sign for the L1-style costs), and
//! [`Layer::cost`] the summed error of the last forward pass.

use crate::config::OptionSet;
use crate::error::Result;
use crate::kernels::axpy;
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};
use log::warn;
use std::fmt;

/// Truth value marking an element to leave out of a masked cost.
pub const MASK_VALUE: f32 = -1234.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostType {
    /// Sum of squared errors.
    #[default]
    Sse,
    /// Squared error ignoring elements whose truth is [`MASK_VALUE`].
    Masked,
    /// Squared error near zero, absolute error beyond one.
    Smooth,
    L1,
}

impl CostType {
    /// Unknown names log a warning and fall back to `sse`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "sse" => CostType::Sse,
            "masked" => CostType::Masked,
            "smooth" => CostType::Smooth,
            "L1" | "l1" => CostType::L1,
            other => {
                warn!("unknown cost type '{other}', using sse");
                CostType::Sse
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CostType::Sse => "sse",
            CostType::Masked => "masked",
            CostType::Smooth => "smooth",
            CostType::L1 => "L1",
        }
    }

    /// Error and negative gradient for one element.
    fn evaluate(self, prediction: f32, truth: f32) -> (f32, f32) {
        let diff = truth - prediction;
        match self {
            CostType::Sse | CostType::Masked => (diff * diff, diff),
            CostType::Smooth => {
                if diff.abs() < 1.0 {
                    (diff * diff, diff)
                } else {
                    (2.0 * diff.abs() - 1.0, diff.signum())
                }
            }
            CostType::L1 => (diff.abs(), if diff > 0.0 { 1.0 } else { -1.0 }),
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub struct CostLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    cost_type: CostType,
    scale: f32,
    cost: Option<f32>,
}

impl CostLayer {
    pub fn new(batch: usize, inputs: usize, cost_type: CostType, scale: f32) -> Self {
        Self {
            shape: LayerShape::flat(batch, inputs, inputs),
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * inputs),
            cost_type,
            scale,
            cost: None,
        }
    }

    /// Options: `type` (sse) and `scale` (1). Label smoothing comes from the
    /// common `smooth` option.
    pub fn from_options(options: &mut OptionSet, batch: usize, inputs: usize) -> Result<Self> {
        let cost_type = CostType::from_name(&options.find_str("type", "sse"));
        let scale = options.find_float_quiet("scale", 1.0)?;
        Ok(Self::new(batch, inputs, cost_type, scale))
    }

    pub fn cost_type(&self) -> CostType {
        self.cost_type
    }
}

impl Layer for CostLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Cost
    }

    fn shape(&self) -> &LayerShape {
        &self.shape
    }

    fn options(&self) -> &LayerOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut LayerOptions {
        &mut self.options
    }

    fn buffers(&self) -> Option<&LayerBuffers> {
        Some(&self.buffers)
    }

    fn buffers_mut(&mut self) -> Option<&mut LayerBuffers> {
        Some(&mut self.buffers)
    }

    fn forward(&mut self, ctx: &mut ForwardContext<'_>) {
        let Some(truth) = ctx.truth() else {
            self.cost = None;
            return;
        };
        let input = ctx.input();
        let smooth = self.options.smooth;
        let uniform = smooth / self.shape.inputs as f32;

        for (((error, delta), &prediction), &raw_truth) in self
            .buffers
            .output
            .iter_mut()
            .zip(self.buffers.delta.iter_mut())
            .zip(input)
            .zip(truth)
        {
            if self.cost_type == CostType::Masked && raw_truth == MASK_VALUE {
                *error = 0.0;
                *delta = 0.0;
                continue;
            }
            let target = raw_truth * (1.0 - smooth) + uniform;
            (*error, *delta) = self.cost_type.evaluate(prediction, target);
        }
        self.cost = Some(self.buffers.output.iter().sum());
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            axpy(self.scale, &self.buffers.delta, prev_delta);
        }
    }

    fn cost(&self) -> Option<f32> {
        self.cost
    }
}
