use crate::config::OptionSet;
use crate::error::Result;
use crate::kernels::{axpy, copy};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};
use crate::utils::activations::{activate_array, gradient_array};
use crate::utils::Activation;

/// Applies an activation function elementwise, keeping the input geometry.
#[derive(Debug)]
pub struct ActivationLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(batch: usize, inputs: usize, activation: Activation) -> Self {
        Self {
            shape: LayerShape::flat(batch, inputs, inputs),
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * inputs),
            activation,
        }
    }

    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        w: usize,
        h: usize,
        c: usize,
    ) -> Result<Self> {
        let activation = Activation::from_name(&options.find_str("activation", "linear"));
        let mut layer = Self::new(batch, inputs, activation);
        layer.shape = LayerShape::same(batch, w, h, c, inputs);
        Ok(layer)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
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
        copy(ctx.input(), &mut self.buffers.output);
        activate_array(&mut self.buffers.output, self.activation);
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        gradient_array(
            &self.buffers.output,
            self.activation,
            &mut self.buffers.delta,
        );
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            axpy(1.0, &self.buffers.delta, prev_delta);
        }
    }
}
