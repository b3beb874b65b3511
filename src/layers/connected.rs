//! Fully connected layer.

use crate::config::OptionSet;
use crate::error::Result;
use crate::layers::{
    BackwardContext, DenseLayer, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions,
    LayerShape,
};
use crate::optimizers::{OptimizerKind, UpdateArgs};
use crate::utils::{Activation, SimpleRng};
use crate::weights::LoadFlags;
use std::io::{self, Read, Write};

/// `output = act(input · Wᵗ + b)` over the whole batch, with optional batch
/// normalization before the bias.
#[derive(Debug)]
pub struct ConnectedLayer {
    shape: LayerShape,
    options: LayerOptions,
    pub dense: DenseLayer,
    buffers: LayerBuffers,
}

impl ConnectedLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        inputs: usize,
        outputs: usize,
        activation: Activation,
        batch_normalize: bool,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Self {
        Self {
            shape: LayerShape::flat(batch, inputs, outputs),
            options: LayerOptions::default(),
            dense: DenseLayer::new(
                inputs,
                outputs,
                batch,
                1,
                activation,
                batch_normalize,
                optimizer,
                rng,
            ),
            buffers: LayerBuffers::new(1, batch * outputs),
        }
    }

    /// Options: `output` (default 1), `activation` (default logistic),
    /// `batch_normalize`.
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let outputs = options.find_usize("output", 1)?;
        let activation = Activation::from_name(&options.find_str("activation", "logistic"));
        let batch_normalize = options.find_int_quiet("batch_normalize", 0)? != 0;
        Ok(Self::new(
            batch,
            inputs,
            outputs,
            activation,
            batch_normalize,
            optimizer,
            rng,
        ))
    }
}

impl Layer for ConnectedLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Connected
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
        self.dense
            .forward(0, ctx.input(), &mut self.buffers.output, ctx.train);
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let (input, prev_delta) = ctx.input_and_delta();
        self.dense.backward(
            0,
            input,
            &self.buffers.output,
            &mut self.buffers.delta,
            prev_delta,
        );
    }

    fn update(&mut self, args: &UpdateArgs) {
        self.dense.update(args);
    }

    fn parameter_count(&self) -> usize {
        self.dense.parameter_count()
    }

    fn write_weights(&self, out: &mut dyn Write) -> io::Result<()> {
        self.dense.write_weights(out)
    }

    fn read_weights(&mut self, input: &mut dyn Read, flags: &LoadFlags) -> io::Result<()> {
        self.dense.read_weights(input, flags)
    }

    fn denormalize(&mut self) {
        self.dense.denormalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_options() {
        let mut rng = SimpleRng::new(3);
        let mut options = OptionSet::new().with("output", 7);
        let layer =
            ConnectedLayer::from_options(&mut options, 2, 5, OptimizerKind::Sgd, &mut rng).unwrap();
        assert_eq!(layer.shape().outputs, 7);
        assert_eq!(layer.shape().in_c, 5);
        assert_eq!(layer.dense.activation(), Activation::Logistic);
        assert!(!layer.dense.batch_normalize());
        assert_eq!(layer.buffers().unwrap().len(), 14);
        assert_eq!(layer.parameter_count(), 35 + 7);
    }

    #[test]
    fn test_batch_normalize_adds_scales() {
        let mut rng = SimpleRng::new(3);
        let mut options = OptionSet::new()
            .with("output", 4)
            .with("batch_normalize", 1)
            .with("activation", "leaky");
        let layer =
            ConnectedLayer::from_options(&mut options, 1, 2, OptimizerKind::Sgd, &mut rng).unwrap();
        assert!(layer.dense.batch_normalize());
        assert_eq!(layer.parameter_count(), 8 + 4 + 4);
    }
}
