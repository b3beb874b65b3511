//! Standalone batch normalization layer
//!
//! Normalizes every channel over batch × spatial positions, then applies a
//! learned per-channel scale. Rolling statistics (`0.95 * old + 0.05 * batch`)
//! replace the batch statistics at inference.

use crate::kernels::{
    axpy, backward_scale, copy, mean, mean_delta, normalize, normalize_delta, scal, scale_bias,
    variance, variance_delta,
};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};
use crate::optimizers::{OptimizerKind, Parameter, UpdateArgs};
use crate::weights::{read_or_skip, write_floats, LoadFlags};
use std::io::{self, Read, Write};

/// Batch normalization over image-shaped input.
///
/// # Example
///
/// ```ignore
/// let mut layer = BatchNormLayer::new(8, 4, 4, 16, OptimizerKind::Sgd);
/// assert_eq!(layer.parameter_count(), 16);
/// ```
#[derive(Debug)]
pub struct BatchNormLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    pub scales: Parameter,
    pub rolling_mean: Vec<f32>,
    pub rolling_variance: Vec<f32>,
    mean: Vec<f32>,
    variance: Vec<f32>,
    mean_delta: Vec<f32>,
    variance_delta: Vec<f32>,
    x: Vec<f32>,
    x_norm: Vec<f32>,
}

impl BatchNormLayer {
    pub fn new(batch: usize, w: usize, h: usize, c: usize, optimizer: OptimizerKind) -> Self {
        let outputs = w * h * c;
        Self {
            shape: LayerShape::same(batch, w, h, c, outputs),
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * outputs),
            scales: Parameter::filled(c, 1.0, optimizer),
            rolling_mean: vec![0.0; c],
            rolling_variance: vec![0.0; c],
            mean: vec![0.0; c],
            variance: vec![0.0; c],
            mean_delta: vec![0.0; c],
            variance_delta: vec![0.0; c],
            x: vec![0.0; batch * outputs],
            x_norm: vec![0.0; batch * outputs],
        }
    }

    fn dims(&self) -> (usize, usize, usize) {
        let s = &self.shape;
        (s.batch, s.out_c, s.out_w * s.out_h)
    }
}

impl Layer for BatchNormLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::BatchNorm
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
        let (batch, c, spatial) = self.dims();
        let output = &mut self.buffers.output;
        copy(ctx.input(), output);

        if ctx.train {
            mean(output, batch, c, spatial, &mut self.mean);
            variance(output, &self.mean, batch, c, spatial, &mut self.variance);
            scal(&mut self.rolling_mean, 0.95);
            axpy(0.05, &self.mean, &mut self.rolling_mean);
            scal(&mut self.rolling_variance, 0.95);
            axpy(0.05, &self.variance, &mut self.rolling_variance);

            copy(output, &mut self.x);
            normalize(output, &self.mean, &self.variance, batch, c, spatial);
            copy(output, &mut self.x_norm);
        } else {
            normalize(
                output,
                &self.rolling_mean,
                &self.rolling_variance,
                batch,
                c,
                spatial,
            );
        }
        scale_bias(output, &self.scales.values, batch, c, spatial);
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let (batch, c, spatial) = self.dims();
        let delta = &mut self.buffers.delta;

        backward_scale(
            &self.x_norm,
            delta,
            batch,
            c,
            spatial,
            &mut self.scales.updates,
        );
        scale_bias(delta, &self.scales.values, batch, c, spatial);
        mean_delta(delta, &self.variance, batch, c, spatial, &mut self.mean_delta);
        variance_delta(
            &self.x,
            delta,
            &self.mean,
            &self.variance,
            batch,
            c,
            spatial,
            &mut self.variance_delta,
        );
        normalize_delta(
            &self.x,
            &self.mean,
            &self.variance,
            &self.mean_delta,
            &self.variance_delta,
            batch,
            c,
            spatial,
            delta,
        );

        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            axpy(1.0, delta, prev_delta);
        }
    }

    fn update(&mut self, args: &UpdateArgs) {
        self.scales.apply(args, false);
    }

    fn parameter_count(&self) -> usize {
        self.scales.len()
    }

    fn write_weights(&self, out: &mut dyn Write) -> io::Result<()> {
        write_floats(out, &self.scales.values)?;
        write_floats(out, &self.rolling_mean)?;
        write_floats(out, &self.rolling_variance)
    }

    fn read_weights(&mut self, input: &mut dyn Read, flags: &LoadFlags) -> io::Result<()> {
        read_or_skip(input, &mut self.scales.values, flags.load_scales)?;
        read_or_skip(input, &mut self.rolling_mean, flags.load_scales)?;
        read_or_skip(input, &mut self.rolling_variance, flags.load_scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::run_forward;
    use approx::assert_relative_eq;

    #[test]
    fn test_training_output_is_normalized_per_channel() {
        // 2 items, 2 channels, 2 positions
        let mut layer = BatchNormLayer::new(2, 2, 1, 2, OptimizerKind::Sgd);
        let input = [1.0, 3.0, 10.0, 10.0, 5.0, 7.0, 20.0, 40.0];
        run_forward(&mut layer, &input, true);

        let out = &layer.buffers.output;
        let channel0 = [out[0], out[1], out[4], out[5]];
        let sum: f32 = channel0.iter().sum();
        assert_relative_eq!(sum, 0.0, epsilon = 1e-5);
        assert_relative_eq!(layer.mean[0], 4.0);
        assert_relative_eq!(layer.mean[1], 20.0);
        assert_relative_eq!(layer.rolling_mean[1], 1.0);
    }

    #[test]
    fn test_inference_uses_rolling_statistics() {
        let mut layer = BatchNormLayer::new(1, 1, 1, 2, OptimizerKind::Sgd);
        layer.rolling_mean = vec![1.0, -1.0];
        layer.rolling_variance = vec![4.0, 1.0];
        layer.scales.values = vec![2.0, 1.0];
        run_forward(&mut layer, &[3.0, 0.0], false);
        assert_relative_eq!(layer.buffers.output[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(layer.buffers.output[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_constant_channel_stays_finite() {
        let mut layer = BatchNormLayer::new(2, 1, 1, 1, OptimizerKind::Sgd);
        run_forward(&mut layer, &[5.0, 5.0], true);
        assert!(layer.buffers.output.iter().all(|v| v.is_finite()));
        assert_eq!(layer.buffers.output, vec![0.0, 0.0]);
    }
}
