//! Dense (fully connected) unit
//!
//! [`DenseLayer`] holds the parameters and normalization state of one fully
//! connected transform, `output = act(input · Wᵗ + b)` with `W` stored
//! `[outputs, inputs]`. It does not own activations: callers pass input, output
//! and delta slices for one time step, which lets the connected layer and the
//! recurrent composites share the same math. [`DenseUnit`] pairs a
//! `DenseLayer` with its own step-major buffers.

use crate::kernels::{
    add_bias, axpy, backward_bias, backward_scale, copy, fill, gemm, mean, mean_delta, normalize,
    normalize_delta, scal, scale_bias, variance, variance_delta,
};
use crate::layers::LayerBuffers;
use crate::optimizers::{OptimizerKind, Parameter, UpdateArgs};
use crate::utils::activations::{activate_array, gradient_array};
use crate::utils::{Activation, SimpleRng};
use crate::weights::{read_floats, read_or_skip, transpose_matrix, write_floats, LoadFlags};
use std::io::{self, Read, Write};

/// Batch-normalization state of a dense transform.
///
/// Batch statistics and the pre/post-normalization copies are kept per time
/// step so recurrent backward passes see the values of the matching forward step.
#[derive(Debug)]
pub struct NormState {
    pub scales: Parameter,
    pub rolling_mean: Vec<f32>,
    pub rolling_variance: Vec<f32>,
    mean: Vec<f32>,
    variance: Vec<f32>,
    x: Vec<f32>,
    x_norm: Vec<f32>,
    mean_delta: Vec<f32>,
    variance_delta: Vec<f32>,
}

impl NormState {
    fn new(outputs: usize, rows: usize, steps: usize, optimizer: OptimizerKind) -> Self {
        Self {
            scales: Parameter::filled(outputs, 1.0, optimizer),
            rolling_mean: vec![0.0; outputs],
            rolling_variance: vec![0.0; outputs],
            mean: vec![0.0; steps * outputs],
            variance: vec![0.0; steps * outputs],
            x: vec![0.0; steps * rows * outputs],
            x_norm: vec![0.0; steps * rows * outputs],
            mean_delta: vec![0.0; outputs],
            variance_delta: vec![0.0; outputs],
        }
    }
}

/// Parameters and math of one fully connected transform.
///
/// # Example
///
/// ```
/// use rust_neural_engine::layers::DenseLayer;
/// use rust_neural_engine::optimizers::OptimizerKind;
/// use rust_neural_engine::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(784, 512, 1, 1, Activation::Relu, false, OptimizerKind::Sgd, &mut rng);
/// assert_eq!(layer.parameter_count(), 784 * 512 + 512);
/// ```
#[derive(Debug)]
pub struct DenseLayer {
    inputs: usize,
    outputs: usize,
    /// Rows per time step.
    batch: usize,
    activation: Activation,
    pub weights: Parameter,
    pub biases: Parameter,
    pub norm: Option<NormState>,
}

impl DenseLayer {
    /// Weights are drawn uniformly from `±sqrt(2 / inputs)`, biases start at zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inputs: usize,
        outputs: usize,
        batch: usize,
        steps: usize,
        activation: Activation,
        batch_normalize: bool,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Self {
        let mut weights = Parameter::zeros(outputs * inputs, optimizer);
        let scale = (2.0 / inputs.max(1) as f32).sqrt();
        rng.fill_uniform(&mut weights.values, scale);

        Self {
            inputs,
            outputs,
            batch,
            activation,
            weights,
            biases: Parameter::zeros(outputs, optimizer),
            norm: batch_normalize.then(|| NormState::new(outputs, batch, steps, optimizer)),
        }
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn batch_normalize(&self) -> bool {
        self.norm.is_some()
    }

    pub fn parameter_count(&self) -> usize {
        let scales = self.norm.as_ref().map_or(0, |n| n.scales.len());
        self.weights.len() + self.biases.len() + scales
    }

    /// Forward one time step: `batch × inputs` in, `batch × outputs` out.
    pub fn forward(&mut self, step: usize, input: &[f32], output: &mut [f32], train: bool) {
        let (rows, n) = (self.batch, self.outputs);
        fill(output, 0.0);
        gemm(
            false,
            true,
            rows,
            n,
            self.inputs,
            1.0,
            input,
            self.inputs,
            &self.weights.values,
            self.inputs,
            1.0,
            output,
            n,
        );

        if let Some(norm) = self.norm.as_mut() {
            if train {
                let stats = step * n..(step + 1) * n;
                let values = step * rows * n..(step + 1) * rows * n;
                let mean_t = &mut norm.mean[stats.clone()];
                let variance_t = &mut norm.variance[stats];
                mean(output, rows, n, 1, mean_t);
                variance(output, mean_t, rows, n, 1, variance_t);

                scal(&mut norm.rolling_mean, 0.95);
                axpy(0.05, mean_t, &mut norm.rolling_mean);
                scal(&mut norm.rolling_variance, 0.95);
                axpy(0.05, variance_t, &mut norm.rolling_variance);

                copy(output, &mut norm.x[values.clone()]);
                normalize(output, mean_t, variance_t, rows, n, 1);
                copy(output, &mut norm.x_norm[values]);
            } else {
                normalize(
                    output,
                    &norm.rolling_mean,
                    &norm.rolling_variance,
                    rows,
                    n,
                    1,
                );
            }
            scale_bias(output, &norm.scales.values, rows, n, 1);
        }

        add_bias(output, &self.biases.values, rows, n, 1);
        activate_array(output, self.activation);
    }

    /// Backward one time step.
    ///
    /// `delta` is this step's output gradient and is rewritten in place while
    /// flowing through the activation and normalization. `prev_delta`, when
    /// present, receives `delta · W`.
    pub fn backward(
        &mut self,
        step: usize,
        input: &[f32],
        output: &[f32],
        delta: &mut [f32],
        prev_delta: Option<&mut [f32]>,
    ) {
        let (rows, n) = (self.batch, self.outputs);
        gradient_array(output, self.activation, delta);
        backward_bias(&mut self.biases.updates, delta, rows, n, 1);

        if let Some(norm) = self.norm.as_mut() {
            let stats = step * n..(step + 1) * n;
            let values = step * rows * n..(step + 1) * rows * n;
            let mean_t = &norm.mean[stats.clone()];
            let variance_t = &norm.variance[stats];
            let x_t = &norm.x[values.clone()];

            backward_scale(
                &norm.x_norm[values],
                delta,
                rows,
                n,
                1,
                &mut norm.scales.updates,
            );
            scale_bias(delta, &norm.scales.values, rows, n, 1);
            mean_delta(delta, variance_t, rows, n, 1, &mut norm.mean_delta);
            variance_delta(
                x_t,
                delta,
                mean_t,
                variance_t,
                rows,
                n,
                1,
                &mut norm.variance_delta,
            );
            normalize_delta(
                x_t,
                mean_t,
                variance_t,
                &norm.mean_delta,
                &norm.variance_delta,
                rows,
                n,
                1,
                delta,
            );
        }

        gemm(
            true,
            false,
            n,
            self.inputs,
            rows,
            1.0,
            delta,
            n,
            input,
            self.inputs,
            1.0,
            &mut self.weights.updates,
            self.inputs,
        );

        if let Some(prev_delta) = prev_delta {
            gemm(
                false,
                false,
                rows,
                self.inputs,
                n,
                1.0,
                delta,
                n,
                &self.weights.values,
                self.inputs,
                1.0,
                prev_delta,
                self.inputs,
            );
        }
    }

    /// Biases and scales are excluded from weight decay.
    pub fn update(&mut self, args: &UpdateArgs) {
        self.biases.apply(args, false);
        if let Some(norm) = self.norm.as_mut() {
            norm.scales.apply(args, false);
        }
        self.weights.apply(args, true);
    }

    /// Fold the rolling statistics and scales into `W` and `b`.
    ///
    /// Afterwards the normalization stage is an identity at inference time; it
    /// stays enabled so the weight file layout does not change.
    pub fn denormalize(&mut self) {
        let Some(norm) = self.norm.as_mut() else {
            return;
        };
        for i in 0..self.outputs {
            let scale = norm.scales.values[i] / (norm.rolling_variance[i] + 0.000001).sqrt();
            let row = &mut self.weights.values[i * self.inputs..(i + 1) * self.inputs];
            for w in row.iter_mut() {
                *w *= scale;
            }
            self.biases.values[i] -= norm.rolling_mean[i] * scale;
            norm.scales.values[i] = 1.0;
            norm.rolling_mean[i] = 0.0;
            norm.rolling_variance[i] = 1.0;
        }
    }

    /// Biases, then scales and rolling statistics when normalized, then weights.
    pub fn write_weights(&self, out: &mut dyn Write) -> io::Result<()> {
        write_floats(out, &self.biases.values)?;
        if let Some(norm) = &self.norm {
            write_floats(out, &norm.scales.values)?;
            write_floats(out, &norm.rolling_mean)?;
            write_floats(out, &norm.rolling_variance)?;
        }
        write_floats(out, &self.weights.values)
    }

    pub fn read_weights(&mut self, input: &mut dyn Read, flags: &LoadFlags) -> io::Result<()> {
        read_floats(input, &mut self.biases.values)?;
        if let Some(norm) = self.norm.as_mut() {
            read_or_skip(input, &mut norm.scales.values, flags.load_scales)?;
            read_or_skip(input, &mut norm.rolling_mean, flags.load_scales)?;
            read_or_skip(input, &mut norm.rolling_variance, flags.load_scales)?;
        }
        read_floats(input, &mut self.weights.values)?;
        if flags.transpose {
            transpose_matrix(&mut self.weights.values, self.inputs, self.outputs);
        }
        Ok(())
    }
}

/// A dense transform with its own step-major buffers, as used inside
/// recurrent composites.
#[derive(Debug)]
pub struct DenseUnit {
    pub dense: DenseLayer,
    pub buffers: LayerBuffers,
}

impl DenseUnit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inputs: usize,
        outputs: usize,
        batch: usize,
        steps: usize,
        activation: Activation,
        batch_normalize: bool,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Self {
        Self {
            dense: DenseLayer::new(
                inputs,
                outputs,
                batch,
                steps,
                activation,
                batch_normalize,
                optimizer,
                rng,
            ),
            buffers: LayerBuffers::new(steps, batch * outputs),
        }
    }

    pub fn forward(&mut self, step: usize, input: &[f32], train: bool) {
        let range = self.buffers.step_range(step);
        self.dense
            .forward(step, input, &mut self.buffers.output[range], train);
    }

    /// Backward step `step` with an upstream delta owned elsewhere.
    pub fn backward(&mut self, step: usize, input: &[f32], prev_delta: Option<&mut [f32]>) {
        let range = self.buffers.step_range(step);
        self.dense.backward(
            step,
            input,
            &self.buffers.output[range.clone()],
            &mut self.buffers.delta[range],
            prev_delta,
        );
    }

    /// Backward step `step` feeding the input gradient into this unit's own
    /// delta of step `step - 1` (none at step 0).
    pub fn backward_into_previous_step(&mut self, step: usize, input: &[f32]) {
        let range = self.buffers.step_range(step);
        let view = self.buffers.step_deltas_mut(step);
        self.dense.backward(
            step,
            input,
            &view.output[range],
            view.current,
            view.previous,
        );
    }

    pub fn output_step(&self, step: usize) -> &[f32] {
        self.buffers.output_step(step)
    }

    pub fn delta_step(&self, step: usize) -> &[f32] {
        self.buffers.delta_step(step)
    }

    pub fn delta_step_mut(&mut self, step: usize) -> &mut [f32] {
        self.buffers.delta_step_mut(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_layer() -> DenseLayer {
        let mut rng = SimpleRng::new(42);
        let mut layer = DenseLayer::new(
            4,
            3,
            1,
            1,
            Activation::Linear,
            false,
            OptimizerKind::Sgd,
            &mut rng,
        );
        layer.weights.values = vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ];
        layer
    }

    #[test]
    fn test_initialization_range() {
        let mut rng = SimpleRng::new(42);
        let layer = DenseLayer::new(
            50,
            10,
            1,
            1,
            Activation::Relu,
            false,
            OptimizerKind::Sgd,
            &mut rng,
        );
        let limit = (2.0f32 / 50.0).sqrt();
        assert!(layer.weights.values.iter().all(|w| w.abs() <= limit));
        assert!(layer.biases.values.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_identity_forward() {
        let mut layer = identity_layer();
        let mut output = vec![0.0; 3];
        layer.forward(0, &[1.0, 2.0, 3.0, 4.0], &mut output, false);
        assert_eq!(output, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_backward_accumulates_updates() {
        let mut layer = identity_layer();
        let input = [1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; 3];
        layer.forward(0, &input, &mut output, true);

        let mut delta = vec![1.0, 0.0, -1.0];
        let mut prev = vec![0.0; 4];
        layer.backward(0, &input, &output, &mut delta, Some(&mut prev));
        // prev = delta · W
        assert_eq!(prev, vec![1.0, 0.0, -1.0, 0.0]);
        assert_eq!(layer.biases.updates, vec![1.0, 0.0, -1.0]);
        // row 0 of the weight updates is delta[0] * input
        assert_eq!(&layer.weights.updates[..4], &input);
        assert_eq!(&layer.weights.updates[8..], &[-1.0, -2.0, -3.0, -4.0]);

        // a second backward adds on top
        let mut delta = vec![1.0, 0.0, 0.0];
        layer.backward(0, &input, &output, &mut delta, None);
        assert_eq!(layer.biases.updates[0], 2.0);
    }

    #[test]
    fn test_batch_norm_uses_batch_statistics_in_training() {
        let mut rng = SimpleRng::new(1);
        let mut layer = DenseLayer::new(
            1,
            1,
            2,
            1,
            Activation::Linear,
            true,
            OptimizerKind::Sgd,
            &mut rng,
        );
        layer.weights.values = vec![1.0];
        let mut output = vec![0.0; 2];
        layer.forward(0, &[1.0, 3.0], &mut output, true);
        // mean 2, unbiased variance 2
        let expected = 1.0 / (2.0f32.sqrt() + 0.000001);
        assert_relative_eq!(output[0], -expected, epsilon = 1e-5);
        assert_relative_eq!(output[1], expected, epsilon = 1e-5);

        let norm = layer.norm.as_ref().unwrap();
        assert_relative_eq!(norm.rolling_mean[0], 0.1);
        assert_relative_eq!(norm.rolling_variance[0], 0.1);
    }

    #[test]
    fn test_denormalize_preserves_inference_output() {
        let mut rng = SimpleRng::new(5);
        let mut layer = DenseLayer::new(
            3,
            2,
            1,
            1,
            Activation::Linear,
            true,
            OptimizerKind::Sgd,
            &mut rng,
        );
        {
            let norm = layer.norm.as_mut().unwrap();
            norm.scales.values = vec![2.0, 0.5];
            norm.rolling_mean = vec![0.3, -0.2];
            norm.rolling_variance = vec![4.0, 0.25];
        }
        layer.biases.values = vec![0.1, -0.1];
        let input = [0.5, -1.0, 2.0];
        let mut before = vec![0.0; 2];
        layer.forward(0, &input, &mut before, false);

        layer.denormalize();
        let mut after = vec![0.0; 2];
        layer.forward(0, &input, &mut after, false);
        for (a, b) in after.iter().zip(&before) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_weights_roundtrip_with_transpose() {
        let layer = identity_layer();
        let mut bytes = Vec::new();
        layer.write_weights(&mut bytes).unwrap();
        assert_eq!(bytes.len(), (3 + 12) * 4);

        let mut restored = identity_layer();
        restored.weights.values.fill(0.0);
        let flags = LoadFlags {
            transpose: true,
            ..LoadFlags::default()
        };
        restored.read_weights(&mut bytes.as_slice(), &flags).unwrap();
        // read as [inputs, outputs] and transposed back
        let mut expected = layer.weights.values.clone();
        transpose_matrix(&mut expected, 4, 3);
        assert_eq!(restored.weights.values, expected);
    }
}
