//! Gated recurrent unit layer.
//!
//! Six linear dense units feed the gates of each step:
//!
//! ```text
//! z  = σ(input_z(x) + state_z(s))
//! r  = σ(input_r(x) + state_r(s))
//! h  = act(input_h(x) + state_h(r ⊙ s))
//! s' = z ⊙ s + (1 - z) ⊙ h
//! ```
//!
//! `act` is logistic unless the `tanh` option is set. The state carries over
//! between forward calls; the backward pass rebuilds `z`, `r` and `h` from the
//! stored unit outputs instead of keeping them per step.

use crate::config::OptionSet;
use crate::error::Result;
use crate::kernels::{axpy, copy, mul, mult_add_into, weighted_delta, weighted_sum};
use crate::layers::{
    BackwardContext, DenseUnit, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions,
    LayerShape,
};
use crate::optimizers::{OptimizerKind, UpdateArgs};
use crate::utils::activations::{activate_array, gradient_array};
use crate::utils::{Activation, SimpleRng};
use crate::weights::LoadFlags;
use std::io::{self, Read, Write};

#[derive(Debug)]
pub struct GruLayer {
    shape: LayerShape,
    options: LayerOptions,
    steps: usize,
    batch: usize,
    candidate_activation: Activation,
    pub input_z: DenseUnit,
    pub input_r: DenseUnit,
    pub input_h: DenseUnit,
    pub state_z: DenseUnit,
    pub state_r: DenseUnit,
    pub state_h: DenseUnit,
    buffers: LayerBuffers,
    state: Vec<f32>,
    /// State at the start of the last training forward.
    initial_state: Vec<f32>,
    z: Vec<f32>,
    r: Vec<f32>,
    h: Vec<f32>,
    forgot_state: Vec<f32>,
    forgot_delta: Vec<f32>,
}

impl GruLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        inputs: usize,
        outputs: usize,
        steps: usize,
        batch_normalize: bool,
        candidate_activation: Activation,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Self {
        let rows = batch / steps;
        let mut unit = |inputs| {
            DenseUnit::new(
                inputs,
                outputs,
                rows,
                steps,
                Activation::Linear,
                batch_normalize,
                optimizer,
                rng,
            )
        };
        let input_z = unit(inputs);
        let state_z = unit(outputs);
        let input_r = unit(inputs);
        let state_r = unit(outputs);
        let input_h = unit(inputs);
        let state_h = unit(outputs);
        let len = rows * outputs;

        Self {
            shape: LayerShape::flat(batch, inputs, outputs),
            options: LayerOptions::default(),
            steps,
            batch: rows,
            candidate_activation,
            input_z,
            input_r,
            input_h,
            state_z,
            state_r,
            state_h,
            buffers: LayerBuffers::new(steps, len),
            state: vec![0.0; len],
            initial_state: vec![0.0; len],
            z: vec![0.0; len],
            r: vec![0.0; len],
            h: vec![0.0; len],
            forgot_state: vec![0.0; len],
            forgot_delta: vec![0.0; len],
        }
    }

    /// Options: `output` (default 1), `batch_normalize`, `tanh`.
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        steps: usize,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let outputs = options.find_usize("output", 1)?;
        let batch_normalize = options.find_int_quiet("batch_normalize", 0)? != 0;
        let candidate_activation = if options.find_int_quiet("tanh", 0)? != 0 {
            Activation::Tanh
        } else {
            Activation::Logistic
        };
        Ok(Self::new(
            batch,
            inputs,
            outputs,
            steps,
            batch_normalize,
            candidate_activation,
            optimizer,
            rng,
        ))
    }

    pub fn state(&self) -> &[f32] {
        &self.state
    }

    fn units(&self) -> [&DenseUnit; 6] {
        [
            &self.input_z,
            &self.input_r,
            &self.input_h,
            &self.state_z,
            &self.state_r,
            &self.state_h,
        ]
    }

    fn units_mut(&mut self) -> [&mut DenseUnit; 6] {
        [
            &mut self.input_z,
            &mut self.input_r,
            &mut self.input_h,
            &mut self.state_z,
            &mut self.state_r,
            &mut self.state_h,
        ]
    }

    /// Gate values of step `t` from the stored unit outputs.
    fn compute_gates(&mut self, t: usize) {
        copy(self.input_z.output_step(t), &mut self.z);
        axpy(1.0, self.state_z.output_step(t), &mut self.z);
        activate_array(&mut self.z, Activation::Logistic);

        copy(self.input_r.output_step(t), &mut self.r);
        axpy(1.0, self.state_r.output_step(t), &mut self.r);
        activate_array(&mut self.r, Activation::Logistic);
    }

    fn compute_candidate(&mut self, t: usize) {
        copy(self.input_h.output_step(t), &mut self.h);
        axpy(1.0, self.state_h.output_step(t), &mut self.h);
        activate_array(&mut self.h, self.candidate_activation);
    }
}

impl Layer for GruLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Gru
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
        let train = ctx.train;
        let x_len = self.batch * self.shape.inputs;
        let input = ctx.input();

        for unit in self.units_mut() {
            unit.buffers.clear_delta();
        }
        if train {
            self.buffers.clear_delta();
            self.initial_state.copy_from_slice(&self.state);
        }

        for t in 0..self.steps {
            let x_t = &input[t * x_len..(t + 1) * x_len];
            self.state_z.forward(t, &self.state, train);
            self.state_r.forward(t, &self.state, train);
            self.input_z.forward(t, x_t, train);
            self.input_r.forward(t, x_t, train);
            self.input_h.forward(t, x_t, train);

            self.compute_gates(t);
            copy(&self.state, &mut self.forgot_state);
            mul(&self.r, &mut self.forgot_state);
            self.state_h.forward(t, &self.forgot_state, train);
            self.compute_candidate(t);

            let out_t = self.buffers.output_step_mut(t);
            weighted_sum(&self.state, Some(&self.h), &self.z, out_t);
            self.state.copy_from_slice(out_t);
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let x_len = self.batch * self.shape.inputs;
        let act = self.candidate_activation;
        let (input, mut net_delta) = ctx.input_and_delta();

        for t in (0..self.steps).rev() {
            self.compute_gates(t);
            self.compute_candidate(t);

            let step = self.buffers.step_range(t);
            let len = step.len();
            let view = self.buffers.step_deltas_mut(t);
            let prev_state = if t > 0 {
                &view.output[step.start - len..step.start]
            } else {
                self.initial_state.as_slice()
            };
            let mut prev_delta = view.previous;

            weighted_delta(
                prev_state,
                Some(&self.h),
                &self.z,
                prev_delta.as_deref_mut(),
                Some(self.input_h.delta_step_mut(t)),
                self.input_z.delta_step_mut(t),
                view.current,
            );

            gradient_array(&self.h, act, self.input_h.delta_step_mut(t));
            copy(self.input_h.delta_step(t), self.state_h.delta_step_mut(t));

            copy(prev_state, &mut self.forgot_state);
            mul(&self.r, &mut self.forgot_state);
            self.forgot_delta.fill(0.0);
            self.state_h
                .backward(t, &self.forgot_state, Some(&mut self.forgot_delta));

            if let Some(prev) = prev_delta.as_deref_mut() {
                mult_add_into(&self.forgot_delta, &self.r, prev);
            }

            mult_add_into(
                &self.forgot_delta,
                prev_state,
                self.input_r.delta_step_mut(t),
            );
            gradient_array(
                &self.r,
                Activation::Logistic,
                self.input_r.delta_step_mut(t),
            );
            copy(self.input_r.delta_step(t), self.state_r.delta_step_mut(t));

            gradient_array(
                &self.z,
                Activation::Logistic,
                self.input_z.delta_step_mut(t),
            );
            copy(self.input_z.delta_step(t), self.state_z.delta_step_mut(t));

            self.state_r
                .backward(t, prev_state, prev_delta.as_deref_mut());
            self.state_z
                .backward(t, prev_state, prev_delta.as_deref_mut());

            let x_t = &input[t * x_len..(t + 1) * x_len];
            for unit in [&mut self.input_h, &mut self.input_r, &mut self.input_z] {
                let prev = net_delta
                    .as_deref_mut()
                    .map(|d| &mut d[t * x_len..(t + 1) * x_len]);
                unit.backward(t, x_t, prev);
            }
        }
    }

    fn update(&mut self, args: &UpdateArgs) {
        for unit in self.units_mut() {
            unit.dense.update(args);
        }
    }

    fn parameter_count(&self) -> usize {
        self.units()
            .iter()
            .map(|u| u.dense.parameter_count())
            .sum()
    }

    fn write_weights(&self, out: &mut dyn Write) -> io::Result<()> {
        for unit in self.units() {
            unit.dense.write_weights(out)?;
        }
        Ok(())
    }

    fn read_weights(&mut self, input: &mut dyn Read, flags: &LoadFlags) -> io::Result<()> {
        for unit in self.units_mut() {
            unit.dense.read_weights(input, flags)?;
        }
        Ok(())
    }

    fn reset_state(&mut self) {
        self.state.fill(0.0);
        self.initial_state.fill(0.0);
    }

    fn denormalize(&mut self) {
        for unit in self.units_mut() {
            unit.dense.denormalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn layer() -> GruLayer {
        let mut rng = SimpleRng::new(21);
        GruLayer::new(
            2,
            3,
            2,
            2,
            false,
            Activation::Logistic,
            OptimizerKind::Sgd,
            &mut rng,
        )
    }

    #[test]
    fn test_shapes_and_parameters() {
        let gru = layer();
        assert_eq!(gru.shape().outputs, 2);
        assert_eq!(gru.buffers().unwrap().len(), 2 * 2);
        assert_eq!(gru.parameter_count(), 3 * (6 + 2) + 3 * (4 + 2));
    }

    #[test]
    fn test_tanh_option() {
        let mut rng = SimpleRng::new(1);
        let mut options = OptionSet::new().with("output", 4).with("tanh", 1);
        let gru =
            GruLayer::from_options(&mut options, 6, 3, 3, OptimizerKind::Sgd, &mut rng).unwrap();
        assert_eq!(gru.candidate_activation, Activation::Tanh);
        assert_eq!(gru.batch, 2);
    }

    #[test]
    fn test_weight_block_size() {
        let gru = layer();
        let mut bytes = Vec::new();
        gru.write_weights(&mut bytes).unwrap();
        assert_eq!(bytes.len(), gru.parameter_count() * 4);
    }

    #[test]
    fn test_gates_follow_unit_outputs() {
        let mut gru = layer();
        gru.input_z.buffers.output_step_mut(0).fill(0.0);
        gru.state_z.buffers.output_step_mut(0).fill(0.0);
        gru.input_r.buffers.output_step_mut(0).fill(1.0);
        gru.state_r.buffers.output_step_mut(0).fill(-1.0);
        gru.compute_gates(0);
        assert!(gru.z.iter().all(|&v| (v - 0.5).abs() < 1e-6));
        for &v in &gru.r {
            assert_relative_eq!(v, 0.5);
        }
    }
}
