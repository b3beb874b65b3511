//! Vanilla recurrent layer unrolled over the network's time steps.
//!
//! Three dense units share their weights across steps:
//!
//! ```text
//! state[t+1] = (shortcut ? state[t] : 0) + input_unit(x[t]) + self_unit(state[t])
//! y[t]       = output_unit(state[t+1])
//! ```
//!
//! The hidden-state arena holds `steps + 1` slots. In training every slot is
//! kept for the backward pass and slot 0 starts at zero; at inference only
//! slot 0 is used and it carries the state from one forward call to the next.

use crate::config::OptionSet;
use crate::error::Result;
use crate::kernels::{axpy, copy};
use crate::layers::{
    BackwardContext, DenseUnit, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions,
    LayerShape,
};
use crate::optimizers::{OptimizerKind, UpdateArgs};
use crate::utils::{Activation, SimpleRng};
use crate::weights::LoadFlags;
use std::io::{self, Read, Write};

#[derive(Debug)]
pub struct RnnLayer {
    shape: LayerShape,
    options: LayerOptions,
    steps: usize,
    /// Rows per step.
    batch: usize,
    hidden: usize,
    shortcut: bool,
    pub input_unit: DenseUnit,
    pub self_unit: DenseUnit,
    pub output_unit: DenseUnit,
    state: Vec<f32>,
}

impl RnnLayer {
    /// `batch` is the total row count, `steps * rows_per_step`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        inputs: usize,
        hidden: usize,
        outputs: usize,
        steps: usize,
        activation: Activation,
        self_activation: Activation,
        batch_normalize: bool,
        shortcut: bool,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Self {
        let rows = batch / steps;
        let unit = |inputs, outputs, activation, rng: &mut SimpleRng| {
            DenseUnit::new(
                inputs,
                outputs,
                rows,
                steps,
                activation,
                batch_normalize,
                optimizer,
                rng,
            )
        };
        let input_unit = unit(inputs, hidden, activation, rng);
        let self_unit = unit(hidden, hidden, self_activation, rng);
        let output_unit = unit(hidden, outputs, activation, rng);

        Self {
            shape: LayerShape::flat(batch, inputs, outputs),
            options: LayerOptions::default(),
            steps,
            batch: rows,
            hidden,
            shortcut,
            input_unit,
            self_unit,
            output_unit,
            state: vec![0.0; (steps + 1) * rows * hidden],
        }
    }

    /// Options: `output`, `hidden` (default 1), `activation` (default
    /// logistic), `batch_normalize`, `logistic` (1 forces a logistic self
    /// unit, 2 a loggy one) and `shortcut`.
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        steps: usize,
        optimizer: OptimizerKind,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let outputs = options.find_usize("output", 1)?;
        let hidden = options.find_usize("hidden", 1)?;
        let activation = Activation::from_name(&options.find_str("activation", "logistic"));
        let batch_normalize = options.find_int_quiet("batch_normalize", 0)? != 0;
        let self_activation = match options.find_int_quiet("logistic", 0)? {
            1 => Activation::Logistic,
            2 => Activation::Loggy,
            _ => activation,
        };
        let shortcut = options.find_int_quiet("shortcut", 0)? != 0;
        Ok(Self::new(
            batch,
            inputs,
            hidden,
            outputs,
            steps,
            activation,
            self_activation,
            batch_normalize,
            shortcut,
            optimizer,
            rng,
        ))
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Hidden state slot `slot` (`0..=steps`).
    pub fn state(&self, slot: usize) -> &[f32] {
        let len = self.batch * self.hidden;
        &self.state[slot * len..(slot + 1) * len]
    }
}

impl Layer for RnnLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Rnn
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
        Some(&self.output_unit.buffers)
    }

    fn buffers_mut(&mut self) -> Option<&mut LayerBuffers> {
        Some(&mut self.output_unit.buffers)
    }

    fn forward(&mut self, ctx: &mut ForwardContext<'_>) {
        let train = ctx.train;
        let len = self.batch * self.hidden;
        let x_len = self.batch * self.shape.inputs;
        let input = ctx.input();

        if train {
            self.input_unit.buffers.clear_delta();
            self.self_unit.buffers.clear_delta();
            self.output_unit.buffers.clear_delta();
            self.state[..len].fill(0.0);
        }

        for t in 0..self.steps {
            let x_t = &input[t * x_len..(t + 1) * x_len];
            self.input_unit.forward(t, x_t, train);

            let (read, write) = if train { (t, t + 1) } else { (0, 0) };
            self.self_unit
                .forward(t, &self.state[read * len..(read + 1) * len], train);

            let (head, tail) = self.state.split_at_mut(write * len);
            let new_state = &mut tail[..len];
            if read != write {
                if self.shortcut {
                    copy(&head[read * len..(read + 1) * len], new_state);
                } else {
                    new_state.fill(0.0);
                }
            } else if !self.shortcut {
                new_state.fill(0.0);
            }
            axpy(1.0, self.input_unit.output_step(t), new_state);
            axpy(1.0, self.self_unit.output_step(t), new_state);

            self.output_unit
                .forward(t, &self.state[write * len..(write + 1) * len], train);
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let len = self.batch * self.hidden;
        let x_len = self.batch * self.shape.inputs;
        let (input, mut net_delta) = ctx.input_and_delta();

        for t in (0..self.steps).rev() {
            let state_t = &self.state[t * len..(t + 1) * len];
            let state_next = &self.state[(t + 1) * len..(t + 2) * len];

            self.output_unit
                .backward(t, state_next, Some(self.self_unit.delta_step_mut(t)));

            copy(
                self.self_unit.delta_step(t),
                self.input_unit.delta_step_mut(t),
            );
            self.self_unit.backward_into_previous_step(t, state_t);

            if t > 0 && self.shortcut {
                axpy(
                    1.0,
                    self.input_unit.delta_step(t),
                    self.self_unit.delta_step_mut(t - 1),
                );
            }

            let x_t = &input[t * x_len..(t + 1) * x_len];
            let prev = net_delta
                .as_deref_mut()
                .map(|d| &mut d[t * x_len..(t + 1) * x_len]);
            self.input_unit.backward(t, x_t, prev);
        }
    }

    fn update(&mut self, args: &UpdateArgs) {
        self.input_unit.dense.update(args);
        self.self_unit.dense.update(args);
        self.output_unit.dense.update(args);
    }

    fn parameter_count(&self) -> usize {
        self.input_unit.dense.parameter_count()
            + self.self_unit.dense.parameter_count()
            + self.output_unit.dense.parameter_count()
    }

    fn write_weights(&self, out: &mut dyn Write) -> io::Result<()> {
        self.input_unit.dense.write_weights(out)?;
        self.self_unit.dense.write_weights(out)?;
        self.output_unit.dense.write_weights(out)
    }

    fn read_weights(&mut self, input: &mut dyn Read, flags: &LoadFlags) -> io::Result<()> {
        self.input_unit.dense.read_weights(input, flags)?;
        self.self_unit.dense.read_weights(input, flags)?;
        self.output_unit.dense.read_weights(input, flags)
    }

    fn reset_state(&mut self) {
        self.state.fill(0.0);
    }

    fn denormalize(&mut self) {
        self.input_unit.dense.denormalize();
        self.self_unit.dense.denormalize();
        self.output_unit.dense.denormalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::activations::activate_array;
    use approx::assert_relative_eq;

    fn dense_apply(unit: &DenseUnit, x: &[f32]) -> Vec<f32> {
        let d = &unit.dense;
        let mut out: Vec<f32> = (0..d.outputs())
            .map(|i| {
                let row = &d.weights.values[i * d.inputs()..(i + 1) * d.inputs()];
                row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + d.biases.values[i]
            })
            .collect();
        activate_array(&mut out, d.activation());
        out
    }

    fn layer(shortcut: bool) -> RnnLayer {
        let mut rng = SimpleRng::new(11);
        RnnLayer::new(
            3,
            2,
            4,
            2,
            3,
            Activation::Tanh,
            Activation::Tanh,
            false,
            shortcut,
            OptimizerKind::Sgd,
            &mut rng,
        )
    }

    #[test]
    fn test_shapes() {
        let rnn = layer(false);
        assert_eq!(rnn.shape().outputs, 2);
        assert_eq!(rnn.buffers().unwrap().len(), 3 * 2);
        assert_eq!(rnn.state.len(), 4 * 4);
        assert_eq!(rnn.parameter_count(), (8 + 4) + (16 + 4) + (8 + 2));
    }

    #[test]
    fn test_logistic_option_overrides_self_activation() {
        let mut rng = SimpleRng::new(1);
        let mut options = OptionSet::new()
            .with("hidden", 3)
            .with("output", 2)
            .with("activation", "relu")
            .with("logistic", 2);
        let rnn = RnnLayer::from_options(&mut options, 4, 5, 2, OptimizerKind::Sgd, &mut rng)
            .unwrap();
        assert_eq!(rnn.self_unit.dense.activation(), Activation::Loggy);
        assert_eq!(rnn.input_unit.dense.activation(), Activation::Relu);
        assert_eq!(rnn.batch, 2);
    }

    #[test]
    fn test_unit_math_matches_reference() {
        let mut unit = layer(true).input_unit;
        let x = [0.5, -1.0];
        unit.forward(0, &x, false);
        let expected = dense_apply(&unit, &x);
        for (a, b) in unit.output_step(0).iter().zip(&expected) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }
}
