//! Execution engine: runs a built layer graph forward, backward and through
//! optimizer updates.
//!
//! Layers execute strictly in order. During propagation the layer list is split
//! at the running index so layer `i` can read (and, backward, write the deltas
//! of) every layer before it.

use crate::config::NetOptions;
use crate::error::{NetError, Result};
use crate::layers::{resolve_owner, BackwardContext, ForwardContext, Layer};
use crate::optimizers::UpdateArgs;
use crate::utils::SimpleRng;
use log::debug;

/// A built network together with its training state.
///
/// # Example
///
/// ```ignore
/// let mut net = architecture::build(load_architecture("xor.json")?)?;
/// net.set_training(true);
/// for _ in 0..1000 {
///     let cost = net.train_batch(&inputs, &targets)?;
/// }
/// net.set_training(false);
/// let prediction = net.forward(&inputs)?;
/// ```
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    options: NetOptions,
    workspace: Vec<f32>,
    input: Vec<f32>,
    truth: Option<Vec<f32>>,
    truths: usize,
    train: bool,
    /// A training forward pass ran since the last inference pass.
    ready_for_backward: bool,
    seen: usize,
    cost: Option<f32>,
    rng: SimpleRng,
}

impl Network {
    /// Assemble a network from constructed layers.
    ///
    /// `truths` is the per-row truth size used by [`Network::train_batch`].
    pub fn new(
        options: NetOptions,
        layers: Vec<Box<dyn Layer>>,
        truths: usize,
        rng: SimpleRng,
    ) -> Self {
        let workspace = layers
            .iter()
            .map(|layer| layer.workspace_size())
            .max()
            .unwrap_or(0);
        Self {
            layers,
            options,
            workspace: vec![0.0; workspace],
            input: Vec::new(),
            truth: None,
            truths,
            train: false,
            ready_for_backward: false,
            seen: 0,
            cost: None,
            rng,
        }
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    /// Rows per forward pass, time steps included.
    pub fn batch(&self) -> usize {
        self.options.batch
    }

    pub fn inputs(&self) -> usize {
        self.options.inputs
    }

    /// Values per row of the last layer.
    pub fn outputs(&self) -> usize {
        self.layers.last().map_or(0, |l| l.shape().outputs)
    }

    pub fn truths(&self) -> usize {
        self.truths
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|l| l.as_ref())
    }

    pub fn workspace_len(&self) -> usize {
        self.workspace.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// Samples processed so far in training.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn set_seen(&mut self, seen: usize) {
        self.seen = seen;
    }

    pub fn is_training(&self) -> bool {
        self.train
    }

    pub fn set_training(&mut self, train: bool) {
        self.train = train;
    }

    /// Mean cost reported by the cost layers in the last forward pass.
    pub fn cost(&self) -> Option<f32> {
        self.cost
    }

    /// Number of completed optimizer steps, derived from `seen`.
    pub fn current_batch(&self) -> usize {
        self.seen / (self.options.batch * self.options.subdivisions)
    }

    /// Learning rate of the current batch under the configured policy.
    pub fn current_rate(&mut self) -> f32 {
        let batch = self.current_batch();
        self.options.schedule.rate(batch, &mut self.rng)
    }

    /// Output of the last layer, following in-place aliases.
    pub fn output(&self) -> &[f32] {
        if self.layers.is_empty() {
            return &[];
        }
        let owner = resolve_owner(&self.layers, self.layers.len() - 1);
        self.layers[owner]
            .buffers()
            .map_or(&[][..], |b| b.output.as_slice())
    }

    /// Run every layer on `input` (`batch × inputs` values) and return the
    /// network output. No truth is attached, so cost layers stay idle.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when `input` has the wrong length.
    pub fn forward(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.check_len(input, self.options.inputs)?;
        self.input.clear();
        self.input.extend_from_slice(input);
        self.truth = None;
        self.run_forward();
        Ok(self.output())
    }

    fn check_len(&self, values: &[f32], per_row: usize) -> Result<()> {
        let expected = self.options.batch * per_row;
        if values.len() != expected {
            return Err(NetError::ShapeMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(())
    }

    fn run_forward(&mut self) {
        let train = self.train;
        for i in 0..self.layers.len() {
            let (previous, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            if train {
                if let Some(buffers) = layer.buffers_mut() {
                    buffers.clear_delta();
                }
            }
            let mut ctx = ForwardContext::new(
                i,
                &self.input,
                previous,
                &mut self.workspace,
                self.truth.as_deref(),
                &mut self.rng,
                train,
            );
            layer.forward(&mut ctx);
        }

        let costs: Vec<f32> = self.layers.iter().filter_map(|l| l.cost()).collect();
        self.cost = if costs.is_empty() {
            None
        } else {
            Some(costs.iter().sum::<f32>() / costs.len() as f32)
        };
        self.ready_for_backward = train;
    }

    /// Propagate the deltas from the last layer back to the first.
    ///
    /// Stops at a layer flagged `stopbackward` and skips layers flagged
    /// `onlyforward`.
    ///
    /// # Errors
    ///
    /// `NotTraining` unless the previous forward pass ran in training mode.
    pub fn backward(&mut self) -> Result<()> {
        if !self.train || !self.ready_for_backward {
            return Err(NetError::NotTraining);
        }
        for i in (0..self.layers.len()).rev() {
            let (previous, rest) = self.layers.split_at_mut(i);
            let layer = &mut rest[0];
            let options = layer.options();
            if options.stopbackward {
                break;
            }
            if options.onlyforward {
                continue;
            }
            let mut ctx = BackwardContext::new(i, &self.input, previous);
            layer.backward(&mut ctx);
        }
        Ok(())
    }

    /// Apply one optimizer step to every layer with the current learning rate.
    pub fn update(&mut self) {
        let rate = self.current_rate();
        let args = UpdateArgs::new(
            self.options.batch * self.options.subdivisions,
            rate,
            self.options.momentum,
            self.options.decay,
        );
        for layer in &mut self.layers {
            let scale = layer.options().learning_rate_scale;
            layer.update(&args.scaled(scale));
        }
    }

    /// One training step: forward with `truth`, backward, and an optimizer
    /// update once every `subdivisions` batches. Returns the cost.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` when `input` or `truth` has the wrong length.
    pub fn train_batch(&mut self, input: &[f32], truth: &[f32]) -> Result<f32> {
        self.check_len(input, self.options.inputs)?;
        self.check_len(truth, self.truths)?;

        self.seen += self.options.batch;
        self.train = true;
        self.input.clear();
        self.input.extend_from_slice(input);
        self.truth = Some(truth.to_vec());

        self.run_forward();
        self.backward()?;
        let cost = self.cost.unwrap_or(0.0);

        let steps = self.seen / self.options.batch;
        if steps % self.options.subdivisions == 0 {
            self.update();
        }
        debug!(
            "batch {}: cost {cost:.6}, seen {}",
            self.current_batch(),
            self.seen
        );
        Ok(cost)
    }

    /// Clear the carried state of recurrent layers.
    pub fn reset_state(&mut self) {
        for layer in &mut self.layers {
            layer.reset_state();
        }
    }

    /// Fold every normalization stage into its weights.
    pub fn denormalize(&mut self) {
        for layer in &mut self.layers {
            layer.denormalize();
        }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("layers", &self.layers.len())
            .field("batch", &self.options.batch)
            .field("seen", &self.seen)
            .field("train", &self.train)
            .finish()
    }
}
