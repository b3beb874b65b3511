//! Dropout layer implementation for regularization
//!
//! This module provides a DropoutLayer that randomly drops (sets to zero) a fraction
//! of input units during training to prevent overfitting. During inference, all units
//! are kept and outputs are passed through unchanged.
//!
//! The layer works in place: it owns no output or delta buffer and operates on
//! the buffers of the layer before it.

use crate::config::OptionSet;
use crate::error::{NetError, Result};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};

/// Dropout layer for regularization.
///
/// During training, sets every value to zero with probability `probability`
/// and scales the kept values by `1 / (1 - probability)` so their expected
/// value is unchanged. The drawn numbers are kept for the backward pass,
/// which applies the same mask to the upstream delta.
///
/// # Fields
///
/// * `probability` - Probability of dropping each unit
/// * `scale` - Factor applied to kept units, `1 / (1 - probability)`
/// * `owner` - Index of the layer whose buffers are modified
/// * `rand` - Uniform draws of the last training forward pass
///
/// # Example
///
/// ```ignore
/// // layer 3 drops half of the outputs of layer 2
/// let layer = DropoutLayer::new(64, 512, 0.5, 2)?;
/// assert_eq!(layer.alias_of(), Some(2));
/// ```
#[derive(Debug)]
pub struct DropoutLayer {
    shape: LayerShape,
    options: LayerOptions,
    probability: f32,
    scale: f32,
    owner: usize,
    rand: Vec<f32>,
}

impl DropoutLayer {
    /// Creates a dropout layer operating on the buffers of layer `owner`.
    ///
    /// # Arguments
    ///
    /// * `batch` - Rows per forward pass
    /// * `inputs` - Values per row
    /// * `probability` - Drop probability, in `[0, 1)`
    /// * `owner` - Index of the preceding layer
    pub fn new(batch: usize, inputs: usize, probability: f32, owner: usize) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(NetError::config(format!(
                "dropout: probability {probability} is outside [0, 1)"
            )));
        }
        Ok(Self {
            shape: LayerShape::flat(batch, inputs, inputs),
            options: LayerOptions::default(),
            probability,
            scale: 1.0 / (1.0 - probability),
            owner,
            rand: vec![0.0; batch * inputs],
        })
    }

    /// Options: `probability` (0.5). Keeps the image geometry of the input.
    #[allow(clippy::too_many_arguments)]
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        w: usize,
        h: usize,
        c: usize,
        index: usize,
    ) -> Result<Self> {
        if index == 0 {
            return Err(NetError::config(
                "dropout cannot be the first layer: it works in place on the layer before it",
            ));
        }
        let probability = options.find_float("probability", 0.5)?;
        let mut layer = Self::new(batch, inputs, probability, index - 1)?;
        layer.shape.in_w = w;
        layer.shape.in_h = h;
        layer.shape.in_c = c;
        layer.shape.out_w = w;
        layer.shape.out_h = h;
        layer.shape.out_c = c;
        Ok(layer)
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl Layer for DropoutLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dropout
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
        None
    }

    fn buffers_mut(&mut self) -> Option<&mut LayerBuffers> {
        None
    }

    fn alias_of(&self) -> Option<usize> {
        Some(self.owner)
    }

    fn forward(&mut self, ctx: &mut ForwardContext<'_>) {
        if !ctx.train {
            return;
        }
        let Some((values, rng)) = ctx.input_mut_with_rng() else {
            return;
        };
        for (value, r) in values.iter_mut().zip(self.rand.iter_mut()) {
            *r = rng.next_f32();
            if *r < self.probability {
                *value = 0.0;
            } else {
                *value *= self.scale;
            }
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let (_, Some(delta)) = ctx.input_and_delta() else {
            return;
        };
        for (value, &r) in delta.iter_mut().zip(&self.rand) {
            if r < self.probability {
                *value = 0.0;
            } else {
                *value *= self.scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::Upstream;
    use approx::assert_relative_eq;

    #[test]
    fn test_inference_is_identity() {
        let input = [1.0, 2.0, 3.0, 4.0];
        let mut upstream = Upstream::new(&input);
        let mut layer = DropoutLayer::new(1, 4, 0.5, 0).unwrap();
        upstream.forward(&mut layer, false);
        assert_eq!(upstream.output(0), &input);
    }

    #[test]
    fn test_training_drops_or_scales() {
        let input = vec![1.0; 1000];
        let mut upstream = Upstream::new(&input);
        let mut layer = DropoutLayer::new(1, 1000, 0.3, 0).unwrap();
        upstream.forward(&mut layer, true);

        let out = upstream.output(0);
        let dropped = out.iter().filter(|&&v| v == 0.0).count();
        assert!(out
            .iter()
            .all(|&v| v == 0.0 || (v - 1.0 / 0.7).abs() < 1e-6));
        assert!(dropped > 200 && dropped < 400, "dropped {dropped}");
    }

    #[test]
    fn test_backward_applies_same_mask() {
        let mut upstream = Upstream::new(&[1.0; 64]);
        let mut layer = DropoutLayer::new(1, 64, 0.5, 0).unwrap();
        upstream.forward(&mut layer, true);
        let mask: Vec<bool> = upstream.output(0).iter().map(|&v| v == 0.0).collect();

        upstream.layers[0]
            .buffers_mut()
            .unwrap()
            .delta
            .fill(1.0);
        upstream.backward(&mut layer);
        for (&d, dropped) in upstream.delta(0).iter().zip(mask) {
            if dropped {
                assert_eq!(d, 0.0);
            } else {
                assert_relative_eq!(d, 2.0);
            }
        }
    }

    #[test]
    fn test_first_layer_rejected() {
        let mut options = OptionSet::new();
        assert!(DropoutLayer::from_options(&mut options, 1, 4, 0, 0, 0, 0).is_err());
        assert!(DropoutLayer::new(1, 4, 1.0, 0).is_err());
    }
}
