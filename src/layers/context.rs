//! Cursors handed to a layer during forward and backward propagation.
//!
//! The network splits its layer list at the running index so a layer can
//! borrow itself mutably while reading the outputs (and writing the deltas) of
//! every earlier layer. In-place layers own no buffers; lookups follow their
//! `alias_of` chain to the owning layer.

use crate::layers::Layer;
use crate::utils::SimpleRng;

/// Index of the layer that owns the buffers used by layer `index`.
pub(crate) fn resolve_owner(layers: &[Box<dyn Layer>], mut index: usize) -> usize {
    while let Some(owner) = layers[index].alias_of() {
        index = owner;
    }
    index
}

fn owned_output(layers: &[Box<dyn Layer>], index: usize) -> &[f32] {
    let owner = resolve_owner(layers, index);
    layers[owner].buffers().map_or(&[][..], |b| b.output.as_slice())
}

/// Forward cursor for layer `index`.
pub struct ForwardContext<'a> {
    pub index: usize,
    pub train: bool,
    net_input: &'a [f32],
    previous: &'a mut [Box<dyn Layer>],
    workspace: &'a mut [f32],
    truth: Option<&'a [f32]>,
    rng: &'a mut SimpleRng,
}

impl<'a> ForwardContext<'a> {
    pub fn new(
        index: usize,
        net_input: &'a [f32],
        previous: &'a mut [Box<dyn Layer>],
        workspace: &'a mut [f32],
        truth: Option<&'a [f32]>,
        rng: &'a mut SimpleRng,
        train: bool,
    ) -> Self {
        Self {
            index,
            train,
            net_input,
            previous,
            workspace,
            truth,
            rng,
        }
    }

    /// Output of the preceding layer, or the network input for layer 0.
    pub fn input(&self) -> &[f32] {
        if self.index == 0 {
            self.net_input
        } else {
            owned_output(self.previous, self.index - 1)
        }
    }

    /// Input together with the shared scratch buffer.
    pub fn input_and_workspace(&mut self) -> (&[f32], &mut [f32]) {
        let input = if self.index == 0 {
            self.net_input
        } else {
            owned_output(self.previous, self.index - 1)
        };
        (input, &mut *self.workspace)
    }

    /// Mutable input for in-place layers, along with the network RNG.
    ///
    /// `None` at the network input boundary, which is read-only.
    pub fn input_mut_with_rng(&mut self) -> Option<(&mut [f32], &mut SimpleRng)> {
        if self.index == 0 {
            return None;
        }
        let owner = resolve_owner(self.previous, self.index - 1);
        let buffers = self.previous[owner].buffers_mut()?;
        Some((buffers.output.as_mut_slice(), &mut *self.rng))
    }

    /// Output of an earlier layer `j < index`.
    pub fn layer_output(&self, j: usize) -> &[f32] {
        owned_output(self.previous, j)
    }

    pub fn truth(&self) -> Option<&[f32]> {
        self.truth
    }

    pub fn rng(&mut self) -> &mut SimpleRng {
        self.rng
    }
}

/// Backward cursor for layer `index`.
pub struct BackwardContext<'a> {
    pub index: usize,
    net_input: &'a [f32],
    previous: &'a mut [Box<dyn Layer>],
}

impl<'a> BackwardContext<'a> {
    pub fn new(index: usize, net_input: &'a [f32], previous: &'a mut [Box<dyn Layer>]) -> Self {
        Self {
            index,
            net_input,
            previous,
        }
    }

    pub fn input(&self) -> &[f32] {
        if self.index == 0 {
            self.net_input
        } else {
            owned_output(self.previous, self.index - 1)
        }
    }

    /// Input values and the upstream delta to add the input gradient into.
    ///
    /// The delta is `None` for the first layer: the network input has no gradient.
    pub fn input_and_delta(&mut self) -> (&[f32], Option<&mut [f32]>) {
        if self.index == 0 {
            return (self.net_input, None);
        }
        let owner = resolve_owner(self.previous, self.index - 1);
        match self.previous[owner].buffers_mut() {
            Some(buffers) => {
                let (output, delta) = buffers.split();
                (output, Some(delta))
            }
            None => (&[], None),
        }
    }

    pub fn layer_output(&self, j: usize) -> &[f32] {
        owned_output(self.previous, j)
    }

    /// Delta buffer of an earlier layer `j < index`.
    pub fn layer_delta_mut(&mut self, j: usize) -> Option<&mut [f32]> {
        let owner = resolve_owner(self.previous, j);
        self.previous[owner]
            .buffers_mut()
            .map(|b| b.delta.as_mut_slice())
    }
}
