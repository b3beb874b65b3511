//! Softmax layer with optional grouping, hierarchy and spatial modes.

use crate::config::OptionSet;
use crate::error::{NetError, Result};
use crate::kernels::{axpy, softmax_batch};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};

#[derive(Debug)]
pub struct SoftmaxLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    groups: usize,
    temperature: f32,
    /// Consecutive group sizes of a hierarchical softmax.
    tree: Option<Vec<usize>>,
    spatial: bool,
}

impl SoftmaxLayer {
    /// `inputs` must split evenly into `groups`.
    pub fn new(batch: usize, inputs: usize, groups: usize) -> Result<Self> {
        if groups == 0 || inputs % groups != 0 {
            return Err(NetError::config(format!(
                "softmax: {inputs} inputs do not split into {groups} groups"
            )));
        }
        Ok(Self {
            shape: LayerShape::flat(batch, inputs, inputs),
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * inputs),
            groups,
            temperature: 1.0,
            tree: None,
            spatial: false,
        })
    }

    /// Options: `groups` (1), `temperature` (1), `tree` (comma-separated
    /// group sizes) and `spatial`. The input geometry is kept for spatial mode.
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        inputs: usize,
        w: usize,
        h: usize,
        c: usize,
    ) -> Result<Self> {
        let groups = options.find_usize_quiet("groups", 1)?;
        let mut layer = Self::new(batch, inputs, groups)?;
        layer.temperature = options.find_float_quiet("temperature", 1.0)?;
        if let Some(tree) = options.find_list::<usize>("tree")? {
            layer = layer.with_tree(tree)?;
        }
        layer.spatial = options.find_int_quiet("spatial", 0)? != 0;
        layer.shape.in_w = w;
        layer.shape.in_h = h;
        layer.shape.in_c = c;
        layer.shape.out_w = w;
        layer.shape.out_h = h;
        layer.shape.out_c = c;
        if layer.spatial && w * h * c != inputs {
            return Err(NetError::config(
                "softmax: spatial mode needs an image-shaped input",
            ));
        }
        Ok(layer)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Hierarchical mode: softmax independently over each listed group size.
    pub fn with_tree(mut self, group_sizes: Vec<usize>) -> Result<Self> {
        let total: usize = group_sizes.iter().sum();
        if total > self.shape.inputs {
            return Err(NetError::config(format!(
                "softmax: tree covers {total} values but the layer has {}",
                self.shape.inputs
            )));
        }
        self.tree = Some(group_sizes);
        Ok(self)
    }
}

impl Layer for SoftmaxLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Softmax
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
        let input = ctx.input();
        let output = &mut self.buffers.output;
        let batch = self.shape.batch;
        let inputs = self.shape.inputs;

        if let Some(tree) = &self.tree {
            let mut count = 0;
            for &size in tree {
                softmax_batch(
                    &input[count..],
                    size,
                    batch,
                    inputs,
                    1,
                    0,
                    1,
                    self.temperature,
                    &mut output[count..],
                );
                count += size;
            }
        } else if self.spatial {
            let plane = self.shape.out_w * self.shape.out_h;
            softmax_batch(
                input,
                self.shape.out_c,
                batch,
                inputs,
                plane,
                1,
                plane,
                self.temperature,
                output,
            );
        } else {
            let size = inputs / self.groups;
            softmax_batch(
                input,
                size,
                batch,
                inputs,
                self.groups,
                size,
                1,
                self.temperature,
                output,
            );
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            axpy(1.0, &self.buffers.delta, prev_delta);
        }
    }
}
