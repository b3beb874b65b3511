//! Max and global average pooling over image-shaped inputs.

use crate::config::OptionSet;
use crate::error::{NetError, Result};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};

/// Windowed max pooling. The argmax of every output is kept so backward can
/// route the delta to the input that won.
#[derive(Debug)]
pub struct MaxPoolLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    size: usize,
    stride: usize,
    padding: usize,
    indexes: Vec<Option<usize>>,
}

impl MaxPoolLayer {
    /// `padding` is added on every side of the input.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        w: usize,
        h: usize,
        c: usize,
        size: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        if size == 0 || stride == 0 || w + 2 * padding < size || h + 2 * padding < size {
            return Err(NetError::config(format!(
                "maxpool: window {size}/{stride} does not fit a {w} x {h} input"
            )));
        }
        if padding >= size {
            return Err(NetError::config(format!(
                "maxpool: padding {padding} must be smaller than size {size}"
            )));
        }
        let out_w = (w + 2 * padding - size) / stride + 1;
        let out_h = (h + 2 * padding - size) / stride + 1;
        let outputs = out_w * out_h * c;
        Ok(Self {
            shape: LayerShape {
                batch,
                in_w: w,
                in_h: h,
                in_c: c,
                inputs: w * h * c,
                out_w,
                out_h,
                out_c: c,
                outputs,
            },
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * outputs),
            size,
            stride,
            padding,
            indexes: vec![None; batch * outputs],
        })
    }

    /// Options: `stride` (1), `size` (defaults to the stride), `padding`
    /// (defaults to `(size - 1) / 2`).
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        w: usize,
        h: usize,
        c: usize,
    ) -> Result<Self> {
        let stride = options.find_usize("stride", 1)?;
        let size = options.find_usize("size", stride)?;
        let padding = options.find_usize_quiet("padding", size.saturating_sub(1) / 2)?;
        Self::new(batch, w, h, c, size, stride, padding)
    }
}

impl Layer for MaxPoolLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool
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
        let s = self.shape;
        let input = ctx.input();
        let offset = self.padding as isize;

        for b in 0..s.batch {
            for k in 0..s.out_c {
                for i in 0..s.out_h {
                    for j in 0..s.out_w {
                        let out_index = j + s.out_w * (i + s.out_h * (k + s.out_c * b));
                        let mut best = f32::NEG_INFINITY;
                        let mut best_index = None;
                        for n in 0..self.size {
                            for m in 0..self.size {
                                let y = (i * self.stride + n) as isize - offset;
                                let x = (j * self.stride + m) as isize - offset;
                                if y < 0 || x < 0 || y >= s.in_h as isize || x >= s.in_w as isize
                                {
                                    continue;
                                }
                                let index = x as usize
                                    + s.in_w * (y as usize + s.in_h * (k + s.in_c * b));
                                if input[index] > best {
                                    best = input[index];
                                    best_index = Some(index);
                                }
                            }
                        }
                        self.buffers.output[out_index] = best;
                        self.indexes[out_index] = best_index;
                    }
                }
            }
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            for (delta, index) in self.buffers.delta.iter().zip(&self.indexes) {
                if let Some(index) = *index {
                    prev_delta[index] += delta;
                }
            }
        }
    }
}

/// Averages every channel over all spatial positions (`w × h × c → 1 × 1 × c`).
#[derive(Debug)]
pub struct AvgPoolLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
}

impl AvgPoolLayer {
    pub fn new(batch: usize, w: usize, h: usize, c: usize) -> Self {
        Self {
            shape: LayerShape {
                batch,
                in_w: w,
                in_h: h,
                in_c: c,
                inputs: w * h * c,
                out_w: 1,
                out_h: 1,
                out_c: c,
                outputs: c,
            },
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * c),
        }
    }
}

impl Layer for AvgPoolLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::AvgPool
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
        let plane = self.shape.in_w * self.shape.in_h;
        let input = ctx.input();
        for (out, window) in self
            .buffers
            .output
            .iter_mut()
            .zip(input.chunks_exact(plane))
        {
            *out = window.iter().sum::<f32>() / plane as f32;
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let plane = self.shape.in_w * self.shape.in_h;
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            for (delta, window) in self
                .buffers
                .delta
                .iter()
                .zip(prev_delta.chunks_exact_mut(plane))
            {
                for value in window {
                    *value += delta / plane as f32;
                }
            }
        }
    }
}
