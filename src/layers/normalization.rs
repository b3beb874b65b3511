//! Local response normalization across channels.

use crate::config::OptionSet;
use crate::error::Result;
use crate::kernels::{axpy, copy, fill, mul, pow};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};

/// `output = input * (kappa + alpha * Σ window squares)^(-beta)`, with the
/// window spanning `size` neighbouring channels at the same position.
#[derive(Debug)]
pub struct NormalizationLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    size: usize,
    alpha: f32,
    beta: f32,
    kappa: f32,
    norms: Vec<f32>,
}

impl NormalizationLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        w: usize,
        h: usize,
        c: usize,
        size: usize,
        alpha: f32,
        beta: f32,
        kappa: f32,
    ) -> Self {
        let outputs = w * h * c;
        Self {
            shape: LayerShape::same(batch, w, h, c, outputs),
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * outputs),
            size,
            alpha,
            beta,
            kappa,
            norms: vec![0.0; batch * outputs],
        }
    }

    /// Options: `alpha` (0.0001), `beta` (0.75), `kappa` (1), `size` (5).
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        w: usize,
        h: usize,
        c: usize,
    ) -> Result<Self> {
        let alpha = options.find_float("alpha", 0.0001)?;
        let beta = options.find_float("beta", 0.75)?;
        let kappa = options.find_float("kappa", 1.0)?;
        let size = options.find_usize("size", 5)?;
        Ok(Self::new(batch, w, h, c, size, alpha, beta, kappa))
    }
}

impl Layer for NormalizationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Normalization
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

    /// Squares are computed into the shared workspace.
    fn workspace_size(&self) -> usize {
        self.shape.batch * self.shape.outputs
    }

    fn forward(&mut self, ctx: &mut ForwardContext<'_>) {
        let (w, h, c) = (self.shape.out_w, self.shape.out_h, self.shape.out_c);
        let plane = w * h;
        let item = plane * c;
        let (input, workspace) = ctx.input_and_workspace();
        let squared = &mut workspace[..self.shape.batch * item];

        for b in 0..self.shape.batch {
            let squared = &mut squared[b * item..(b + 1) * item];
            let norms = &mut self.norms[b * item..(b + 1) * item];
            pow(&input[b * item..(b + 1) * item], 2.0, squared);

            fill(&mut norms[..plane], self.kappa);
            for k in 0..(self.size / 2).min(c) {
                axpy(
                    self.alpha,
                    &squared[k * plane..(k + 1) * plane],
                    &mut norms[..plane],
                );
            }
            for k in 1..c {
                let (done, rest) = norms.split_at_mut(k * plane);
                let current = &mut rest[..plane];
                copy(&done[(k - 1) * plane..], current);
                let prev = k as isize - ((self.size as isize - 1) / 2) - 1;
                let next = k + self.size / 2;
                if prev >= 0 {
                    let prev = prev as usize;
                    axpy(
                        -self.alpha,
                        &squared[prev * plane..(prev + 1) * plane],
                        current,
                    );
                }
                if next < c {
                    axpy(
                        self.alpha,
                        &squared[next * plane..(next + 1) * plane],
                        current,
                    );
                }
            }
        }

        let output = &mut self.buffers.output;
        pow(&self.norms, -self.beta, output);
        mul(input, output);
    }

    /// Approximate gradient: the dependence of the norms on the input is ignored.
    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            pow(&self.norms, -self.beta, prev_delta);
            mul(&self.buffers.delta, prev_delta);
        }
    }
}
