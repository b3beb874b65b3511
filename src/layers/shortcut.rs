//! Residual shortcut: adds the output of an earlier layer to the input.

use crate::config::OptionSet;
use crate::error::{NetError, Result};
use crate::kernels::{axpy, copy, shortcut};
use crate::layers::route::resolve_reference;
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};
use crate::utils::activations::{activate_array, gradient_array};
use crate::utils::Activation;

/// `output = act(input + sample(from))`, where `sample` strides or repeats the
/// source so its spatial size matches the input. Only the channels the two
/// share are added.
#[derive(Debug)]
pub struct ShortcutLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    activation: Activation,
    from: usize,
    from_w: usize,
    from_h: usize,
    from_c: usize,
}

impl ShortcutLayer {
    /// `w × h × c` is the input geometry, `from_*` the geometry of layer `from`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        from: usize,
        w: usize,
        h: usize,
        c: usize,
        from_w: usize,
        from_h: usize,
        from_c: usize,
    ) -> Result<Self> {
        if w == 0 || h == 0 || from_w == 0 || from_h == 0 {
            return Err(NetError::config(
                "shortcut: both the input and the source must output an image",
            ));
        }
        let stride = (from_w / w).max(1);
        let sample = (w / from_w).max(1);
        if stride != (from_h / h).max(1) || sample != (h / from_h).max(1) {
            return Err(NetError::config(format!(
                "shortcut: source {from_w} x {from_h} does not scale evenly onto {w} x {h}"
            )));
        }

        let outputs = w * h * c;
        let mut shape = LayerShape::same(batch, w, h, c, outputs);
        if c != from_c && w == from_w && h == from_h {
            shape.out_w = 0;
            shape.out_h = 0;
            shape.out_c = 0;
        }
        Ok(Self {
            shape,
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * outputs),
            activation: Activation::Linear,
            from,
            from_w,
            from_h,
            from_c,
        })
    }

    /// Options: `from` (required, negative values are relative to this layer)
    /// and `activation` (linear).
    #[allow(clippy::too_many_arguments)]
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        index: usize,
        w: usize,
        h: usize,
        c: usize,
        previous: &[Box<dyn Layer>],
    ) -> Result<Self> {
        let from = resolve_reference(options.require_int("from")?, index, "shortcut")?;
        let source = previous[from].shape();
        let mut layer = Self::new(
            batch,
            from,
            w,
            h,
            c,
            source.out_w,
            source.out_h,
            source.out_c,
        )?;
        layer.activation = Activation::from_name(&options.find_str("activation", "linear"));
        Ok(layer)
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn source(&self) -> usize {
        self.from
    }
}

impl Layer for ShortcutLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Shortcut
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
        let output = &mut self.buffers.output;
        copy(ctx.input(), output);
        shortcut(
            s.batch,
            self.from_w,
            self.from_h,
            self.from_c,
            ctx.layer_output(self.from),
            s.in_w,
            s.in_h,
            s.in_c,
            output,
        );
        activate_array(output, self.activation);
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let s = self.shape;
        gradient_array(
            &self.buffers.output,
            self.activation,
            &mut self.buffers.delta,
        );
        if let (_, Some(prev_delta)) = ctx.input_and_delta() {
            axpy(1.0, &self.buffers.delta, prev_delta);
        }
        if let Some(from_delta) = ctx.layer_delta_mut(self.from) {
            shortcut(
                s.batch,
                s.in_w,
                s.in_h,
                s.in_c,
                &self.buffers.delta,
                self.from_w,
                self.from_h,
                self.from_c,
                from_delta,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::{FixedLayer, Upstream};

    fn upstream() -> Upstream {
        Upstream::with_layers(vec![
            Box::new(FixedLayer::new(&[1.0, 2.0, 3.0, 4.0]).with_image(2, 2, 1)),
            Box::new(FixedLayer::new(&[10.0, 20.0, 30.0, 40.0]).with_image(2, 2, 1)),
        ])
    }

    #[test]
    fn test_adds_source_output() {
        let mut up = upstream();
        let mut options = OptionSet::new().with("from", -2);
        let mut layer = ShortcutLayer::from_options(&mut options, 1, 2, 2, 2, 1, &up.layers)
            .unwrap();
        assert_eq!(layer.source(), 0);
        up.forward(&mut layer, true);
        assert_eq!(layer.buffers.output, vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn test_backward_feeds_both_paths() {
        let mut up = upstream();
        let mut layer = ShortcutLayer::new(1, 0, 2, 2, 1, 2, 2, 1).unwrap();
        up.forward(&mut layer, true);
        layer.buffers.delta.fill(1.0);
        up.backward(&mut layer);
        assert_eq!(up.delta(0), &[1.0; 4]);
        assert_eq!(up.delta(1), &[1.0; 4]);
    }

    #[test]
    fn test_downsampled_source() {
        // 2x2 source onto a 1x1 input: stride 2 picks the first position
        let mut up = Upstream::with_layers(vec![
            Box::new(FixedLayer::new(&[5.0, 6.0, 7.0, 8.0]).with_image(2, 2, 1)),
            Box::new(FixedLayer::new(&[1.0]).with_image(1, 1, 1)),
        ]);
        let mut layer = ShortcutLayer::new(1, 0, 1, 1, 1, 2, 2, 1).unwrap();
        up.forward(&mut layer, false);
        assert_eq!(layer.buffers.output, vec![6.0]);
    }

    #[test]
    fn test_channel_mismatch_reports_unknown_geometry() {
        let layer = ShortcutLayer::new(1, 0, 2, 2, 3, 2, 2, 1).unwrap();
        assert!(!layer.shape().has_image_output());
        assert_eq!(layer.shape().outputs, 12);
    }

    #[test]
    fn test_uneven_ratio_rejected() {
        assert!(ShortcutLayer::new(1, 0, 2, 2, 1, 4, 2, 1).is_err());
    }
}
