//! Route layer: concatenates the outputs of earlier layers.

use crate::config::OptionSet;
use crate::error::{NetError, Result};
use crate::kernels::{axpy, copy};
use crate::layers::{
    BackwardContext, ForwardContext, Layer, LayerBuffers, LayerKind, LayerOptions, LayerShape,
};

/// Resolve a layer reference that may be relative to `index` (negative values).
pub(crate) fn resolve_reference(reference: i32, index: usize, section: &str) -> Result<usize> {
    let resolved = if reference < 0 {
        index as i64 + reference as i64
    } else {
        reference as i64
    };
    if resolved < 0 || resolved >= index as i64 {
        return Err(NetError::config(format!(
            "{section}: layer reference {reference} from layer {index} is out of range"
        )));
    }
    Ok(resolved as usize)
}

#[derive(Debug)]
pub struct RouteLayer {
    shape: LayerShape,
    options: LayerOptions,
    buffers: LayerBuffers,
    layers: Vec<usize>,
    sizes: Vec<usize>,
}

impl RouteLayer {
    /// Concatenates layers `layers`, whose per-item output sizes are `sizes`.
    pub fn new(batch: usize, layers: Vec<usize>, sizes: Vec<usize>) -> Self {
        let outputs: usize = sizes.iter().sum();
        Self {
            shape: LayerShape {
                batch,
                inputs: outputs,
                outputs,
                ..LayerShape::default()
            },
            options: LayerOptions::default(),
            buffers: LayerBuffers::new(1, batch * outputs),
            layers,
            sizes,
        }
    }

    /// Options: `layers` (required, comma-separated, negative values are
    /// relative to this layer).
    ///
    /// The image geometry is taken from the first source, with channels summed
    /// over sources of the same spatial size; any spatial mismatch leaves
    /// the geometry at `0 × 0 × 0`.
    pub fn from_options(
        options: &mut OptionSet,
        batch: usize,
        index: usize,
        previous: &[Box<dyn Layer>],
    ) -> Result<Self> {
        let references = options.require_list::<i32>("layers")?;
        if references.is_empty() {
            return Err(NetError::config("route: no input layers"));
        }
        let layers = references
            .iter()
            .map(|&r| resolve_reference(r, index, "route"))
            .collect::<Result<Vec<_>>>()?;
        let sizes = layers
            .iter()
            .map(|&j| previous[j].shape().outputs)
            .collect();

        let mut layer = Self::new(batch, layers, sizes);
        let first = *previous[layer.layers[0]].shape();
        let (mut w, mut h, mut c) = (first.out_w, first.out_h, first.out_c);
        for &j in &layer.layers[1..] {
            let next = previous[j].shape();
            if next.out_w == first.out_w && next.out_h == first.out_h {
                c += next.out_c;
            } else {
                (w, h, c) = (0, 0, 0);
                break;
            }
        }
        layer.shape.out_w = w;
        layer.shape.out_h = h;
        layer.shape.out_c = c;
        Ok(layer)
    }

    pub fn sources(&self) -> &[usize] {
        &self.layers
    }
}

impl Layer for RouteLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Route
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
        let outputs = self.shape.outputs;
        let mut offset = 0;
        for (&j, &size) in self.layers.iter().zip(&self.sizes) {
            let source = ctx.layer_output(j);
            for b in 0..self.shape.batch {
                let start = b * outputs + offset;
                copy(
                    &source[b * size..(b + 1) * size],
                    &mut self.buffers.output[start..start + size],
                );
            }
            offset += size;
        }
    }

    fn backward(&mut self, ctx: &mut BackwardContext<'_>) {
        let outputs = self.shape.outputs;
        let mut offset = 0;
        for (&j, &size) in self.layers.iter().zip(&self.sizes) {
            if let Some(delta) = ctx.layer_delta_mut(j) {
                for b in 0..self.shape.batch {
                    let start = b * outputs + offset;
                    axpy(
                        1.0,
                        &self.buffers.delta[start..start + size],
                        &mut delta[b * size..(b + 1) * size],
                    );
                }
            }
            offset += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_support::{FixedLayer, Upstream};

    fn sources() -> Vec<Box<dyn Layer>> {
        vec![
            Box::new(FixedLayer::new(&[1.0, 2.0]).with_image(1, 1, 2)),
            Box::new(FixedLayer::new(&[3.0, 4.0, 5.0]).with_image(1, 1, 3)),
        ]
    }

    #[test]
    fn test_concatenates_sources() {
        let mut options = OptionSet::new().with("layers", "-2,-1");
        let previous = sources();
        let mut layer = RouteLayer::from_options(&mut options, 1, 2, &previous).unwrap();
        assert_eq!(layer.sources(), &[0, 1]);
        assert_eq!(layer.shape().outputs, 5);
        assert_eq!(layer.shape().out_c, 5);

        let mut upstream = Upstream::with_layers(previous);
        upstream.forward(&mut layer, false);
        assert_eq!(layer.buffers.output, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_backward_splits_delta() {
        let mut options = OptionSet::new().with("layers", "1,0");
        let previous = sources();
        let mut layer = RouteLayer::from_options(&mut options, 1, 2, &previous).unwrap();
        let mut upstream = Upstream::with_layers(previous);
        upstream.forward(&mut layer, true);
        assert_eq!(layer.buffers.output, vec![3.0, 4.0, 5.0, 1.0, 2.0]);

        layer.buffers.delta.copy_from_slice(&[1.0, 1.0, 1.0, 2.0, 2.0]);
        upstream.backward(&mut layer);
        assert_eq!(upstream.delta(0), &[2.0, 2.0]);
        assert_eq!(upstream.delta(1), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_spatial_mismatch_reports_unknown_geometry() {
        let previous: Vec<Box<dyn Layer>> = vec![
            Box::new(FixedLayer::new(&[0.0; 8]).with_image(2, 2, 2)),
            Box::new(FixedLayer::new(&[0.0; 4]).with_image(1, 1, 4)),
        ];
        let mut options = OptionSet::new().with("layers", "0,1");
        let layer = RouteLayer::from_options(&mut options, 1, 2, &previous).unwrap();
        assert_eq!(layer.shape().outputs, 12);
        assert!(!layer.shape().has_image_output());
    }

    #[test]
    fn test_out_of_range_reference() {
        let mut options = OptionSet::new().with("layers", "-3");
        assert!(RouteLayer::from_options(&mut options, 1, 2, &sources()).is_err());
        assert!(resolve_reference(2, 2, "route").is_err());
    }
}
