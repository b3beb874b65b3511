//! Graph builder
//!
//! Turns an ordered list of [`LayerSection`]s into a [`Network`]. The first
//! section is the network block; every following section becomes one layer whose
//! input geometry is the output geometry of the layer before it.
//!
//! # Example
//!
//! ```
//! use rust_neural_engine::architecture::build;
//! use rust_neural_engine::config::{LayerSection, OptionSet};
//!
//! let sections = vec![
//!     LayerSection::new("net", OptionSet::new().with("batch", 2).with("inputs", 3)),
//!     LayerSection::new("connected", OptionSet::new().with("output", 4)),
//!     LayerSection::new("softmax", OptionSet::new()),
//! ];
//! let net = build(sections).unwrap();
//! assert_eq!(net.layer_count(), 2);
//! assert_eq!(net.outputs(), 4);
//! ```

use crate::config::{load_architecture, LayerSection, NetOptions, OptionSet};
use crate::error::{NetError, Result};
use crate::layers::{
    ActivationLayer, AvgPoolLayer, BatchNormLayer, ConnectedLayer, CostLayer, DropoutLayer,
    GruLayer, Layer, LayerKind, LayerOptions, MaxPoolLayer, NormalizationLayer, RnnLayer,
    RouteLayer, ShortcutLayer, SoftmaxLayer,
};
use crate::network::Network;
use crate::optimizers::OptimizerKind;
use crate::utils::SimpleRng;
use log::info;
use std::path::Path;

/// Geometry and settings handed to the constructor of the next layer.
#[derive(Debug, Clone, Copy)]
struct SizeParams {
    index: usize,
    batch: usize,
    time_steps: usize,
    inputs: usize,
    h: usize,
    w: usize,
    c: usize,
    optimizer: OptimizerKind,
}

impl SizeParams {
    fn new(options: &NetOptions) -> Self {
        Self {
            index: 0,
            batch: options.batch,
            time_steps: options.time_steps,
            inputs: options.inputs,
            h: options.height,
            w: options.width,
            c: options.channels,
            optimizer: options.optimizer,
        }
    }

    fn require_image(&self, kind: LayerKind) -> Result<()> {
        if self.h > 0 && self.w > 0 && self.c > 0 {
            Ok(())
        } else {
            Err(NetError::config(format!(
                "layer {} ({kind}) needs an image-shaped input, got {} x {} x {}",
                self.index, self.w, self.h, self.c
            )))
        }
    }
}

fn is_network_block(kind: &str) -> bool {
    matches!(
        kind.trim().trim_start_matches('[').trim_end_matches(']'),
        "net" | "network"
    )
}

/// Build a network from its sections.
///
/// # Errors
///
/// `Config` when the first section is not the network block, a layer kind is
/// unknown, a required option is missing or malformed, a layer reference is
/// out of range, or a layer's shape precondition is not met.
pub fn build(sections: Vec<LayerSection>) -> Result<Network> {
    let mut sections = sections.into_iter();
    let mut net_section = sections
        .next()
        .ok_or_else(|| NetError::config("architecture has no sections"))?;
    if !is_network_block(&net_section.kind) {
        return Err(NetError::config(format!(
            "first section must be the network block, found '{}'",
            net_section.kind
        )));
    }
    let options = NetOptions::from_options(&mut net_section.options)?;
    net_section.options.warn_unused("net");

    let mut rng = SimpleRng::new(options.seed);
    let mut params = SizeParams::new(&options);
    let mut layers: Vec<Box<dyn Layer>> = Vec::new();

    for (index, mut section) in sections.enumerate() {
        params.index = index;
        let kind = LayerKind::from_name(&section.kind).ok_or_else(|| {
            NetError::config(format!("layer {index}: unknown type '{}'", section.kind))
        })?;
        let mut layer = make_layer(kind, &mut section.options, &params, &layers, &mut rng)?;
        *layer.options_mut() = LayerOptions::from_options(&mut section.options)?;
        section.options.warn_unused(kind.name());

        let shape = *layer.shape();
        info!(
            "{index:>3} {:<14} {:>4} x{:>4} x{:>4}  ->  {:>4} x{:>4} x{:>4}  ({} outputs)",
            kind.name(),
            shape.in_w,
            shape.in_h,
            shape.in_c,
            shape.out_w,
            shape.out_h,
            shape.out_c,
            shape.outputs
        );
        params.h = shape.out_h;
        params.w = shape.out_w;
        params.c = shape.out_c;
        params.inputs = shape.outputs;
        layers.push(layer);
    }

    let last = layers
        .last()
        .ok_or_else(|| NetError::config("architecture has no layers"))?;
    let truths = match last.options().truth {
        0 => last.shape().outputs,
        truth => truth,
    };
    Ok(Network::new(options, layers, truths, rng))
}

/// Read a JSON architecture description and build it.
pub fn build_from_file(path: impl AsRef<Path>) -> Result<Network> {
    build(load_architecture(path)?)
}

fn make_layer(
    kind: LayerKind,
    options: &mut OptionSet,
    p: &SizeParams,
    previous: &[Box<dyn Layer>],
    rng: &mut SimpleRng,
) -> Result<Box<dyn Layer>> {
    let layer: Box<dyn Layer> = match kind {
        LayerKind::Connected => Box::new(ConnectedLayer::from_options(
            options,
            p.batch,
            p.inputs,
            p.optimizer,
            rng,
        )?),
        LayerKind::Rnn => Box::new(RnnLayer::from_options(
            options,
            p.batch,
            p.inputs,
            p.time_steps,
            p.optimizer,
            rng,
        )?),
        LayerKind::Gru => Box::new(GruLayer::from_options(
            options,
            p.batch,
            p.inputs,
            p.time_steps,
            p.optimizer,
            rng,
        )?),
        LayerKind::BatchNorm => {
            p.require_image(kind)?;
            Box::new(BatchNormLayer::new(p.batch, p.w, p.h, p.c, p.optimizer))
        }
        LayerKind::Normalization => {
            p.require_image(kind)?;
            Box::new(NormalizationLayer::from_options(
                options, p.batch, p.w, p.h, p.c,
            )?)
        }
        LayerKind::Softmax => Box::new(SoftmaxLayer::from_options(
            options, p.batch, p.inputs, p.w, p.h, p.c,
        )?),
        LayerKind::MaxPool => {
            p.require_image(kind)?;
            Box::new(MaxPoolLayer::from_options(
                options, p.batch, p.w, p.h, p.c,
            )?)
        }
        LayerKind::AvgPool => {
            p.require_image(kind)?;
            Box::new(AvgPoolLayer::new(p.batch, p.w, p.h, p.c))
        }
        LayerKind::Dropout => Box::new(DropoutLayer::from_options(
            options, p.batch, p.inputs, p.w, p.h, p.c, p.index,
        )?),
        LayerKind::Activation => Box::new(ActivationLayer::from_options(
            options, p.batch, p.inputs, p.w, p.h, p.c,
        )?),
        LayerKind::Cost => Box::new(CostLayer::from_options(options, p.batch, p.inputs)?),
        LayerKind::Route => Box::new(RouteLayer::from_options(
            options, p.batch, p.index, previous,
        )?),
        LayerKind::Shortcut => Box::new(ShortcutLayer::from_options(
            options, p.batch, p.index, p.w, p.h, p.c, previous,
        )?),
    };
    Ok(layer)
}
