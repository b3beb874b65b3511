// Tests for dropout working in place on the layer before it.

use approx::assert_relative_eq;
use rust_neural_engine::config::{LayerSection, OptionSet};
use rust_neural_engine::{build, NetError, Network};

fn net_with_dropout(probability: Option<f32>) -> Network {
    let mut sections = vec![
        LayerSection::new(
            "net",
            OptionSet::new()
                .with("batch", 2)
                .with("inputs", 4)
                .with("learning_rate", 0.05)
                .with("momentum", 0.5)
                .with("decay", 0)
                .with("seed", 12),
        ),
        LayerSection::new(
            "connected",
            OptionSet::new()
                .with("output", 6)
                .with("activation", "linear"),
        ),
    ];
    if let Some(p) = probability {
        sections.push(LayerSection::new(
            "dropout",
            OptionSet::new().with("probability", p),
        ));
    }
    sections.push(LayerSection::new(
        "connected",
        OptionSet::new()
            .with("output", 2)
            .with("activation", "linear"),
    ));
    sections.push(LayerSection::new("cost", OptionSet::new()));
    build(sections).unwrap()
}

const INPUT: [f32; 8] = [0.5, -1.0, 0.25, 2.0, 1.0, 0.0, -0.5, 0.75];
const TRUTH: [f32; 4] = [1.0, -1.0, 0.5, 0.0];

#[test]
fn test_network_output_follows_alias() {
    let mut net = build(vec![
        LayerSection::new("net", OptionSet::new().with("batch", 2).with("inputs", 4)),
        LayerSection::new("connected", OptionSet::new().with("output", 6)),
        LayerSection::new("dropout", OptionSet::new().with("probability", 0.5)),
    ])
    .unwrap();
    assert_eq!(net.outputs(), 6);
    assert!(net.layers()[1].buffers().is_none());
    assert_eq!(net.layers()[1].alias_of(), Some(0));

    let output = net.forward(&INPUT).unwrap().to_vec();
    assert_eq!(output.len(), 12);
    assert_eq!(&output[..], &net.layers()[0].buffers().unwrap().output[..]);
}

#[test]
fn test_training_drops_or_scales_each_value() {
    let mut net = build(vec![
        LayerSection::new(
            "net",
            OptionSet::new().with("batch", 2).with("inputs", 4).with("seed", 8),
        ),
        LayerSection::new(
            "connected",
            OptionSet::new()
                .with("output", 50)
                .with("activation", "linear"),
        ),
        LayerSection::new("dropout", OptionSet::new().with("probability", 0.25)),
    ])
    .unwrap();
    let clean = net.forward(&INPUT).unwrap().to_vec();

    net.set_training(true);
    let dropped = net.forward(&INPUT).unwrap().to_vec();
    let mut zeros = 0;
    for (d, c) in dropped.iter().zip(&clean) {
        if *d == 0.0 {
            zeros += 1;
        } else {
            assert_relative_eq!(*d, c / 0.75, epsilon = 1e-5);
        }
    }
    assert!(zeros > 0 && zeros < dropped.len());
}

#[test]
fn test_zero_probability_trains_like_no_dropout() {
    let mut plain = net_with_dropout(None);
    let mut with_dropout = net_with_dropout(Some(0.0));
    for _ in 0..10 {
        let a = plain.train_batch(&INPUT, &TRUTH).unwrap();
        let b = with_dropout.train_batch(&INPUT, &TRUTH).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn test_training_through_dropout_learns() {
    let mut net = net_with_dropout(Some(0.1));
    let initial = net.train_batch(&INPUT, &TRUTH).unwrap();
    for _ in 0..300 {
        net.train_batch(&INPUT, &TRUTH).unwrap();
    }
    net.set_training(false);
    net.forward(&INPUT).unwrap();
    let prediction = &net.layers()[2].buffers().unwrap().output;
    let error: f32 = prediction
        .iter()
        .zip(&TRUTH)
        .map(|(p, t)| (t - p) * (t - p))
        .sum();
    assert!(error < initial, "error {error}, initial cost {initial}");
}

#[test]
fn test_invalid_placements_rejected() {
    let first = build(vec![
        LayerSection::new("net", OptionSet::new().with("inputs", 4)),
        LayerSection::new("dropout", OptionSet::new()),
    ]);
    assert!(matches!(first, Err(NetError::Config(_))));

    let certain = build(vec![
        LayerSection::new("net", OptionSet::new().with("inputs", 4)),
        LayerSection::new("connected", OptionSet::new().with("output", 2)),
        LayerSection::new("dropout", OptionSet::new().with("probability", 1.0)),
    ]);
    assert!(matches!(certain, Err(NetError::Config(_))));
}
