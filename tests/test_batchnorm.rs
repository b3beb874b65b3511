// Tests for batch normalization: standalone layers, normalized connected
// layers, folding statistics into weights and selective loading of scales.

use approx::assert_relative_eq;
use rust_neural_engine::config::{LayerSection, OptionSet};
use rust_neural_engine::{build, weights, Network};
use std::fs;
use tempfile::tempdir;

fn image_net() -> Network {
    build(vec![
        LayerSection::new(
            "net",
            OptionSet::new()
                .with("batch", 4)
                .with("height", 2)
                .with("width", 2)
                .with("channels", 2),
        ),
        LayerSection::new("batchnorm", OptionSet::new()),
    ])
    .unwrap()
}

fn image_input() -> Vec<f32> {
    (0..32).map(|i| ((i * 7) % 11) as f32 - 3.0).collect()
}

/// Values of channel `f` across the batch, in `batch × channels × spatial` layout.
fn channel(values: &[f32], f: usize) -> Vec<f32> {
    (0..4)
        .flat_map(|b| values[b * 8 + f * 4..b * 8 + f * 4 + 4].to_vec())
        .collect()
}

fn mean_and_variance(values: &[f32]) -> (f32, f32) {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0);
    (mean, variance)
}

// ============================================================================
// Standalone Layer
// ============================================================================

#[test]
fn test_training_normalizes_each_channel() {
    let mut net = image_net();
    net.set_training(true);
    let output = net.forward(&image_input()).unwrap().to_vec();
    for f in 0..2 {
        let (mean, variance) = mean_and_variance(&channel(&output, f));
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        assert_relative_eq!(variance, 1.0, epsilon = 1e-4);
    }
}

#[test]
fn test_inference_uses_rolling_statistics() {
    let mut net = image_net();
    let input = image_input();
    net.set_training(true);
    net.forward(&input).unwrap();

    net.set_training(false);
    let output = net.forward(&input).unwrap().to_vec();
    for f in 0..2 {
        let x = channel(&input, f);
        let (mean, variance) = mean_and_variance(&x);
        // one update from zeroed statistics with momentum 0.95
        let (rolling_mean, rolling_variance) = (0.05 * mean, 0.05 * variance);
        let denom = rolling_variance.sqrt() + 0.000001;
        for (o, v) in channel(&output, f).iter().zip(&x) {
            assert_relative_eq!(*o, (v - rolling_mean) / denom, epsilon = 1e-4);
        }
    }
}

#[test]
fn test_standalone_layer_learns_scales() {
    let mut net = build(vec![
        LayerSection::new(
            "net",
            OptionSet::new()
                .with("batch", 4)
                .with("height", 2)
                .with("width", 2)
                .with("channels", 2)
                .with("learning_rate", 0.1)
                .with("momentum", 0)
                .with("decay", 0),
        ),
        LayerSection::new("batchnorm", OptionSet::new()),
        LayerSection::new("cost", OptionSet::new()),
    ])
    .unwrap();
    let input = image_input();
    // doubling every normalized value is reachable through the scales alone
    net.set_training(true);
    net.forward(&input).unwrap();
    let target: Vec<f32> = net.layers()[0]
        .buffers()
        .unwrap()
        .output
        .iter()
        .map(|v| 2.0 * v)
        .collect();

    let initial = net.train_batch(&input, &target).unwrap();
    let mut last = initial;
    for _ in 0..50 {
        last = net.train_batch(&input, &target).unwrap();
    }
    assert!(last < initial * 0.01, "cost went from {initial} to {last}");
}

// ============================================================================
// Normalized Connected Layers
// ============================================================================

fn normalized_connected(seed: u64, dontloadscales: bool) -> Network {
    let mut connected = OptionSet::new()
        .with("output", 3)
        .with("batch_normalize", 1)
        .with("activation", "linear");
    if dontloadscales {
        connected.insert("dontloadscales", 1);
    }
    build(vec![
        LayerSection::new(
            "net",
            OptionSet::new()
                .with("batch", 4)
                .with("inputs", 2)
                .with("learning_rate", 0.05)
                .with("decay", 0)
                .with("seed", seed),
        ),
        LayerSection::new("connected", connected),
        LayerSection::new("cost", OptionSet::new()),
    ])
    .unwrap()
}

const INPUT: [f32; 8] = [0.5, 1.0, -1.0, 0.25, 2.0, -0.5, 0.0, 1.5];
const TRUTH: [f32; 12] = [
    1.0, 0.0, -1.0, 0.5, 0.5, 0.5, -1.0, 2.0, 0.0, 0.0, 1.0, -0.5,
];

fn snapshot(net: &Network) -> Vec<u8> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bn.weights");
    weights::save(net, &path).unwrap();
    fs::read(path).unwrap()
}

#[test]
fn test_denormalize_preserves_inference_output() {
    let mut net = normalized_connected(6, false);
    for _ in 0..40 {
        net.train_batch(&INPUT, &TRUTH).unwrap();
    }
    net.set_training(false);
    net.forward(&INPUT).unwrap();
    let before = net.layers()[0].buffers().unwrap().output.clone();

    net.denormalize();
    net.forward(&INPUT).unwrap();
    let after = &net.layers()[0].buffers().unwrap().output;
    for (a, b) in after.iter().zip(&before) {
        assert_relative_eq!(a, b, epsilon = 1e-3, max_relative = 1e-3);
    }
}

#[test]
fn test_dontloadscales_keeps_normalization_state() {
    let mut source = normalized_connected(1, false);
    for _ in 0..5 {
        source.train_batch(&INPUT, &TRUTH).unwrap();
    }
    let mut target = normalized_connected(2, true);
    let original = snapshot(&target);

    let dir = tempdir().unwrap();
    let path = dir.path().join("source.weights");
    weights::save(&source, &path).unwrap();
    weights::load(&mut target, &path).unwrap();
    let loaded = snapshot(&target);
    let expected = snapshot(&source);

    // biases, then scales with rolling mean and variance, then weights
    let biases = 16..16 + 4 * 3;
    let norm = biases.end..biases.end + 4 * 9;
    let weights = norm.end..loaded.len();
    assert_eq!(&loaded[biases.clone()], &expected[biases]);
    assert_eq!(&loaded[norm.clone()], &original[norm]);
    assert_eq!(&loaded[weights.clone()], &expected[weights]);
}
