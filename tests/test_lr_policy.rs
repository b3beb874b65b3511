// Tests for learning rate policies as configured on a network.

use approx::assert_relative_eq;
use rust_neural_engine::config::{LayerSection, OptionSet};
use rust_neural_engine::{build, NetError, Network};

fn net_with(policy: OptionSet) -> rust_neural_engine::Result<Network> {
    let options = policy
        .with("batch", 8)
        .with("subdivisions", 2)
        .with("inputs", 2)
        .with("learning_rate", 0.1);
    build(vec![
        LayerSection::new("net", options),
        LayerSection::new("connected", OptionSet::new().with("output", 1)),
    ])
}

/// Rate once `batches` optimizer steps have completed.
fn rate_at(net: &mut Network, batches: usize) -> f32 {
    // a step covers batch * subdivisions samples
    net.set_seen(batches * 8);
    net.current_rate()
}

#[test]
fn test_constant_policy() {
    let mut net = net_with(OptionSet::new()).unwrap();
    assert_relative_eq!(rate_at(&mut net, 0), 0.1);
    assert_relative_eq!(rate_at(&mut net, 5000), 0.1);
}

#[test]
fn test_step_policy_uses_completed_batches() {
    let mut net = net_with(
        OptionSet::new()
            .with("policy", "step")
            .with("step", 10)
            .with("scale", 0.5),
    )
    .unwrap();
    assert_eq!(net.batch(), 4);
    assert_relative_eq!(rate_at(&mut net, 9), 0.1);
    assert_relative_eq!(rate_at(&mut net, 10), 0.05);
    assert_relative_eq!(rate_at(&mut net, 25), 0.025);

    // seen counts samples: 79 of them are still short of ten full steps
    net.set_seen(79);
    assert_eq!(net.current_batch(), 9);
    assert_relative_eq!(net.current_rate(), 0.1);
}

#[test]
fn test_steps_policy_with_burn_in() {
    let mut net = net_with(
        OptionSet::new()
            .with("policy", "steps")
            .with("steps", "100,200")
            .with("scales", "0.1,0.5")
            .with("burn_in", 10)
            .with("power", 2),
    )
    .unwrap();
    assert_relative_eq!(rate_at(&mut net, 0), 0.0);
    assert_relative_eq!(rate_at(&mut net, 5), 0.1 * 0.25, epsilon = 1e-7);
    assert_relative_eq!(rate_at(&mut net, 50), 0.1);
    assert_relative_eq!(rate_at(&mut net, 100), 0.01, epsilon = 1e-7);
    assert_relative_eq!(rate_at(&mut net, 250), 0.005, epsilon = 1e-7);
}

#[test]
fn test_poly_policy_reaches_zero() {
    let mut net = net_with(
        OptionSet::new()
            .with("policy", "poly")
            .with("power", 1)
            .with("max_batches", 100),
    )
    .unwrap();
    assert_relative_eq!(rate_at(&mut net, 50), 0.05, epsilon = 1e-7);
    assert_relative_eq!(rate_at(&mut net, 100), 0.0);
    assert_relative_eq!(rate_at(&mut net, 150), 0.0);
}

#[test]
fn test_exp_and_sigmoid_policies() {
    let mut exp = net_with(OptionSet::new().with("policy", "exp").with("gamma", 0.9)).unwrap();
    assert_relative_eq!(rate_at(&mut exp, 2), 0.1 * 0.81, epsilon = 1e-7);

    let mut sigmoid = net_with(
        OptionSet::new()
            .with("policy", "sigmoid")
            .with("gamma", 1)
            .with("step", 20),
    )
    .unwrap();
    assert_relative_eq!(rate_at(&mut sigmoid, 20), 0.05, epsilon = 1e-7);
    assert!(rate_at(&mut sigmoid, 40) < 1e-9);
}

#[test]
fn test_random_policy_stays_below_base_rate() {
    let mut net = net_with(OptionSet::new().with("policy", "random")).unwrap();
    for batches in 0..20 {
        let rate = rate_at(&mut net, batches);
        assert!((0.0..=0.1).contains(&rate));
    }
}

#[test]
fn test_unknown_policy_falls_back_to_constant() {
    let mut net = net_with(OptionSet::new().with("policy", "cosine")).unwrap();
    assert_relative_eq!(rate_at(&mut net, 1234), 0.1);
}

#[test]
fn test_steps_policy_requires_matching_lists() {
    let mismatched = net_with(
        OptionSet::new()
            .with("policy", "steps")
            .with("steps", "10,20")
            .with("scales", "0.1"),
    );
    assert!(matches!(mismatched, Err(NetError::Config(_))));

    let missing = net_with(OptionSet::new().with("policy", "steps").with("steps", "10"));
    assert!(matches!(missing, Err(NetError::Config(_))));
}
