//! Activation functions and their derivatives.
//!
//! Derivatives are expressed in terms of the *activated* value, which is what the
//! layers keep in their output buffers during the backward pass.

use log::warn;
use serde::{Deserialize, Serialize};

/// Elementwise nonlinearity applied by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Logistic,
    Loggy,
    #[default]
    Relu,
    Elu,
    Relie,
    Ramp,
    Leaky,
    Tanh,
    Plse,
    Stair,
    Hardtan,
    Lhtan,
}

impl Activation {
    /// Resolve an activation by its configuration name.
    ///
    /// Unknown names log a warning and fall back to `relu`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "linear" => Activation::Linear,
            "logistic" => Activation::Logistic,
            "loggy" => Activation::Loggy,
            "relu" => Activation::Relu,
            "elu" => Activation::Elu,
            "relie" => Activation::Relie,
            "ramp" => Activation::Ramp,
            "leaky" => Activation::Leaky,
            "tanh" => Activation::Tanh,
            "plse" => Activation::Plse,
            "stair" => Activation::Stair,
            "hardtan" => Activation::Hardtan,
            "lhtan" => Activation::Lhtan,
            other => {
                warn!("unknown activation '{other}', using relu");
                Activation::Relu
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Logistic => "logistic",
            Activation::Loggy => "loggy",
            Activation::Relu => "relu",
            Activation::Elu => "elu",
            Activation::Relie => "relie",
            Activation::Ramp => "ramp",
            Activation::Leaky => "leaky",
            Activation::Tanh => "tanh",
            Activation::Plse => "plse",
            Activation::Stair => "stair",
            Activation::Hardtan => "hardtan",
            Activation::Lhtan => "lhtan",
        }
    }

    /// Apply the activation to a single value.
    pub fn activate(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Logistic => 1.0 / (1.0 + (-x).exp()),
            Activation::Loggy => 2.0 / (1.0 + (-x).exp()) - 1.0,
            Activation::Relu => x.max(0.0),
            Activation::Elu => {
                if x >= 0.0 {
                    x
                } else {
                    x.exp() - 1.0
                }
            }
            Activation::Relie => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Activation::Ramp => x.max(0.0) + 0.1 * x,
            Activation::Leaky => {
                if x > 0.0 {
                    x
                } else {
                    0.1 * x
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Plse => {
                if x < -4.0 {
                    0.01 * (x + 4.0)
                } else if x > 4.0 {
                    0.01 * (x - 4.0) + 1.0
                } else {
                    0.125 * x + 0.5
                }
            }
            Activation::Stair => {
                let n = x.floor() as i64;
                if n % 2 == 0 {
                    (x / 2.0).floor()
                } else {
                    (x - n as f32) + (x / 2.0).floor()
                }
            }
            Activation::Hardtan => x.clamp(-1.0, 1.0),
            Activation::Lhtan => {
                if x < 0.0 {
                    0.001 * x
                } else if x > 1.0 {
                    0.001 * (x - 1.0) + 1.0
                } else {
                    x
                }
            }
        }
    }

    /// Derivative of the activation given the activated value `y`.
    pub fn gradient(self, y: f32) -> f32 {
        match self {
            Activation::Linear => 1.0,
            Activation::Logistic => (1.0 - y) * y,
            Activation::Loggy => {
                let p = (y + 1.0) / 2.0;
                2.0 * (1.0 - p) * p
            }
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Elu => {
                if y >= 0.0 {
                    1.0
                } else {
                    y + 1.0
                }
            }
            Activation::Relie => {
                if y > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
            Activation::Ramp => {
                if y > 0.0 {
                    1.1
                } else {
                    0.1
                }
            }
            Activation::Leaky => {
                if y > 0.0 {
                    1.0
                } else {
                    0.1
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Plse => {
                if !(0.0..=1.0).contains(&y) {
                    0.01
                } else {
                    0.125
                }
            }
            Activation::Stair => {
                if y.floor() == y {
                    0.0
                } else {
                    1.0
                }
            }
            Activation::Hardtan => {
                if y > -1.0 && y < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Lhtan => {
                if y > 0.0 && y < 1.0 {
                    1.0
                } else {
                    0.001
                }
            }
        }
    }
}

/// Apply `activation` to every element in place.
pub fn activate_array(values: &mut [f32], activation: Activation) {
    if activation == Activation::Linear {
        return;
    }
    for v in values.iter_mut() {
        *v = activation.activate(*v);
    }
}

/// Multiply `delta` by the activation derivative evaluated at `output`.
pub fn gradient_array(output: &[f32], activation: Activation, delta: &mut [f32]) {
    if activation == Activation::Linear {
        return;
    }
    for (d, &y) in delta.iter_mut().zip(output) {
        *d *= activation.gradient(y);
    }
}
