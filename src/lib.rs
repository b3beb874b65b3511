//! Rust Neural Engine Library
//!
//! A layer-based neural network execution engine: fully connected, recurrent
//! (RNN, GRU) and normalization layers, graph edges (route, shortcut), a graph
//! builder driven by architecture descriptions and a binary weight codec.
//!
//! # Modules
//!
//! - `architecture`: Graph builder turning layer sections into a network
//! - `config`: Option sets, network options and JSON architecture loading
//! - `error`: Error type shared across the crate
//! - `kernels`: Numeric kernels (GEMM, elementwise and normalization helpers)
//! - `layers`: Layer trait and implementations (Connected, RNN, GRU, etc.)
//! - `network`: Forward, backward and update over a built network
//! - `optimizers`: Optimizer trait and implementations (SGD, Adam)
//! - `utils`: Shared utilities (RNG, activation functions, learning-rate policies)
//! - `weights`: Binary weight save/load

pub mod architecture;
pub mod config;
pub mod error;
pub mod kernels;
pub mod layers;
pub mod network;
pub mod optimizers;
pub mod utils;
pub mod weights;

pub use architecture::{build, build_from_file};
pub use error::{NetError, Result};
pub use network::Network;
