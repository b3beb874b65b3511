//! Configuration structures for network construction.
//!
//! An architecture is an ordered list of [`LayerSection`]s, each holding a kind
//! name and a flat [`OptionSet`] of string key/value pairs. The first section is
//! the network block, turned into typed settings by [`NetOptions::from_options`].
//!
//! Lookups record which keys were read so the builder can report options that
//! were supplied but never used.

use crate::error::{NetError, Result};
use crate::optimizers::OptimizerKind;
use crate::utils::lr_scheduler::{LearningRatePolicy, LearningRateSchedule};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
struct OptionEntry {
    key: String,
    value: String,
    used: bool,
}

/// Flat set of `key = value` options for one section.
///
/// # Example
///
/// ```
/// use rust_neural_engine::config::OptionSet;
///
/// let mut options = OptionSet::new().with("output", "10").with("activation", "linear");
/// assert_eq!(options.find_usize("output", 1).unwrap(), 10);
/// assert_eq!(options.find_str("activation", "logistic"), "linear");
/// assert!(options.unused().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
    entries: Vec<OptionEntry>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace an option.
    pub fn insert(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => {
                entry.value = value;
                entry.used = false;
            }
            None => self.entries.push(OptionEntry {
                key: key.to_string(),
                value,
                used: false,
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Raw lookup that marks the key as used.
    pub fn find(&mut self, key: &str) -> Option<&str> {
        let entry = self.entries.iter_mut().find(|e| e.key == key)?;
        entry.used = true;
        Some(entry.value.as_str())
    }

    fn parse<T: FromStr>(&mut self, key: &str) -> Result<Option<T>> {
        match self.find(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                NetError::config(format!("option '{key}' has invalid value '{raw}'"))
            }),
        }
    }

    fn parse_or<T: FromStr + std::fmt::Display>(
        &mut self,
        key: &str,
        default: T,
        quiet: bool,
    ) -> Result<T> {
        match self.parse(key)? {
            Some(value) => Ok(value),
            None => {
                if !quiet {
                    debug!("{key}: using default '{default}'");
                }
                Ok(default)
            }
        }
    }

    pub fn find_int(&mut self, key: &str, default: i32) -> Result<i32> {
        self.parse_or(key, default, false)
    }

    pub fn find_int_quiet(&mut self, key: &str, default: i32) -> Result<i32> {
        self.parse_or(key, default, true)
    }

    /// Non-negative integer lookup.
    pub fn find_usize(&mut self, key: &str, default: usize) -> Result<usize> {
        self.parse_or(key, default, false)
    }

    pub fn find_usize_quiet(&mut self, key: &str, default: usize) -> Result<usize> {
        self.parse_or(key, default, true)
    }

    pub fn find_float(&mut self, key: &str, default: f32) -> Result<f32> {
        self.parse_or(key, default, false)
    }

    pub fn find_float_quiet(&mut self, key: &str, default: f32) -> Result<f32> {
        self.parse_or(key, default, true)
    }

    /// Integer flag: any non-zero value is true.
    pub fn find_flag(&mut self, key: &str) -> Result<bool> {
        Ok(self.find_int_quiet(key, 0)? != 0)
    }

    pub fn find_str(&mut self, key: &str, default: &str) -> String {
        match self.find(key) {
            Some(value) => value.to_string(),
            None => {
                debug!("{key}: using default '{default}'");
                default.to_string()
            }
        }
    }

    pub fn find_str_quiet(&mut self, key: &str) -> Option<String> {
        self.find(key).map(str::to_string)
    }

    /// Comma-separated list, `None` when the key is absent.
    pub fn find_list<T: FromStr>(&mut self, key: &str) -> Result<Option<Vec<T>>> {
        let Some(raw) = self.find(key) else {
            return Ok(None);
        };
        let raw = raw.to_string();
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|_| {
                    NetError::config(format!("option '{key}' has invalid list item '{item}'"))
                })
            })
            .collect::<Result<Vec<T>>>()
            .map(Some)
    }

    /// Comma-separated list that must be present.
    pub fn require_list<T: FromStr>(&mut self, key: &str) -> Result<Vec<T>> {
        self.find_list(key)?
            .ok_or_else(|| NetError::config(format!("missing required option '{key}'")))
    }

    pub fn require_int(&mut self, key: &str) -> Result<i32> {
        self.parse(key)?
            .ok_or_else(|| NetError::config(format!("missing required option '{key}'")))
    }

    /// Keys that were supplied but never looked up.
    pub fn unused(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.used)
            .map(|e| e.key.as_str())
            .collect()
    }

    /// Log every unused key of the section named `section`.
    pub fn warn_unused(&self, section: &str) {
        for key in self.unused() {
            warn!("[{section}] unused option '{key}'");
        }
    }
}

/// One record of an architecture description.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSection {
    pub kind: String,
    pub options: OptionSet,
}

impl LayerSection {
    pub fn new(kind: &str, options: OptionSet) -> Self {
        Self {
            kind: kind.to_string(),
            options,
        }
    }
}

/// JSON form of a section: `{"type": "connected", "options": {"output": 10}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    options: BTreeMap<String, Value>,
}

fn value_to_option(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| value_to_option(key, item))
            .collect::<Result<Vec<_>>>()
            .map(|parts| parts.join(",")),
        Value::Null | Value::Object(_) => Err(NetError::config(format!(
            "option '{key}' must be a scalar or a list"
        ))),
    }
}

/// Parse an architecture description from a JSON string.
pub fn parse_architecture(json: &str) -> Result<Vec<LayerSection>> {
    let raw: Vec<RawSection> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|section| {
            let mut options = OptionSet::new();
            for (key, value) in &section.options {
                options.insert(key, value_to_option(key, value)?);
            }
            Ok(LayerSection {
                kind: section.kind,
                options,
            })
        })
        .collect()
}

/// Loads an architecture description from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_neural_engine::config::load_architecture;
///
/// let sections = load_architecture("architectures/rnn_text.json").unwrap();
/// assert_eq!(sections[0].kind, "net");
/// ```
pub fn load_architecture(path: impl AsRef<Path>) -> Result<Vec<LayerSection>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| NetError::file(path, e))?;
    parse_architecture(&contents)
}

/// Typed view of the network block.
#[derive(Debug, Clone, PartialEq)]
pub struct NetOptions {
    /// Rows per forward pass: `batch / subdivisions * time_steps`.
    pub batch: usize,
    pub subdivisions: usize,
    pub time_steps: usize,
    pub momentum: f32,
    pub decay: f32,
    pub optimizer: OptimizerKind,
    pub schedule: LearningRateSchedule,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub inputs: usize,
    /// Training length in batches; informational outside the `poly` policy.
    pub max_batches: usize,
    /// Seed of the network's random generator.
    pub seed: u64,
}

impl NetOptions {
    /// Read the network block.
    ///
    /// # Errors
    ///
    /// `Config` when no input size can be derived, when `subdivisions` or
    /// `time_steps` is zero, or when the `steps` policy lacks `steps`/`scales`.
    pub fn from_options(options: &mut OptionSet) -> Result<Self> {
        let raw_batch = options.find_usize("batch", 1)?;
        let learning_rate = options.find_float("learning_rate", 0.001)?;
        let momentum = options.find_float("momentum", 0.9)?;
        let decay = options.find_float("decay", 0.0001)?;
        let subdivisions = options.find_usize("subdivisions", 1)?;
        let time_steps = options.find_usize_quiet("time_steps", 1)?;
        if subdivisions == 0 || time_steps == 0 {
            return Err(NetError::config(
                "subdivisions and time_steps must be positive",
            ));
        }
        let batch = raw_batch / subdivisions * time_steps;
        if batch == 0 {
            return Err(NetError::config(format!(
                "batch {raw_batch} is smaller than subdivisions {subdivisions}"
            )));
        }

        let optimizer = if options.find_flag("adam")? {
            OptimizerKind::Adam {
                beta1: options.find_float("B1", 0.9)?,
                beta2: options.find_float("B2", 0.999)?,
                epsilon: options.find_float("eps", 0.00000001)?,
            }
        } else {
            OptimizerKind::Sgd
        };

        let height = options.find_usize_quiet("height", 0)?;
        let width = options.find_usize_quiet("width", 0)?;
        let channels = options.find_usize_quiet("channels", 0)?;
        let inputs = options.find_usize_quiet("inputs", height * width * channels)?;
        if inputs == 0 && !(height > 0 && width > 0 && channels > 0) {
            return Err(NetError::config("no input parameters supplied"));
        }

        let policy_name = options.find_str("policy", "constant");
        let burn_in = options.find_usize_quiet("burn_in", 0)?;
        let power = options.find_float_quiet("power", 4.0)?;
        let policy = match policy_name.as_str() {
            "constant" => LearningRatePolicy::Constant,
            "step" => LearningRatePolicy::Step {
                step: options.find_usize("step", 1)?,
                scale: options.find_float("scale", 1.0)?,
            },
            "steps" => {
                let steps = options.find_list::<usize>("steps")?;
                let scales = options.find_list::<f32>("scales")?;
                match (steps, scales) {
                    (Some(steps), Some(scales)) if steps.len() == scales.len() => {
                        LearningRatePolicy::Steps { steps, scales }
                    }
                    (Some(_), Some(_)) => {
                        return Err(NetError::config(
                            "steps and scales must have the same length",
                        ))
                    }
                    _ => {
                        return Err(NetError::config(
                            "steps policy must have steps and scales",
                        ))
                    }
                }
            }
            "exp" => LearningRatePolicy::Exp {
                gamma: options.find_float("gamma", 1.0)?,
            },
            "sigmoid" => LearningRatePolicy::Sigmoid {
                gamma: options.find_float("gamma", 1.0)?,
                step: options.find_usize("step", 1)?,
            },
            "poly" => LearningRatePolicy::Poly {
                max_batches: options.find_usize("max_batches", 0)?,
            },
            "random" => LearningRatePolicy::Random,
            other => {
                warn!("unknown learning rate policy '{other}', using constant");
                LearningRatePolicy::Constant
            }
        };
        let max_batches = options.find_usize("max_batches", 0)?;
        let seed = options.find_usize_quiet("seed", 0)? as u64;

        Ok(Self {
            batch,
            subdivisions,
            time_steps,
            momentum,
            decay,
            optimizer,
            schedule: LearningRateSchedule {
                base_rate: learning_rate,
                burn_in,
                power,
                policy,
            },
            height,
            width,
            channels,
            inputs,
            max_batches,
            seed,
        })
    }
}
