use std::{fs, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Result, TaskErr};

/// The learning rate a task gets when none is given.
pub const DEFAULT_LR: f32 = 1e-4;

/// The hyperparameter record of a task.
///
/// It's built once, passed by value into the task and persisted alongside its parameters. Every
/// way of obtaining one, deserialization included, goes through `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHParams")]
pub struct HParams {
    lr: f32,
}

/// The unchecked wire form of `HParams`.
#[derive(Deserialize)]
struct RawHParams {
    lr: f32,
}

impl TryFrom<RawHParams> for HParams {
    type Error = TaskErr;

    fn try_from(raw: RawHParams) -> Result<Self> {
        Self::new(raw.lr)
    }
}

impl Default for HParams {
    fn default() -> Self {
        Self { lr: DEFAULT_LR }
    }
}

impl HParams {
    /// Creates a new `HParams`.
    ///
    /// # Arguments
    /// * `lr` - The learning rate, must be finite and positive.
    ///
    /// # Returns
    /// A new `HParams` instance or an error if the learning rate is invalid.
    pub fn new(lr: f32) -> Result<Self> {
        let hparams = Self { lr };
        hparams.validate()?;
        Ok(hparams)
    }

    /// The learning rate.
    pub fn lr(&self) -> f32 {
        self.lr
    }

    /// Checks that every field holds a usable value.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(TaskErr::InvalidHParam {
                name: "lr",
                value: self.lr,
            });
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a record from its json representation.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        debug!(path:? = path, lr = self.lr; "saved hyperparameters");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// A snapshot of a task: its hyperparameters and its flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub hparams: HParams,
    pub parameters: Vec<f32>,
}

impl Checkpoint {
    /// Creates a new `Checkpoint`.
    ///
    /// # Arguments
    /// * `hparams` - The task's hyperparameters.
    /// * `parameters` - A copy of the task's parameters.
    pub fn new(hparams: HParams, parameters: Vec<f32>) -> Self {
        Self {
            hparams,
            parameters,
        }
    }

    /// Checks that the checkpoint can be read back once written: json has no representation
    /// for `NaN` nor infinities.
    pub fn validate(&self) -> Result<()> {
        self.hparams.validate()?;

        match self.parameters.iter().position(|p| !p.is_finite()) {
            Some(index) => Err(TaskErr::NonFiniteParameter {
                index,
                value: self.parameters[index],
            }),
            None => Ok(()),
        }
    }

    /// Writes the checkpoint as json to `path`.
    ///
    /// # Returns
    /// An error, without touching `path`, if any parameter is not finite.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;

        let path = path.as_ref();
        fs::write(path, serde_json::to_vec(self)?)?;
        debug!(path:? = path, nparams = self.parameters.len(); "saved checkpoint");
        Ok(())
    }

    /// Reads a checkpoint back from `path`, validating its hyperparameters.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let checkpoint: Self = serde_json::from_slice(&fs::read(path)?)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}
