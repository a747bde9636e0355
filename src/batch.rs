use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::{Result, TaskErr};

/// A mapping from named input channels to arrays shaped `(samples, tasks, *)`.
///
/// Every channel agrees on the two leading axes. Targets and predictions use the same type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    channels: BTreeMap<String, ArrayD<f32>>,
    dims: Option<(usize, usize)>,
}

impl Batch {
    /// Returns a new empty `Batch`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `Batch` from `(name, array)` pairs.
    ///
    /// # Returns
    /// The batch or the first shape error found.
    pub fn from_channels<I, S>(channels: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ArrayD<f32>)>,
        S: Into<String>,
    {
        let mut batch = Self::new();
        for (name, array) in channels {
            batch.insert(name, array)?;
        }

        Ok(batch)
    }

    /// Adds or replaces a channel.
    ///
    /// # Arguments
    /// * `name` - The channel's name.
    /// * `array` - Its data, with at least the `(samples, tasks)` axes.
    ///
    /// # Returns
    /// An error if the array has less than two axes or disagrees with the other channels.
    pub fn insert<S: Into<String>>(&mut self, name: S, array: ArrayD<f32>) -> Result<()> {
        let shape = array.shape();
        if shape.len() < 2 {
            return Err(TaskErr::RankMismatch {
                what: "batch channel",
                got: shape.len(),
                min: 2,
            });
        }

        let name = name.into();
        let dims = (shape[0], shape[1]);

        // Replacing the only channel may change the batch's leading axes.
        let only_this = self.channels.len() == 1 && self.channels.contains_key(&name);
        match self.dims {
            Some(expected) if expected != dims && !only_this => {
                return Err(TaskErr::ShapeMismatch {
                    what: "batch channel (samples, tasks)",
                    got: vec![dims.0, dims.1],
                    expected: vec![expected.0, expected.1],
                });
            }
            _ => self.dims = Some(dims),
        }

        self.channels.insert(name, array);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.channels.get(name)
    }

    /// Like `get`, but a missing channel is an error.
    pub fn channel(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.get(name).ok_or_else(|| TaskErr::MissingChannel {
            name: name.to_string(),
        })
    }

    /// The amount of samples, zero for an empty batch.
    pub fn samples(&self) -> usize {
        self.dims.map(|(samples, _)| samples).unwrap_or_default()
    }

    /// The amount of tasks, zero for an empty batch.
    pub fn tasks(&self) -> usize {
        self.dims.map(|(_, tasks)| tasks).unwrap_or_default()
    }

    /// The amount of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }
}
