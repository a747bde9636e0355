use std::collections::BTreeMap;

use log::{debug, info};

use crate::{Result, task::Task};

/// A typed request from a callback to change something on the task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// Sets the named scalar attribute of the task.
    Attribute { name: String, value: f32 },
}

impl TaskUpdate {
    pub fn attribute<S: Into<String>>(name: S, value: f32) -> Self {
        Self::Attribute {
            name: name.into(),
            value,
        }
    }

    /// The name of what this update touches.
    pub fn name(&self) -> &str {
        match self {
            TaskUpdate::Attribute { name, .. } => name,
        }
    }
}

/// A read-only view of the engine's progress, handed to every hook.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrainerState {
    pub epoch: usize,
    pub global_step: usize,
    pub max_epochs: Option<usize>,
}

/// The lifecycle points at which the engine calls its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    TrainStart,
    TrainEpochStart,
    TrainEpochEnd,
    TrainEnd,
}

/// An observer the engine invokes at lifecycle points.
///
/// Hooks can't touch the task directly, they return the updates they want applied.
pub trait Callback {
    /// Called once, before the first epoch.
    fn on_train_start(&mut self, _state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
        Vec::new()
    }

    /// Called at the start of every training epoch, with `state.epoch` already set.
    ///
    /// # Arguments
    /// * `state` - The engine's progress.
    /// * `task` - The task being trained.
    ///
    /// # Returns
    /// The updates to apply to `task` before the epoch's first step, none by default.
    ///
    /// ```
    /// use model_task::{Callback, HParams, LinearTask, TaskUpdate, TrainerState, Task};
    ///
    /// struct ClipFromEpochOne;
    ///
    /// impl Callback for ClipFromEpochOne {
    ///     fn on_train_epoch_start(&mut self, state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
    ///         match state.epoch {
    ///             1 => vec![TaskUpdate::attribute("grad_clip", 0.5)],
    ///             _ => Vec::new(),
    ///         }
    ///     }
    /// }
    ///
    /// let task = LinearTask::zeros(HParams::default(), 2, 3);
    /// let mut state = TrainerState::default();
    /// assert!(ClipFromEpochOne.on_train_epoch_start(&state, &task).is_empty());
    ///
    /// state.epoch = 1;
    /// assert_eq!(ClipFromEpochOne.on_train_epoch_start(&state, &task).len(), 1);
    /// ```
    fn on_train_epoch_start(
        &mut self,
        _state: &TrainerState,
        _task: &dyn Task,
    ) -> Vec<TaskUpdate> {
        Vec::new()
    }

    /// Called after the last step of every training epoch.
    fn on_train_epoch_end(&mut self, _state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
        Vec::new()
    }

    /// Called once, after the last epoch.
    fn on_train_end(&mut self, _state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
        Vec::new()
    }
}

/// Invokes `hook` on every callback, in order, and applies their updates to `task`.
///
/// # Arguments
/// * `callbacks` - The callbacks to invoke.
/// * `hook` - The lifecycle point reached.
/// * `state` - The engine's progress.
/// * `task` - The task being trained.
///
/// # Returns
/// The first error raised while applying an update.
pub fn dispatch(
    callbacks: &mut [Box<dyn Callback>],
    hook: Hook,
    state: &TrainerState,
    task: &mut dyn Task,
) -> Result<()> {
    for (i, callback) in callbacks.iter_mut().enumerate() {
        let updates = match hook {
            Hook::TrainStart => callback.on_train_start(state, task),
            Hook::TrainEpochStart => callback.on_train_epoch_start(state, task),
            Hook::TrainEpochEnd => callback.on_train_epoch_end(state, task),
            Hook::TrainEnd => callback.on_train_end(state, task),
        };

        debug!(callback = i, hook:? = hook, updates = updates.len(); "callback invoked");

        for update in updates {
            info!(epoch = state.epoch, update:? = update; "applying task update");
            task.apply_update(update)?;
        }
    }

    Ok(())
}

/// A callback that does nothing, the base every hook falls back to.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl Callback for NoopCallback {}

/// Sets a scalar attribute of the task at the start of the listed epochs.
#[derive(Debug, Clone)]
pub struct AttributeSchedule {
    name: String,
    values: BTreeMap<usize, f32>,
}

impl AttributeSchedule {
    /// Creates a new `AttributeSchedule`.
    ///
    /// # Arguments
    /// * `name` - The attribute to set.
    /// * `values` - `(epoch, value)` pairs.
    pub fn new<S, I>(name: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (usize, f32)>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }
}

impl Callback for AttributeSchedule {
    fn on_train_epoch_start(
        &mut self,
        state: &TrainerState,
        _task: &dyn Task,
    ) -> Vec<TaskUpdate> {
        self.values
            .get(&state.epoch)
            .map(|&value| vec![TaskUpdate::attribute(self.name.clone(), value)])
            .unwrap_or_default()
    }
}
