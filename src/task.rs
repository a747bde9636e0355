use crate::{
    Result, TaskErr,
    batch::Batch,
    callback::TaskUpdate,
    hparams::{Checkpoint, HParams},
    loss::{Losses, StepOutput},
    optim::{Adam, Optimizer},
};

/// A trainable unit of work driven by an external training engine.
///
/// The engine owns the loop: it feeds batches to `training_step` and `validation_step`, builds
/// the optimizer through `configure_optimizers` and applies it with `optimizer_step`. The task
/// only holds its hyperparameters, its parameters and the gradient of the last training step.
///
/// `forward`, `training_step`, `validation_step` and `loss_function` have no default, a task
/// must implement all of them:
///
/// ```
/// use model_task::{Batch, HParams, Losses, Result, StepOutput, Task, loss};
///
/// struct Echo {
///     hparams: HParams,
///     params: Vec<f32>,
///     grad: Vec<f32>,
/// }
///
/// impl Task for Echo {
///     fn hparams(&self) -> &HParams { &self.hparams }
///     fn parameters(&self) -> &[f32] { &self.params }
///     fn gradient(&self) -> &[f32] { &self.grad }
///     fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) { (&mut self.params, &self.grad) }
///
///     fn forward(&mut self, x: &Batch) -> Result<Batch> { Ok(x.clone()) }
///
///     fn training_step(&mut self, data: &Batch, _batch_idx: usize) -> Result<StepOutput> {
///         let preds = self.forward(data)?;
///         Ok(self.loss_function(data, &preds)?.mean().into())
///     }
///
///     fn validation_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput> {
///         self.training_step(data, batch_idx)
///     }
///
///     fn loss_function(&self, target: &Batch, preds: &Batch) -> Result<Losses> {
///         Losses::from_elementwise(loss::squared_error(target.channel("y")?, preds.channel("y")?)?)
///     }
/// }
///
/// let task = Echo { hparams: HParams::default(), params: vec![0.0; 2], grad: vec![0.0; 2] };
/// assert_eq!(task.configure_optimizers().len(), 2);
/// ```
///
/// Leaving one out, here `loss_function`, is rejected by the compiler:
///
/// ```compile_fail
/// use model_task::{Batch, HParams, Result, StepOutput, Task};
///
/// struct Echo {
///     hparams: HParams,
///     params: Vec<f32>,
///     grad: Vec<f32>,
/// }
///
/// impl Task for Echo {
///     fn hparams(&self) -> &HParams { &self.hparams }
///     fn parameters(&self) -> &[f32] { &self.params }
///     fn gradient(&self) -> &[f32] { &self.grad }
///     fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) { (&mut self.params, &self.grad) }
///
///     fn forward(&mut self, x: &Batch) -> Result<Batch> { Ok(x.clone()) }
///
///     fn training_step(&mut self, _data: &Batch, _batch_idx: usize) -> Result<StepOutput> {
///         Ok(StepOutput::Loss(0.0))
///     }
///
///     fn validation_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput> {
///         self.training_step(data, batch_idx)
///     }
/// }
/// ```
pub trait Task {
    /// Returns the hyperparameter record the task was built with.
    fn hparams(&self) -> &HParams;

    /// Returns the task's flat parameter buffer.
    fn parameters(&self) -> &[f32];

    /// Returns the gradient computed by the last `training_step`, as long as `parameters`.
    fn gradient(&self) -> &[f32];

    /// Returns both the parameters, for writing, and the gradient.
    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]);

    /// Maps an input mapping to a prediction mapping.
    ///
    /// # Arguments
    /// * `x` - Input data, each channel shaped `(samples, tasks, *)`.
    ///
    /// # Returns
    /// The predictions, each channel shaped `(samples, tasks, *)`.
    fn forward(&mut self, x: &Batch) -> Result<Batch>;

    /// Runs a training step over a batch, leaving the gradient ready for the optimizer.
    ///
    /// # Arguments
    /// * `data` - The batch.
    /// * `batch_idx` - The batch's index within the epoch.
    ///
    /// # Returns
    /// A scalar loss or a mapping holding it under `"loss"`.
    fn training_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput>;

    /// Same as `training_step` but leaves the gradient untouched.
    fn validation_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput>;

    /// Computes the losses between targets and predictions.
    ///
    /// Must not average across samples nor tasks.
    ///
    /// # Arguments
    /// * `target` - Inputs/targets `(samples, tasks, *)`.
    /// * `preds` - Predictions `(samples, tasks, *)`.
    ///
    /// # Returns
    /// The losses, shaped `(samples, tasks)`.
    fn loss_function(&self, target: &Batch, preds: &Batch) -> Result<Losses>;

    /// Builds an `Adam` optimizer bound to this task's parameters and learning rate.
    ///
    /// The binding is by length only: the optimizer's moment buffers belong to this task, and
    /// driving another task with it is only rejected when the parameter counts differ. Build one
    /// optimizer per task.
    fn configure_optimizers(&self) -> Adam {
        Adam::new(self.parameters().len(), self.hparams().lr())
    }

    /// Applies `optimizer` to the parameters using the current gradient.
    fn optimizer_step(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        let (params, grad) = self.params_and_grad();
        optimizer.update_params(grad, params)
    }

    /// Applies an update requested by a callback.
    ///
    /// Tasks accept no updates unless they say otherwise.
    fn apply_update(&mut self, update: TaskUpdate) -> Result<()> {
        Err(TaskErr::UnsupportedUpdate {
            name: update.name().to_string(),
        })
    }

    /// Snapshots the hyperparameters and parameters.
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(*self.hparams(), self.parameters().to_vec())
    }
}
