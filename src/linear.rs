use std::collections::BTreeMap;

use log::{debug, trace};
use ndarray::{Array1, Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Ix3, s};
use rand::Rng;

use crate::{
    Result, TaskErr,
    batch::Batch,
    callback::TaskUpdate,
    hparams::{Checkpoint, HParams},
    loss::{self, Losses, StepOutput},
    task::Task,
};

/// The input channel, shaped `(samples, tasks, features)`.
pub const INPUT: &str = "x";
/// The target and prediction channel, shaped `(samples, tasks, 1)`.
pub const TARGET: &str = "y";
/// The attribute callbacks may set to clamp the gradient elementwise.
pub const GRAD_CLIP: &str = "grad_clip";

/// A linear regressor per task, trained on the mean squared error.
///
/// The parameters hold, for each task, its `features` weights followed by its bias.
#[derive(Debug, Clone)]
pub struct LinearTask {
    hparams: HParams,
    tasks: usize,
    features: usize,
    params: Vec<f32>,
    grad: Vec<f32>,
    grad_clip: Option<f32>,
}

impl LinearTask {
    /// Creates a new `LinearTask` with every parameter set to zero.
    ///
    /// # Arguments
    /// * `hparams` - The task's hyperparameters.
    /// * `tasks` - The amount of tasks, the second axis of every channel.
    /// * `features` - The amount of input features per task.
    pub fn zeros(hparams: HParams, tasks: usize, features: usize) -> Self {
        let size = tasks * (features + 1);

        Self {
            hparams,
            tasks,
            features,
            params: vec![0.0; size],
            grad: vec![0.0; size],
            grad_clip: None,
        }
    }

    /// Creates a new `LinearTask` with weights drawn uniformly from `±1/sqrt(features)` and zero
    /// biases.
    pub fn new<R: Rng>(hparams: HParams, tasks: usize, features: usize, rng: &mut R) -> Self {
        let mut task = Self::zeros(hparams, tasks, features);
        let bound = 1.0 / (features.max(1) as f32).sqrt();

        for chunk in task.params.chunks_mut(features + 1) {
            let (weights, _bias) = chunk.split_at_mut(features);
            weights
                .iter_mut()
                .for_each(|w| *w = rng.random_range(-bound..=bound));
        }

        task
    }

    /// Restores a `LinearTask` from a checkpoint.
    ///
    /// # Returns
    /// An error if the checkpoint's parameters don't fit the given dimensions.
    pub fn from_checkpoint(checkpoint: Checkpoint, tasks: usize, features: usize) -> Result<Self> {
        let mut task = Self::zeros(checkpoint.hparams, tasks, features);
        if checkpoint.parameters.len() != task.params.len() {
            return Err(TaskErr::SizeMismatch {
                a: "checkpoint",
                b: "task parameters",
                got: checkpoint.parameters.len(),
                expected: task.params.len(),
            });
        }

        task.params = checkpoint.parameters;
        Ok(task)
    }

    pub fn tasks(&self) -> usize {
        self.tasks
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn grad_clip(&self) -> Option<f32> {
        self.grad_clip
    }

    /// Gives a view of the weights and the bias of the `task`-th regressor.
    fn view_params(&self, task: usize) -> (ArrayView1<'_, f32>, f32) {
        let stride = self.features + 1;
        let chunk = &self.params[task * stride..(task + 1) * stride];
        let (weights, bias) = chunk.split_at(self.features);
        (ArrayView1::from(weights), bias[0])
    }

    /// Views the input channel as `(samples, tasks, features)`.
    fn input<'a>(&self, data: &'a Batch) -> Result<ArrayView3<'a, f32>> {
        let x = data.channel(INPUT)?;
        let expected = vec![data.samples(), self.tasks, self.features];

        match x.view().into_dimensionality::<Ix3>() {
            Ok(x) if x.shape() == expected.as_slice() => Ok(x),
            _ => Err(TaskErr::ShapeMismatch {
                what: "input channel",
                got: x.shape().to_vec(),
                expected,
            }),
        }
    }

    fn predict(&self, x: ArrayView3<f32>) -> Array3<f32> {
        let mut y = Array3::zeros((x.len_of(Axis(0)), self.tasks, 1));

        for task in 0..self.tasks {
            let (w, b) = self.view_params(task);
            let y_task = x.index_axis(Axis(1), task).dot(&w) + b;
            y.slice_mut(s![.., task, 0]).assign(&y_task);
        }

        y
    }

    /// Writes the gradient of the mean loss into `self.grad`.
    fn backward(&mut self, x: ArrayView3<f32>, y_pred: &Array3<f32>, y: ArrayView3<f32>) {
        self.grad.fill(0.0);

        let cells = x.len_of(Axis(0)) * self.tasks;
        if cells == 0 {
            return;
        }

        let scale = 2.0 / cells as f32;
        let d = (y_pred - &y) * scale;
        let stride = self.features + 1;

        for task in 0..self.tasks {
            let d_task = d.slice(s![.., task, 0]);
            let dw: Array1<f32> = x.index_axis(Axis(1), task).t().dot(&d_task);

            let chunk = &mut self.grad[task * stride..(task + 1) * stride];
            let (grad_w, grad_b) = chunk.split_at_mut(self.features);
            ArrayViewMut1::from(grad_w).assign(&dw);
            grad_b[0] = d_task.sum();
        }

        if let Some(clip) = self.grad_clip {
            self.grad
                .iter_mut()
                .for_each(|g| *g = g.clamp(-clip, clip));
        }
    }

    /// Forwards `data` and measures its losses.
    fn evaluate(&mut self, data: &Batch) -> Result<(Batch, Losses)> {
        let preds = self.forward(data)?;
        let losses = self.loss_function(data, &preds)?;
        Ok((preds, losses))
    }
}

impl Task for LinearTask {
    fn hparams(&self) -> &HParams {
        &self.hparams
    }

    fn parameters(&self) -> &[f32] {
        &self.params
    }

    fn gradient(&self) -> &[f32] {
        &self.grad
    }

    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    fn forward(&mut self, x: &Batch) -> Result<Batch> {
        let y = self.predict(self.input(x)?);

        let mut preds = Batch::new();
        preds.insert(TARGET, y.into_dyn())?;
        Ok(preds)
    }

    fn training_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput> {
        // A failed step must not leave the previous gradient for the optimizer.
        self.grad.fill(0.0);

        let (preds, losses) = self.evaluate(data)?;
        let loss = losses.mean();

        let x = self.input(data)?;
        let y = target_view(data)?;
        let y_pred = target_view(&preds)?.to_owned();
        self.backward(x, &y_pred, y);

        debug!(batch_idx = batch_idx, loss = loss; "training step");
        trace!(grad:? = self.grad; "gradient");

        Ok(StepOutput::Map(BTreeMap::from([(
            StepOutput::LOSS_KEY.to_string(),
            loss,
        )])))
    }

    fn validation_step(&mut self, data: &Batch, batch_idx: usize) -> Result<StepOutput> {
        let (_, losses) = self.evaluate(data)?;
        let loss = losses.mean();

        debug!(batch_idx = batch_idx, loss = loss; "validation step");
        Ok(StepOutput::Loss(loss))
    }

    fn loss_function(&self, target: &Batch, preds: &Batch) -> Result<Losses> {
        let elementwise = loss::squared_error(target.channel(TARGET)?, preds.channel(TARGET)?)?;
        let losses = Losses::from_elementwise(elementwise)?;
        losses.check_shape(target.samples(), target.tasks())?;
        Ok(losses)
    }

    fn apply_update(&mut self, update: TaskUpdate) -> Result<()> {
        match update {
            TaskUpdate::Attribute { name, value } if name == GRAD_CLIP => {
                if !value.is_finite() || value <= 0.0 {
                    return Err(TaskErr::InvalidHParam {
                        name: GRAD_CLIP,
                        value,
                    });
                }

                self.grad_clip = Some(value);
                Ok(())
            }
            TaskUpdate::Attribute { name, .. } => Err(TaskErr::UnsupportedUpdate { name }),
        }
    }
}

fn target_view(batch: &Batch) -> Result<ArrayView3<'_, f32>> {
    let y = batch.channel(TARGET)?;

    y.view()
        .into_dimensionality::<Ix3>()
        .map_err(|_| TaskErr::ShapeMismatch {
            what: "target channel",
            got: y.shape().to_vec(),
            expected: vec![batch.samples(), batch.tasks(), 1],
        })
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::optim::{GradientDescent, Optimizer};

    fn batch(samples: usize, tasks: usize, features: usize) -> Batch {
        let x: Vec<f32> = (0..samples * tasks * features)
            .map(|i| (i % 7) as f32 / 7.0)
            .collect();
        let y: Vec<f32> = (0..samples * tasks).map(|i| i as f32 / 4.0).collect();

        Batch::from_channels([
            (
                INPUT,
                ArrayD::from_shape_vec(IxDyn(&[samples, tasks, features]), x).unwrap(),
            ),
            (
                TARGET,
                ArrayD::from_shape_vec(IxDyn(&[samples, tasks, 1]), y).unwrap(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn parameter_layout() {
        let task = LinearTask::zeros(HParams::default(), 3, 5);
        assert_eq!(task.parameters().len(), 18);
        assert_eq!(task.gradient().len(), 18);
    }

    #[test]
    fn random_init_leaves_biases_at_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        let task = LinearTask::new(HParams::default(), 2, 4, &mut rng);

        let bound = 0.5;
        for chunk in task.parameters().chunks(5) {
            assert!(chunk[..4].iter().all(|w| w.abs() <= bound));
            assert_eq!(chunk[4], 0.0);
        }
    }

    #[test]
    fn forward_uses_each_task_own_regressor() {
        let mut task = LinearTask::zeros(HParams::default(), 2, 1);
        // task 0: y = 2x + 1, task 1: y = -x
        task.params.copy_from_slice(&[2.0, 1.0, -1.0, 0.0]);

        let x = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]), vec![1.0, 1.0, 3.0, 3.0]).unwrap();
        let data = Batch::from_channels([(INPUT, x)]).unwrap();

        let preds = task.forward(&data).unwrap();
        let y = preds.channel(TARGET).unwrap();
        assert_eq!(y.shape(), &[2, 2, 1]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), [3.0, -1.0, 7.0, -3.0]);
    }

    #[test]
    fn losses_are_left_unreduced() {
        let mut task = LinearTask::zeros(HParams::default(), 2, 10);
        let data = batch(4, 2, 10);

        let preds = task.forward(&data).unwrap();
        let losses = task.loss_function(&data, &preds).unwrap();
        assert_eq!(losses.shape(), (4, 2));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut task = LinearTask::new(HParams::default(), 2, 3, &mut rng);
        let data = batch(5, 2, 3);

        task.training_step(&data, 0).unwrap();
        let grad = task.gradient().to_vec();

        let eps = 1e-2;
        for i in 0..grad.len() {
            let mut plus = task.clone();
            plus.params[i] += eps;
            let mut minus = task.clone();
            minus.params[i] -= eps;

            let l_plus = plus.validation_step(&data, 0).unwrap().loss().unwrap();
            let l_minus = minus.validation_step(&data, 0).unwrap().loss().unwrap();
            let numeric = (l_plus - l_minus) / (2.0 * eps);

            assert!(
                (numeric - grad[i]).abs() < 1e-2,
                "param {i}: numeric {numeric} analytic {}",
                grad[i]
            );
        }
    }

    #[test]
    fn gradient_steps_reduce_the_loss() {
        let mut task = LinearTask::zeros(HParams::new(0.1).unwrap(), 2, 3);
        let mut optimizer = GradientDescent::new(task.hparams().lr());
        let data = batch(6, 2, 3);

        let first = task.training_step(&data, 0).unwrap().loss().unwrap();
        for idx in 0..20 {
            task.optimizer_step(&mut optimizer).unwrap();
            task.training_step(&data, idx + 1).unwrap();
        }
        let last = task.validation_step(&data, 0).unwrap().loss().unwrap();

        assert!(last < first, "{last} >= {first}");
    }

    #[test]
    fn grad_clip_update() {
        let mut task = LinearTask::zeros(HParams::default(), 2, 3);
        task.apply_update(TaskUpdate::attribute(GRAD_CLIP, 0.01)).unwrap();
        assert_eq!(task.grad_clip(), Some(0.01));

        task.training_step(&batch(6, 2, 3), 0).unwrap();
        assert!(task.gradient().iter().all(|g| g.abs() <= 0.01));

        assert!(matches!(
            task.apply_update(TaskUpdate::attribute(GRAD_CLIP, -1.0)),
            Err(TaskErr::InvalidHParam { .. })
        ));
        assert!(matches!(
            task.apply_update(TaskUpdate::attribute("momentum", 0.9)),
            Err(TaskErr::UnsupportedUpdate { name }) if name == "momentum"
        ));
    }

    #[test]
    fn failed_step_clears_the_gradient() {
        let mut task = LinearTask::zeros(HParams::default(), 2, 3);
        task.training_step(&batch(6, 2, 3), 0).unwrap();
        assert!(task.gradient().iter().any(|&g| g != 0.0));

        let x = ArrayD::zeros(IxDyn(&[6, 2, 3]));
        let unlabeled = Batch::from_channels([(INPUT, x)]).unwrap();
        assert!(task.training_step(&unlabeled, 1).is_err());
        assert!(task.gradient().iter().all(|&g| g == 0.0));

        let mut optimizer = GradientDescent::new(1.0);
        task.optimizer_step(&mut optimizer).unwrap();
        assert!(task.parameters().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn rejects_wrong_input_shape() {
        let mut task = LinearTask::zeros(HParams::default(), 2, 4);
        let data = batch(4, 2, 10);

        assert!(matches!(
            task.forward(&data),
            Err(TaskErr::ShapeMismatch { what: "input channel", .. })
        ));
    }

    #[test]
    fn missing_target_channel() {
        let mut task = LinearTask::zeros(HParams::default(), 1, 1);
        let x = ArrayD::zeros(IxDyn(&[2, 1, 1]));
        let data = Batch::from_channels([(INPUT, x)]).unwrap();

        assert!(matches!(
            task.training_step(&data, 0),
            Err(TaskErr::MissingChannel { .. })
        ));
    }

    #[test]
    fn checkpoint_restore() {
        let mut rng = StdRng::seed_from_u64(11);
        let task = LinearTask::new(HParams::new(5e-3).unwrap(), 2, 3, &mut rng);

        let restored = LinearTask::from_checkpoint(task.checkpoint(), 2, 3).unwrap();
        assert_eq!(restored.hparams(), task.hparams());
        assert_eq!(restored.parameters(), task.parameters());

        assert!(LinearTask::from_checkpoint(task.checkpoint(), 3, 3).is_err());
    }

    #[test]
    fn optimizer_is_bound_to_the_parameters() {
        let task = LinearTask::zeros(HParams::new(1e-3).unwrap(), 2, 10);
        let optimizer = task.configure_optimizers();

        assert_eq!(optimizer.len(), task.parameters().len());
        assert_eq!(optimizer.learning_rate(), 1e-3);
    }
}
