use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayView2, Axis};

use crate::{Result, TaskErr};

/// Per-sample, per-task losses, shaped `(samples, tasks)`.
///
/// Tasks never reduce these, callers pick the reduction with `mean` or `sum`.
#[derive(Debug, Clone, PartialEq)]
pub struct Losses(Array2<f32>);

impl Losses {
    pub fn new(losses: Array2<f32>) -> Self {
        Self(losses)
    }

    /// Collapses an elementwise loss shaped `(samples, tasks, *)` into `(samples, tasks)`.
    ///
    /// Only the trailing axes are averaged, the leading two are left untouched.
    ///
    /// # Arguments
    /// * `elementwise` - An elementwise loss with at least two axes.
    ///
    /// # Returns
    /// The unreduced losses or an error if the array's shape can't be collapsed.
    pub fn from_elementwise(elementwise: ArrayD<f32>) -> Result<Self> {
        let shape = elementwise.shape().to_vec();
        if shape.len() < 2 {
            return Err(TaskErr::RankMismatch {
                what: "elementwise loss",
                got: shape.len(),
                min: 2,
            });
        }

        let (samples, tasks) = (shape[0], shape[1]);
        let rest: usize = shape[2..].iter().product();
        let collapsed = elementwise
            .to_shape((samples, tasks, rest))
            .ok()
            .and_then(|cells| cells.mean_axis(Axis(2)));

        match collapsed {
            Some(losses) => Ok(Self(losses)),
            None => Err(TaskErr::ShapeMismatch {
                what: "elementwise loss trailing axes",
                got: shape,
                expected: vec![samples, tasks, 1],
            }),
        }
    }

    /// Returns `(samples, tasks)`.
    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// Asserts these losses were left unreduced for a batch of the given size.
    pub fn check_shape(&self, samples: usize, tasks: usize) -> Result<()> {
        let got = self.shape();
        if got != (samples, tasks) {
            return Err(TaskErr::ShapeMismatch {
                what: "losses",
                got: vec![got.0, got.1],
                expected: vec![samples, tasks],
            });
        }

        Ok(())
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.0
    }

    /// The mean over every sample and task, zero when empty.
    pub fn mean(&self) -> f32 {
        self.0.mean().unwrap_or_default()
    }

    pub fn sum(&self) -> f32 {
        self.0.sum()
    }
}

/// Elementwise squared error between two equally shaped arrays.
pub fn squared_error(target: &ArrayD<f32>, preds: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    if target.shape() != preds.shape() {
        return Err(TaskErr::ShapeMismatch {
            what: "predictions",
            got: preds.shape().to_vec(),
            expected: target.shape().to_vec(),
        });
    }

    Ok((preds - target).mapv_into(|d| d.powi(2)))
}

/// What a training or validation step hands back to the engine: either a bare loss or a mapping
/// that holds it under the `"loss"` key.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Loss(f32),
    Map(BTreeMap<String, f32>),
}

impl StepOutput {
    pub const LOSS_KEY: &'static str = "loss";

    /// Returns the loss, if any.
    pub fn loss(&self) -> Option<f32> {
        match self {
            StepOutput::Loss(loss) => Some(*loss),
            StepOutput::Map(map) => map.get(Self::LOSS_KEY).copied(),
        }
    }
}

impl From<f32> for StepOutput {
    fn from(loss: f32) -> Self {
        Self::Loss(loss)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{IxDyn, array};

    use super::*;

    #[test]
    fn trailing_axes_are_averaged() {
        let elementwise = ArrayD::from_shape_vec(
            IxDyn(&[2, 2, 2]),
            vec![1.0, 3.0, 2.0, 2.0, 0.0, 4.0, 5.0, 7.0],
        )
        .unwrap();

        let losses = Losses::from_elementwise(elementwise).unwrap();
        assert_eq!(losses.shape(), (2, 2));
        assert_eq!(losses.view(), array![[2.0f32, 2.0], [2.0, 6.0]]);
        assert_eq!(losses.mean(), 3.0);
        assert_eq!(losses.sum(), 12.0);
    }

    #[test]
    fn rank_two_is_kept_as_is() {
        let elementwise = array![[1.0, 2.0, 3.0]].into_dyn();
        let losses = Losses::from_elementwise(elementwise).unwrap();
        assert!(losses.check_shape(1, 3).is_ok());
        assert!(losses.check_shape(3, 1).is_err());
    }

    #[test]
    fn scalar_losses_are_rejected() {
        let elementwise = array![1.0f32, 2.0].into_dyn();
        assert!(matches!(
            Losses::from_elementwise(elementwise),
            Err(TaskErr::RankMismatch { got: 1, min: 2, .. })
        ));
    }

    #[test]
    fn empty_trailing_axis_is_rejected() {
        let elementwise = ArrayD::zeros(IxDyn(&[4, 2, 0]));
        assert!(Losses::from_elementwise(elementwise).is_err());
    }

    #[test]
    fn squared_error_needs_equal_shapes() {
        let a = ArrayD::zeros(IxDyn(&[4, 2, 1]));
        let b = ArrayD::ones(IxDyn(&[4, 2, 1]));
        let c = ArrayD::ones(IxDyn(&[4, 1, 1]));

        assert_eq!(squared_error(&a, &b).unwrap().sum(), 8.0);
        assert!(squared_error(&a, &c).is_err());
    }

    #[test]
    fn step_output_loss() {
        let map = BTreeMap::from([("loss".to_string(), 0.5), ("mae".to_string(), 0.1)]);
        assert_eq!(StepOutput::Map(map).loss(), Some(0.5));
        assert_eq!(StepOutput::from(1.5).loss(), Some(1.5));
        assert_eq!(StepOutput::Map(BTreeMap::new()).loss(), None);
    }
}
