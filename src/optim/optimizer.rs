use crate::Result;

/// Defines the strategy for updating a task's parameters based on its gradient.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - A reference to the task's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// The length of the step taken on each update.
    fn learning_rate(&self) -> f32;
}

/// Checks that a gradient and a parameter slice can be zipped together.
pub(super) fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(crate::TaskErr::SizeMismatch {
            a: "gradient",
            b: "parameters",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
