pub mod batch;
pub mod callback;
pub mod error;
pub mod hparams;
pub mod linear;
pub mod loss;
pub mod optim;
pub mod task;

pub use batch::Batch;
pub use callback::{Callback, Hook, TaskUpdate, TrainerState};
pub use error::{Result, TaskErr};
pub use hparams::{Checkpoint, HParams};
pub use linear::LinearTask;
pub use loss::{Losses, StepOutput};
pub use task::Task;
