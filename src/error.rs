use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, TaskErr>;

/// The task module's error type.
#[derive(Debug)]
pub enum TaskErr {
    Io(io::Error),
    Json(serde_json::Error),
    InvalidHParam {
        name: &'static str,
        value: f32,
    },
    MissingChannel {
        name: String,
    },
    NonFiniteParameter {
        index: usize,
        value: f32,
    },
    RankMismatch {
        what: &'static str,
        got: usize,
        min: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    UnsupportedUpdate {
        name: String,
    },
}

impl Display for TaskErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskErr::Io(e) => write!(f, "io error: {e}"),
            TaskErr::Json(e) => write!(f, "json error: {e}"),
            TaskErr::InvalidHParam { name, value } => {
                write!(f, "invalid hyperparameter {name}: {value}")
            }
            TaskErr::MissingChannel { name } => {
                write!(f, "the batch has no channel named {name:?}")
            }
            TaskErr::NonFiniteParameter { index, value } => {
                write!(f, "parameter {index} is not finite: {value}")
            }
            TaskErr::RankMismatch { what, got, min } => {
                write!(f, "{what} has {got} axes, expected at least {min}")
            }
            TaskErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            TaskErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            TaskErr::UnsupportedUpdate { name } => {
                write!(f, "the task does not accept updates to {name:?}")
            }
        }
    }
}

impl Error for TaskErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TaskErr::Io(e) => Some(e),
            TaskErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TaskErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TaskErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
