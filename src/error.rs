use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("expected a scan of {expected} points but got: {actual}")]
    ScanLength { expected: usize, actual: usize },

    #[error("scan needs more than {required} points to constrain the fit but got: {actual}")]
    InsufficientScan { required: usize, actual: usize },

    #[error("scan does not form a 4x4 grid: {psg} distinct psg and {psa} distinct psa angles")]
    IncompleteGrid { psg: usize, psa: usize },

    #[error("expected shape {expected:?} but got: {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} fit failed after {evaluations} evaluations: {reason}")]
    FitFailed {
        what: &'static str,
        reason: String,
        evaluations: usize,
    },

    #[error("instrument matrix {which} is singular (condition number {condition:e})")]
    SingularMatrix { which: char, condition: f64 },

    #[error("cannot normalize by a zero reference value")]
    ZeroNormalization,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's data rather than the numerics.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::ScanLength { .. }
                | Error::InsufficientScan { .. }
                | Error::IncompleteGrid { .. }
                | Error::ShapeMismatch { .. }
                | Error::InvalidInput(_)
        )
    }
}
