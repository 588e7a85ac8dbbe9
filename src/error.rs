use std::fmt::{self, Debug, Display};
use std::io;
use std::path::PathBuf;

use crate::integrator::SirParameters;

/// Provides `SweepError` and maps to other errors to
/// convert to a `SweepError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum SweepError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    /// Inputs that are malformed or physically inconsistent, caught before integrating.
    InvalidParameters(String),
    /// The solver could not produce a converged solution.
    NumericalFailure {
        parameters: SirParameters,
        time: f64,
        reason: String,
    },
    /// A chart could not be written to `path`.
    OutputWriteFailure {
        path: PathBuf,
        reason: String,
    },
    SweepError(String),
}

impl SweepError {
    pub(crate) fn output_write_failure(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        SweepError::OutputWriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<io::Error> for SweepError {
    fn from(error: io::Error) -> Self {
        SweepError::IoError(error)
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(error: serde_json::Error) -> Self {
        SweepError::JsonError(error)
    }
}

impl From<String> for SweepError {
    fn from(error: String) -> Self {
        SweepError::SweepError(error)
    }
}

impl From<&str> for SweepError {
    fn from(error: &str) -> Self {
        SweepError::SweepError(error.to_string())
    }
}

impl std::error::Error for SweepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SweepError::IoError(error) => Some(error),
            SweepError::JsonError(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SweepError::IoError(error) => write!(f, "I/O error: {error}"),
            SweepError::JsonError(error) => write!(f, "JSON error: {error}"),
            SweepError::InvalidParameters(message) => write!(f, "invalid parameters: {message}"),
            SweepError::NumericalFailure {
                parameters,
                time,
                reason,
            } => write!(
                f,
                "numerical failure at t={time} (N={}, contact rate={}, recovery rate={}): {reason}",
                parameters.population, parameters.contact_rate, parameters.recovery_rate
            ),
            SweepError::OutputWriteFailure { path, reason } => {
                write!(f, "could not write {}: {reason}", path.display())
            }
            SweepError::SweepError(message) => write!(f, "{message}"),
        }
    }
}
