//! Error types for engine operations.

use ngm_index::IndexError;
use thiserror::Error;

/// Errors that can occur while building or evaluating the NGM.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    #[error("Infection-transition matrix is singular; states with no path out of infection: {states:?}")]
    SingularMatrix { states: Vec<String> },

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Numeric error: {what}")]
    Numeric { what: String },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

pub type EngineResult<T> = Result<T, EngineError>;
