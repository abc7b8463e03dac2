//! Error types for sampling operations.

use ngm_engine::EngineError;
use ngm_results::ResultsError;
use thiserror::Error;

use crate::driver::SamplingStage;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    #[error("Allocation did not converge after {iterations} iterations: {what}")]
    NonConvergence { iterations: usize, what: String },

    #[error("Invalid stage: expected {expected}, run is {actual:?}")]
    InvalidStage {
        expected: &'static str,
        actual: SamplingStage,
    },

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Results error: {0}")]
    Results(#[from] ResultsError),
}

pub type SamplingResult<T> = Result<T, SamplingError>;
