//! Error types for the ngm-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates and
/// gives the CLI a single error to report.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Failed to read study file: {path}")]
    StudyFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Study error: {0}")]
    Study(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ngm-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<ngm_core::NgmError> for AppError {
    fn from(err: ngm_core::NgmError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<ngm_model::ModelError> for AppError {
    fn from(err: ngm_model::ModelError) -> Self {
        AppError::Model(err.to_string())
    }
}

impl From<ngm_engine::EngineError> for AppError {
    fn from(err: ngm_engine::EngineError) -> Self {
        AppError::Engine(err.to_string())
    }
}

impl From<ngm_sampling::SamplingError> for AppError {
    fn from(err: ngm_sampling::SamplingError) -> Self {
        AppError::Sampling(err.to_string())
    }
}

impl From<ngm_results::ResultsError> for AppError {
    fn from(err: ngm_results::ResultsError) -> Self {
        match err {
            ngm_results::ResultsError::ScenarioNotFound { scenario_id } => {
                AppError::ScenarioNotFound(scenario_id)
            }
            other => AppError::Results(other.to_string()),
        }
    }
}
