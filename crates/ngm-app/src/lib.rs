//! Shared application service layer for ngmflow.
//!
//! Centralizes model loading, study configuration, scenario preparation,
//! sampling runs and result queries so the CLI stays a thin shell.

pub mod error;
pub mod model_service;
pub mod query;
pub mod run_service;
pub mod scenario;
pub mod study;

pub use error::{AppError, AppResult};
pub use ngm_model::ModelStructure;
pub use model_service::{ModelSummary, R0Report, compute_r0, load_model, summarize_model};
pub use query::{ScenarioReport, get_scenario_report};
pub use run_service::{
    RunOptions, RunRequest, ScenarioResponse, StudyResponse, ensure_scenario, list_scenarios,
    run_study,
};
pub use scenario::{
    ScenarioPoint, apply_susceptibility, calibrate_infection_rate, expand_grid, prepare_model,
};
pub use study::{GridDef, ScenarioDef, StudyConfig, load_study};
