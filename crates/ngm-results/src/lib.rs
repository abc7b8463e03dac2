//! ngm-results: persisted sample tables, target values and scenario manifests.
//!
//! Layout under the store root, one set per scenario id:
//!
//! ```text
//! lhs/lhs_<id>.csv
//! simulations/simulations_<id>_<target>.csv
//! optimal_vaccination/optimal_vaccination_<id>.csv
//! manifest/manifest_<id>.json
//! ```
//!
//! Tables are `;`-delimited without headers and keep the sample row order,
//! so they join row by row for downstream sensitivity analysis.

pub mod hash;
pub mod store;
pub mod types;

pub use hash::compute_fingerprint;
pub use store::ScenarioStore;
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scenario not found: {scenario_id}")]
    ScenarioNotFound { scenario_id: String },

    #[error("Malformed table {path}: {reason}")]
    MalformedTable { path: String, reason: String },
}
