//! Read-side queries over persisted scenarios.

use ngm_core::Real;
use ngm_results::{ScenarioManifest, ScenarioStore};

use crate::error::{AppError, AppResult};

/// Persisted tables of one scenario, summarized.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub manifest: ScenarioManifest,
    pub row_count: usize,
    pub column_count: usize,
    pub target_min: Real,
    pub target_max: Real,
    /// Best row, for scenarios that persist one.
    pub optimal: Option<Vec<Real>>,
}

pub fn get_scenario_report(store: &ScenarioStore, scenario_id: &str) -> AppResult<ScenarioReport> {
    let manifest = store.load_manifest(scenario_id)?;
    let table = store.load_lhs(scenario_id)?;
    let values = store.load_simulations(scenario_id, &manifest.target)?;

    if values.len() != table.nrows() {
        return Err(AppError::Results(format!(
            "scenario '{scenario_id}' has {} sample rows but {} target values",
            table.nrows(),
            values.len()
        )));
    }

    let target_min = values.iter().copied().fold(Real::INFINITY, Real::min);
    let target_max = values.iter().copied().fold(Real::NEG_INFINITY, Real::max);
    let optimal = if manifest.kind.has_optimum() {
        Some(store.load_optimal(scenario_id)?)
    } else {
        None
    };

    Ok(ScenarioReport {
        row_count: table.nrows(),
        column_count: table.ncols(),
        target_min,
        target_max,
        optimal,
        manifest,
    })
}
