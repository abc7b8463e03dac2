//! Model loading, validation, and reproduction-number queries.

use std::path::Path;

use nalgebra::DMatrix;
use ngm_core::Real;
use ngm_engine::{ExecutionContext, NgmEngine};
use ngm_model::ModelStructure;

use crate::error::AppResult;

/// Summary of a model for listing.
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub state_count: usize,
    pub substate_count: usize,
    pub infected_states: Vec<String>,
    pub transition_count: usize,
    pub parameters: Vec<String>,
    pub age_groups: Option<usize>,
    pub vaccinated: bool,
}

/// Base reproduction number together with the age-level NGM it came from.
#[derive(Debug, Clone)]
pub struct R0Report {
    pub r0: Real,
    pub ngm: DMatrix<Real>,
    pub targets: Vec<String>,
}

/// Load a model from YAML or JSON by extension.
pub fn load_model(path: &Path) -> AppResult<ModelStructure> {
    Ok(ngm_model::load(path)?)
}

pub fn summarize_model(model: &ModelStructure) -> ModelSummary {
    ModelSummary {
        state_count: model.states.len(),
        substate_count: model.n_full_substates(),
        infected_states: model.infected_states().map(|s| s.name.clone()).collect(),
        transition_count: model.transitions.len(),
        parameters: model.parameters.keys().cloned().collect(),
        age_groups: model.age_count_hint(),
        vaccinated: model.is_vaccinated(),
    }
}

/// Reproduction number for a susceptible profile; fully susceptible when
/// `susceptibles` is `None`.
pub fn compute_r0(
    model: &ModelStructure,
    population: &[Real],
    contact_matrix: &DMatrix<Real>,
    susceptibles: Option<&[Real]>,
    context: ExecutionContext,
) -> AppResult<R0Report> {
    let engine = NgmEngine::new(model, population.len(), context)?;
    let susceptibles = susceptibles.unwrap_or(population);
    let ngm = engine.next_generation_matrix(susceptibles, population, contact_matrix)?;
    let r0 = ngm_engine::spectral_radius(&ngm)?;
    Ok(R0Report {
        r0,
        ngm,
        targets: engine.targets().to_vec(),
    })
}
