//! Study execution and caching service.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ngm_engine::NgmEngine;
use ngm_model::ModelStructure;
use ngm_results::{ScenarioManifest, ScenarioStore, compute_fingerprint, now_timestamp};
use ngm_sampling::{
    ContactR0Evaluator, OutputEvaluator, SamplingRun, SusceptibilityR0Evaluator,
    VaccinatedR0Evaluator,
};
use serde::Serialize;
use tracing::info;

use crate::error::AppResult;
use crate::model_service;
use crate::scenario::{self, ScenarioPoint};
use crate::study::{self, ScenarioDef, StudyConfig};

/// Options for running a study.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub use_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

/// Request to execute every scenario of a study file.
pub struct RunRequest<'a> {
    pub study_path: &'a Path,
    pub options: RunOptions,
}

/// Outcome of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResponse {
    pub scenario_id: String,
    pub manifest: ScenarioManifest,
    pub loaded_from_cache: bool,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone)]
pub struct StudyResponse {
    pub output_dir: PathBuf,
    pub scenarios: Vec<ScenarioResponse>,
}

/// Everything that determines a scenario's tables, hashed with the model.
#[derive(Serialize)]
struct ScenarioSettings<'a> {
    population: &'a [f64],
    contact_matrix: &'a [Vec<f64>],
    sampling: &'a ngm_sampling::SamplerConfig,
    allocation: &'a ngm_sampling::AllocationConfig,
    scenario: &'a ScenarioDef,
    point: &'a ScenarioPoint,
}

/// Run every grid point of a study, reusing cached scenarios when allowed.
pub fn run_study(request: &RunRequest) -> AppResult<StudyResponse> {
    let study = study::load_study(request.study_path)?;
    let base = model_service::load_model(&study.model_path(request.study_path))?;
    let output_dir = study.output_path(request.study_path);
    let store = ScenarioStore::new(output_dir.clone())?;

    let points = scenario::expand_grid(&study.grid);
    info!(
        study = %request.study_path.display(),
        scenarios = points.len(),
        n_samples = study.sampling.n_samples,
        "running study"
    );

    let mut scenarios = Vec::with_capacity(points.len());
    for point in &points {
        scenarios.push(ensure_scenario(
            &study,
            &base,
            point,
            &store,
            &request.options,
        )?);
    }

    Ok(StudyResponse {
        output_dir,
        scenarios,
    })
}

/// Execute or load one scenario.
pub fn ensure_scenario(
    study: &StudyConfig,
    base: &ModelStructure,
    point: &ScenarioPoint,
    store: &ScenarioStore,
    options: &RunOptions,
) -> AppResult<ScenarioResponse> {
    let started = Instant::now();
    let model = scenario::prepare_model(base, study, point)?;
    let settings = ScenarioSettings {
        population: &study.population,
        contact_matrix: &study.contact_matrix,
        sampling: &study.sampling,
        allocation: &study.allocation,
        scenario: &study.scenario,
        point,
    };
    let fingerprint = compute_fingerprint(&model, &settings);

    if options.use_cache && store.has_scenario(&point.id) {
        let manifest = store.load_manifest(&point.id)?;
        if manifest.fingerprint == fingerprint {
            info!(scenario_id = %point.id, "loaded cached scenario");
            return Ok(ScenarioResponse {
                scenario_id: point.id.clone(),
                manifest,
                loaded_from_cache: true,
                elapsed_s: started.elapsed().as_secs_f64(),
            });
        }
    }

    let manifest = execute_scenario(study, &model, point, store, fingerprint)?;
    Ok(ScenarioResponse {
        scenario_id: point.id.clone(),
        manifest,
        loaded_from_cache: false,
        elapsed_s: started.elapsed().as_secs_f64(),
    })
}

fn build_evaluator(
    study: &StudyConfig,
    model: &ModelStructure,
) -> AppResult<Box<dyn OutputEvaluator>> {
    let engine = NgmEngine::new(model, study.n_age(), study.execution_context())?;
    let population = study.population.clone();
    let contact = study.contact();
    let evaluator: Box<dyn OutputEvaluator> = match &study.scenario {
        ScenarioDef::Vaccination {
            total_vaccines,
            vaccine_efficacy,
        } => Box::new(VaccinatedR0Evaluator::new(
            engine,
            population,
            contact,
            *total_vaccines,
            *vaccine_efficacy,
        )?),
        ScenarioDef::Contact { .. } => {
            Box::new(ContactR0Evaluator::new(engine, population, contact)?)
        }
        ScenarioDef::Susceptibility { .. } => {
            Box::new(SusceptibilityR0Evaluator::new(engine, population, contact)?)
        }
    };
    Ok(evaluator)
}

fn execute_scenario(
    study: &StudyConfig,
    model: &ModelStructure,
    point: &ScenarioPoint,
    store: &ScenarioStore,
    fingerprint: String,
) -> AppResult<ScenarioManifest> {
    let evaluator = build_evaluator(study, model)?;
    let kind = study.kind();

    let mut run = SamplingRun::new(study.sampling.clone())?;
    run.draw_samples(&study.bounds()?)?;
    if let ScenarioDef::Vaccination { total_vaccines, .. } = &study.scenario {
        run.allocate(&study.population, *total_vaccines, &study.allocation)?;
    }
    run.evaluate(evaluator.as_ref())?;
    let ranked = run.rank_and_persist(store, &point.id, evaluator.target(), &kind)?;

    let manifest = ScenarioManifest {
        scenario_id: point.id.clone(),
        kind,
        target: evaluator.target().to_string(),
        n_samples: study.sampling.n_samples,
        seed: study.sampling.seed,
        fingerprint,
        timestamp: now_timestamp(),
        best_value: ranked.best_value(),
    };
    store.save_manifest(&manifest)?;
    Ok(manifest)
}

/// List scenarios persisted under a study's output directory.
pub fn list_scenarios(study_path: &Path) -> AppResult<Vec<ScenarioManifest>> {
    let study = study::load_study(study_path)?;
    let store = ScenarioStore::new(study.output_path(study_path))?;
    Ok(store.list_scenarios()?)
}
