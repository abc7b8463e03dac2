//! Scenario grid expansion and per-scenario model preparation.

use nalgebra::DMatrix;
use ngm_core::{Real, Tolerances, nearly_equal};
use ngm_engine::{ExecutionContext, NgmEngine};
use ngm_model::{ModelStructure, ParamValue, TransitionDef};
use ngm_results::{ScenarioId, scenario_id};
use serde::Serialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::study::{GridDef, StudyConfig};

/// One point of the susceptibility x base-R0 grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioPoint {
    pub id: ScenarioId,
    pub susc: Option<Real>,
    pub base_r0: Option<Real>,
}

/// Expand the grid in susceptibility-major order.
pub fn expand_grid(grid: &GridDef) -> Vec<ScenarioPoint> {
    let susc: Vec<Option<Real>> = if grid.susc_choices.is_empty() {
        vec![None]
    } else {
        grid.susc_choices.iter().copied().map(Some).collect()
    };
    let r0: Vec<Option<Real>> = if grid.r0_choices.is_empty() {
        vec![None]
    } else {
        grid.r0_choices.iter().copied().map(Some).collect()
    };

    let mut points = Vec::with_capacity(susc.len() * r0.len());
    for s in &susc {
        for r in &r0 {
            let mut parts = Vec::new();
            if let Some(s) = s {
                parts.push(("susc", *s));
            }
            if let Some(r) = r {
                parts.push(("r0", *r));
            }
            let id = if parts.is_empty() {
                "base".to_string()
            } else {
                scenario_id(&parts)
            };
            points.push(ScenarioPoint {
                id,
                susc: *s,
                base_r0: *r,
            });
        }
    }
    points
}

/// Overwrite the leading `ages` entries of a per-age parameter with `value`.
///
/// Remaining entries keep the model's value for that age group.
pub fn apply_susceptibility(
    model: &ModelStructure,
    param: &str,
    ages: usize,
    value: Real,
    n_age: usize,
) -> AppResult<ModelStructure> {
    let current = model
        .param(param)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown parameter '{param}'")))?;
    let mut values = current.to_age_vector(n_age).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "parameter '{param}' does not have {n_age} age entries"
        ))
    })?;
    for v in values.iter_mut().take(ages) {
        *v = value;
    }

    let mut out = model.clone();
    out.set_param(param, ParamValue::PerAge(values));
    Ok(out)
}

/// Accepted gap between the calibrated base R0 and its target.
const CALIBRATION_TOLERANCE: Tolerances = Tolerances {
    abs: 1e-9,
    rel: 1e-6,
};

/// Check that scaling `param` by `c` scales every entry of `F` by exactly `c`.
///
/// Each actor of each infection transition contributes
/// `param * susceptibility * infectiousness`; `param` must appear in that
/// product exactly once for every actor of every infection transition.
fn check_linear_in(model: &ModelStructure, param: &str) -> AppResult<()> {
    let count = |names: &[String]| names.iter().filter(|n| n.as_str() == param).count();

    for transition in model.transitions.iter() {
        let TransitionDef::Infection {
            source,
            target,
            param: rate,
            actors,
            susceptibility,
        } = transition
        else {
            if transition.referenced_params().contains(&param) {
                return Err(AppError::Calibration(format!(
                    "'{param}' also drives the {} transition {} -> {}",
                    transition.kind_name(),
                    transition.source(),
                    transition.target()
                )));
            }
            continue;
        };

        let recipient = usize::from(rate.as_str() == param) + count(susceptibility.as_slice());
        for (actor, def) in actors {
            let power = recipient + count(def.infectiousness.as_slice());
            if power != 1 {
                return Err(AppError::Calibration(format!(
                    "'{param}' enters the infection term {source} -> {target} (actor {actor}) \
                     {power} times; base R0 is only linear in a parameter that enters \
                     every infection term once"
                )));
            }
        }
    }
    Ok(())
}

/// Rescale `param` so that the base R0 equals `target_r0`.
///
/// When `param` enters every infection term exactly once and nothing else,
/// R0 is linear in it and one rescaling is exact. Other parameters are
/// rejected, and the result is re-evaluated against the target.
pub fn calibrate_infection_rate(
    model: &ModelStructure,
    param: &str,
    target_r0: Real,
    population: &[Real],
    contact_matrix: &DMatrix<Real>,
    context: ExecutionContext,
) -> AppResult<ModelStructure> {
    let current_value = model
        .param(param)
        .ok_or_else(|| AppError::Calibration(format!("unknown parameter '{param}'")))?;
    check_linear_in(model, param)?;

    let n_age = population.len();
    let current = NgmEngine::new(model, n_age, context)?.base_r0(population, contact_matrix)?;
    if !(current > 0.0) {
        return Err(AppError::Calibration(format!(
            "base R0 is {current}, cannot rescale '{param}'"
        )));
    }

    let factor = target_r0 / current;
    let mut out = model.clone();
    out.set_param(param, current_value.scaled(factor));

    let achieved = NgmEngine::new(&out, n_age, context)?.base_r0(population, contact_matrix)?;
    if !nearly_equal(achieved, target_r0, CALIBRATION_TOLERANCE) {
        return Err(AppError::Calibration(format!(
            "rescaling '{param}' by {factor} gave base R0 {achieved}, target {target_r0}"
        )));
    }
    debug!(param, current, target_r0, factor, "calibrated infection rate");
    Ok(out)
}

/// Model for one grid point: susceptibility first, then calibration.
pub fn prepare_model(
    base: &ModelStructure,
    study: &StudyConfig,
    point: &ScenarioPoint,
) -> AppResult<ModelStructure> {
    let n_age = study.n_age();
    let mut model = base.clone();

    if let (Some(value), Some(param)) = (point.susc, study.grid.susc_param.as_deref()) {
        let ages = study.grid.susc_ages.unwrap_or(n_age);
        model = apply_susceptibility(&model, param, ages, value, n_age)?;
    }
    if let (Some(target), Some(param)) = (point.base_r0, study.grid.infection_param.as_deref()) {
        model = calibrate_infection_rate(
            &model,
            param,
            target,
            &study.population,
            &study.contact(),
            study.execution_context(),
        )?;
    }
    Ok(model)
}
