//! Capacity-constrained vaccine allocation.
//!
//! A raw sampled row is read as relative weights over age groups. It is
//! normalized to a share of the total budget, and any group receiving more
//! doses than its population is clamped to capacity. The clamped excess is
//! passed to groups still below capacity in proportion to their share,
//! repeating until every group fits. Saturated groups never receive more, so
//! the saturated set grows every round and `n_age` rounds always suffice.
//! A final pass pins groups left within tolerance of capacity, so no group
//! ends above its population.

use nalgebra::DMatrix;
use ngm_core::{Real, normalized};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SamplingError, SamplingResult};

/// Allocation loop options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationConfig {
    /// Maximum redistribution rounds per row; `None` means `n_age + 1`.
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Relative slack when comparing doses to population.
    #[serde(default = "default_tolerance")]
    pub tolerance: Real,
}

fn default_tolerance() -> Real {
    1e-9
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            tolerance: default_tolerance(),
        }
    }
}

/// Apply [`allocate_row`] to every row of a raw sample table.
///
/// Returns a table of the same shape whose rows are fractions of
/// `total_vaccines` summing to 1.
pub fn allocate_vaccines(
    raw: &DMatrix<Real>,
    population: &[Real],
    total_vaccines: Real,
    config: &AllocationConfig,
) -> SamplingResult<DMatrix<Real>> {
    if raw.ncols() != population.len() {
        return Err(SamplingError::ShapeMismatch {
            what: "allocation table columns",
            expected: population.len(),
            actual: raw.ncols(),
        });
    }
    check_budget(population, total_vaccines)?;

    let mut out = DMatrix::zeros(raw.nrows(), raw.ncols());
    let mut total_rounds = 0;
    for (r, row) in raw.row_iter().enumerate() {
        let values: Vec<Real> = row.iter().copied().collect();
        let (share, rounds) = allocate_row_counted(&values, population, total_vaccines, config)?;
        total_rounds += rounds;
        for (c, v) in share.into_iter().enumerate() {
            out[(r, c)] = v;
        }
    }
    debug!(
        rows = raw.nrows(),
        total_rounds, "allocated vaccines within capacity"
    );
    Ok(out)
}

/// Capacity-respecting budget share for one raw row.
pub fn allocate_row(
    raw: &[Real],
    population: &[Real],
    total_vaccines: Real,
    config: &AllocationConfig,
) -> SamplingResult<Vec<Real>> {
    if raw.len() != population.len() {
        return Err(SamplingError::ShapeMismatch {
            what: "allocation row",
            expected: population.len(),
            actual: raw.len(),
        });
    }
    check_budget(population, total_vaccines)?;
    allocate_row_counted(raw, population, total_vaccines, config).map(|(share, _)| share)
}

fn check_budget(population: &[Real], total_vaccines: Real) -> SamplingResult<()> {
    if let Some((age, n)) = population
        .iter()
        .enumerate()
        .find(|(_, n)| !n.is_finite() || **n < 0.0)
    {
        return Err(SamplingError::Configuration {
            what: format!("age group {age} has invalid population {n}"),
        });
    }
    if !(total_vaccines > 0.0) || !total_vaccines.is_finite() {
        return Err(SamplingError::Configuration {
            what: format!("total_vaccines must be positive, got {total_vaccines}"),
        });
    }
    let capacity: Real = population.iter().sum();
    if total_vaccines > capacity {
        return Err(SamplingError::Configuration {
            what: format!("total_vaccines {total_vaccines} exceeds total population {capacity}"),
        });
    }
    Ok(())
}

fn allocate_row_counted(
    raw: &[Real],
    population: &[Real],
    total_vaccines: Real,
    config: &AllocationConfig,
) -> SamplingResult<(Vec<Real>, usize)> {
    if raw.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(SamplingError::Configuration {
            what: format!("allocation row has negative or non-finite entries: {raw:?}"),
        });
    }
    let mut share = normalized(raw).ok_or_else(|| SamplingError::Configuration {
        what: "allocation row sums to zero".to_string(),
    })?;
    if let Some(age) = (0..share.len()).find(|&i| share[i] > 0.0 && population[i] == 0.0) {
        return Err(SamplingError::Configuration {
            what: format!("age group {age} has zero population but receives vaccines"),
        });
    }

    let max_iterations = config.max_iterations.unwrap_or(population.len() + 1);
    for round in 0..=max_iterations {
        let doses: Vec<Real> = share.iter().map(|s| s * total_vaccines).collect();
        if !doses
            .iter()
            .zip(population)
            .any(|(d, n)| over_capacity(*d, *n, config.tolerance))
        {
            return Ok((clamp_to_capacity(share, population, total_vaccines), round));
        }
        if round == max_iterations {
            break;
        }
        share = redistribute(&doses, population, total_vaccines, config.tolerance)?;
    }

    Err(SamplingError::NonConvergence {
        iterations: max_iterations,
        what: format!("row {raw:?} still exceeds capacity"),
    })
}

/// Largest share whose doses do not exceed `population`.
fn capacity_share(population: Real, total_vaccines: Real) -> Real {
    let mut share = population / total_vaccines;
    while share * total_vaccines > population {
        share = share.next_down();
    }
    share
}

/// Pin every group at or above capacity to exactly its capacity share and
/// rescale the others to keep the row summing to one.
///
/// The loop stops within tolerance of capacity; this removes that slack so
/// `share * total_vaccines <= population` holds for every group.
fn clamp_to_capacity(mut share: Vec<Real>, population: &[Real], total_vaccines: Real) -> Vec<Real> {
    let mut pinned = vec![false; share.len()];
    loop {
        let mut changed = false;
        for i in 0..share.len() {
            if !pinned[i] && share[i] * total_vaccines >= population[i] {
                share[i] = capacity_share(population[i], total_vaccines);
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            return share;
        }

        let pinned_sum: Real = (0..share.len()).filter(|&i| pinned[i]).map(|i| share[i]).sum();
        let free_sum: Real = (0..share.len()).filter(|&i| !pinned[i]).map(|i| share[i]).sum();
        if !(free_sum > 0.0) {
            return share;
        }
        let scale = (1.0 - pinned_sum).max(0.0) / free_sum;
        for i in (0..share.len()).filter(|&i| !pinned[i]) {
            share[i] *= scale;
        }
    }
}

fn over_capacity(doses: Real, population: Real, tolerance: Real) -> bool {
    doses > population * (1.0 + tolerance)
}

fn below_capacity(doses: Real, population: Real, tolerance: Real) -> bool {
    doses < population * (1.0 - tolerance)
}

/// One water-filling round: clamp, pass on the excess, renormalize.
fn redistribute(
    doses: &[Real],
    population: &[Real],
    total_vaccines: Real,
    tolerance: Real,
) -> SamplingResult<Vec<Real>> {
    let mut next = doses.to_vec();
    let mut excess = 0.0;
    for (d, &n) in next.iter_mut().zip(population) {
        if over_capacity(*d, n, tolerance) {
            excess += *d - n;
            *d = n;
        }
    }

    let receivers: Vec<usize> = (0..next.len())
        .filter(|&i| below_capacity(next[i], population[i], tolerance))
        .collect();
    if receivers.is_empty() {
        return Err(SamplingError::Configuration {
            what: format!("no age group has spare capacity for {excess} excess doses"),
        });
    }

    let share_weight: Real = receivers.iter().map(|&i| doses[i]).sum();
    if share_weight > 0.0 {
        for &i in &receivers {
            next[i] += excess * doses[i] / share_weight;
        }
    } else {
        let room: Real = receivers.iter().map(|&i| population[i] - next[i]).sum();
        warn!(
            excess,
            "receiving groups have zero share, spreading excess by spare capacity"
        );
        for &i in &receivers {
            next[i] += excess * (population[i] - next[i]) / room;
        }
    }

    let scaled: Vec<Real> = next.iter().map(|d| d / total_vaccines).collect();
    normalized(&scaled).ok_or_else(|| SamplingError::Configuration {
        what: "allocation collapsed to zero".to_string(),
    })
}
