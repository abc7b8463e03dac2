//! Sampling run state machine.

use nalgebra::DMatrix;
use ngm_core::Real;
use ngm_results::{ScenarioKind, ScenarioStore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::allocation::{AllocationConfig, allocate_vaccines};
use crate::error::{SamplingError, SamplingResult};
use crate::evaluator::{OutputEvaluator, evaluate_batched};
use crate::lhs::{Bounds, LatinHypercube};

/// Sampling options shared by every scenario of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerConfig {
    pub n_samples: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Without a seed, runs draw from OS entropy and are not reproducible.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_batch_size() -> usize {
    1000
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            batch_size: default_batch_size(),
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> SamplingResult<()> {
        if self.n_samples == 0 {
            return Err(SamplingError::Configuration {
                what: "n_samples must be positive".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(SamplingError::Configuration {
                what: "batch_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStage {
    Configured,
    Sampled,
    Allocated,
    Evaluated,
    Persisted,
}

/// Sample rows reordered by ascending target value.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSamples {
    pub table: DMatrix<Real>,
    pub outputs: Vec<Real>,
}

impl RankedSamples {
    /// Row with the lowest target value.
    pub fn best_row(&self) -> Option<Vec<Real>> {
        (self.table.nrows() > 0).then(|| self.table.row(0).iter().copied().collect())
    }

    pub fn best_value(&self) -> Option<Real> {
        self.outputs.first().copied()
    }
}

/// Sort `table` rows by their `outputs`, ascending.
///
/// Ties keep their original order. NaN targets sort last.
pub fn rank_samples(table: &DMatrix<Real>, outputs: &[Real]) -> SamplingResult<RankedSamples> {
    if outputs.len() != table.nrows() {
        return Err(SamplingError::ShapeMismatch {
            what: "target values",
            expected: table.nrows(),
            actual: outputs.len(),
        });
    }

    let mut order: Vec<usize> = (0..outputs.len()).collect();
    order.sort_by(|&a, &b| match (outputs[a].is_nan(), outputs[b].is_nan()) {
        (false, false) => outputs[a].total_cmp(&outputs[b]),
        (x, y) => x.cmp(&y),
    });

    let table = DMatrix::from_fn(table.nrows(), table.ncols(), |r, c| table[(order[r], c)]);
    let outputs = order.iter().map(|&i| outputs[i]).collect();
    Ok(RankedSamples { table, outputs })
}

/// One scenario's pass from sampling to persisted tables.
///
/// Stages advance `Configured -> Sampled -> (Allocated) -> Evaluated ->
/// Persisted`; calling an operation from any other stage is an
/// [`SamplingError::InvalidStage`].
#[derive(Debug, Clone)]
pub struct SamplingRun {
    config: SamplerConfig,
    sampler: LatinHypercube,
    stage: SamplingStage,
    table: Option<DMatrix<Real>>,
    outputs: Option<Vec<Real>>,
}

impl SamplingRun {
    pub fn new(config: SamplerConfig) -> SamplingResult<Self> {
        config.validate()?;
        Ok(Self {
            sampler: LatinHypercube::new(config.seed),
            config,
            stage: SamplingStage::Configured,
            table: None,
            outputs: None,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn stage(&self) -> SamplingStage {
        self.stage
    }

    /// Current sample table: raw after sampling, allocation fractions after
    /// allocating.
    pub fn table(&self) -> Option<&DMatrix<Real>> {
        self.table.as_ref()
    }

    pub fn outputs(&self) -> Option<&[Real]> {
        self.outputs.as_deref()
    }

    fn require_stage(&self, allowed: &[SamplingStage], expected: &'static str) -> SamplingResult<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(SamplingError::InvalidStage {
                expected,
                actual: self.stage,
            })
        }
    }

    fn current_table(&self) -> SamplingResult<&DMatrix<Real>> {
        self.table.as_ref().ok_or(SamplingError::InvalidStage {
            expected: "a sampled table",
            actual: self.stage,
        })
    }

    /// Draw `n_samples` Latin hypercube rows inside `bounds`.
    pub fn draw_samples(&mut self, bounds: &Bounds) -> SamplingResult<&DMatrix<Real>> {
        self.require_stage(&[SamplingStage::Configured], "Configured")?;
        let table = self.sampler.sample(self.config.n_samples, bounds)?;
        info!(
            n_samples = table.nrows(),
            dim = table.ncols(),
            seeded = self.config.seed.is_some(),
            "drew latin hypercube samples"
        );
        self.stage = SamplingStage::Sampled;
        Ok(&*self.table.insert(table))
    }

    /// Replace the raw table with capacity-respecting allocation fractions.
    pub fn allocate(
        &mut self,
        population: &[Real],
        total_vaccines: Real,
        config: &AllocationConfig,
    ) -> SamplingResult<&DMatrix<Real>> {
        self.require_stage(&[SamplingStage::Sampled], "Sampled")?;
        let allocated = allocate_vaccines(self.current_table()?, population, total_vaccines, config)?;
        self.stage = SamplingStage::Allocated;
        Ok(&*self.table.insert(allocated))
    }

    /// Evaluate every row in batches of `batch_size`.
    pub fn evaluate(&mut self, evaluator: &dyn OutputEvaluator) -> SamplingResult<&[Real]> {
        self.require_stage(
            &[SamplingStage::Sampled, SamplingStage::Allocated],
            "Sampled or Allocated",
        )?;
        let outputs = evaluate_batched(evaluator, self.current_table()?, self.config.batch_size)?;
        info!(
            target_name = evaluator.target(),
            rows = outputs.len(),
            batch_size = self.config.batch_size,
            "evaluated samples"
        );
        self.stage = SamplingStage::Evaluated;
        Ok(self.outputs.insert(outputs).as_slice())
    }

    /// Sort by target and write the sample table, target column and, for
    /// scenarios with an optimum, the best row.
    pub fn rank_and_persist(
        &mut self,
        store: &ScenarioStore,
        scenario_id: &str,
        target: &str,
        kind: &ScenarioKind,
    ) -> SamplingResult<RankedSamples> {
        self.require_stage(&[SamplingStage::Evaluated], "Evaluated")?;
        let outputs = self.outputs.as_deref().ok_or(SamplingError::InvalidStage {
            expected: "evaluated outputs",
            actual: self.stage,
        })?;
        let ranked = rank_samples(self.current_table()?, outputs)?;

        store.save_lhs(scenario_id, &ranked.table)?;
        store.save_simulations(scenario_id, target, &ranked.outputs)?;
        if kind.has_optimum()
            && let Some(best) = ranked.best_row()
        {
            store.save_optimal(scenario_id, &best)?;
        }

        info!(
            scenario_id,
            best = ?ranked.best_value(),
            root = %store.root().display(),
            "persisted scenario tables"
        );
        self.stage = SamplingStage::Persisted;
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_is_ascending_and_aligned() {
        let table = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let ranked = rank_samples(&table, &[0.5, f64::NAN, 0.1]).unwrap();
        assert_eq!(ranked.outputs[..2], [0.1, 0.5]);
        assert!(ranked.outputs[2].is_nan());
        assert_eq!(ranked.best_row(), Some(vec![3.0, 3.0]));
        assert_eq!(ranked.table.row(2)[0], 2.0);
    }

    #[test]
    fn ranking_checks_lengths() {
        let table = DMatrix::from_element(2, 2, 0.0);
        assert!(rank_samples(&table, &[1.0]).is_err());
    }

    #[test]
    fn out_of_order_calls_fail() {
        let mut run = SamplingRun::new(SamplerConfig {
            n_samples: 4,
            batch_size: 2,
            seed: Some(1),
        })
        .unwrap();
        let err = run
            .allocate(&[1.0, 1.0], 1.0, &AllocationConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SamplingError::InvalidStage {
                actual: SamplingStage::Configured,
                ..
            }
        ));

        let bounds = Bounds::uniform(2, 0.0, 1.0).unwrap();
        run.draw_samples(&bounds).unwrap();
        assert_eq!(run.stage(), SamplingStage::Sampled);
        assert!(run.draw_samples(&bounds).is_err());
    }

    #[test]
    fn zero_samples_rejected() {
        let config = SamplerConfig {
            n_samples: 0,
            ..SamplerConfig::default()
        };
        assert!(SamplingRun::new(config).is_err());
    }
}
