//! Evaluator contract and the reproduction-number evaluators.

use nalgebra::DMatrix;
use ngm_core::Real;
use ngm_engine::NgmEngine;
use rayon::prelude::*;

use crate::error::{SamplingError, SamplingResult};

/// Maps sample rows to one target value each.
///
/// Implementations must preserve row order and return exactly one value per
/// input row.
pub trait OutputEvaluator: Send + Sync {
    /// Name of the output variable, used in persisted file names.
    fn target(&self) -> &str;

    /// Number of columns a sample row must have.
    fn row_width(&self) -> usize;

    fn evaluate(&self, rows: &DMatrix<Real>) -> SamplingResult<Vec<Real>>;
}

/// Evaluate `table` in chunks of at most `batch_size` rows.
pub fn evaluate_batched(
    evaluator: &dyn OutputEvaluator,
    table: &DMatrix<Real>,
    batch_size: usize,
) -> SamplingResult<Vec<Real>> {
    if batch_size == 0 {
        return Err(SamplingError::Configuration {
            what: "batch_size must be positive".to_string(),
        });
    }
    if table.ncols() != evaluator.row_width() {
        return Err(SamplingError::ShapeMismatch {
            what: "sample table columns",
            expected: evaluator.row_width(),
            actual: table.ncols(),
        });
    }

    let mut outputs = Vec::with_capacity(table.nrows());
    let mut start = 0;
    while start < table.nrows() {
        let len = batch_size.min(table.nrows() - start);
        let chunk = table.rows(start, len).into_owned();
        let values = evaluator.evaluate(&chunk)?;
        if values.len() != len {
            return Err(SamplingError::ShapeMismatch {
                what: "evaluator output",
                expected: len,
                actual: values.len(),
            });
        }
        outputs.extend(values);
        start += len;
    }
    Ok(outputs)
}

/// Entries in the upper triangle of an `n x n` matrix, diagonal included.
pub fn upper_triangle_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Symmetric matrix from its row-major upper triangle.
fn symmetric_from_upper(values: &[Real], n: usize) -> DMatrix<Real> {
    let mut m = DMatrix::zeros(n, n);
    let mut k = 0;
    for i in 0..n {
        for j in i..n {
            m[(i, j)] = values[k];
            m[(j, i)] = values[k];
            k += 1;
        }
    }
    m
}

fn check_population(engine: &NgmEngine, population: &[Real]) -> SamplingResult<()> {
    if population.len() != engine.n_age() {
        return Err(SamplingError::ShapeMismatch {
            what: "population",
            expected: engine.n_age(),
            actual: population.len(),
        });
    }
    Ok(())
}

/// R0 after vaccinating according to an allocation row.
///
/// Each row is the fraction of `total_vaccines` given to each age group.
/// Vaccinated individuals leave the susceptible pool with probability
/// `efficacy`, so `S = N - efficacy * row * total_vaccines`.
#[derive(Debug, Clone)]
pub struct VaccinatedR0Evaluator {
    engine: NgmEngine,
    population: Vec<Real>,
    contact_matrix: DMatrix<Real>,
    total_vaccines: Real,
    efficacy: Real,
}

impl VaccinatedR0Evaluator {
    pub fn new(
        engine: NgmEngine,
        population: Vec<Real>,
        contact_matrix: DMatrix<Real>,
        total_vaccines: Real,
        efficacy: Real,
    ) -> SamplingResult<Self> {
        check_population(&engine, &population)?;
        if !(0.0..=1.0).contains(&efficacy) {
            return Err(SamplingError::Configuration {
                what: format!("vaccine efficacy must lie in [0, 1], got {efficacy}"),
            });
        }
        if !(total_vaccines >= 0.0) {
            return Err(SamplingError::Configuration {
                what: format!("total_vaccines must be non-negative, got {total_vaccines}"),
            });
        }
        Ok(Self {
            engine,
            population,
            contact_matrix,
            total_vaccines,
            efficacy,
        })
    }
}

impl OutputEvaluator for VaccinatedR0Evaluator {
    fn target(&self) -> &str {
        "r0"
    }

    fn row_width(&self) -> usize {
        self.engine.n_age()
    }

    /// Rows must be allocated shares: no age group may receive more doses
    /// than its population.
    fn evaluate(&self, rows: &DMatrix<Real>) -> SamplingResult<Vec<Real>> {
        if rows.ncols() != self.population.len() {
            return Err(SamplingError::ShapeMismatch {
                what: "allocation rows",
                expected: self.population.len(),
                actual: rows.ncols(),
            });
        }
        for (r, row) in rows.row_iter().enumerate() {
            for (a, &share) in row.iter().enumerate() {
                let doses = share * self.total_vaccines;
                if !(share >= 0.0) || doses > self.population[a] {
                    return Err(SamplingError::Configuration {
                        what: format!(
                            "batch row {r} gives age group {a} {doses} doses for population {}",
                            self.population[a]
                        ),
                    });
                }
            }
        }

        let scale = self.efficacy * self.total_vaccines;
        let susceptibles = DMatrix::from_fn(rows.nrows(), rows.ncols(), |r, a| {
            self.population[a] - scale * rows[(r, a)]
        });
        Ok(self
            .engine
            .effective_r0_batch(&susceptibles, &self.population, &self.contact_matrix)?)
    }
}

/// R0 under a symmetric scaling of the contact matrix.
///
/// Each row holds the upper triangle, diagonal included, of a multiplier
/// matrix applied elementwise to the contact matrix of a fully susceptible
/// population.
#[derive(Debug, Clone)]
pub struct ContactR0Evaluator {
    engine: NgmEngine,
    population: Vec<Real>,
    contact_matrix: DMatrix<Real>,
}

impl ContactR0Evaluator {
    pub fn new(
        engine: NgmEngine,
        population: Vec<Real>,
        contact_matrix: DMatrix<Real>,
    ) -> SamplingResult<Self> {
        check_population(&engine, &population)?;
        Ok(Self {
            engine,
            population,
            contact_matrix,
        })
    }

    fn evaluate_row(&self, row: &[Real]) -> SamplingResult<Real> {
        let multiplier = symmetric_from_upper(row, self.engine.n_age());
        let scaled = self.contact_matrix.component_mul(&multiplier);
        Ok(self.engine.base_r0(&self.population, &scaled)?)
    }
}

impl OutputEvaluator for ContactR0Evaluator {
    fn target(&self) -> &str {
        "r0"
    }

    fn row_width(&self) -> usize {
        upper_triangle_len(self.engine.n_age())
    }

    fn evaluate(&self, rows: &DMatrix<Real>) -> SamplingResult<Vec<Real>> {
        if rows.ncols() != self.row_width() {
            return Err(SamplingError::ShapeMismatch {
                what: "contact multiplier row",
                expected: self.row_width(),
                actual: rows.ncols(),
            });
        }
        let rows: Vec<Vec<Real>> = rows
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();

        if self.engine.context().is_parallel() {
            rows.par_iter().map(|row| self.evaluate_row(row)).collect()
        } else {
            rows.iter().map(|row| self.evaluate_row(row)).collect()
        }
    }
}

/// R0 for a sampled susceptible fraction per age group.
#[derive(Debug, Clone)]
pub struct SusceptibilityR0Evaluator {
    engine: NgmEngine,
    population: Vec<Real>,
    contact_matrix: DMatrix<Real>,
}

impl SusceptibilityR0Evaluator {
    pub fn new(
        engine: NgmEngine,
        population: Vec<Real>,
        contact_matrix: DMatrix<Real>,
    ) -> SamplingResult<Self> {
        check_population(&engine, &population)?;
        Ok(Self {
            engine,
            population,
            contact_matrix,
        })
    }
}

impl OutputEvaluator for SusceptibilityR0Evaluator {
    fn target(&self) -> &str {
        "r0"
    }

    fn row_width(&self) -> usize {
        self.engine.n_age()
    }

    fn evaluate(&self, rows: &DMatrix<Real>) -> SamplingResult<Vec<Real>> {
        let susceptibles =
            DMatrix::from_fn(rows.nrows(), rows.ncols(), |r, a| rows[(r, a)] * self.population[a]);
        Ok(self
            .engine
            .effective_r0_batch(&susceptibles, &self.population, &self.contact_matrix)?)
    }
}
