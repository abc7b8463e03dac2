//! Study configuration: which model to sample, under which scenarios.

use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use ngm_core::{Real, ensure_all_finite, ensure_len};
use ngm_engine::ExecutionContext;
use ngm_results::ScenarioKind;
use ngm_sampling::{AllocationConfig, Bounds, SamplerConfig, upper_triangle_len};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Top-level study file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    /// Model structure file, relative to the study file.
    pub model: PathBuf,
    /// Population per age group.
    pub population: Vec<Real>,
    /// Contact matrix rows, one per age group.
    pub contact_matrix: Vec<Vec<Real>>,
    #[serde(default)]
    pub sampling: SamplerConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    pub scenario: ScenarioDef,
    #[serde(default)]
    pub grid: GridDef,
    /// Output root, relative to the study file.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("sens_data")
}

fn default_parallel() -> bool {
    true
}

/// What a sample row means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ScenarioDef {
    /// Rows are vaccine allocations over age groups.
    Vaccination {
        total_vaccines: Real,
        #[serde(default = "default_efficacy")]
        vaccine_efficacy: Real,
    },
    /// Rows are the upper triangle of a symmetric contact multiplier.
    Contact {
        #[serde(default = "default_contact_lower")]
        lower: Real,
    },
    /// Rows are susceptible fractions per age group.
    Susceptibility {
        #[serde(default = "default_contact_lower")]
        lower: Real,
        #[serde(default = "default_upper")]
        upper: Real,
    },
}

fn default_efficacy() -> Real {
    1.0
}

fn default_contact_lower() -> Real {
    0.1
}

fn default_upper() -> Real {
    1.0
}

/// Scenario grid. Each susceptibility choice is combined with each base R0
/// choice; an empty list contributes a single pass with the model unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridDef {
    /// Parameter overwritten by each susceptibility choice.
    #[serde(default)]
    pub susc_param: Option<String>,
    /// Number of leading age groups receiving the choice; all when absent.
    #[serde(default)]
    pub susc_ages: Option<usize>,
    #[serde(default)]
    pub susc_choices: Vec<Real>,
    /// Infection-rate parameter rescaled to hit each base R0 choice.
    #[serde(default)]
    pub infection_param: Option<String>,
    #[serde(default)]
    pub r0_choices: Vec<Real>,
}

impl StudyConfig {
    pub fn n_age(&self) -> usize {
        self.population.len()
    }

    pub fn contact(&self) -> DMatrix<Real> {
        let n = self.n_age();
        DMatrix::from_fn(n, n, |a, b| self.contact_matrix[a][b])
    }

    pub fn execution_context(&self) -> ExecutionContext {
        if self.parallel {
            ExecutionContext::Parallel
        } else {
            ExecutionContext::Sequential
        }
    }

    pub fn kind(&self) -> ScenarioKind {
        match &self.scenario {
            ScenarioDef::Vaccination { total_vaccines, .. } => ScenarioKind::Vaccination {
                total_vaccines: *total_vaccines,
            },
            ScenarioDef::Contact { .. } => ScenarioKind::Contact,
            ScenarioDef::Susceptibility { .. } => ScenarioKind::Susceptibility,
        }
    }

    /// Sampling box for this scenario kind.
    pub fn bounds(&self) -> AppResult<Bounds> {
        let n = self.n_age();
        let bounds = match &self.scenario {
            ScenarioDef::Vaccination { .. } => Bounds::uniform(n, 0.0, 1.0),
            ScenarioDef::Contact { lower } => Bounds::uniform(upper_triangle_len(n), *lower, 1.0),
            ScenarioDef::Susceptibility { lower, upper } => Bounds::uniform(n, *lower, *upper),
        };
        Ok(bounds?)
    }

    pub fn model_path(&self, study_path: &Path) -> PathBuf {
        resolve(study_path, &self.model)
    }

    pub fn output_path(&self, study_path: &Path) -> PathBuf {
        resolve(study_path, &self.output_dir)
    }

    pub fn validate(&self) -> AppResult<()> {
        let n = self.n_age();
        if n == 0 {
            return Err(AppError::Study("population must list at least one age group".into()));
        }
        ensure_all_finite(&self.population, "population")?;
        if let Some(age) = self.population.iter().position(|&p| !(p > 0.0)) {
            return Err(AppError::Study(format!(
                "population of age group {age} must be positive"
            )));
        }
        if self.contact_matrix.len() != n {
            return Err(AppError::Study(format!(
                "contact_matrix must be {n}x{n} to match population"
            )));
        }
        for row in &self.contact_matrix {
            ensure_len(row, n, "contact_matrix row")?;
            ensure_all_finite(row, "contact_matrix")?;
        }
        if self.contact_matrix.iter().flatten().any(|c| *c < 0.0) {
            return Err(AppError::Study(
                "contact_matrix entries must be non-negative".into(),
            ));
        }
        self.sampling.validate()?;

        match &self.scenario {
            ScenarioDef::Vaccination {
                total_vaccines,
                vaccine_efficacy,
            } => {
                let capacity: Real = self.population.iter().sum();
                if !(*total_vaccines > 0.0) || *total_vaccines > capacity {
                    return Err(AppError::Study(format!(
                        "total_vaccines must lie in (0, {capacity}], got {total_vaccines}"
                    )));
                }
                if !(0.0..=1.0).contains(vaccine_efficacy) {
                    return Err(AppError::Study(format!(
                        "vaccine_efficacy must lie in [0, 1], got {vaccine_efficacy}"
                    )));
                }
            }
            ScenarioDef::Contact { lower } => check_interval("contact", *lower, 1.0)?,
            ScenarioDef::Susceptibility { lower, upper } => {
                check_interval("susceptibility", *lower, *upper)?
            }
        }

        let grid = &self.grid;
        ensure_all_finite(&grid.susc_choices, "susc_choices")?;
        ensure_all_finite(&grid.r0_choices, "r0_choices")?;
        if !grid.susc_choices.is_empty() && grid.susc_param.is_none() {
            return Err(AppError::Study("susc_choices require susc_param".into()));
        }
        if let Some(ages) = grid.susc_ages
            && (ages == 0 || ages > n)
        {
            return Err(AppError::Study(format!(
                "susc_ages must lie in 1..={n}, got {ages}"
            )));
        }
        if !grid.r0_choices.is_empty() && grid.infection_param.is_none() {
            return Err(AppError::Study("r0_choices require infection_param".into()));
        }
        if let Some(r0) = grid.r0_choices.iter().find(|r| !(**r > 0.0)) {
            return Err(AppError::Study(format!("base R0 choices must be positive, got {r0}")));
        }
        Ok(())
    }
}

fn check_interval(what: &str, lower: Real, upper: Real) -> AppResult<()> {
    if !(lower > 0.0 && lower <= upper && upper <= 1.0) {
        return Err(AppError::Study(format!(
            "{what} bounds must satisfy 0 < lower <= upper <= 1, got [{lower}, {upper}]"
        )));
    }
    Ok(())
}

fn resolve(study_path: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    study_path
        .parent()
        .map(|dir| dir.join(relative))
        .unwrap_or_else(|| relative.to_path_buf())
}

/// Load and validate a study from a YAML file.
pub fn load_study(path: &Path) -> AppResult<StudyConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::StudyFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let study: StudyConfig = serde_yaml::from_str(&content)
        .map_err(|e| AppError::Study(format!("Failed to parse study YAML: {}", e)))?;
    study.validate()?;
    Ok(study)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDY: &str = r#"
model: ../models/seirv_age.yaml
population: [1000, 2000]
contact_matrix:
  - [6, 2]
  - [2, 4]
sampling: { n_samples: 20, seed: 3 }
scenario: { type: vaccination, total_vaccines: 600, vaccine_efficacy: 0.8 }
grid:
  susc_param: susc
  susc_ages: 1
  susc_choices: [0.5, 1.0]
  infection_param: beta
  r0_choices: [1.5, 2.5]
"#;

    #[test]
    fn parses_with_defaults() {
        let study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.validate().unwrap();
        assert_eq!(study.n_age(), 2);
        assert_eq!(study.sampling.batch_size, SamplerConfig::default().batch_size);
        assert_eq!(study.allocation, AllocationConfig::default());
        assert_eq!(study.output_dir, PathBuf::from("sens_data"));
        assert_eq!(study.execution_context(), ExecutionContext::Parallel);
        assert_eq!(study.contact()[(0, 1)], 2.0);
        assert!(study.kind().has_optimum());
    }

    #[test]
    fn unknown_keys_rejected() {
        let bad = STUDY.replace("sampling:", "samplng:");
        assert!(serde_yaml::from_str::<StudyConfig>(&bad).is_err());
        let bad = STUDY.replace("vaccine_efficacy", "efficacy");
        assert!(serde_yaml::from_str::<StudyConfig>(&bad).is_err());
    }

    #[test]
    fn bounds_follow_scenario_kind() {
        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        assert_eq!(study.bounds().unwrap().dim(), 2);
        study.scenario = ScenarioDef::Contact { lower: 0.1 };
        assert_eq!(study.bounds().unwrap().dim(), 3);
        assert_eq!(study.kind(), ScenarioKind::Contact);
    }

    #[test]
    fn invalid_studies_rejected() {
        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.contact_matrix.pop();
        assert!(study.validate().is_err());

        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.scenario = ScenarioDef::Vaccination {
            total_vaccines: 5000.0,
            vaccine_efficacy: 1.0,
        };
        assert!(study.validate().is_err());

        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.grid.infection_param = None;
        assert!(study.validate().is_err());

        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.grid.susc_ages = Some(3);
        assert!(study.validate().is_err());
    }

    #[test]
    fn malformed_numbers_reported_as_invalid_input() {
        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.contact_matrix[1].pop();
        match study.validate() {
            Err(AppError::InvalidInput(msg)) => {
                assert!(msg.contains("contact_matrix row"), "{msg}");
                assert!(msg.contains("expected 2, got 1"), "{msg}");
            }
            other => panic!("expected invalid input, got {other:?}"),
        }

        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.population[0] = Real::NAN;
        assert!(matches!(study.validate(), Err(AppError::InvalidInput(_))));

        let mut study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        study.grid.r0_choices.push(Real::INFINITY);
        assert!(matches!(study.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn paths_resolve_next_to_study() {
        let study: StudyConfig = serde_yaml::from_str(STUDY).unwrap();
        let study_path = Path::new("/data/studies/vacc.yaml");
        assert_eq!(
            study.model_path(study_path),
            PathBuf::from("/data/studies/../models/seirv_age.yaml")
        );
        assert_eq!(
            study.output_path(study_path),
            PathBuf::from("/data/studies/sens_data")
        );
    }
}
