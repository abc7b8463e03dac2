//! Scenario storage API.

use crate::types::ScenarioManifest;
use crate::{ResultsError, ResultsResult};
use nalgebra::DMatrix;
use std::fs;
use std::path::{Path, PathBuf};

const DELIMITER: u8 = b';';

/// Directory-backed store for sampling outputs.
///
/// Writes are sequential and unlocked; two runs targeting the same root
/// overwrite each other's files.
#[derive(Clone, Debug)]
pub struct ScenarioStore {
    root_dir: PathBuf,
}

impl ScenarioStore {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        if !root_dir.exists() {
            fs::create_dir_all(&root_dir)?;
        }
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn lhs_path(&self, scenario_id: &str) -> PathBuf {
        self.root_dir
            .join("lhs")
            .join(format!("lhs_{scenario_id}.csv"))
    }

    pub fn simulations_path(&self, scenario_id: &str, target: &str) -> PathBuf {
        self.root_dir
            .join("simulations")
            .join(format!("simulations_{scenario_id}_{target}.csv"))
    }

    pub fn optimal_path(&self, scenario_id: &str) -> PathBuf {
        self.root_dir
            .join("optimal_vaccination")
            .join(format!("optimal_vaccination_{scenario_id}.csv"))
    }

    fn manifest_path(&self, scenario_id: &str) -> PathBuf {
        self.root_dir
            .join("manifest")
            .join(format!("manifest_{scenario_id}.json"))
    }

    pub fn has_scenario(&self, scenario_id: &str) -> bool {
        self.manifest_path(scenario_id).exists()
    }

    pub fn save_lhs(&self, scenario_id: &str, table: &DMatrix<f64>) -> ResultsResult<()> {
        write_table(&self.lhs_path(scenario_id), table)
    }

    /// One target value per line, in sample row order.
    pub fn save_simulations(
        &self,
        scenario_id: &str,
        target: &str,
        values: &[f64],
    ) -> ResultsResult<()> {
        let column = DMatrix::from_column_slice(values.len(), 1, values);
        write_table(&self.simulations_path(scenario_id, target), &column)
    }

    pub fn save_optimal(&self, scenario_id: &str, row: &[f64]) -> ResultsResult<()> {
        let table = DMatrix::from_row_slice(1, row.len(), row);
        write_table(&self.optimal_path(scenario_id), &table)
    }

    pub fn save_manifest(&self, manifest: &ScenarioManifest) -> ResultsResult<()> {
        let path = self.manifest_path(&manifest.scenario_id);
        ensure_parent(&path)?;
        let manifest_json = serde_json::to_string_pretty(manifest)?;
        fs::write(path, manifest_json)?;
        Ok(())
    }

    pub fn load_lhs(&self, scenario_id: &str) -> ResultsResult<DMatrix<f64>> {
        read_table(&self.lhs_path(scenario_id), scenario_id)
    }

    pub fn load_simulations(&self, scenario_id: &str, target: &str) -> ResultsResult<Vec<f64>> {
        let table = read_table(&self.simulations_path(scenario_id, target), scenario_id)?;
        Ok(table.iter().copied().collect())
    }

    pub fn load_optimal(&self, scenario_id: &str) -> ResultsResult<Vec<f64>> {
        let table = read_table(&self.optimal_path(scenario_id), scenario_id)?;
        Ok(table.iter().copied().collect())
    }

    pub fn load_manifest(&self, scenario_id: &str) -> ResultsResult<ScenarioManifest> {
        let manifest_path = self.manifest_path(scenario_id);

        if !manifest_path.exists() {
            return Err(ResultsError::ScenarioNotFound {
                scenario_id: scenario_id.to_string(),
            });
        }

        let content = fs::read_to_string(manifest_path)?;
        let manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    pub fn list_scenarios(&self) -> ResultsResult<Vec<ScenarioManifest>> {
        let mut scenarios = Vec::new();
        let dir = self.root_dir.join("manifest");

        if !dir.exists() {
            return Ok(scenarios);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name
                .strip_prefix("manifest_")
                .and_then(|rest| rest.strip_suffix(".json"))
                && let Ok(manifest) = self.load_manifest(id)
            {
                scenarios.push(manifest);
            }
        }

        scenarios.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
        Ok(scenarios)
    }
}

fn ensure_parent(path: &Path) -> ResultsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_table(path: &Path, table: &DMatrix<f64>) -> ResultsResult<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_path(path)?;
    for row in table.row_iter() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn read_table(path: &Path, scenario_id: &str) -> ResultsResult<DMatrix<f64>> {
    if !path.exists() {
        return Err(ResultsError::ScenarioNotFound {
            scenario_id: scenario_id.to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_path(path)?;

    let mut values = Vec::new();
    let mut width: Option<usize> = None;
    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        if width.is_some_and(|w| w != record.len()) {
            return Err(ResultsError::MalformedTable {
                path: path.display().to_string(),
                reason: format!("row {rows} has {} fields", record.len()),
            });
        }
        width = Some(record.len());
        for field in record.iter() {
            let v = field
                .trim()
                .parse::<f64>()
                .map_err(|e| ResultsError::MalformedTable {
                    path: path.display().to_string(),
                    reason: format!("row {rows}: '{field}': {e}"),
                })?;
            values.push(v);
        }
        rows += 1;
    }

    Ok(DMatrix::from_row_slice(rows, width.unwrap_or(0), &values))
}
