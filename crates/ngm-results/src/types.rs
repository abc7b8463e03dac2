//! Result data types.

use serde::{Deserialize, Serialize};

pub type ScenarioId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioManifest {
    pub scenario_id: ScenarioId,
    pub kind: ScenarioKind,
    pub target: String,
    pub n_samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub fingerprint: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioKind {
    Vaccination { total_vaccines: f64 },
    Contact,
    Susceptibility,
}

impl ScenarioKind {
    /// Whether an optimal row is persisted for this scenario.
    pub fn has_optimum(&self) -> bool {
        matches!(self, ScenarioKind::Vaccination { .. })
    }
}

/// Current UTC time as RFC 3339, for manifests.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Scenario id used for file names: `<label>-<value>` pairs joined by `_`,
/// e.g. `susc-0.5_r0-2.5`.
pub fn scenario_id(parts: &[(&str, f64)]) -> ScenarioId {
    parts
        .iter()
        .map(|(label, value)| format!("{label}-{value}"))
        .collect::<Vec<_>>()
        .join("_")
}
