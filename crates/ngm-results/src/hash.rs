//! Content-based fingerprints for scenario manifests.

use ngm_model::ModelStructure;
use sha2::{Digest, Sha256};

/// Hash of the model structure plus the serialized scenario settings.
///
/// Two scenarios with the same fingerprint sampled the same model under the
/// same settings.
pub fn compute_fingerprint(model: &ModelStructure, settings: &impl serde::Serialize) -> String {
    let mut hasher = Sha256::new();

    let model_json = serde_json::to_string(model).unwrap_or_default();
    hasher.update(model_json.as_bytes());

    let settings_json = serde_json::to_string(settings).unwrap_or_default();
    hasher.update(settings_json.as_bytes());

    let result = hasher.finalize();
    format!("{:x}", result)
}
