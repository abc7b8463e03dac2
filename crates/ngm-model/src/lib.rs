//! ngm-model: declarative model structure format and validation.

pub mod schema;
pub mod validate;

pub use schema::*;
pub use validate::{ValidationError, validate_model};

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn from_yaml_str(content: &str) -> ModelResult<ModelStructure> {
    let model: ModelStructure = serde_yaml::from_str(content)?;
    validate_model(&model)?;
    Ok(model)
}

pub fn from_json_str(content: &str) -> ModelResult<ModelStructure> {
    let model: ModelStructure = serde_json::from_str(content)?;
    validate_model(&model)?;
    Ok(model)
}

pub fn load_yaml(path: &std::path::Path) -> ModelResult<ModelStructure> {
    let content = std::fs::read_to_string(path)?;
    from_yaml_str(&content)
}

pub fn save_yaml(path: &std::path::Path, model: &ModelStructure) -> ModelResult<()> {
    validate_model(model)?;
    let content = serde_yaml::to_string(model)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn load_json(path: &std::path::Path) -> ModelResult<ModelStructure> {
    let content = std::fs::read_to_string(path)?;
    from_json_str(&content)
}

pub fn save_json(path: &std::path::Path, model: &ModelStructure) -> ModelResult<()> {
    validate_model(model)?;
    let content = serde_json::to_string_pretty(model)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load by file extension: `.json` is JSON, everything else YAML.
pub fn load(path: &std::path::Path) -> ModelResult<ModelStructure> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json(path),
        _ => load_yaml(path),
    }
}
