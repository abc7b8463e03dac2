//! Parameter lookup against a model's parameter table.

use ngm_core::Real;
use ngm_model::ModelStructure;

use crate::error::{EngineError, EngineResult};

/// Broadcast parameter `name` to one value per age group.
pub fn age_vector(model: &ModelStructure, name: &str, n_age: usize) -> EngineResult<Vec<Real>> {
    let value = model
        .param(name)
        .ok_or_else(|| EngineError::Configuration {
            what: format!("parameter '{name}' is not declared"),
        })?;
    value
        .to_age_vector(n_age)
        .ok_or_else(|| EngineError::Configuration {
            what: format!(
                "parameter '{name}' has {} age entries, model evaluated with {n_age}",
                value.values().len()
            ),
        })
}

/// Elementwise product of several parameters, all ones if `names` is empty.
pub fn product_vector(
    model: &ModelStructure,
    names: &[String],
    n_age: usize,
) -> EngineResult<Vec<Real>> {
    let mut out = vec![1.0; n_age];
    for name in names {
        let values = age_vector(model, name, n_age)?;
        for (o, v) in out.iter_mut().zip(values) {
            *o *= v;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngm_model::ParamValue;

    fn model() -> ModelStructure {
        let mut model =
            ngm_model::from_yaml_str("states: [{ name: s, type: susceptible }]").unwrap();
        model.set_param("a", ParamValue::Scalar(2.0));
        model.set_param("b", ParamValue::PerAge(vec![0.5, 3.0]));
        model
    }

    #[test]
    fn broadcasts_and_multiplies() {
        let m = model();
        assert_eq!(age_vector(&m, "a", 2).unwrap(), vec![2.0, 2.0]);
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(product_vector(&m, &names, 2).unwrap(), vec![1.0, 6.0]);
        assert_eq!(product_vector(&m, &[], 3).unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn length_mismatch_is_configuration_error() {
        let m = model();
        assert!(matches!(
            age_vector(&m, "b", 3),
            Err(EngineError::Configuration { .. })
        ));
        assert!(matches!(
            age_vector(&m, "missing", 1),
            Err(EngineError::Configuration { .. })
        ));
    }
}
