//! Model validation logic.

use crate::schema::{ModelStructure, StateDef, TransitionDef};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Duplicate name: {name} in {context}")]
    DuplicateName { name: String, context: String },

    #[error("Missing reference: {name} in {context}")]
    MissingReference { name: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

pub fn validate_model(model: &ModelStructure) -> Result<(), ValidationError> {
    if model.states.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "states".to_string(),
            value: "[]".to_string(),
            reason: "at least one state is required".to_string(),
        });
    }

    let mut states: HashMap<&str, &StateDef> = HashMap::new();
    for state in &model.states {
        if states.insert(state.name.as_str(), state).is_some() {
            return Err(ValidationError::DuplicateName {
                name: state.name.clone(),
                context: "states".to_string(),
            });
        }
        if state.n_substates == 0 {
            return Err(ValidationError::InvalidValue {
                field: format!("state '{}' n_substates", state.name),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
    }

    validate_parameters(model)?;

    for (idx, transition) in model.transitions.iter().enumerate() {
        validate_transition(idx, transition, &states, model)?;
    }

    Ok(())
}

fn validate_parameters(model: &ModelStructure) -> Result<(), ValidationError> {
    let mut age_len: Option<(usize, &str)> = None;
    for (name, value) in &model.parameters {
        if let Some(bad) = value.values().iter().find(|v| !v.is_finite()) {
            return Err(ValidationError::InvalidValue {
                field: format!("parameter '{name}'"),
                value: bad.to_string(),
                reason: "must be finite".to_string(),
            });
        }
        if let Some(len) = value.age_len() {
            if len == 0 {
                return Err(ValidationError::InvalidValue {
                    field: format!("parameter '{name}'"),
                    value: "[]".to_string(),
                    reason: "per-age vector must not be empty".to_string(),
                });
            }
            match age_len {
                None => age_len = Some((len, name)),
                Some((expected, first)) if expected != len => {
                    return Err(ValidationError::InvalidValue {
                        field: format!("parameter '{name}'"),
                        value: format!("length {len}"),
                        reason: format!("parameter '{first}' has length {expected}"),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

fn validate_transition(
    idx: usize,
    transition: &TransitionDef,
    states: &HashMap<&str, &StateDef>,
    model: &ModelStructure,
) -> Result<(), ValidationError> {
    let context = format!(
        "transition #{idx} ({} {} -> {})",
        transition.kind_name(),
        transition.source(),
        transition.target()
    );

    for endpoint in [transition.source(), transition.target()] {
        if !states.contains_key(endpoint) {
            return Err(ValidationError::MissingReference {
                name: endpoint.to_string(),
                context: context.clone(),
            });
        }
    }
    if transition.source() == transition.target() {
        return Err(ValidationError::InvalidValue {
            field: context,
            value: transition.source().to_string(),
            reason: "source and target must differ".to_string(),
        });
    }

    for param in transition.referenced_params() {
        if !model.parameters.contains_key(param) {
            return Err(ValidationError::MissingReference {
                name: param.to_string(),
                context: format!("{context} parameters"),
            });
        }
    }

    if let TransitionDef::Infection { target, actors, .. } = transition {
        if !states[target.as_str()].kind.is_infected() {
            return Err(ValidationError::InvalidValue {
                field: format!("{context} target"),
                value: target.clone(),
                reason: "infection target must be an infected or infectious state".to_string(),
            });
        }
        if actors.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: format!("{context} actors"),
                value: "{}".to_string(),
                reason: "at least one actor state is required".to_string(),
            });
        }
        for actor in actors.keys() {
            let Some(state) = states.get(actor.as_str()) else {
                return Err(ValidationError::MissingReference {
                    name: actor.clone(),
                    context: format!("{context} actors"),
                });
            };
            if !state.kind.is_infected() {
                return Err(ValidationError::InvalidValue {
                    field: format!("{context} actor"),
                    value: actor.clone(),
                    reason: "actors must be infected or infectious states".to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActorDef, ParamValue, StateKind};
    use std::collections::BTreeMap;

    fn state(name: &str, kind: StateKind) -> StateDef {
        StateDef {
            name: name.to_string(),
            n_substates: 1,
            kind,
        }
    }

    fn sir() -> ModelStructure {
        let mut actors = BTreeMap::new();
        actors.insert("i".to_string(), ActorDef::default());
        let mut parameters = BTreeMap::new();
        parameters.insert("beta".to_string(), ParamValue::Scalar(0.3));
        parameters.insert("gamma".to_string(), ParamValue::Scalar(0.1));
        ModelStructure {
            states: vec![
                state("s", StateKind::Susceptible),
                state("i", StateKind::Infectious),
                state("r", StateKind::Recovered),
            ],
            transitions: vec![
                TransitionDef::Infection {
                    source: "s".to_string(),
                    target: "i".to_string(),
                    param: "beta".to_string(),
                    actors,
                    susceptibility: vec![],
                },
                TransitionDef::Basic {
                    source: "i".to_string(),
                    target: "r".to_string(),
                    param: "gamma".to_string(),
                    distr: None,
                },
            ],
            parameters,
        }
    }

    #[test]
    fn valid_sir_passes() {
        validate_model(&sir()).unwrap();
    }

    #[test]
    fn duplicate_state_rejected() {
        let mut model = sir();
        model.states.push(state("i", StateKind::Infected));
        assert!(matches!(
            validate_model(&model),
            Err(ValidationError::DuplicateName { .. })
        ));
    }

    #[test]
    fn zero_substates_rejected() {
        let mut model = sir();
        model.states[1].n_substates = 0;
        assert!(matches!(
            validate_model(&model),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn undeclared_actor_rejected() {
        let mut model = sir();
        if let TransitionDef::Infection { actors, .. } = &mut model.transitions[0] {
            actors.insert("a".to_string(), ActorDef::default());
        }
        let err = validate_model(&model).unwrap_err();
        assert!(err.to_string().contains("Missing reference: a"));
    }

    #[test]
    fn missing_parameter_rejected() {
        let mut model = sir();
        model.parameters.remove("gamma");
        let err = validate_model(&model).unwrap_err();
        assert!(err.to_string().contains("gamma"));
    }

    #[test]
    fn inconsistent_age_vectors_rejected() {
        let mut model = sir();
        model.set_param("beta", ParamValue::PerAge(vec![0.1, 0.2]));
        model.set_param("gamma", ParamValue::PerAge(vec![0.1, 0.2, 0.3]));
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn non_infected_infection_target_rejected() {
        let mut model = sir();
        if let TransitionDef::Infection { target, .. } = &mut model.transitions[0] {
            *target = "r".to_string();
        }
        assert!(validate_model(&model).is_err());
    }
}
