//! Model structure definitions.
//!
//! A model is pure data: states with substate counts, typed transitions and
//! named parameters. Every struct rejects unknown keys so typos in a model
//! file surface at load time.

use ngm_core::Real;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelStructure {
    pub states: Vec<StateDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StateDef {
    pub name: String,
    #[serde(default = "default_n_substates")]
    pub n_substates: usize,
    #[serde(rename = "type")]
    pub kind: StateKind,
}

fn default_n_substates() -> usize {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Susceptible,
    Infected,
    Infectious,
    Recovered,
    Vaccinated,
    Dead,
}

impl StateKind {
    /// States that take part in the next-generation matrix.
    pub fn is_infected(self) -> bool {
        matches!(self, StateKind::Infected | StateKind::Infectious)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransitionDef {
    Basic {
        source: String,
        target: String,
        param: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distr: Option<String>,
    },
    Infection {
        source: String,
        target: String,
        param: String,
        actors: BTreeMap<String, ActorDef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        susceptibility: Vec<String>,
    },
    Vaccination {
        source: String,
        target: String,
        param: String,
    },
}

impl TransitionDef {
    pub fn source(&self) -> &str {
        match self {
            TransitionDef::Basic { source, .. }
            | TransitionDef::Infection { source, .. }
            | TransitionDef::Vaccination { source, .. } => source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            TransitionDef::Basic { target, .. }
            | TransitionDef::Infection { target, .. }
            | TransitionDef::Vaccination { target, .. } => target,
        }
    }

    pub fn param(&self) -> &str {
        match self {
            TransitionDef::Basic { param, .. }
            | TransitionDef::Infection { param, .. }
            | TransitionDef::Vaccination { param, .. } => param,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TransitionDef::Basic { .. } => "basic",
            TransitionDef::Infection { .. } => "infection",
            TransitionDef::Vaccination { .. } => "vaccination",
        }
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, TransitionDef::Basic { .. })
    }

    pub fn is_infection(&self) -> bool {
        matches!(self, TransitionDef::Infection { .. })
    }

    /// Every parameter name this transition reads.
    pub fn referenced_params(&self) -> Vec<&str> {
        let mut names = vec![self.param()];
        match self {
            TransitionDef::Basic {
                distr: Some(distr), ..
            } => names.push(distr),
            TransitionDef::Infection {
                actors,
                susceptibility,
                ..
            } => {
                names.extend(susceptibility.iter().map(String::as_str));
                for actor in actors.values() {
                    names.extend(actor.infectiousness.iter().map(String::as_str));
                }
            }
            _ => {}
        }
        names
    }
}

/// Modifiers attached to one infecting state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActorDef {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infectiousness: Vec<String>,
}

/// Scalar or per-age-group parameter value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(Real),
    PerAge(Vec<Real>),
}

impl ParamValue {
    /// Number of age groups a vector parameter is declared for.
    pub fn age_len(&self) -> Option<usize> {
        match self {
            ParamValue::Scalar(_) => None,
            ParamValue::PerAge(values) => Some(values.len()),
        }
    }

    /// Broadcast to a dense per-age vector.
    pub fn to_age_vector(&self, n_age: usize) -> Option<Vec<Real>> {
        match self {
            ParamValue::Scalar(v) => Some(vec![*v; n_age]),
            ParamValue::PerAge(values) if values.len() == n_age => Some(values.clone()),
            ParamValue::PerAge(_) => None,
        }
    }

    pub fn values(&self) -> &[Real] {
        match self {
            ParamValue::Scalar(v) => std::slice::from_ref(v),
            ParamValue::PerAge(values) => values,
        }
    }

    /// Multiply every entry by `factor`.
    pub fn scaled(&self, factor: Real) -> ParamValue {
        match self {
            ParamValue::Scalar(v) => ParamValue::Scalar(v * factor),
            ParamValue::PerAge(values) => {
                ParamValue::PerAge(values.iter().map(|v| v * factor).collect())
            }
        }
    }
}

impl ModelStructure {
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: ParamValue) {
        self.parameters.insert(name.into(), value);
    }

    /// Infected and infectious states in declaration order.
    pub fn infected_states(&self) -> impl Iterator<Item = &StateDef> {
        self.states.iter().filter(|s| s.kind.is_infected())
    }

    pub fn infection_transitions(&self) -> impl Iterator<Item = &TransitionDef> {
        self.transitions.iter().filter(|t| t.is_infection())
    }

    pub fn is_vaccinated(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| matches!(t, TransitionDef::Vaccination { .. }))
    }

    /// Total substate count over all states (one age block of the full ODE state).
    pub fn n_full_substates(&self) -> usize {
        self.states.iter().map(|s| s.n_substates).sum()
    }

    /// Age-group count implied by vector parameters, if any are declared.
    pub fn age_count_hint(&self) -> Option<usize> {
        self.parameters.values().find_map(ParamValue::age_len)
    }
}
