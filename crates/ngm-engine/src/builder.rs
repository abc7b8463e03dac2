//! Transition matrix assembly for substate chains.
//!
//! Matrices use the column convention of a linear ODE `dx/dt = T x`:
//! entry `[dst, src]` is the flow rate from `src` into `dst`, and the
//! diagonal holds minus the total outflow of each substate.

use nalgebra::DMatrix;
use ngm_core::Real;
use ngm_index::SubstateIndex;
use ngm_model::{ModelStructure, StateDef, TransitionDef};

use crate::error::EngineResult;
use crate::params::age_vector;

/// Turns a subset of the model into a dense rate matrix over `index`.
///
/// Implementations fill entries for `basic` transitions whose source lies in
/// `states`: intra-chain flow and diagonal outflow. Entries linking one
/// state's last substate to another state's first substate stay zero; the
/// caller patches them.
pub trait TransitionMatrixBuilder {
    fn build(
        &self,
        states: &[&StateDef],
        model: &ModelStructure,
        n_age: usize,
        index: &SubstateIndex,
    ) -> EngineResult<DMatrix<Real>>;
}

/// Dense Erlang-chain builder.
///
/// A state with `k` substates and total exit rate `r` moves mass
/// `name_j -> name_{j+1}` at `k * r`; each substate loses mass at `k * r`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseChainBuilder;

impl TransitionMatrixBuilder for DenseChainBuilder {
    fn build(
        &self,
        states: &[&StateDef],
        model: &ModelStructure,
        n_age: usize,
        index: &SubstateIndex,
    ) -> EngineResult<DMatrix<Real>> {
        let dim = index.dim(n_age);
        let mut t = DMatrix::zeros(dim, dim);

        for state in states {
            let exit = exit_rates(state, model, n_age)?;
            let range = index.state_range(&state.name)?;
            let k = range.len() as Real;

            for (age, &rate) in exit.iter().enumerate() {
                let chain_rate = k * rate;
                for offset in range.clone() {
                    let pos = index.global(age, offset);
                    t[(pos, pos)] -= chain_rate;
                    if offset + 1 < range.end {
                        t[(pos + 1, pos)] += chain_rate;
                    }
                }
            }
        }
        Ok(t)
    }
}

/// Rate of one `basic` transition per age group: `param * distr`.
pub fn basic_rate(
    transition: &TransitionDef,
    model: &ModelStructure,
    n_age: usize,
) -> EngineResult<Vec<Real>> {
    let mut rate = age_vector(model, transition.param(), n_age)?;
    if let TransitionDef::Basic {
        distr: Some(distr), ..
    } = transition
    {
        let scale = age_vector(model, distr, n_age)?;
        for (r, s) in rate.iter_mut().zip(scale) {
            *r *= s;
        }
    }
    Ok(rate)
}

/// Total exit rate of a state per age group, summed over its basic transitions.
pub fn exit_rates(state: &StateDef, model: &ModelStructure, n_age: usize) -> EngineResult<Vec<Real>> {
    let mut total = vec![0.0; n_age];
    for transition in model
        .transitions
        .iter()
        .filter(|t| t.is_basic() && t.source() == state.name)
    {
        for (acc, r) in total.iter_mut().zip(basic_rate(transition, model, n_age)?) {
            *acc += r;
        }
    }
    Ok(total)
}
