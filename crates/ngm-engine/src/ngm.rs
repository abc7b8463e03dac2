//! Next-generation-matrix engine.

use std::ops::Range;

use nalgebra::DMatrix;
use ngm_core::Real;
use ngm_index::{SubstateIndex, aggregation_matrix};
use ngm_model::{ModelStructure, StateDef, TransitionDef, validate_model};
use rayon::prelude::*;
use tracing::debug;

use crate::builder::{DenseChainBuilder, TransitionMatrixBuilder, basic_rate};
use crate::context::ExecutionContext;
use crate::eigen::spectral_radius;
use crate::error::{EngineError, EngineResult};
use crate::params::{age_vector, product_vector};

/// One infection transition resolved against the substate index.
#[derive(Debug, Clone)]
struct InfectionRule {
    /// Offset of `target_0`.
    target: usize,
    /// `param * susceptibility` per recipient age group.
    recipient_scale: Vec<Real>,
    /// Actor substate ranges with their infectiousness per source age group.
    actors: Vec<(Range<usize>, Vec<Real>)>,
}

/// Computes effective reproduction numbers for a fixed model structure.
///
/// `E` and `V^-1` depend only on structure and parameters and are cached at
/// construction. `F` depends on the contact matrix and susceptible profile
/// and is rebuilt for every scenario.
#[derive(Debug, Clone)]
pub struct NgmEngine {
    n_age: usize,
    index: SubstateIndex,
    targets: Vec<String>,
    rules: Vec<InfectionRule>,
    e: DMatrix<Real>,
    v: DMatrix<Real>,
    v_inv: DMatrix<Real>,
    context: ExecutionContext,
}

impl NgmEngine {
    /// Build an engine using the dense chain builder.
    pub fn new(model: &ModelStructure, n_age: usize, context: ExecutionContext) -> EngineResult<Self> {
        Self::with_builder(model, n_age, context, &DenseChainBuilder)
    }

    pub fn with_builder(
        model: &ModelStructure,
        n_age: usize,
        context: ExecutionContext,
        builder: &dyn TransitionMatrixBuilder,
    ) -> EngineResult<Self> {
        validate_model(model).map_err(|e| EngineError::Configuration {
            what: e.to_string(),
        })?;
        if n_age == 0 {
            return Err(EngineError::Configuration {
                what: "at least one age group is required".to_string(),
            });
        }
        if let Some(hint) = model.age_count_hint()
            && hint != n_age
        {
            return Err(EngineError::Configuration {
                what: format!("per-age parameters have {hint} entries, engine built for {n_age}"),
            });
        }
        if model.infection_transitions().next().is_none() {
            return Err(EngineError::Configuration {
                what: "model declares no infection transition".to_string(),
            });
        }

        let infected: Vec<&StateDef> = model.infected_states().collect();
        let index = SubstateIndex::from_states(infected.iter().copied())?;

        let mut targets: Vec<String> = Vec::new();
        let mut rules = Vec::new();
        for transition in model.infection_transitions() {
            let TransitionDef::Infection {
                target,
                param,
                actors,
                susceptibility,
                ..
            } = transition
            else {
                continue;
            };
            if !index.contains_state(target) {
                return Err(EngineError::Configuration {
                    what: format!("infection target '{target}' is not an infected state"),
                });
            }
            if !targets.contains(target) {
                targets.push(target.clone());
            }

            let mut recipient_scale = age_vector(model, param, n_age)?;
            for (r, s) in recipient_scale
                .iter_mut()
                .zip(product_vector(model, susceptibility, n_age)?)
            {
                *r *= s;
            }

            let mut resolved = Vec::with_capacity(actors.len());
            for (actor, def) in actors {
                let range = index
                    .state_range(actor)
                    .map_err(|_| EngineError::Configuration {
                        what: format!("actor '{actor}' is not a declared infected state"),
                    })?;
                resolved.push((range, product_vector(model, &def.infectiousness, n_age)?));
            }

            rules.push(InfectionRule {
                target: index.first(target)?,
                recipient_scale,
                actors: resolved,
            });
        }

        let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
        let e = aggregation_matrix(&index, &target_refs, n_age)?;
        let v = assemble_v(model, &infected, n_age, &index, builder)?;
        let v_inv = invert_v(model, &infected, n_age, &v)?;

        debug!(
            n_age,
            n_states = index.n_states(),
            s_mtx = index.dim(n_age),
            targets = ?targets,
            "built NGM engine"
        );

        Ok(Self {
            n_age,
            index,
            targets,
            rules,
            e,
            v,
            v_inv,
            context,
        })
    }

    pub fn n_age(&self) -> usize {
        self.n_age
    }

    /// Infected substates per age block.
    pub fn n_states(&self) -> usize {
        self.index.n_states()
    }

    /// Dimension of `F` and `V`.
    pub fn s_mtx(&self) -> usize {
        self.index.dim(self.n_age)
    }

    pub fn index(&self) -> &SubstateIndex {
        &self.index
    }

    /// States receiving new infections, in first-declared order.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    /// Aggregation matrix `E`.
    pub fn aggregation(&self) -> &DMatrix<Real> {
        &self.e
    }

    /// Infection-transition matrix `V`.
    pub fn v(&self) -> &DMatrix<Real> {
        &self.v
    }

    /// Cached `V^-1`.
    pub fn v_inverse(&self) -> &DMatrix<Real> {
        &self.v_inv
    }

    /// Infection-production matrix for an effective contact matrix.
    ///
    /// `effective_contacts[(a, b)]` is the susceptibility-free rate at which
    /// one infectious individual of age `b` reaches age `a`. Row = newly
    /// infected target substate, column = producing actor substate.
    pub fn build_f(&self, effective_contacts: &DMatrix<Real>) -> EngineResult<DMatrix<Real>> {
        self.check_square(effective_contacts, "contact matrix")?;
        let dim = self.s_mtx();
        let mut f = DMatrix::zeros(dim, dim);

        for rule in &self.rules {
            for (range, infectiousness) in &rule.actors {
                for actor in range.clone() {
                    for a in 0..self.n_age {
                        let row = self.index.global(a, rule.target);
                        for b in 0..self.n_age {
                            let col = self.index.global(b, actor);
                            f[(row, col)] += rule.recipient_scale[a]
                                * effective_contacts[(a, b)]
                                * infectiousness[b];
                        }
                    }
                }
            }
        }
        Ok(f)
    }

    /// Age-aggregated next-generation matrix `E (F V^-1) E^T`.
    pub fn next_generation_matrix(
        &self,
        susceptibles: &[Real],
        population: &[Real],
        contact_matrix: &DMatrix<Real>,
    ) -> EngineResult<DMatrix<Real>> {
        self.check_inputs(susceptibles, population, contact_matrix)?;
        let effective = effective_contacts(contact_matrix, susceptibles, population);
        let f = self.build_f(&effective)?;
        let large = f * &self.v_inv;
        Ok(&self.e * large * self.e.transpose())
    }

    /// Effective reproduction number for one susceptible profile.
    pub fn effective_r0(
        &self,
        susceptibles: &[Real],
        population: &[Real],
        contact_matrix: &DMatrix<Real>,
    ) -> EngineResult<Real> {
        let ngm = self.next_generation_matrix(susceptibles, population, contact_matrix)?;
        spectral_radius(&ngm)
    }

    /// Effective reproduction number for each row of `susceptibles`.
    ///
    /// Output order matches row order, independent of the execution context.
    pub fn effective_r0_batch(
        &self,
        susceptibles: &DMatrix<Real>,
        population: &[Real],
        contact_matrix: &DMatrix<Real>,
    ) -> EngineResult<Vec<Real>> {
        if susceptibles.ncols() != self.n_age {
            return Err(EngineError::ShapeMismatch {
                what: "susceptible batch",
                expected: format!("{} columns", self.n_age),
                actual: format!("{} columns", susceptibles.ncols()),
            });
        }
        self.check_shared(population, contact_matrix)?;

        let rows: Vec<Vec<Real>> = susceptibles
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        let eval = |s: &Vec<Real>| self.effective_r0(s, population, contact_matrix);

        match self.context {
            ExecutionContext::Parallel => rows.par_iter().map(eval).collect(),
            ExecutionContext::Sequential => rows.iter().map(eval).collect(),
        }
    }

    /// Reproduction number of a fully susceptible population.
    pub fn base_r0(&self, population: &[Real], contact_matrix: &DMatrix<Real>) -> EngineResult<Real> {
        self.effective_r0(population, population, contact_matrix)
    }

    fn check_square(&self, m: &DMatrix<Real>, what: &'static str) -> EngineResult<()> {
        if m.shape() != (self.n_age, self.n_age) {
            return Err(EngineError::ShapeMismatch {
                what,
                expected: format!("{0}x{0}", self.n_age),
                actual: format!("{}x{}", m.nrows(), m.ncols()),
            });
        }
        Ok(())
    }

    fn check_len(&self, values: &[Real], what: &'static str) -> EngineResult<()> {
        if values.len() != self.n_age {
            return Err(EngineError::ShapeMismatch {
                what,
                expected: format!("length {}", self.n_age),
                actual: format!("length {}", values.len()),
            });
        }
        Ok(())
    }

    fn check_shared(&self, population: &[Real], contact_matrix: &DMatrix<Real>) -> EngineResult<()> {
        self.check_square(contact_matrix, "contact matrix")?;
        self.check_len(population, "population")?;
        if let Some(age) = population.iter().position(|&n| !(n > 0.0)) {
            return Err(EngineError::Configuration {
                what: format!("age group {age} has non-positive population"),
            });
        }
        Ok(())
    }

    fn check_inputs(
        &self,
        susceptibles: &[Real],
        population: &[Real],
        contact_matrix: &DMatrix<Real>,
    ) -> EngineResult<()> {
        self.check_shared(population, contact_matrix)?;
        self.check_len(susceptibles, "susceptibles")
    }
}

/// `M[a, b] = C[a, b] * S_a / N_a`: contacts scaled by the susceptible
/// fraction of the row age group.
pub fn effective_contacts(
    contact_matrix: &DMatrix<Real>,
    susceptibles: &[Real],
    population: &[Real],
) -> DMatrix<Real> {
    let mut m = contact_matrix.clone();
    for (a, mut row) in m.row_iter_mut().enumerate() {
        row *= susceptibles[a] / population[a];
    }
    m
}

fn assemble_v(
    model: &ModelStructure,
    infected: &[&StateDef],
    n_age: usize,
    index: &SubstateIndex,
    builder: &dyn TransitionMatrixBuilder,
) -> EngineResult<DMatrix<Real>> {
    let t = builder.build(infected, model, n_age, index)?;
    let expected = index.dim(n_age);
    if t.shape() != (expected, expected) {
        return Err(EngineError::ShapeMismatch {
            what: "transition matrix",
            expected: format!("{expected}x{expected}"),
            actual: format!("{}x{}", t.nrows(), t.ncols()),
        });
    }

    // V = -T, plus the flows between infected states that the builder leaves out.
    let mut v = -t;
    for transition in model.transitions.iter().filter(|t| {
        t.is_basic() && index.contains_state(t.source()) && index.contains_state(t.target())
    }) {
        let source = index.last(transition.source())?;
        let target = index.first(transition.target())?;
        let k = index.n_substates(transition.source())? as Real;
        for (age, rate) in basic_rate(transition, model, n_age)?.into_iter().enumerate() {
            v[(index.global(age, target), index.global(age, source))] -= k * rate;
        }
    }
    Ok(v)
}

/// Infected states from which, in some age group, no chain of positive
/// basic transitions leads out of the infected set. Any such state makes
/// `V` singular.
fn trapped_states(
    model: &ModelStructure,
    infected: &[&StateDef],
    n_age: usize,
) -> EngineResult<Vec<String>> {
    let position = |name: &str| infected.iter().position(|s| s.name == name);
    let mut trapped = vec![false; infected.len()];

    for age in 0..n_age {
        let mut exits = vec![false; infected.len()];
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for transition in model.transitions.iter().filter(|t| t.is_basic()) {
            let Some(source) = position(transition.source()) else {
                continue;
            };
            if !(basic_rate(transition, model, n_age)?[age] > 0.0) {
                continue;
            }
            match position(transition.target()) {
                Some(target) => edges.push((source, target)),
                None => exits[source] = true,
            }
        }

        // Walk the edges backwards from every state that leaves directly.
        let mut queue: Vec<usize> = (0..infected.len()).filter(|&s| exits[s]).collect();
        while let Some(reached) = queue.pop() {
            for &(source, target) in &edges {
                if target == reached && !exits[source] {
                    exits[source] = true;
                    queue.push(source);
                }
            }
        }

        for (flag, leaves) in trapped.iter_mut().zip(exits) {
            *flag |= !leaves;
        }
    }

    Ok(infected
        .iter()
        .zip(trapped)
        .filter(|(_, stuck)| *stuck)
        .map(|(state, _)| state.name.clone())
        .collect())
}

/// Largest entry of `V^-1 V - I` accepted as a usable inverse.
const INVERSE_RESIDUAL: Real = 1e-8;

fn invert_v(
    model: &ModelStructure,
    infected: &[&StateDef],
    n_age: usize,
    v: &DMatrix<Real>,
) -> EngineResult<DMatrix<Real>> {
    let trapped = trapped_states(model, infected, n_age)?;
    if !trapped.is_empty() {
        return Err(EngineError::SingularMatrix { states: trapped });
    }

    let all_states = || -> Vec<String> { infected.iter().map(|s| s.name.clone()).collect() };
    let v_inv = v
        .clone()
        .try_inverse()
        .ok_or_else(|| EngineError::SingularMatrix { states: all_states() })?;

    let residual = (&v_inv * v - DMatrix::<Real>::identity(v.nrows(), v.ncols())).amax();
    if !residual.is_finite() || residual > INVERSE_RESIDUAL {
        debug!(residual, "rejected ill-conditioned V inverse");
        return Err(EngineError::SingularMatrix { states: all_states() });
    }
    Ok(v_inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::exit_rates;
    use ngm_core::{Tolerances, nearly_equal};

    const SIR: &str = r#"
states:
  - { name: s, type: susceptible }
  - { name: i, type: infectious }
  - { name: r, type: recovered }
transitions:
  - { type: infection, source: s, target: i, param: beta, actors: { i: {} } }
  - { type: basic, source: i, target: r, param: gamma }
parameters:
  beta: 0.3
  gamma: 0.1
"#;

    fn one(v: Real) -> DMatrix<Real> {
        DMatrix::from_element(1, 1, v)
    }

    #[test]
    fn sir_closed_form() {
        let model = ngm_model::from_yaml_str(SIR).unwrap();
        let engine = NgmEngine::new(&model, 1, ExecutionContext::Sequential).unwrap();
        let r0 = engine.base_r0(&[1000.0], &one(1.0)).unwrap();
        assert!(nearly_equal(r0, 3.0, Tolerances::default()));
    }

    #[test]
    fn susceptible_fraction_scales_r0() {
        let model = ngm_model::from_yaml_str(SIR).unwrap();
        let engine = NgmEngine::new(&model, 1, ExecutionContext::Sequential).unwrap();
        let r0 = engine.effective_r0(&[250.0], &[1000.0], &one(1.0)).unwrap();
        assert!(nearly_equal(r0, 0.75, Tolerances::default()));
    }

    #[test]
    fn v_inverse_round_trip() {
        let model = ngm_model::from_yaml_str(SIR).unwrap();
        let engine = NgmEngine::new(&model, 1, ExecutionContext::Sequential).unwrap();
        let id = engine.v_inverse() * engine.v();
        assert!((id - DMatrix::identity(1, 1)).norm() < 1e-12);
    }

    #[test]
    fn missing_infection_transition() {
        let yaml = r#"
states:
  - { name: i, type: infectious }
  - { name: r, type: recovered }
transitions:
  - { type: basic, source: i, target: r, param: gamma }
parameters:
  gamma: 0.1
"#;
        let model = ngm_model::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            NgmEngine::new(&model, 1, ExecutionContext::Sequential),
            Err(EngineError::Configuration { .. })
        ));
    }

    #[test]
    fn no_recovery_is_singular() {
        let yaml = r#"
states:
  - { name: s, type: susceptible }
  - { name: i, type: infectious }
transitions:
  - { type: infection, source: s, target: i, param: beta, actors: { i: {} } }
parameters:
  beta: 0.3
"#;
        let model = ngm_model::from_yaml_str(yaml).unwrap();
        match NgmEngine::new(&model, 1, ExecutionContext::Sequential) {
            Err(EngineError::SingularMatrix { states }) => assert_eq!(states, vec!["i"]),
            other => panic!("expected singular matrix, got {other:?}"),
        }
    }

    fn cycle_model(a: Real, b: Real, extra: &str) -> ModelStructure {
        let yaml = format!(
            r#"
states:
  - {{ name: s, type: susceptible }}
  - {{ name: e, type: infected, n_substates: 3 }}
  - {{ name: i, type: infectious, n_substates: 2 }}
transitions:
  - {{ type: infection, source: s, target: e, param: beta, actors: {{ i: {{}} }} }}
  - {{ type: basic, source: e, target: i, param: a }}
  - {{ type: basic, source: i, target: e, param: b }}
{extra}
parameters:
  beta: 0.4
  a: {a}
  b: {b}
"#
        );
        ngm_model::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn exitless_cycle_is_singular_for_any_rates() {
        for (a, b) in [(0.3, 0.7), (0.1, 0.2), (1.0 / 3.0, 0.7), (0.37, 0.11), (0.123, 0.456)] {
            match NgmEngine::new(&cycle_model(a, b, ""), 2, ExecutionContext::Sequential) {
                Err(EngineError::SingularMatrix { states }) => {
                    assert_eq!(states, vec!["e", "i"], "rates ({a}, {b})")
                }
                other => panic!("rates ({a}, {b}): expected singular matrix, got {other:?}"),
            }
        }
    }

    #[test]
    fn cycle_with_one_exit_is_invertible() {
        let model = cycle_model(
            0.123,
            0.456,
            "  - { type: basic, source: i, target: s, param: b }",
        );
        let engine = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
        let id = engine.v_inverse() * engine.v();
        assert!((id - DMatrix::identity(10, 10)).amax() < 1e-10);
    }

    #[test]
    fn exit_closed_in_one_age_group_is_singular() {
        let mut model = ngm_model::from_yaml_str(SIR).unwrap();
        model.set_param("gamma", ngm_model::ParamValue::PerAge(vec![0.1, 0.0]));
        match NgmEngine::new(&model, 2, ExecutionContext::Sequential) {
            Err(EngineError::SingularMatrix { states }) => assert_eq!(states, vec!["i"]),
            other => panic!("expected singular matrix, got {other:?}"),
        }
    }

    const SEIR_CHAIN: &str = r#"
states:
  - { name: s, type: susceptible }
  - { name: e, type: infected, n_substates: 2 }
  - { name: i, type: infectious }
  - { name: r, type: recovered }
transitions:
  - { type: infection, source: s, target: e, param: beta, actors: { i: {} } }
  - { type: basic, source: e, target: i, param: alpha }
  - { type: basic, source: i, target: r, param: gamma }
parameters:
  beta: 0.3
  alpha: 0.25
  gamma: 0.1
"#;

    /// Returns a matrix of a fixed size regardless of the index.
    struct FixedSizeBuilder(usize);

    impl TransitionMatrixBuilder for FixedSizeBuilder {
        fn build(
            &self,
            _states: &[&StateDef],
            _model: &ModelStructure,
            _n_age: usize,
            _index: &SubstateIndex,
        ) -> EngineResult<DMatrix<Real>> {
            Ok(-DMatrix::identity(self.0, self.0))
        }
    }

    /// Fills only the diagonal outflow, leaving every off-diagonal entry zero.
    struct OutflowOnlyBuilder;

    impl TransitionMatrixBuilder for OutflowOnlyBuilder {
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
                let range = index.state_range(&state.name)?;
                let k = range.len() as Real;
                for (age, rate) in exit_rates(state, model, n_age)?.into_iter().enumerate() {
                    for offset in range.clone() {
                        let pos = index.global(age, offset);
                        t[(pos, pos)] = -k * rate;
                    }
                }
            }
            Ok(t)
        }
    }

    #[test]
    fn builder_with_wrong_shape_is_rejected() {
        let model = ngm_model::from_yaml_str(SEIR_CHAIN).unwrap();
        match NgmEngine::with_builder(&model, 1, ExecutionContext::Sequential, &FixedSizeBuilder(2))
        {
            Err(EngineError::ShapeMismatch { what, expected, actual }) => {
                assert_eq!(what, "transition matrix");
                assert_eq!(expected, "3x3");
                assert_eq!(actual, "2x2");
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn engine_patches_boundaries_over_builder_output() {
        let model = ngm_model::from_yaml_str(SEIR_CHAIN).unwrap();
        let engine =
            NgmEngine::with_builder(&model, 2, ExecutionContext::Sequential, &OutflowOnlyBuilder)
                .unwrap();
        let index = engine.index();
        let v = engine.v();
        for age in 0..2 {
            let e0 = index.global(age, index.first("e").unwrap());
            let e1 = index.global(age, index.last("e").unwrap());
            let i0 = index.global(age, index.first("i").unwrap());
            // e_1 -> i_0 at k * alpha, added by the engine
            assert!((v[(i0, e1)] + 0.5).abs() < 1e-12);
            // e_0 -> e_1 is the builder's job and was left out
            assert_eq!(v[(e1, e0)], 0.0);
            assert!((v[(e0, e0)] - 0.5).abs() < 1e-12);
            assert!((v[(i0, i0)] - 0.1).abs() < 1e-12);
        }

        let dense = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
        let i0 = index.first("i").unwrap();
        let e1 = index.last("e").unwrap();
        assert_eq!(v[(i0, e1)], dense.v()[(i0, e1)]);
    }

    #[test]
    fn shape_checks_fail_fast() {
        let model = ngm_model::from_yaml_str(SIR).unwrap();
        let engine = NgmEngine::new(&model, 1, ExecutionContext::Sequential).unwrap();
        let two = DMatrix::from_element(2, 2, 1.0);
        assert!(matches!(
            engine.effective_r0(&[1.0], &[1.0], &two),
            Err(EngineError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            engine.effective_r0(&[1.0, 1.0], &[1.0], &one(1.0)),
            Err(EngineError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            engine.effective_r0(&[0.0], &[0.0], &one(1.0)),
            Err(EngineError::Configuration { .. })
        ));
    }

    #[test]
    fn per_age_length_must_match() {
        let mut model = ngm_model::from_yaml_str(SIR).unwrap();
        model.set_param("beta", ngm_model::ParamValue::PerAge(vec![0.3, 0.3]));
        assert!(matches!(
            NgmEngine::new(&model, 3, ExecutionContext::Sequential),
            Err(EngineError::Configuration { .. })
        ));
    }
}
