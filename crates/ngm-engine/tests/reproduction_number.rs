//! Integration tests for the NGM engine on bundled model files.

use nalgebra::DMatrix;
use ngm_core::{Tolerances, nearly_equal};
use ngm_engine::{ExecutionContext, NgmEngine};
use ngm_model::{ModelStructure, ParamValue};
use proptest::prelude::*;
use std::path::Path;

fn load(name: &str) -> ModelStructure {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../models")
        .join(name);
    ngm_model::load(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", name, e))
}

fn tol() -> Tolerances {
    Tolerances {
        abs: 1e-10,
        rel: 1e-9,
    }
}

/// Same model with age groups in reverse order.
fn reversed(model: &ModelStructure) -> ModelStructure {
    let mut out = model.clone();
    for value in out.parameters.values_mut() {
        if let ParamValue::PerAge(values) = value {
            values.reverse();
        }
    }
    out
}

fn permute_matrix(m: &DMatrix<f64>, perm: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |a, b| m[(perm[a], perm[b])])
}

#[test]
fn seir_base_r0_is_beta_over_gamma() {
    let model = load("seir.yaml");
    let engine = NgmEngine::new(&model, 1, ExecutionContext::Sequential).unwrap();
    let r0 = engine
        .base_r0(&[10_000.0], &DMatrix::from_element(1, 1, 1.0))
        .unwrap();
    // beta / gamma = 0.5 / 0.25
    assert!(nearly_equal(r0, 2.0, tol()), "r0 = {r0}");
}

#[test]
fn erlang_chains_keep_r0() {
    let exp = load("seir.yaml");
    let erlang = load("seir_erlang.yaml");
    let contact = DMatrix::from_element(1, 1, 3.0);

    let r_exp = NgmEngine::new(&exp, 1, ExecutionContext::Sequential)
        .unwrap()
        .effective_r0(&[600.0], &[1000.0], &contact)
        .unwrap();
    let erlang_engine = NgmEngine::new(&erlang, 1, ExecutionContext::Sequential).unwrap();
    let r_erlang = erlang_engine
        .effective_r0(&[600.0], &[1000.0], &contact)
        .unwrap();

    assert_eq!(erlang_engine.n_states(), 5);
    assert!(nearly_equal(r_exp, r_erlang, tol()));
    assert!(nearly_equal(r_exp, 0.5 * 3.0 * 0.6 / 0.25, tol()));
}

#[test]
fn v_inverse_round_trip_on_age_model() {
    let model = load("seirv_age.yaml");
    let engine = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
    assert_eq!(engine.s_mtx(), 2 * (2 + 3 + 2));

    let id = engine.v_inverse() * engine.v();
    let err = (id - DMatrix::identity(engine.s_mtx(), engine.s_mtx())).norm();
    assert!(err < 1e-10, "|V^-1 V - I| = {err}");
}

#[test]
fn aggregation_shape_is_one_row_per_age() {
    let model = load("seirv_age.yaml");
    let engine = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
    assert_eq!(engine.aggregation().shape(), (2, engine.s_mtx()));
    assert_eq!(engine.targets(), ["e".to_string()]);
}

#[test]
fn asymptomatic_branch_contributes() {
    let model = load("seirv_age.yaml");
    let population = [1000.0, 1000.0];
    let contact = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);

    let full = NgmEngine::new(&model, 2, ExecutionContext::Sequential)
        .unwrap()
        .base_r0(&population, &contact)
        .unwrap();

    let mut silent = model.clone();
    silent.set_param("inf_a", ParamValue::Scalar(0.0));
    let reduced = NgmEngine::new(&silent, 2, ExecutionContext::Sequential)
        .unwrap()
        .base_r0(&population, &contact)
        .unwrap();

    assert!(full > reduced);
    assert!(reduced > 0.0);
}

#[test]
fn batch_matches_row_by_row_and_split_batches() {
    let model = load("seirv_age.yaml");
    let population = [800.0, 1200.0];
    let contact = DMatrix::from_row_slice(2, 2, &[4.0, 1.5, 2.0, 6.0]);
    let table = DMatrix::from_row_slice(
        4,
        2,
        &[800.0, 1200.0, 400.0, 1200.0, 800.0, 100.0, 10.0, 20.0],
    );

    let parallel = NgmEngine::new(&model, 2, ExecutionContext::Parallel).unwrap();
    let sequential = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();

    let whole = parallel.effective_r0_batch(&table, &population, &contact).unwrap();
    let head = sequential
        .effective_r0_batch(&table.rows(0, 2).into_owned(), &population, &contact)
        .unwrap();
    let tail = sequential
        .effective_r0_batch(&table.rows(2, 2).into_owned(), &population, &contact)
        .unwrap();

    assert_eq!(whole.len(), 4);
    assert_eq!(&whole[..2], &head[..]);
    assert_eq!(&whole[2..], &tail[..]);
    for (row, r0) in whole.iter().enumerate() {
        let s: Vec<f64> = table.row(row).iter().copied().collect();
        assert_eq!(*r0, sequential.effective_r0(&s, &population, &contact).unwrap());
    }
}

#[test]
fn batch_rejects_wrong_width() {
    let model = load("seirv_age.yaml");
    let engine = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
    let table = DMatrix::from_element(3, 3, 1.0);
    assert!(
        engine
            .effective_r0_batch(&table, &[1.0, 1.0], &DMatrix::identity(2, 2))
            .is_err()
    );
}

proptest! {
    #[test]
    fn age_permutation_symmetry(
        c in prop::collection::vec(0.1_f64..10.0, 4),
        s in prop::collection::vec(10.0_f64..1000.0, 2),
    ) {
        let model = load("seirv_age.yaml");
        let population = [1000.0, 2000.0];
        let contact = DMatrix::from_row_slice(2, 2, &c);

        let engine = NgmEngine::new(&model, 2, ExecutionContext::Sequential).unwrap();
        let r0 = engine.effective_r0(&s, &population, &contact).unwrap();

        let perm = [1, 0];
        let swapped = NgmEngine::new(&reversed(&model), 2, ExecutionContext::Sequential).unwrap();
        let r0_swapped = swapped
            .effective_r0(
                &[s[1], s[0]],
                &[population[1], population[0]],
                &permute_matrix(&contact, &perm),
            )
            .unwrap();

        prop_assert!(nearly_equal(r0, r0_swapped, tol()), "{} vs {}", r0, r0_swapped);
    }
}
