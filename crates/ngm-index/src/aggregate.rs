//! Age aggregation operators.

use nalgebra::DMatrix;
use ngm_core::Real;

use crate::error::IndexError;
use crate::indexing::SubstateIndex;

/// Block-diagonal selector `E` collapsing substates to age groups.
///
/// Each age block holds one row per entry of `selected`, with a single `1`
/// at the first substate of that state. With one selected state each block
/// is a `1 x n_states` row, so `E` has shape `n_age x (n_age * n_states)`.
pub fn aggregation_matrix(
    index: &SubstateIndex,
    selected: &[&str],
    n_age: usize,
) -> Result<DMatrix<Real>, IndexError> {
    let firsts = selected
        .iter()
        .map(|state| index.first(state))
        .collect::<Result<Vec<_>, _>>()?;

    let rows_per_age = firsts.len();
    let mut e = DMatrix::zeros(n_age * rows_per_age, index.dim(n_age));
    for age in 0..n_age {
        for (k, &offset) in firsts.iter().enumerate() {
            e[(age * rows_per_age + k, index.global(age, offset))] = 1.0;
        }
    }
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_target_selector_blocks() {
        let idx = SubstateIndex::new([("e", 2), ("i", 3)]).unwrap();
        let e = aggregation_matrix(&idx, &["e"], 2).unwrap();
        assert_eq!(e.shape(), (2, 10));
        assert_eq!(e[(0, 0)], 1.0);
        assert_eq!(e[(1, 5)], 1.0);
        assert_eq!(e.sum(), 2.0);
    }

    #[test]
    fn two_targets_give_two_rows_per_age() {
        let idx = SubstateIndex::new([("e", 2), ("i", 3), ("a", 1)]).unwrap();
        let e = aggregation_matrix(&idx, &["e", "a"], 2).unwrap();
        assert_eq!(e.shape(), (4, 12));
        assert_eq!(e[(1, 5)], 1.0);
        assert_eq!(e[(2, 6)], 1.0);
        assert_eq!(e[(3, 11)], 1.0);
    }

    #[test]
    fn single_age_is_one_row() {
        let idx = SubstateIndex::new([("e", 1), ("i", 1)]).unwrap();
        let e = aggregation_matrix(&idx, &["e"], 1).unwrap();
        assert_eq!(e, DMatrix::from_row_slice(1, 2, &[1.0, 0.0]));
    }
}
