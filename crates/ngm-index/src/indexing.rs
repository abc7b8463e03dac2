//! Stable substate indexing.
//!
//! Maps the substates of each state (`e_0`, `i_2`, ...) to contiguous
//! offsets inside one age block, plus the age stride used to address the
//! full `n_age * n_states` vector.

use std::collections::HashMap;
use std::ops::Range;

use ngm_model::StateDef;

use crate::error::IndexError;

/// Index map providing stable, contiguous offsets for substates.
///
/// Built once per model structure and reused for every age group via
/// `age * n_states + offset`.
#[derive(Debug, Clone)]
pub struct SubstateIndex {
    /// Substates per age block.
    n_states: usize,

    /// State name -> offset range of its substates.
    states: HashMap<String, Range<usize>>,
}

impl SubstateIndex {
    /// Build an index from `(state name, n_substates)` pairs in order.
    pub fn new<'a, I>(states: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (&'a str, usize)>,
    {
        let mut n_states = 0;
        let mut ranges = HashMap::new();

        for (state, n_substates) in states {
            if n_substates == 0 {
                return Err(IndexError::EmptyState {
                    name: state.to_string(),
                });
            }
            if ranges.contains_key(state) {
                return Err(IndexError::DuplicateState {
                    name: state.to_string(),
                });
            }
            ranges.insert(state.to_string(), n_states..n_states + n_substates);
            n_states += n_substates;
        }

        Ok(Self {
            n_states,
            states: ranges,
        })
    }

    /// Build an index over the given model states.
    pub fn from_states<'a, I>(states: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = &'a StateDef>,
    {
        Self::new(
            states
                .into_iter()
                .map(|s| (s.name.as_str(), s.n_substates)),
        )
    }

    /// Substates per age block.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Full dimension over `n_age` age groups.
    pub fn dim(&self, n_age: usize) -> usize {
        n_age * self.n_states
    }

    pub fn contains_state(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }

    /// Offset range of all substates of `state`.
    pub fn state_range(&self, state: &str) -> Result<Range<usize>, IndexError> {
        self.states
            .get(state)
            .cloned()
            .ok_or_else(|| IndexError::UnknownState {
                name: state.to_string(),
            })
    }

    /// Offset of `state_0`, the only substate receiving inflow.
    pub fn first(&self, state: &str) -> Result<usize, IndexError> {
        Ok(self.state_range(state)?.start)
    }

    /// Offset of `state_{k-1}`, the only substate flowing onward.
    pub fn last(&self, state: &str) -> Result<usize, IndexError> {
        Ok(self.state_range(state)?.end - 1)
    }

    pub fn n_substates(&self, state: &str) -> Result<usize, IndexError> {
        Ok(self.state_range(state)?.len())
    }

    /// Position of `offset` in age group `age`.
    pub fn global(&self, age: usize, offset: usize) -> usize {
        age * self.n_states + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seir_index() -> SubstateIndex {
        SubstateIndex::new([("e", 2), ("i", 3)]).unwrap()
    }

    #[test]
    fn offsets_follow_declaration_order() {
        let idx = seir_index();
        assert_eq!(idx.n_states(), 5);
        assert_eq!(idx.state_range("e").unwrap(), 0..2);
        assert_eq!(idx.state_range("i").unwrap(), 2..5);
        assert_eq!(idx.first("i").unwrap(), 2);
        assert_eq!(idx.last("i").unwrap(), 4);
        assert_eq!(idx.last("e").unwrap(), 1);
        assert_eq!(idx.n_substates("i").unwrap(), 3);
    }

    #[test]
    fn age_striding() {
        let idx = seir_index();
        let i0 = idx.first("i").unwrap();
        let positions: Vec<usize> = (0..3).map(|age| idx.global(age, i0)).collect();
        assert_eq!(positions, vec![2, 7, 12]);
        assert_eq!(idx.dim(3), 15);
    }

    #[test]
    fn unknown_state() {
        let idx = seir_index();
        assert_eq!(
            idx.state_range("r"),
            Err(IndexError::UnknownState {
                name: "r".to_string()
            })
        );
        assert!(!idx.contains_state("r"));
    }

    #[test]
    fn duplicate_and_empty_states_rejected() {
        assert!(matches!(
            SubstateIndex::new([("e", 1), ("e", 2)]),
            Err(IndexError::DuplicateState { .. })
        ));
        assert!(matches!(
            SubstateIndex::new([("e", 0)]),
            Err(IndexError::EmptyState { .. })
        ));
    }
}
