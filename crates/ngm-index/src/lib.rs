//! Substate indexing and age aggregation shared by the NGM engine and the
//! sampling layer.
//!
//! Every state with `k` substates expands to `name_0 .. name_{k-1}`. One age
//! block lays those substates out contiguously; age groups repeat the block
//! with a fixed stride.

pub mod aggregate;
pub mod error;
pub mod indexing;

pub use aggregate::aggregation_matrix;
pub use error::IndexError;
pub use indexing::SubstateIndex;
