//! Sampling-based sensitivity and vaccine allocation analysis.
//!
//! A [`SamplingRun`] walks `Configured -> Sampled -> (Allocated) ->
//! Evaluated -> Persisted`: draw a Latin hypercube table, optionally turn
//! it into a capacity-respecting vaccine allocation, evaluate a target per
//! row, then rank and persist the aligned tables.

pub mod allocation;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod lhs;

pub use allocation::{AllocationConfig, allocate_row, allocate_vaccines};
pub use driver::{RankedSamples, SamplerConfig, SamplingRun, SamplingStage, rank_samples};
pub use error::{SamplingError, SamplingResult};
pub use evaluator::{
    ContactR0Evaluator, OutputEvaluator, SusceptibilityR0Evaluator, VaccinatedR0Evaluator,
    evaluate_batched, upper_triangle_len,
};
pub use lhs::{Bounds, LatinHypercube};
