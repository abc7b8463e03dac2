//! Next-generation-matrix engine for declarative compartment models.
//!
//! The engine reads a [`ngm_model::ModelStructure`], restricts attention to
//! infected and infectious substates, and assembles the infection-production
//! matrix `F` and infection-transition matrix `V`. The effective reproduction
//! number is the spectral radius of `E (F V^-1) E^T`, where `E` collapses
//! substates to age groups.

pub mod builder;
pub mod context;
pub mod eigen;
pub mod error;
pub mod ngm;
pub mod params;

pub use builder::{DenseChainBuilder, TransitionMatrixBuilder};
pub use context::ExecutionContext;
pub use eigen::spectral_radius;
pub use error::{EngineError, EngineResult};
pub use ngm::NgmEngine;
