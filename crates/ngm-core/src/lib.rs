//! ngm-core: stable foundation for ngmflow.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - error (shared error types)

pub mod error;
pub mod numeric;

// Re-exports: nice ergonomics for downstream crates
pub use error::{NgmError, NgmResult};
pub use numeric::*;
