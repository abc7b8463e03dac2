//! Execution context threaded through engine constructors.

/// How batches of scenarios are evaluated.
///
/// Only scheduling changes; every row gets the same numeric result either way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Rows of a batch are evaluated on the rayon pool.
    #[default]
    Parallel,
    /// Rows are evaluated one after another on the calling thread.
    Sequential,
}

impl ExecutionContext {
    pub fn is_parallel(self) -> bool {
        matches!(self, ExecutionContext::Parallel)
    }
}
