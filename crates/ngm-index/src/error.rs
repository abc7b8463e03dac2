//! Index-specific error types.

/// Index construction and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Two states share a name.
    DuplicateState { name: String },

    /// A state declares zero substates.
    EmptyState { name: String },

    /// Name not present in the index.
    UnknownState { name: String },
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::DuplicateState { name } => {
                write!(f, "State '{}' is indexed twice", name)
            }
            IndexError::EmptyState { name } => {
                write!(f, "State '{}' has no substates", name)
            }
            IndexError::UnknownState { name } => {
                write!(f, "'{}' not found in substate index", name)
            }
        }
    }
}

impl std::error::Error for IndexError {}
