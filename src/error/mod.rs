use thiserror::Error;

/// A local precondition on a record was violated. Raised before any store is
/// touched, and the only error the access layer hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a title")]
    EmptyTitle,
    #[error("Total episodes ({total}) cannot be less than watched episodes ({watched})")]
    TotalBelowWatched { total: u32, watched: u32 },
}
