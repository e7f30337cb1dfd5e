use crate::types::NisabError;

/// Trait for builders that produce a validated configuration object.
pub trait Builder<T> {
    /// Builds the final object, returning a Result.
    fn build(self) -> Result<T, NisabError>;
}

/// Checks a builder's accumulated state before `build()` consumes it.
pub trait Validate {
    fn validate(&self) -> Result<(), NisabError>;
}
