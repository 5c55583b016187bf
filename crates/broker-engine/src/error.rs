use thiserror::Error;

/// Constructed and logged; state is never mutated on this path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sub-order {0} not found")]
    NotFound(i64),
}
