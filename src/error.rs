use thiserror::Error;

/// Error kinds surfaced by the store: argument/path rejection, transport
/// failure, on-disk corruption, exhaustion of a fixed resource, or a missing
/// file that the caller may treat as "use defaults".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    #[error("i/o failure: {0}")]
    Io(&'static str),

    #[error("corrupt data: {0}")]
    Corrupt(&'static str),

    #[error("resource exhausted: {0}")]
    Full(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),
}

pub type Result<T> = core::result::Result<T, StoreError>;
