use thiserror::Error;

/// Domain error taxonomy for the store and guard layers.
///
/// `Inconsistency` marks a violated internal invariant (e.g. an agent missing
/// its draft row at publish time). It aborts the surrounding transaction and
/// is reported to callers as a generic internal error; the detail only goes
/// to the logs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal consistency violation: {0}")]
    Inconsistency(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        StoreError::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        StoreError::BadRequest(msg.into())
    }
}
