use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by goal evaluation, store operations and the stats maintainer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    #[error("invalid cadence: {0}")]
    InvalidCadence(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.into())
    }
}
