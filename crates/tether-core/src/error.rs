use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(tether_db::DbError),
}

impl From<tether_db::DbError> for ChatError {
    fn from(err: tether_db::DbError) -> Self {
        match err {
            tether_db::DbError::NotFound => Self::NotFound,
            other => Self::Database(other),
        }
    }
}

impl From<tether_util::ValidationError> for ChatError {
    fn from(err: tether_util::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}
