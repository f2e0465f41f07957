//! Policies service errors.

use sqlx::{
    Error,
    error::{DatabaseError, ErrorKind},
};
use tariff::PolicyValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoliciesServiceError {
    #[error("policy already exists")]
    AlreadyExists,

    #[error("policy not found")]
    NotFound,

    #[error("related resource not found")]
    InvalidReference,

    #[error("missing required data")]
    MissingRequiredData,

    #[error("invalid data")]
    InvalidData,

    #[error("policy validation failed")]
    Validation(#[from] PolicyValidationError),

    #[error("storage error")]
    Sql(#[source] Error),
}

impl From<Error> for PoliciesServiceError {
    fn from(error: Error) -> Self {
        if matches!(error, Error::RowNotFound) {
            return Self::NotFound;
        }

        match error.as_database_error().map(DatabaseError::kind) {
            Some(ErrorKind::UniqueViolation) => Self::AlreadyExists,
            Some(ErrorKind::ForeignKeyViolation) => Self::InvalidReference,
            Some(ErrorKind::NotNullViolation) => Self::MissingRequiredData,
            Some(ErrorKind::CheckViolation) => Self::InvalidData,
            _ => Self::Sql(error),
        }
    }
}
