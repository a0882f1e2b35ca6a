//! Error types for the workflow engine
//!
//! Authorization denials are not errors; they come back as a `Verdict`.
//! What lands here is malformed input, missing records, lost write races and
//! infrastructure failures.

use thiserror::Error;

use crate::ids::RequestId;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict on request {request_id}: {detail}")]
    Conflict { request_id: RequestId, detail: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(request_id: RequestId, detail: impl Into<String>) -> Self {
        AppError::Conflict {
            request_id,
            detail: detail.into(),
        }
    }

    /// Conflicts are safe to retry after a fresh read; nothing else is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict { .. })
    }

    /// Infrastructure failures, as opposed to caller mistakes or races
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Migration(_)
                | AppError::Serialization(_)
                | AppError::Collaborator(_)
                | AppError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("request".to_string());
        assert_eq!(format!("{}", err), "Not found: request");

        let err = AppError::Input("reschedule needs a date".to_string());
        assert_eq!(format!("{}", err), "Invalid input: reschedule needs a date");

        let err = AppError::Collaborator("directory offline".to_string());
        assert_eq!(format!("{}", err), "Collaborator error: directory offline");

        let err = AppError::Internal("something broke".to_string());
        assert_eq!(format!("{}", err), "Internal error: something broke");
    }

    #[test]
    fn test_conflict_display_names_request() {
        let id = RequestId::new();
        let err = AppError::conflict(id, "version moved");
        assert_eq!(
            format!("{}", err),
            format!("Conflict on request {}: version moved", id)
        );
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(AppError::conflict(RequestId::new(), "stale").is_retryable());
        assert!(!AppError::Input("x".into()).is_retryable());
        assert!(!AppError::NotFound("x".into()).is_retryable());
        assert!(!AppError::Internal("x".into()).is_retryable());
    }

    #[test]
    fn test_error_classes_are_distinct() {
        assert!(!AppError::conflict(RequestId::new(), "stale").is_infrastructure());
        assert!(!AppError::Input("x".into()).is_infrastructure());
        assert!(AppError::Collaborator("x".into()).is_infrastructure());
    }

    #[test]
    fn test_database_error_from_sqlx() {
        let sqlx_err = sqlx::Error::Configuration("test".into());
        let app_err: AppError = sqlx_err.into();
        assert!(matches!(app_err, AppError::Database(_)));
        assert!(app_err.is_infrastructure());
    }

    #[test]
    fn test_serialization_error_from_serde() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let app_err: AppError = serde_err.into();
        assert!(matches!(app_err, AppError::Serialization(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);

        fn test_err_fn() -> Result<i32> {
            Err(AppError::NotFound("test".to_string()))
        }
        assert!(test_err_fn().is_err());
    }
}
