//! Import error types
//!
//! `ImportError` aborts a whole run. `RowError` is collected per row and the
//! run moves on.

use followup_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Sheet \"{name}\" not found")]
    SheetNotFound { name: String },

    #[error("Invalid session number {number}: expected 1 to {max}")]
    InvalidSessionNumber { number: i32, max: i32 },

    #[error("Invalid homework column \"{0}\": expected hw1 to hw8")]
    InvalidHomeworkColumn(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Failed to find sheet: {0}")]
    SheetLookup(#[source] AppError),

    #[error("Failed to create exam: {0}")]
    ExamSetup(#[source] AppError),
}

/// Failure of one step for one row, tagged with the row's student code
#[derive(Error, Debug)]
pub enum RowError {
    #[error("Student {code}: {source}")]
    Student { code: String, source: AppError },

    #[error("Session for {code}: {source}")]
    Session { code: String, source: AppError },

    #[error("Exam result for {code}: {source}")]
    ExamResult { code: String, source: AppError },

    #[error("Account for {code}: {source}")]
    Account { code: String, source: AppError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use followup_common::errors::AppError;

    #[test]
    fn test_fatal_messages() {
        let err = ImportError::SheetNotFound { name: "Sat 4pm".into() };
        assert_eq!(err.to_string(), "Sheet \"Sat 4pm\" not found");

        let err = ImportError::InvalidSessionNumber { number: 9, max: 8 };
        assert_eq!(err.to_string(), "Invalid session number 9: expected 1 to 8");
    }

    #[test]
    fn test_row_messages_carry_student_code() {
        let err = RowError::Account {
            code: "S-17".into(),
            source: AppError::Internal { message: "boom".into() },
        };
        assert_eq!(err.to_string(), "Account for S-17: Internal server error: boom");
    }
}
