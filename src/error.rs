//! Error types for the drive_stage crate.

use thiserror::Error;

/// Errors that can occur while moving files from Drive into a Snowflake stage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Drive authentication failed: {0}")]
    Authentication(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API error ({status}): {message}")]
    DriveApi { status: u16, message: String },

    #[error("Invalid folder URL or ID: {0}")]
    InvalidFolderId(String),

    #[error("JWT encoding error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Snowflake connection failed: {0}")]
    Connection(String),

    /// A statement was rejected by the warehouse SQL engine.
    #[error("SQL compilation/execution error {code} ({sql_state}): {message}")]
    Sql {
        code: String,
        sql_state: String,
        message: String,
    },

    #[error("Unexpected Snowflake response: {0}")]
    Protocol(String),

    #[error("Stage transfer failed: {0}")]
    Stage(String),

    #[error("Unsupported stage: {0}")]
    UnsupportedStage(String),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),
}

impl Error {
    /// Whether this error belongs to the warehouse SQL execution class.
    pub fn is_sql(&self) -> bool {
        matches!(self, Error::Sql { .. })
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_classification() {
        let sql = Error::Sql {
            code: "002003".to_string(),
            sql_state: "42S02".to_string(),
            message: "Table 'RAW_CSV_DATA' does not exist".to_string(),
        };
        assert!(sql.is_sql());
        assert!(!Error::Connection("refused".to_string()).is_sql());
        assert!(!Error::Protocol("empty body".to_string()).is_sql());
    }

    #[test]
    fn test_sql_display() {
        let err = Error::Sql {
            code: "002003".to_string(),
            sql_state: "42S02".to_string(),
            message: "does not exist".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("002003"));
        assert!(display.contains("42S02"));
        assert!(display.contains("does not exist"));
    }
}
