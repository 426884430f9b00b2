//! Error types for Studygraph

use thiserror::Error;

/// Result type alias using Studygraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Studygraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Workspace '{0}' not found. Run `studygraph workspace list` to see all workspaces.")]
    WorkspaceNotFound(i64),

    #[error("Source '{0}' not found in this workspace.")]
    SourceNotFound(i64),

    #[error("Resource '{0}' not found.")]
    ResourceNotFound(i64),

    #[error("Extraction job '{0}' not found.")]
    JobNotFound(String),

    // Job errors (E100-E199)
    #[error("Workspace '{0}' already has an active extraction job '{1}'. Wait for it to finish.")]
    JobAlreadyActive(i64, String),

    // Network errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("AI API error: {0}. Check your API key with `studygraph config get ai.api_key`.")]
    AiError(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkspaceNotFound(_) => "E001",
            Self::SourceNotFound(_) => "E002",
            Self::ResourceNotFound(_) => "E003",
            Self::JobNotFound(_) => "E004",
            Self::JobAlreadyActive(..) => "E100",
            Self::NetworkError(_) => "E200",
            Self::AiError(_) => "E201",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::WorkspaceNotFound(_) => Some("studygraph workspace list".to_string()),
            Self::JobNotFound(_) => Some("studygraph jobs list".to_string()),
            Self::JobAlreadyActive(workspace_id, _) => {
                Some(format!("studygraph jobs list --workspace {}", workspace_id))
            }
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::AiError(_) => Some("studygraph config get ai.api_key".to_string()),
            _ => None,
        }
    }
}
