//! Error types for the campaign workflow engine

use campaign_types::WorkflowStatus;
use thiserror::Error;

/// Main error type for all engine operations
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Tool gateway error: {0}")]
    ToolGateway(String),

    #[error("Campaign data source error: {0}")]
    DataSource(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Stopped by guard: {0}")]
    GuardStop(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CampaignError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for CampaignError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, CampaignError>;
