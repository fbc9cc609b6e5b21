use thiserror::Error;

use crate::calendar::ProviderError;
use crate::recurrence::RuleParseError;
use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("Recurrence rule error: {0}")]
    Rule(#[from] RuleParseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the message can be shown without leaking event contents,
    /// tokens, or file paths.
    pub fn is_pii_safe(&self) -> bool {
        match self {
            Self::Database(_) | Self::Network(_) | Self::Anyhow(_) | Self::Sync(_) => false,
            Self::Rule(_)
            | Self::Provider(_)
            | Self::InvalidInput(_)
            | Self::Config(_)
            | Self::NotFound(_) => true,
        }
    }

    pub fn to_safe_string(&self) -> String {
        if self.is_pii_safe() {
            self.to_string()
        } else {
            match self {
                Self::Database(_) => "Database operation failed".to_string(),
                Self::Network(_) => "Network request failed".to_string(),
                Self::Sync(_) => "Calendar sync failed".to_string(),
                _ => "Operation failed".to_string(),
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
