//! Error types for SeriesRelay
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by domain (catalog, hosting, download, schedule,
//! storage, etc.) so callers can tell a transient transport failure apart
//! from a rejected precondition.
//!
//! ## Error classes
//!
//! - **Transient transport errors** (`NetworkError`, `Timeout`, `ReqwestError`)
//!   are recorded on the affected job as `failed` and retried later, either by
//!   an explicit queue retry or by the bounded upload retry policy.
//! - **Precondition violations** (`CollectionNotFound`, `IncompleteDownloads`,
//!   ...) are surfaced immediately to the caller and never retried.
//! - **Permanent remote rejections** end in the terminal `skipped` upload
//!   state once the retry budget is exhausted.

use thiserror::Error;

/// Result type alias using our RelayError type
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for SeriesRelay
#[derive(Error, Debug)]
pub enum RelayError {
    // ===== Catalog / Hosting API Errors =====

    /// Authentication with the hosting platform failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Generic API request failure
    #[error("API request failed: {message}")]
    ApiRequestFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
        /// API endpoint that failed
        endpoint: Option<String>,
    },

    /// API returned invalid or unexpected response format
    #[error("Invalid API response: {0}")]
    InvalidApiResponse(String),

    /// Hosting credentials are not configured
    #[error("Hosting credentials missing: {0}")]
    MissingCredentials(String),

    // ===== Download Errors =====

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Stream resolver returned no playable URL for the asset
    #[error("No video URL found in response for {0}")]
    StreamUrlNotFound(String),

    /// Server returned unexpected status code
    #[error("Server responded with unexpected status code: {status_code}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    // ===== Upload Errors =====

    /// Local media file for an upload is missing
    #[error("Video file not found: {0}")]
    MediaFileNotFound(String),

    /// The upload job has already used its retry budget
    #[error("Max retries exceeded: {0}")]
    RetriesExhausted(String),

    // ===== Schedule Preconditions =====

    /// Collection row does not exist
    #[error("Series not found: {0}")]
    CollectionNotFound(i64),

    /// Asset row does not exist
    #[error("Episode not found: {0}")]
    AssetNotFound(i64),

    /// Collection has no asset with a local file
    #[error("No downloaded episodes found for this series")]
    NoDownloadedAssets,

    /// Only part of the collection has been downloaded
    #[error("Not all episodes downloaded ({downloaded}/{total}). Please download all episodes first.")]
    IncompleteDownloads {
        downloaded: i64,
        total: i64,
    },

    // ===== Database Errors =====

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored value could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    // ===== Configuration Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== General Errors =====

    /// Operation timed out
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<chrono::ParseError> for RelayError {
    fn from(err: chrono::ParseError) -> Self {
        RelayError::InvalidData(format!("Failed to parse timestamp: {}", err))
    }
}

// Helper methods for creating common errors
impl RelayError {
    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        RelayError::InternalError(message.into())
    }

    /// Create an ApiRequestFailed error
    pub fn api_failed<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        RelayError::ApiRequestFailed {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        RelayError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Check if error is retryable (network errors, timeouts, 5xx)
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::NetworkError { is_transient, .. } => *is_transient,
            RelayError::Timeout(_) => true,
            RelayError::ApiRequestFailed { status_code: Some(500..=599), .. } => true,
            RelayError::UnexpectedStatusCode { status_code: 500..=599, .. } => true,
            RelayError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if error is a rejected precondition that the caller must fix
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RelayError::CollectionNotFound(_)
                | RelayError::AssetNotFound(_)
                | RelayError::NoDownloadedAssets
                | RelayError::IncompleteDownloads { .. }
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            RelayError::MissingCredentials(_) => {
                "DAILYMOTION_API_KEY and DAILYMOTION_API_SECRET environment variables are required".to_string()
            }
            RelayError::AuthenticationFailed(_) => {
                "Failed to authenticate with the hosting platform. Please check the API credentials.".to_string()
            }
            RelayError::SqlxError(_) | RelayError::MigrationFailed(_) => {
                "The local database is unavailable. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
