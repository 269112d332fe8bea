//! Error types for the konvrt library.
//!
//! Every failure a conversion can hit maps to exactly one [`ConvertError`]
//! variant, and every variant maps to one [`ErrorKind`]. The kind is what a
//! front-end uses to tell "your input was bad" from "the service is
//! unavailable" from "conversion timed out"; the variant carries the detail.
//!
//! Detail strings never contain the bearer credential or presigned URLs.
//! Transport errors are passed through [`redact`] before they are stored.

use crate::pipeline::poll::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the konvrt library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but is not a well-formed document of the expected kind.
    #[error("Invalid {format} document '{path}': {reason}")]
    InvalidInput {
        path: PathBuf,
        format: String,
        reason: String,
    },

    // ── Remote provider errors ────────────────────────────────────────────
    /// Job creation failed, a status check failed permanently, or the
    /// provider answered with an unexpected shape.
    #[error("Provider error: {detail}")]
    Provider {
        detail: String,
        /// HTTP status when the provider answered at all.
        status: Option<u16>,
    },

    /// The provider never produced a usable upload target.
    #[error("Upload preparation failed: {detail}")]
    UploadPreparation { detail: String },

    /// The raw upload to the presigned target was rejected.
    #[error("Upload failed: {detail}")]
    Upload { detail: String },

    /// The provider reported a failure while transcoding.
    #[error("Conversion failed: {detail}")]
    Conversion { detail: String },

    /// A polling stage exhausted its attempt budget.
    #[error("{stage} stage timed out after {attempts} status checks (~{waited_ms}ms)\nThe provider may be overloaded; try again later.")]
    Timeout {
        stage: Stage,
        attempts: u32,
        waited_ms: u64,
    },

    /// Fetching the converted artifact failed or returned nothing.
    #[error("Download of converted file failed: {detail}")]
    Download { detail: String },

    // ── Local errors ──────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller cancelled the job before it finished.
    #[error("Conversion cancelled while {0}")]
    Cancelled(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ConvertError`], stable across detail changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Provider,
    UploadPreparation,
    Upload,
    Conversion,
    Timeout,
    Download,
    Output,
    Config,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, suitable for logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Provider => "provider",
            ErrorKind::UploadPreparation => "upload_preparation",
            ErrorKind::Upload => "upload",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Download => "download",
            ErrorKind::Output => "output",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConvertError {
    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::FileNotFound { .. } | ConvertError::InvalidInput { .. } => {
                ErrorKind::InvalidInput
            }
            ConvertError::Provider { .. } => ErrorKind::Provider,
            ConvertError::UploadPreparation { .. } => ErrorKind::UploadPreparation,
            ConvertError::Upload { .. } => ErrorKind::Upload,
            ConvertError::Conversion { .. } => ErrorKind::Conversion,
            ConvertError::Timeout { .. } => ErrorKind::Timeout,
            ConvertError::Download { .. } => ErrorKind::Download,
            ConvertError::OutputWriteFailed { .. } => ErrorKind::Output,
            ConvertError::InvalidConfig(_) => ErrorKind::Config,
            ConvertError::Cancelled(_) => ErrorKind::Cancelled,
            ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the caller sent something unusable; resubmitting the same
    /// input will fail the same way.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }

    /// True when the failure looks like temporary provider unavailability.
    ///
    /// The polling loop treats transient status-check failures as "not yet"
    /// and spends an attempt on them; everything else ends the stage.
    pub fn is_transient(&self) -> bool {
        match self {
            ConvertError::Provider { status: None, .. } => true,
            ConvertError::Provider {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            ConvertError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn provider(detail: impl Into<String>) -> Self {
        ConvertError::Provider {
            detail: detail.into(),
            status: None,
        }
    }

    pub(crate) fn provider_status(code: u16, detail: impl Into<String>) -> Self {
        ConvertError::Provider {
            detail: detail.into(),
            status: Some(code),
        }
    }
}

/// Render a reqwest error without the request URL.
///
/// Presigned upload/download URLs embed short-lived signatures, so they are
/// stripped before the message can reach a log line or a client response.
pub fn redact(err: reqwest::Error) -> String {
    let timeout = err.is_timeout();
    let msg = err.without_url().to_string();
    if timeout {
        format!("request timed out ({msg})")
    } else {
        msg
    }
}
