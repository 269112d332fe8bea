//! Result types returned by a successful conversion.

use crate::pipeline::input::DocumentFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A converted document on local disk.
///
/// The file at `path` belongs to the caller, who removes it once it has
/// been delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Local path of the converted artifact.
    pub path: PathBuf,
    /// Local job identifier, as used in logs and progress events.
    pub job_id: Uuid,
    /// Identifier the provider assigned to the remote job.
    pub remote_job_id: String,
    pub source: DocumentFormat,
    pub target: DocumentFormat,
    /// Size of the converted file in bytes.
    pub bytes: u64,
    pub stats: JobStats,
}

/// Timing and polling figures for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// Time spent waiting for a concurrency slot.
    pub queued_ms: u64,
    /// Status checks used by the upload-ready stage.
    pub upload_poll_attempts: u32,
    /// Status checks used by the conversion stage.
    pub conversion_poll_attempts: u32,
    /// Wall-clock time from validation to file on disk.
    pub total_ms: u64,
}
