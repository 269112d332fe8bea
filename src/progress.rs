//! Progress-callback trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe
//! each job as it queues, gets admitted, polls the provider and finishes.
//!
//! # Example
//!
//! ```rust
//! use konvrt::{ConversionConfig, JobProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use uuid::Uuid;
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, job_id: Uuid, output: &std::path::Path) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("job {job_id} → {}", output.display());
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorKind;
use crate::pipeline::poll::Stage;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Called by the orchestrator as a job moves through its lifecycle.
///
/// Jobs run concurrently, so implementations must be `Send + Sync` and may
/// receive events for different jobs interleaved. All methods default to
/// no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// The job passed validation and is waiting for a slot.
    fn on_job_queued(&self, job_id: Uuid, queue_depth: usize) {
        let _ = (job_id, queue_depth);
    }

    /// The job holds a slot; remote work starts now.
    fn on_job_admitted(&self, job_id: Uuid, waited_ms: u64) {
        let _ = (job_id, waited_ms);
    }

    /// One status check of a polled stage came back.
    fn on_stage_poll(&self, job_id: Uuid, stage: Stage, attempt: u32, max_attempts: u32, status: &str) {
        let _ = (job_id, stage, attempt, max_attempts, status);
    }

    /// The input bytes were accepted by the upload target.
    fn on_upload_complete(&self, job_id: Uuid, bytes: usize) {
        let _ = (job_id, bytes);
    }

    /// The converted file is on disk.
    fn on_job_complete(&self, job_id: Uuid, output: &Path) {
        let _ = (job_id, output);
    }

    /// The job ended in an error.
    fn on_job_failed(&self, job_id: Uuid, kind: ErrorKind, detail: &str) {
        let _ = (job_id, kind, detail);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
