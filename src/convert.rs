//! The orchestrator: one end-to-end conversion per call, many in parallel.
//!
//! ```text
//! validate ─▶ admit ─▶ create job ─▶ poll upload-ready ─▶ upload
//!   (local)    (slot)        │                               │
//!                            └─────── slot held ─────────────┤
//!                                                            ▼
//!                 release ◀─ persist ◀─ download ◀─ poll conversion
//! ```
//!
//! Validation runs before admission so malformed inputs never occupy a
//! slot. Everything from admission to the file landing on disk runs while
//! a [`SlotPermit`](crate::limiter::SlotPermit) is alive. The permit is a
//! local of [`Orchestrator::run_admitted`], so the slot is released when
//! that function returns, whichever `?` it returns through.

use crate::config::ConversionConfig;
use crate::error::{ConvertError, ErrorKind};
use crate::job::{JobEnvelope, JobOutcome};
use crate::limiter::ConcurrencyLimiter;
use crate::output::{ConversionOutput, JobStats};
use crate::pipeline::client::{HttpProviderClient, JobSpec, ProviderApi};
use crate::pipeline::input::{self, DocumentFormat};
use crate::pipeline::poll::{poll_stage, require_result_url, PollOutcome, Stage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One conversion to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Readable local file.
    pub input: PathBuf,
    pub source: DocumentFormat,
    pub target: DocumentFormat,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, source: DocumentFormat, target: DocumentFormat) -> Self {
        Self {
            input: input.into(),
            source,
            target,
        }
    }

    /// Build a request whose source format comes from the file extension.
    pub fn from_path(input: impl Into<PathBuf>, target: DocumentFormat) -> Result<Self, ConvertError> {
        let input = input.into();
        let source = DocumentFormat::from_path(&input).ok_or_else(|| ConvertError::InvalidInput {
            path: input.clone(),
            format: "unknown".to_string(),
            reason: "cannot infer the document format from the file extension".to_string(),
        })?;
        Ok(Self::new(input, source, target))
    }
}

/// Runs conversions against the remote provider under a shared concurrency cap.
///
/// Cheap to clone; clones share the provider client and the limiter.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ConversionConfig>,
    client: Arc<dyn ProviderApi>,
    limiter: ConcurrencyLimiter,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator, resolving the provider client and limiter.
    ///
    /// 1. `config.provider` if set, else an [`HttpProviderClient`] built from
    ///    `api_base_url` and the credential (config or `KONVRT_API_KEY`).
    /// 2. `config.limiter` if set, else a fresh limiter with
    ///    `max_concurrent_jobs` slots.
    pub fn new(config: ConversionConfig) -> Result<Self, ConvertError> {
        let client: Arc<dyn ProviderApi> = match config.provider {
            Some(ref provider) => Arc::clone(provider),
            None => Arc::new(HttpProviderClient::from_config(&config)?),
        };
        let limiter = config
            .limiter
            .clone()
            .unwrap_or_else(|| ConcurrencyLimiter::new(config.max_concurrent_jobs));
        Ok(Self {
            config: Arc::new(config),
            client,
            limiter,
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Convert one document. Waits as long as it takes to get a slot.
    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, ConvertError> {
        self.convert_with_cancel(request, &CancellationToken::new()).await
    }

    /// Convert one document, giving up when `cancel` fires.
    ///
    /// Cancellation is observed while queued for a slot and between status
    /// checks. Nothing is cleaned up on the provider side.
    pub async fn convert_with_cancel(
        &self,
        request: &ConversionRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, ConvertError> {
        let job = self.prepare(request).await?;
        self.run(job, cancel).await
    }

    /// Validate a request and wrap it in a fresh [`JobEnvelope`].
    ///
    /// Purely local: no slot is taken and the provider is not contacted.
    pub async fn prepare(&self, request: &ConversionRequest) -> Result<JobEnvelope, ConvertError> {
        info!(
            "Starting conversion: {} ({} → {})",
            request.input.display(),
            request.source,
            request.target
        );

        // ── Step 1: Validate input (no slot, no remote calls) ────────────────
        let validated = input::load_and_validate(&request.input, request.source).await?;
        Ok(JobEnvelope::new(
            validated,
            request.target,
            self.config.upload_ready_policy(),
            self.config.conversion_policy(),
        ))
    }

    /// Drive a prepared job from admission to a file on disk.
    ///
    /// The job joins the admission queue on the first poll of the returned
    /// future.
    pub async fn run(
        &self,
        mut job: JobEnvelope,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, ConvertError> {
        // ── Steps 2–7 under a slot ───────────────────────────────────────────
        let result = self.run_admitted(&mut job, cancel).await;

        match result {
            Ok(output) => {
                job.finish(JobOutcome::Succeeded(output.path.clone()))?;
                info!(
                    "Job {}: converted in {}ms → {}",
                    job.id(),
                    output.stats.total_ms,
                    output.path.display()
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_job_complete(job.id(), &output.path);
                }
                Ok(output)
            }
            Err(e) => {
                job.finish(JobOutcome::Failed {
                    kind: e.kind(),
                    detail: e.to_string(),
                })?;
                warn!(
                    "Job {}: {} failed ({}): {}",
                    job.id(),
                    job.input_path().display(),
                    e.kind(),
                    e
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_job_failed(job.id(), e.kind(), &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Convert an in-memory document.
    ///
    /// The bytes are written to a managed [`tempfile`] that is removed when
    /// this call returns.
    pub async fn convert_from_bytes(
        &self,
        bytes: &[u8],
        source: DocumentFormat,
        target: DocumentFormat,
    ) -> Result<ConversionOutput, ConvertError> {
        let mut tmp = tempfile::Builder::new()
            .prefix("konvrt-input-")
            .suffix(&format!(".{}", source.extension()))
            .tempfile()
            .map_err(|e| ConvertError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| ConvertError::Internal(format!("tempfile write: {e}")))?;
        let request = ConversionRequest::new(tmp.path(), source, target);
        // `tmp` is dropped (and the file deleted) after `convert` returns
        self.convert(&request).await
    }

    /// Convert and move the result to `output_path`.
    pub async fn convert_to(
        &self,
        request: &ConversionRequest,
        output_path: impl AsRef<Path>,
    ) -> Result<ConversionOutput, ConvertError> {
        let mut output = self.convert(request).await?;
        let dest = output_path.as_ref();
        move_file(&output.path, dest).await?;
        output.path = dest.to_path_buf();
        Ok(output)
    }

    async fn run_admitted(
        &self,
        job: &mut JobEnvelope,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, ConvertError> {
        let cb = self.config.progress_callback.as_ref();

        // ── Step 2: Admission ────────────────────────────────────────────────
        let queued_at = Instant::now();
        if let Some(cb) = cb {
            cb.on_job_queued(job.id(), self.limiter.queued());
        }
        let _slot = self.limiter.acquire_cancellable(cancel).await?;
        let queued_ms = queued_at.elapsed().as_millis() as u64;
        info!(
            "Job {}: admitted after {}ms ({}/{} slots held)",
            job.id(),
            queued_ms,
            self.limiter.held(),
            self.limiter.capacity()
        );
        if let Some(cb) = cb {
            cb.on_job_admitted(job.id(), queued_ms);
        }

        // ── Step 3: Create remote job ────────────────────────────────────────
        let spec = JobSpec {
            source: job.source(),
            target: job.target(),
            engine: self.config.engine.clone(),
        };
        let remote = self
            .client
            .create_job(&spec)
            .await
            .map_err(|e| expect_kind(e, ErrorKind::Provider))?;
        info!("Job {}: remote job {} created", job.id(), remote.job_id);
        let upload_task = remote.upload_task_id.clone();
        let convert_task = remote.convert_task_id.clone();
        let remote_job_id = remote.job_id.clone();
        job.set_remote(remote)?;

        // ── Step 4: Wait for the upload target ───────────────────────────────
        let (upload_url, upload_attempts) =
            self.await_stage(job, Stage::UploadReady, &upload_task, cancel).await?;
        job.set_upload_target_url(upload_url)?;

        // ── Step 5: Upload ───────────────────────────────────────────────────
        let payload = job.input_bytes();
        let size = payload.len();
        let target_url = job.upload_target_url().unwrap_or_default().to_string();
        self.client
            .upload(&target_url, payload)
            .await
            .map_err(|e| expect_kind(e, ErrorKind::Upload))?;
        debug!("Job {}: uploaded {} bytes", job.id(), size);
        if let Some(cb) = cb {
            cb.on_upload_complete(job.id(), size);
        }

        // ── Step 6: Wait for the conversion ──────────────────────────────────
        let (result_url, conversion_attempts) =
            self.await_stage(job, Stage::Conversion, &convert_task, cancel).await?;
        job.set_result_url(result_url)?;

        // ── Step 7: Download and persist ─────────────────────────────────────
        let result_url = job.result_url().unwrap_or_default().to_string();
        let bytes = self
            .client
            .download(&result_url)
            .await
            .map_err(|e| expect_kind(e, ErrorKind::Download))?;
        let path = persist(&self.config.output_dir, job.id(), job.target(), &bytes).await?;

        Ok(ConversionOutput {
            path,
            job_id: job.id(),
            remote_job_id,
            source: job.source(),
            target: job.target(),
            bytes: bytes.len() as u64,
            stats: JobStats {
                queued_ms,
                upload_poll_attempts: upload_attempts,
                conversion_poll_attempts: conversion_attempts,
                total_ms: job.created_at().elapsed().as_millis() as u64,
            },
        })
    }

    /// Poll one stage and map its terminal state onto the error taxonomy.
    async fn await_stage(
        &self,
        job: &JobEnvelope,
        stage: Stage,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, u32), ConvertError> {
        let policy = job.policy(stage);
        let job_id = job.id();
        let client = &self.client;
        let cb = self.config.progress_callback.as_ref();
        let stage_start = Instant::now();

        let outcome = poll_stage(
            stage,
            policy,
            cancel,
            |attempt| async move {
                let status = client.task_status(task_id).await;
                if let (Some(cb), Ok(s)) = (cb, &status) {
                    cb.on_stage_poll(job_id, stage, attempt, policy.max_attempts, s.label());
                }
                status
            },
            require_result_url,
        )
        .await;

        match outcome {
            PollOutcome::Succeeded { value, attempts } => {
                debug!("Job {}: {} stage done after {} checks", job_id, stage, attempts);
                Ok((value, attempts))
            }
            PollOutcome::Failed { reason, .. } => Err(match stage {
                Stage::UploadReady => ConvertError::UploadPreparation { detail: reason },
                Stage::Conversion => ConvertError::Conversion { detail: reason },
            }),
            PollOutcome::TimedOut { attempts } => Err(ConvertError::Timeout {
                stage,
                attempts,
                waited_ms: stage_start.elapsed().as_millis() as u64,
            }),
            PollOutcome::Cancelled { .. } => Err(ConvertError::Cancelled(format!(
                "waiting for the {stage} stage"
            ))),
        }
    }
}

/// Keep the step's error kind even if a `ProviderApi` implementation
/// reports something else.
fn expect_kind(e: ConvertError, kind: ErrorKind) -> ConvertError {
    if e.kind() == kind || e.kind() == ErrorKind::Cancelled {
        return e;
    }
    let detail = e.to_string();
    match kind {
        ErrorKind::Provider => ConvertError::provider(detail),
        ErrorKind::Upload => ConvertError::Upload { detail },
        ErrorKind::Download => ConvertError::Download { detail },
        _ => e,
    }
}

/// Write `bytes` to a fresh `converted-<job>.<ext>` file in `dir`.
///
/// Atomic write: temp file in the same directory, then rename, so a
/// half-written file never appears under the final name.
async fn persist(
    dir: &Path,
    job_id: Uuid,
    target: DocumentFormat,
    bytes: &[u8],
) -> Result<PathBuf, ConvertError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let path = dir.join(format!("converted-{}.{}", job_id, target.extension()));
    let tmp_path = path.with_extension(format!("{}.tmp", target.extension()));

    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(ConvertError::OutputWriteFailed { path, source: e });
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(ConvertError::OutputWriteFailed { path, source: e });
    }
    Ok(path)
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), ConvertError> {
    let write_err = |e| ConvertError::OutputWriteFailed {
        path: to.to_path_buf(),
        source: e,
    };
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await.map_err(write_err)?;
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}
