//! The job envelope: everything known about one in-flight conversion.
//!
//! An envelope is owned by the single task driving its job. Provider
//! identifiers and discovered URLs are write-once: a setter called twice
//! returns an error instead of silently replacing the first value. The
//! outcome moves from `Pending` to a terminal state exactly once.

use crate::error::{ConvertError, ErrorKind};
use crate::pipeline::client::RemoteJob;
use crate::pipeline::input::{DocumentFormat, ValidatedInput};
use crate::pipeline::poll::{PollPolicy, Stage};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

/// Terminal or pending state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded(PathBuf),
    Failed { kind: ErrorKind, detail: String },
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Pending)
    }
}

#[derive(Debug)]
pub struct JobEnvelope {
    id: Uuid,
    input_path: PathBuf,
    source: DocumentFormat,
    target: DocumentFormat,
    input_bytes: Bytes,
    remote: Option<RemoteJob>,
    upload_target_url: Option<String>,
    result_url: Option<String>,
    upload_policy: PollPolicy,
    conversion_policy: PollPolicy,
    created_at: Instant,
    outcome: JobOutcome,
}

impl JobEnvelope {
    pub fn new(
        input: ValidatedInput,
        target: DocumentFormat,
        upload_policy: PollPolicy,
        conversion_policy: PollPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path: input.path,
            source: input.format,
            target,
            input_bytes: input.bytes,
            remote: None,
            upload_target_url: None,
            result_url: None,
            upload_policy,
            conversion_policy,
            created_at: Instant::now(),
            outcome: JobOutcome::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn source(&self) -> DocumentFormat {
        self.source
    }

    pub fn target(&self) -> DocumentFormat {
        self.target
    }

    /// Cheap handle to the input buffer; the bytes themselves are never copied.
    pub fn input_bytes(&self) -> Bytes {
        self.input_bytes.clone()
    }

    pub fn remote(&self) -> Option<&RemoteJob> {
        self.remote.as_ref()
    }

    pub fn upload_target_url(&self) -> Option<&str> {
        self.upload_target_url.as_deref()
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    /// Polling budget for `stage`.
    pub fn policy(&self, stage: Stage) -> PollPolicy {
        match stage {
            Stage::UploadReady => self.upload_policy,
            Stage::Conversion => self.conversion_policy,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    pub fn set_remote(&mut self, remote: RemoteJob) -> Result<(), ConvertError> {
        write_once(&mut self.remote, remote, "remote job identifiers")
    }

    pub fn set_upload_target_url(&mut self, url: String) -> Result<(), ConvertError> {
        write_once(&mut self.upload_target_url, url, "upload target URL")
    }

    pub fn set_result_url(&mut self, url: String) -> Result<(), ConvertError> {
        write_once(&mut self.result_url, url, "result URL")
    }

    /// Move to a terminal outcome. Fails if one was already recorded.
    pub fn finish(&mut self, outcome: JobOutcome) -> Result<(), ConvertError> {
        if self.outcome.is_terminal() {
            return Err(ConvertError::Internal(format!(
                "job {} already finished as {:?}",
                self.id, self.outcome
            )));
        }
        self.outcome = outcome;
        Ok(())
    }
}

fn write_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<(), ConvertError> {
    if slot.is_some() {
        return Err(ConvertError::Internal(format!("{what} already assigned")));
    }
    *slot = Some(value);
    Ok(())
}
