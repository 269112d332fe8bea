//! # konvrt
//!
//! Convert documents (PDF, DOCX, ODT, plain text) through a remote,
//! asynchronous conversion provider, with a hard cap on how many remote jobs
//! run at once.
//!
//! ## Why this crate?
//!
//! Hosted conversion APIs work in several round trips: create a job, wait
//! until it offers an upload target, upload, wait again while it converts,
//! then fetch the result. Each wait is open-ended, and most plans limit how
//! many jobs may run in parallel. This crate drives those round trips as
//! bounded polling stages and queues excess work in arrival order, so a
//! burst of requests degrades into a queue instead of provider errors.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Validate  read locally, check the declared format (no slot used)
//!  ├─ 2. Admit     wait FIFO for one of `max_concurrent_jobs` slots
//!  ├─ 3. Create    POST /jobs (upload → convert → export tasks)
//!  ├─ 4. Poll      upload task until it exposes an upload URL
//!  ├─ 5. Upload    PUT the bytes
//!  ├─ 6. Poll      convert task until it exposes a result URL
//!  └─ 7. Persist   download to `output_dir`, release the slot
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use konvrt::{ConversionConfig, ConversionRequest, DocumentFormat, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential from KONVRT_API_KEY
//!     let orchestrator = Orchestrator::new(ConversionConfig::default())?;
//!     let request = ConversionRequest::from_path("report.pdf", DocumentFormat::Docx)?;
//!     let output = orchestrator.convert(&request).await?;
//!     println!("{} ({} bytes)", output.path.display(), output.bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `konvrt` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! konvrt = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod limiter;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{ConversionRequest, Orchestrator};
pub use error::{ConvertError, ErrorKind};
pub use job::{JobEnvelope, JobOutcome};
pub use limiter::{ConcurrencyLimiter, SlotPermit};
pub use output::{ConversionOutput, JobStats};
pub use pipeline::client::{HttpProviderClient, JobSpec, ProviderApi, RemoteJob};
pub use pipeline::input::DocumentFormat;
pub use pipeline::poll::{PollPolicy, Stage};
pub use pipeline::task::TaskStatus;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, convert_stream_with_cancel, JobStream};
