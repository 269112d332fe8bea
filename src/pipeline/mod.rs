//! Pipeline stages for remote document conversion.
//!
//! Each submodule owns one concern of talking to the provider, so the
//! orchestrator only sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ client::create_job ──▶ poll(upload-ready) ──▶ client::upload
//! (local)                                                      │
//!       client::download ◀── poll(conversion) ◀────────────────┘
//! ```
//!
//! 1. [`input`]: read the local file and check it looks like its declared format
//! 2. [`client`]: the four provider calls, behind the [`client::ProviderApi`] trait
//! 3. [`task`]: decode provider task-status bodies into [`task::TaskStatus`]
//! 4. [`poll`]: bounded, cancellable polling of one stage

pub mod client;
pub mod input;
pub mod poll;
pub mod task;
