//! A Rust SDK core for Split, a feature flagging and experimentation platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates feature flags for a `key`, optionally
//! using [`Attributes`] supplied with the call. Evaluating a flag results in a `treatment`, a
//! string such as `"on"` or `"off"`, and a label explaining why it was chosen. When a flag cannot
//! be evaluated, the treatment is [`CONTROL`].
//!
//! Flag definitions, rule-based segments and segment membership are kept in an in-memory
//! [`Storage`](storage::Storage) that is updated in the background, either by a
//! [`PollerThread`] or by a [`SyncTask`](sync::SyncTask) on a tokio runtime. Evaluation always
//! reads a consistent snapshot of storage and never blocks on the network.
//!
//! An [`ImpressionListener`] can be provided to record which key received which treatment.
//!
//! Lower-level building blocks are public too: the hashing functions in [`splitter`], the
//! definitions in [`models`], the pure [`eval::evaluate`] function and the synchronizers in
//! [`sync`] driven by any [`ChangeFetcher`](fetcher::ChangeFetcher).
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Evaluation itself never fails: problems with a definition or with the input surface as
//! [`CONTROL`] with a descriptive label. Errors are returned by synchronization, and usually
//! indicate that developer's attention is needed (e.g. an invalid SDK key).
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages. Consider integrating a `log`-compatible logger implementation for better visibility
//! into SDK operations.
//!
//! # Examples
//!
//! A runnable example can be found in the `demos/` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
mod client;
mod config;
mod error;
mod impressions;
mod manager;

pub mod eval;
pub mod fetcher;
pub mod models;
pub mod poller_thread;
pub mod splitter;
pub mod storage;
pub mod sync;

pub use attributes::{AttributeValue, Attributes};
pub use client::{Client, TreatmentWithConfig};
pub use config::ClientConfig;
pub use error::{Error, EvaluationError, ParseError, Result};
pub use impressions::{Impression, ImpressionListener};
pub use manager::Manager;
pub use poller_thread::{PollerThread, PollerThreadConfig};

/// Treatment returned when a flag cannot be evaluated.
pub const CONTROL: &str = "control";
