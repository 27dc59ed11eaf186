//! Coverage-decrease triage core: the library half of a crash-minimizing
//! fuzzer's save-if-interesting pipeline, independent of how the target is
//! executed or how the on-disk queue is laid out.
//!
//! A host fuzzer constructs a [`config::Config`] and a
//! [`dispatcher::DispatcherState`] once per session, implements the three
//! narrow collaborator traits in [`queue`] against its own executor/
//! symbolizer/scheduler, and calls [`dispatcher::save_if_interesting`] once
//! per execution.

pub mod bitmap;
pub mod callstack;
pub mod config;
pub mod crash_site;
pub mod describe;
pub mod dispatcher;
pub mod error;
pub mod persistence;
pub mod queue;
pub mod virgin;

pub use error::{CoreError, Result};
