//! Step Execution Module
//!
//! Runs a matched handler's steps as real processes.
//!
//! # Architecture
//!
//! - [`engine`]: Invocation entry point (match, context, run)
//! - [`executor`]: Step dispatch for every step kind
//! - [`process`]: Script compilation and process spawning
//! - [`options`]: Engine-level execution knobs
//! - [`trace`]: Per-step timing record

pub mod engine;
pub mod executor;
pub mod options;
pub mod process;
pub mod trace;

pub use engine::{Engine, Invocation, Phase};
pub use executor::{ExitStatus, Executor};
pub use options::{CapturePolicy, ExecutionOptions, PipelineMode};
pub use trace::{EventType, ExecutionTrace};
