//! ry - Declarative Command Generation Engine
//!
//! Reads YAML workflow documents that map command patterns to step
//! programs, matches an invocation to the longest pattern, resolves
//! `{{placeholders}}` against the invocation context, and runs the steps
//! (shell and embedded scripts, pipelines, parallel groups, conditionals,
//! foreach loops, relays to an external binary).
//!
//! # Architecture
//!
//! - [`workflow`]: Document loading, directives, canonical model, matching
//! - [`template`]: Placeholder resolution
//! - [`context`]: Per-invocation arguments, flags, environment, captures
//! - [`execution`]: Engine, step executor, process spawning, trace
//! - [`environment`]: Interpreter settings derived from the environment
//! - [`plan`]: Dry-run rendering of a handler as a shell program
//!
//! # Example
//!
//! ```rust,no_run
//! use ry_engine::{Context, Engine};
//!
//! fn main() -> Result<(), ry_engine::EngineError> {
//!     // Load (and cache) a document
//!     let engine = Engine::from_path("git.yaml")?;
//!
//!     // `ry git.yaml commit -m wip` forwards ["commit", "-m", "wip"]
//!     let args = vec!["commit".into(), "-m".into(), "wip".into()];
//!     let status = engine.run(args, Context::process_environment())?;
//!     assert!(status.success());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod environment;
pub mod error;
pub mod execution;
pub mod plan;
pub mod template;
pub mod workflow;

// Re-export commonly used types
pub use context::Context;
pub use environment::Settings;
pub use error::{EngineError, Result};
pub use execution::{Engine, ExitStatus};
pub use workflow::model::{Definition, Step};
pub use workflow::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ry";
