//! Workflow Definition Module
//!
//! Turns YAML documents into canonical [`Definition`]s and picks the
//! handler for an invocation.
//!
//! # Structure
//!
//! - [`model`]: Canonical data structures (Definition, Handler, Step)
//! - [`directives`]: Load-time YAML tags (`!env`, `!include`, ...)
//! - [`expression`]: The expression language of `!eval`
//! - [`normalize`]: Document shapes to the canonical model
//! - [`validator`]: Structural checks on a canonical definition
//! - [`loader`]: File loading and the definition cache
//! - [`matcher`]: Longest-prefix handler selection

pub mod directives;
pub mod expression;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod validator;

pub use loader::{clear_cache, dump_definition, load_workflow, Loader};
pub use matcher::{match_handler, Match};
pub use model::{
    Condition, Definition, ForeachItems, Guard, Handler, Pattern, RelayTarget, Step, StepKind,
};
