//! Environment Management Module
//!
//! Resolves interpreter binaries and engine switches from an environment
//! snapshot, so nothing reads the live process environment mid-run.

pub mod settings;

pub use settings::{Settings, DEFAULT_PYTHON, DEFAULT_SHELL, LIBRARY_DIR_VAR};
