//! Interpreter Settings
//!
//! Interpreters are resolved in the following order:
//! 1. Per-step override (`shell:` / `interpreter:` in the document)
//! 2. Environment snapshot: `RY_SHELL`, `RY_PYTHON`
//! 3. Built-in defaults

use std::collections::HashMap;

use log::debug;

/// Default shell binary for shell steps.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default interpreter for python steps.
pub const DEFAULT_PYTHON: &str = "python3";

/// Variable pointing at the directory of the loaded document.
pub const LIBRARY_DIR_VAR: &str = "RY_LIBRARY_DIR";

/// Interpreter configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Shell used for shell steps, conditions and `!shell`
    pub shell: String,

    /// Interpreter used for python steps
    pub python: String,

    /// Run shell scripts with `set -e`
    pub errexit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            python: DEFAULT_PYTHON.to_string(),
            errexit: true,
        }
    }
}

impl Settings {
    /// Reads settings from an environment snapshot.
    pub fn from_environment(env: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();

        let settings = Self {
            shell: non_empty("RY_SHELL").unwrap_or(defaults.shell),
            python: non_empty("RY_PYTHON").unwrap_or(defaults.python),
            errexit: non_empty("RY_ERREXIT")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.errexit),
        };

        debug!(
            "Interpreters: shell={}, python={}, errexit={}",
            settings.shell, settings.python, settings.errexit
        );
        settings
    }

    /// Interpreter for an embedded script language.
    ///
    /// Python aliases map to the configured python; any other language name
    /// is used as the binary itself.
    pub fn interpreter_for(&self, language: &str) -> String {
        match language {
            "python" | "py" | "python3" => self.python.clone(),
            "shell" | "sh" => self.shell.clone(),
            other => other.to_string(),
        }
    }
}
