//! Engine Errors
//!
//! Every failure the engine can report. Nothing is retried or swallowed:
//! errors travel to the process boundary, where [`EngineError::exit_code`]
//! turns them into an exit status.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed document structure.
    #[error("parse error: {0}")]
    Parse(String),

    /// A load-time directive could not be resolved.
    #[error("directive !{directive} '{argument}' failed: {reason}")]
    Directive {
        directive: String,
        argument: String,
        reason: String,
    },

    /// `!include` chain loops back onto a document already being loaded.
    #[error("circular include: {}", chain.join(" -> "))]
    CircularInclude { chain: Vec<String> },

    /// No pattern matched and the document has no default handler.
    #[error("no handler matches '{}'", words.join(" "))]
    NoHandler { words: Vec<String> },

    /// Placeholder without default and without a matching context entry.
    #[error("unresolved template variable '{path}'")]
    UnresolvedVariable { path: String },

    /// A step's process exited non-zero and the step was not best-effort.
    #[error("step '{step}' in handler '{handler}' failed with exit code {code}")]
    StepExecution {
        handler: String,
        step: String,
        code: i32,
    },

    /// A step's `test` was false and the step declares a `fail` message.
    #[error("step '{step}' in handler '{handler}': {message}")]
    GuardFailed {
        handler: String,
        step: String,
        message: String,
    },

    /// Two parallel members captured into the same variable.
    #[error("parallel members both capture into '{name}'")]
    CaptureCollision { name: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Wraps an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn directive(
        directive: impl Into<String>,
        argument: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Directive {
            directive: directive.into(),
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Exit code the invoking process should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StepExecution { code, .. } => *code,
            Self::NoHandler { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_execution_propagates_child_code() {
        let err = EngineError::StepExecution {
            handler: "deploy".to_string(),
            step: "push".to_string(),
            code: 42,
        };
        assert_eq!(err.exit_code(), 42);
        assert!(err.to_string().contains("push"));
        assert!(err.to_string().contains("deploy"));
    }

    #[test]
    fn test_guard_failure_shows_message() {
        let err = EngineError::GuardFailed {
            handler: "push".to_string(),
            step: "git push".to_string(),
            message: "working tree is dirty".to_string(),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().ends_with("working tree is dirty"));
    }

    #[test]
    fn test_no_handler_message_lists_words() {
        let err = EngineError::NoHandler {
            words: vec!["foo".to_string(), "bar".to_string()],
        };
        assert_eq!(err.to_string(), "no handler matches 'foo bar'");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_circular_include_shows_chain() {
        let err = EngineError::CircularInclude {
            chain: vec!["a.yaml".into(), "b.yaml".into(), "a.yaml".into()],
        };
        assert_eq!(err.to_string(), "circular include: a.yaml -> b.yaml -> a.yaml");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_directive_message_names_directive() {
        let err = EngineError::directive("include", "common.yaml", "file not found");
        assert_eq!(
            err.to_string(),
            "directive !include 'common.yaml' failed: file not found"
        );
    }
}
