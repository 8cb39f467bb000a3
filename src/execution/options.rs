//! Execution Options

use std::path::PathBuf;

/// How a pipeline's exit status is derived from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Only the last member's status counts, like a plain shell pipe
    #[default]
    Lenient,
    /// The first failing member's status counts, like `set -o pipefail`
    Strict,
}

/// What happens when two parallel members capture into the same variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePolicy {
    /// Members are merged in declaration order; a warning is logged
    #[default]
    LastWriterWins,
    /// The group fails with a capture collision error
    RejectCollisions,
}

/// Knobs of a single engine, fixed before any invocation runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// Directory spawned processes start in; the caller's when unset
    pub working_dir: Option<PathBuf>,
    pub pipeline_mode: PipelineMode,
    pub capture_policy: CapturePolicy,
}

impl PipelineMode {
    /// Overall status of a pipeline from its members' statuses, in order.
    pub fn status(self, codes: &[i32]) -> i32 {
        match self {
            Self::Lenient => codes.last().copied().unwrap_or(0),
            Self::Strict => codes.iter().copied().find(|c| *c != 0).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_uses_last_status() {
        assert_eq!(PipelineMode::Lenient.status(&[1, 2, 0]), 0);
        assert_eq!(PipelineMode::Lenient.status(&[0, 0, 3]), 3);
        assert_eq!(PipelineMode::Lenient.status(&[]), 0);
    }

    #[test]
    fn test_strict_uses_first_failure() {
        assert_eq!(PipelineMode::Strict.status(&[0, 2, 3]), 2);
        assert_eq!(PipelineMode::Strict.status(&[0, 0]), 0);
    }

    #[test]
    fn test_defaults() {
        let options = ExecutionOptions::default();
        assert_eq!(options.pipeline_mode, PipelineMode::Lenient);
        assert_eq!(options.capture_policy, CapturePolicy::LastWriterWins);
        assert!(options.working_dir.is_none());
    }
}
