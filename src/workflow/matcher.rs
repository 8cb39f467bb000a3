//! Handler Matching
//!
//! Picks the handler for an invocation: the longest pattern that is a
//! word-prefix of the raw arguments wins. The sort is stable, so patterns of
//! equal length keep document order.

use log::{debug, info};

use super::model::{Definition, Pattern, Step};
use crate::error::{EngineError, Result};

/// Outcome of matching an invocation against a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    /// Winning pattern; `None` when the default handler was chosen
    pub pattern: Option<&'a Pattern>,
    pub steps: &'a [Step],
    /// Number of leading raw arguments consumed by the pattern
    pub consumed: usize,
}

impl Match<'_> {
    /// Handler name used in diagnostics.
    pub fn label(&self) -> String {
        match self.pattern {
            Some(pattern) => pattern.to_string(),
            None => "default".to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.pattern.is_none()
    }
}

/// Selects the handler for `raw_arguments`.
///
/// # Example
///
/// ```
/// use ry_engine::workflow::{match_handler, Definition, Step};
///
/// let def = Definition::new()
///     .with_handler("version", vec![Step::shell("echo v")])
///     .with_handler("version --bump", vec![Step::shell("echo bump")]);
/// let args: Vec<String> = ["version", "--bump", "minor"].iter().map(|s| s.to_string()).collect();
///
/// let found = match_handler(&def, &args).unwrap();
/// assert_eq!(found.label(), "version --bump");
/// assert_eq!(found.consumed, 2);
/// ```
pub fn match_handler<'a>(definition: &'a Definition, raw_arguments: &[String]) -> Result<Match<'a>> {
    let mut candidates: Vec<_> = definition.handlers.iter().collect();
    candidates.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));

    if let Some(handler) = candidates
        .into_iter()
        .find(|h| h.pattern.is_prefix_of(raw_arguments))
    {
        info!(
            "Matched pattern '{}' ({} of {} arguments consumed)",
            handler.pattern,
            handler.pattern.len(),
            raw_arguments.len()
        );
        return Ok(Match {
            pattern: Some(&handler.pattern),
            steps: &handler.steps,
            consumed: handler.pattern.len(),
        });
    }

    match &definition.default {
        Some(steps) => {
            debug!("No pattern matched, using default handler");
            Ok(Match {
                pattern: None,
                steps,
                consumed: 0,
            })
        }
        None => Err(EngineError::NoHandler {
            words: raw_arguments.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn definition() -> Definition {
        Definition::new()
            .with_handler("version", vec![Step::shell("echo version")])
            .with_handler("version --bump", vec![Step::shell("echo bump")])
            .with_default(vec![Step::shell("echo default")])
    }

    #[test]
    fn test_longest_prefix_wins() {
        let def = definition();
        let found = match_handler(&def, &args(&["version", "--bump", "minor"])).unwrap();
        assert_eq!(found.steps, [Step::shell("echo bump")]);
        assert_eq!(found.consumed, 2);
    }

    #[test]
    fn test_shorter_pattern_when_longer_does_not_fit() {
        let def = definition();
        let found = match_handler(&def, &args(&["version", "--dry"])).unwrap();
        assert_eq!(found.label(), "version");
        assert_eq!(found.consumed, 1);
    }

    #[test]
    fn test_fallback_to_default() {
        let def = definition();
        let found = match_handler(&def, &args(&["status"])).unwrap();
        assert!(found.is_default());
        assert_eq!(found.consumed, 0);
        assert_eq!(found.label(), "default");
    }

    #[test]
    fn test_empty_invocation_uses_default() {
        let def = definition();
        assert!(match_handler(&def, &[]).unwrap().is_default());
    }

    #[test]
    fn test_no_handler_without_default() {
        let def = Definition::new().with_handler("build", vec![Step::shell("make")]);
        let err = match_handler(&def, &args(&["test", "-v"])).unwrap_err();
        assert!(matches!(err, EngineError::NoHandler { ref words } if words == &args(&["test", "-v"])));
    }

    #[test]
    fn test_pattern_longer_than_invocation_never_matches() {
        let def = Definition::new().with_handler("a b c", vec![Step::shell("x")]);
        assert!(match_handler(&def, &args(&["a", "b"])).is_err());
    }

    #[test]
    fn test_matched_pattern_is_prefix_of_invocation() {
        let def = Definition::new()
            .with_handler("a", vec![])
            .with_handler("a b", vec![])
            .with_handler("b", vec![])
            .with_handler("a b c d", vec![]);

        for invocation in [
            vec!["a"],
            vec!["a", "b"],
            vec!["a", "b", "c"],
            vec!["a", "b", "c", "d", "e"],
            vec!["b", "a"],
        ] {
            let raw = args(&invocation);
            let found = match_handler(&def, &raw).unwrap();
            let pattern = found.pattern.unwrap();
            assert!(pattern.is_prefix_of(&raw));
            assert!(def
                .handlers
                .iter()
                .filter(|h| h.pattern.is_prefix_of(&raw))
                .all(|h| h.pattern.len() <= pattern.len()));
        }
    }
}
