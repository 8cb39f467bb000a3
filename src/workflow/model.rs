//! Workflow Data Model
//!
//! Canonical, in-memory form of a workflow document. The loader turns every
//! accepted YAML shape into these types; nothing downstream sees raw YAML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: git
//! target: /usr/bin/git
//! env:
//!   GIT_PAGER: cat
//! commands:
//!   "commit --amend":
//!     - shell: echo "amending {{args.all}}"
//!   status:
//!     - name: short status
//!       shell: git status -s
//!       capture: STATUS
//!     - if: '[ -n "{{STATUS}}" ]'
//!       then:
//!         - echo "dirty"
//!   push:
//!     - shell: git push
//!       test: '[ -z "{{STATUS}}" ]'
//!       fail: commit first
//!   "tag all":
//!     - foreach: "{{args.rest}}"
//!       var: TAG
//!       do:
//!         - git tag "$TAG"
//!   default:
//!     - relay: native
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};

/// Maximum length of an auto-generated step label.
const LABEL_WIDTH: usize = 40;

/// One node of a handler's step tree.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// What the step does.
    #[serde(flatten)]
    pub kind: StepKind,

    /// Label used in diagnostics; generated from the body when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Variable receiving the step's trimmed stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,

    /// Non-zero exit is logged and execution continues
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub best_effort: bool,

    /// Precondition checked before the step runs
    #[serde(flatten)]
    pub guard: Option<Guard>,
}

/// `test`/`fail` precondition of a step.
///
/// A false test skips the step, or fails the handler with `fail` as the
/// message when one is given.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Guard {
    pub test: Condition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

/// The closed set of step kinds.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Shell script body; `shell` overrides the configured shell binary.
    Shell {
        script: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
    },
    /// Script for a secondary interpreter (python, node, ...).
    Embedded {
        language: String,
        script: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interpreter: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        imports: Vec<String>,
    },
    /// Forward the raw invocation arguments to another program.
    Relay { target: RelayTarget },
    /// stdout of member i feeds stdin of member i + 1.
    Pipeline { steps: Vec<Step> },
    /// Members run concurrently and are joined before continuing.
    Parallel { steps: Vec<Step> },
    /// Exactly one branch runs; an empty else-branch is a no-op.
    Conditional {
        condition: Condition,
        then: Vec<Step>,
        #[serde(rename = "else", skip_serializing_if = "Vec::is_empty")]
        otherwise: Vec<Step>,
    },
    /// Explicit `steps:` group, run in order.
    Sequence { steps: Vec<Step> },
    /// Body run once per item with the item bound to `var`.
    Foreach {
        items: ForeachItems,
        var: String,
        #[serde(rename = "do")]
        steps: Vec<Step>,
    },
}

/// Items a foreach step iterates over.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ForeachItems {
    /// Each entry is one item (placeholders resolved per entry).
    List(Vec<String>),
    /// Template-resolved, then split into items with shell word rules.
    Expression(String),
}

/// Where a relay step sends the raw arguments.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RelayTarget {
    /// The document's declared `target` binary
    Native,
    /// Templated command line; raw arguments are appended
    Command(String),
}

/// Condition of a conditional step.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    /// Template-resolved, then a boolean word or a shell command.
    Expression(String),
}

impl Step {
    fn from_kind(kind: StepKind) -> Self {
        Self {
            kind,
            name: None,
            capture: None,
            best_effort: false,
            guard: None,
        }
    }

    /// Creates a shell step.
    ///
    /// # Example
    ///
    /// ```
    /// use ry_engine::workflow::Step;
    ///
    /// let step = Step::shell("git describe --tags")
    ///     .named("describe")
    ///     .captured("TAG")
    ///     .best_effort();
    /// assert_eq!(step.label(), "describe");
    /// ```
    pub fn shell(script: impl Into<String>) -> Self {
        Self::from_kind(StepKind::Shell {
            script: script.into(),
            shell: None,
        })
    }

    /// Creates an embedded script step for `language`.
    pub fn embedded(language: impl Into<String>, script: impl Into<String>) -> Self {
        Self::from_kind(StepKind::Embedded {
            language: language.into(),
            script: script.into(),
            interpreter: None,
            imports: Vec::new(),
        })
    }

    pub fn python(script: impl Into<String>) -> Self {
        Self::embedded("python", script)
    }

    pub fn relay_native() -> Self {
        Self::from_kind(StepKind::Relay {
            target: RelayTarget::Native,
        })
    }

    pub fn relay_command(command: impl Into<String>) -> Self {
        Self::from_kind(StepKind::Relay {
            target: RelayTarget::Command(command.into()),
        })
    }

    pub fn pipeline(steps: Vec<Step>) -> Self {
        Self::from_kind(StepKind::Pipeline { steps })
    }

    pub fn parallel(steps: Vec<Step>) -> Self {
        Self::from_kind(StepKind::Parallel { steps })
    }

    pub fn sequence(steps: Vec<Step>) -> Self {
        Self::from_kind(StepKind::Sequence { steps })
    }

    pub fn conditional(condition: Condition, then: Vec<Step>, otherwise: Vec<Step>) -> Self {
        Self::from_kind(StepKind::Conditional {
            condition,
            then,
            otherwise,
        })
    }

    pub fn foreach(var: impl Into<String>, items: ForeachItems, steps: Vec<Step>) -> Self {
        Self::from_kind(StepKind::Foreach {
            items,
            var: var.into(),
            steps,
        })
    }

    /// Adds a precondition; see [`Guard`].
    pub fn guarded(mut self, test: Condition, fail: Option<String>) -> Self {
        self.guard = Some(Guard { test, fail });
        self
    }

    /// Sets the diagnostic label.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stores the step's stdout into `variable`.
    pub fn captured(mut self, variable: impl Into<String>) -> Self {
        self.capture = Some(variable.into());
        self
    }

    /// Marks the step best-effort.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Shell, embedded and relay steps each map to exactly one process.
    pub fn is_process(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Shell { .. } | StepKind::Embedded { .. } | StepKind::Relay { .. }
        )
    }

    /// Direct children of group steps.
    pub fn children(&self) -> Vec<&Step> {
        match &self.kind {
            StepKind::Pipeline { steps }
            | StepKind::Parallel { steps }
            | StepKind::Sequence { steps }
            | StepKind::Foreach { steps, .. } => steps.iter().collect(),
            StepKind::Conditional {
                then, otherwise, ..
            } => then.iter().chain(otherwise.iter()).collect(),
            _ => Vec::new(),
        }
    }

    /// Name used in logs and error messages.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        let summary = match &self.kind {
            StepKind::Shell { script, .. } => first_line(script),
            StepKind::Embedded {
                language, script, ..
            } => format!("{}: {}", language, first_line(script)),
            StepKind::Relay {
                target: RelayTarget::Native,
            } => "relay native".to_string(),
            StepKind::Relay {
                target: RelayTarget::Command(cmd),
            } => format!("relay {}", first_line(cmd)),
            StepKind::Pipeline { steps } => format!("pipeline ({} steps)", steps.len()),
            StepKind::Parallel { steps } => format!("parallel ({} steps)", steps.len()),
            StepKind::Sequence { steps } => format!("steps ({})", steps.len()),
            StepKind::Foreach { var, steps, .. } => {
                format!("foreach {} ({} steps)", var, steps.len())
            }
            StepKind::Conditional { condition, .. } => match condition {
                Condition::Literal(value) => format!("if {}", value),
                Condition::Expression(expr) => format!("if {}", first_line(expr)),
            },
        };

        truncate(&summary, LABEL_WIDTH)
    }
}

/// Whitespace-delimited literal words a handler is selected by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    words: Vec<String>,
}

impl Pattern {
    /// Normalizes a pattern key; `None` when it has no words.
    pub fn parse(text: &str) -> Option<Self> {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            None
        } else {
            Some(Self { words })
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// True if the pattern is a word-prefix of `invocation`.
    pub fn is_prefix_of(&self, invocation: &[String]) -> bool {
        invocation.len() >= self.words.len()
            && self.words.iter().zip(invocation).all(|(w, a)| w == a)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.words.join(" "))
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A pattern and the steps it selects.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Handler {
    pub pattern: Pattern,
    pub steps: Vec<Step>,
}

/// Canonical form of a workflow document.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct Definition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Document the definition was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// Program used by `relay: native`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Variables exported to every step (values may hold placeholders)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,

    /// Handlers in document order
    pub handlers: Vec<Handler>,

    /// Fallback when no pattern matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Vec<Step>>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. Duplicate patterns are rejected.
    pub fn add_handler(&mut self, pattern: Pattern, steps: Vec<Step>) -> Result<(), String> {
        if self.handlers.iter().any(|h| h.pattern == pattern) {
            return Err(format!("Pattern '{}' is defined twice", pattern));
        }
        self.handlers.push(Handler { pattern, steps });
        Ok(())
    }

    /// Builder form of [`Definition::add_handler`] for literal patterns.
    ///
    /// Panics on an empty or duplicate pattern, so it is meant for code that
    /// spells the patterns out.
    pub fn with_handler(mut self, pattern: &str, steps: Vec<Step>) -> Self {
        let parsed = Pattern::parse(pattern).unwrap_or_else(|| panic!("empty pattern"));
        if let Err(e) = self.add_handler(parsed, steps) {
            panic!("{}", e);
        }
        self
    }

    pub fn with_default(mut self, steps: Vec<Step>) -> Self {
        self.default = Some(steps);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Gets a handler by its normalized pattern text.
    pub fn handler(&self, pattern: &str) -> Option<&Handler> {
        let wanted = Pattern::parse(pattern)?;
        self.handlers.iter().find(|h| h.pattern == wanted)
    }

    /// Every step tree of the document, default included.
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.handlers
            .iter()
            .flat_map(|h| h.steps.iter())
            .chain(self.default.iter().flatten())
    }

    /// Number of handlers, default excluded.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if there is nothing to run at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.default.is_none()
    }
}

fn first_line(text: &str) -> String {
    text.trim().lines().next().unwrap_or_default().to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = Step::shell("echo hi").captured("OUT").best_effort();

        assert_eq!(step.capture.as_deref(), Some("OUT"));
        assert!(step.best_effort);
        assert!(step.is_process());
    }

    #[test]
    fn test_label_prefers_name() {
        assert_eq!(Step::shell("echo hi").named("greet").label(), "greet");
        assert_eq!(Step::shell("  echo hi\necho bye").label(), "echo hi");
    }

    #[test]
    fn test_label_truncates_long_scripts() {
        let step = Step::shell("x".repeat(100));
        let label = step.label();
        assert_eq!(label.chars().count(), LABEL_WIDTH);
        assert!(label.ends_with("..."));
    }

    #[test]
    fn test_group_labels_and_children() {
        let pipe = Step::pipeline(vec![Step::shell("a"), Step::shell("b")]);
        assert_eq!(pipe.label(), "pipeline (2 steps)");
        assert_eq!(pipe.children().len(), 2);
        assert!(!pipe.is_process());

        let cond = Step::conditional(
            Condition::Literal(true),
            vec![Step::shell("a")],
            vec![Step::shell("b"), Step::shell("c")],
        );
        assert_eq!(cond.children().len(), 3);
        assert_eq!(cond.label(), "if true");
    }

    #[test]
    fn test_foreach_and_guard() {
        let each = Step::foreach(
            "F",
            ForeachItems::List(vec!["a.txt".into(), "b.txt".into()]),
            vec![Step::shell("wc -l \"$F\"")],
        )
        .guarded(
            Condition::Expression("[ -d . ]".into()),
            Some("not a directory".into()),
        );

        assert_eq!(each.label(), "foreach F (1 steps)");
        assert_eq!(each.children().len(), 1);
        assert!(!each.is_process());

        let yaml = serde_yaml::to_string(&each).unwrap();
        assert!(yaml.contains("type: foreach"));
        assert!(yaml.contains("var: F"));
        assert!(yaml.contains("do:"));
        assert!(yaml.contains("test: "));
        assert!(yaml.contains("[ -d . ]"));
        assert!(yaml.contains("fail: not a directory"));
    }

    #[test]
    fn test_pattern_normalization() {
        let pattern = Pattern::parse("  version \t --bump ").unwrap();
        assert_eq!(pattern.words(), ["version", "--bump"]);
        assert_eq!(pattern.to_string(), "version --bump");
        assert!(Pattern::parse("   ").is_none());
    }

    #[test]
    fn test_pattern_prefix() {
        let pattern = Pattern::parse("version --bump").unwrap();
        let words: Vec<String> = ["version", "--bump", "minor"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(pattern.is_prefix_of(&words));
        assert!(!pattern.is_prefix_of(&words[..1]));
    }

    #[test]
    fn test_definition_rejects_duplicate_patterns() {
        let mut def = Definition::new();
        def.add_handler(Pattern::parse("a b").unwrap(), vec![]).unwrap();
        assert!(def.add_handler(Pattern::parse("a  b").unwrap(), vec![]).is_err());
        assert_eq!(def.len(), 1);
    }

    #[test]
    fn test_definition_lookup_and_all_steps() {
        let def = Definition::new()
            .with_handler("status", vec![Step::shell("echo hi")])
            .with_default(vec![Step::relay_native()])
            .with_target("/bin/true");

        assert!(def.handler("status").is_some());
        assert!(def.handler("missing").is_none());
        assert_eq!(def.all_steps().count(), 2);
        assert!(!def.is_empty());
        assert!(Definition::new().is_empty());
    }

    #[test]
    fn test_serialize_canonical_form() {
        let def = Definition::new()
            .with_handler("build", vec![Step::shell("make").captured("LOG")])
            .with_default(vec![Step::relay_native()]);

        let yaml = serde_yaml::to_string(&def).unwrap();
        assert!(yaml.contains("pattern: build"));
        assert!(yaml.contains("type: shell"));
        assert!(yaml.contains("capture: LOG"));
        assert!(yaml.contains("type: relay"));
    }
}
