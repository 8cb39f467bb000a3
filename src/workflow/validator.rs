//! Definition Validation
//!
//! Structural checks that run once per loaded document:
//! - Definition is not empty
//! - Pipeline members are single-process steps without capture
//! - `relay: native` has a declared target
//! - Capture names and loop variables are usable as environment variable
//!   names, and only commands and pipelines capture
//! - Pipeline members carry no `test` guard
//! - Placeholders use a known namespace (warning only)

use log::{debug, info, warn};

use super::model::{Condition, Definition, ForeachItems, RelayTarget, Step, StepKind};
use crate::error::{EngineError, Result};
use crate::template::{self, NAMESPACES};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyDefinition,
    EmptyScript(String),
    EmptyPipeline(String),
    PipelineMember { pipeline: String, member: String },
    PipelineCapture { pipeline: String, member: String },
    NativeRelayWithoutTarget(String),
    InvalidCaptureName { step: String, name: String },
    GroupCapture(String),
    PipelineGuard { pipeline: String, member: String },
    InvalidLoopVariable { step: String, name: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDefinition => write!(f, "Document defines no handlers and no default"),
            Self::EmptyScript(step) => write!(f, "Step '{}' has an empty script", step),
            Self::EmptyPipeline(step) => write!(f, "Pipeline '{}' has no members", step),
            Self::PipelineMember { pipeline, member } => write!(
                f,
                "Pipeline '{}': member '{}' is not a single command",
                pipeline, member
            ),
            Self::PipelineCapture { pipeline, member } => write!(
                f,
                "Pipeline '{}': member '{}' cannot capture, its stdout feeds the next member",
                pipeline, member
            ),
            Self::NativeRelayWithoutTarget(step) => write!(
                f,
                "Step '{}' relays natively but the document declares no 'target'",
                step
            ),
            Self::InvalidCaptureName { step, name } => {
                write!(f, "Step '{}': '{}' is not a valid variable name", step, name)
            }
            Self::GroupCapture(step) => write!(
                f,
                "Step '{}': only commands and pipelines can capture output",
                step
            ),
            Self::PipelineGuard { pipeline, member } => write!(
                f,
                "Pipeline '{}': member '{}' cannot have a 'test', guard the pipeline instead",
                pipeline, member
            ),
            Self::InvalidLoopVariable { step, name } => {
                write!(f, "Step '{}': loop variable '{}' is not a valid name", step, name)
            }
        }
    }
}

/// Validates a single step and, recursively, its children.
fn validate_step(step: &Step, definition: &Definition, errors: &mut Vec<ValidationError>) {
    let label = step.label();

    if let Some(name) = &step.capture {
        if !is_identifier(name) {
            errors.push(ValidationError::InvalidCaptureName {
                step: label.clone(),
                name: name.clone(),
            });
        }
        if !step.is_process() && !matches!(step.kind, StepKind::Pipeline { .. }) {
            errors.push(ValidationError::GroupCapture(label.clone()));
        }
    }

    if let Some(Condition::Expression(test)) = step.guard.as_ref().map(|g| &g.test) {
        warn_unknown_namespaces(&label, test);
    }

    match &step.kind {
        StepKind::Shell { script, .. } | StepKind::Embedded { script, .. } => {
            if script.trim().is_empty() {
                errors.push(ValidationError::EmptyScript(label.clone()));
            }
            warn_unknown_namespaces(&label, script);
        }
        StepKind::Relay { target } => match target {
            RelayTarget::Native if definition.target.is_none() => {
                errors.push(ValidationError::NativeRelayWithoutTarget(label.clone()));
            }
            RelayTarget::Command(command) => warn_unknown_namespaces(&label, command),
            RelayTarget::Native => {}
        },
        StepKind::Pipeline { steps } => {
            if steps.is_empty() {
                errors.push(ValidationError::EmptyPipeline(label.clone()));
            }
            for member in steps {
                if !member.is_process() {
                    errors.push(ValidationError::PipelineMember {
                        pipeline: label.clone(),
                        member: member.label(),
                    });
                }
                if member.capture.is_some() {
                    errors.push(ValidationError::PipelineCapture {
                        pipeline: label.clone(),
                        member: member.label(),
                    });
                }
                if member.guard.is_some() {
                    errors.push(ValidationError::PipelineGuard {
                        pipeline: label.clone(),
                        member: member.label(),
                    });
                }
            }
        }
        StepKind::Parallel { steps } if steps.is_empty() => {
            debug!("Parallel group '{}' is empty", label);
        }
        StepKind::Conditional { condition, .. } => {
            if let Condition::Expression(expr) = condition {
                warn_unknown_namespaces(&label, expr);
            }
        }
        StepKind::Foreach { items, var, .. } => {
            if !is_identifier(var) {
                errors.push(ValidationError::InvalidLoopVariable {
                    step: label.clone(),
                    name: var.clone(),
                });
            }
            match items {
                ForeachItems::Expression(text) => warn_unknown_namespaces(&label, text),
                ForeachItems::List(list) => {
                    for item in list {
                        warn_unknown_namespaces(&label, item);
                    }
                }
            }
        }
        _ => {}
    }

    for child in step.children() {
        validate_step(child, definition, errors);
    }
}

/// Validates the entire definition.
pub fn validate_definition(definition: &Definition) -> Result<()> {
    info!(
        "Validating definition with {} handlers{}",
        definition.len(),
        if definition.default.is_some() {
            " and a default"
        } else {
            ""
        }
    );

    let errors = collect_errors(definition);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(EngineError::Parse(messages.join("\n")));
    }

    for handler in &definition.handlers {
        debug!(
            "Handler '{}': {} steps",
            handler.pattern,
            handler.steps.len()
        );
    }

    Ok(())
}

/// Every problem found in the definition, in document order.
pub fn collect_errors(definition: &Definition) -> Vec<ValidationError> {
    if definition.is_empty() {
        return vec![ValidationError::EmptyDefinition];
    }

    let mut errors = Vec::new();
    for step in definition.all_steps() {
        validate_step(step, definition, &mut errors);
    }
    errors
}

fn warn_unknown_namespaces(step: &str, text: &str) {
    for placeholder in template::placeholders(text) {
        if let Some((namespace, _)) = placeholder.path.split_once('.') {
            if !NAMESPACES.contains(&namespace) {
                warn!(
                    "Step '{}': placeholder '{{{{{}}}}}' uses unknown namespace '{}'",
                    step, placeholder.path, namespace
                );
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
