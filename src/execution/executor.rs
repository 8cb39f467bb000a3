//! Step Executor
//!
//! Walks a handler's step tree and performs it. Every step kind is handled
//! by one arm of [`Executor::run_step`]:
//! - process steps (shell, embedded, relay) spawn one child each
//! - pipelines chain their members' stdio
//! - parallel groups run members on scoped threads, each with its own
//!   copy of the context, and merge their captures after the join
//! - conditionals run exactly one branch
//! - foreach loops run their body once per item, with the item captured
//!   under the loop variable
//!
//! A step with a `test` guard is skipped when the test is false, or fails
//! with its `fail` message. A non-zero exit or failed guard aborts the
//! enclosing sequence unless the step is best-effort.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

use log::{debug, info, warn};

use super::options::{CapturePolicy, ExecutionOptions};
use super::process::{self, Launcher, Sink};
use super::trace::{EventType, ExecutionTrace};
use crate::context::Context;
use crate::environment::Settings;
use crate::error::{EngineError, Result};
use crate::template;
use crate::workflow::model::{Condition, ForeachItems, Step, StepKind};

/// Exit code reported for a parallel member whose thread panicked.
const PANIC_EXIT_CODE: i32 = 101;

/// Final status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn success(self) -> bool {
        self.0 == 0
    }
}

/// Runs the steps of one matched handler.
pub struct Executor<'a> {
    handler: String,
    settings: &'a Settings,
    target: Option<&'a str>,
    options: &'a ExecutionOptions,
    trace: Mutex<ExecutionTrace>,
}

impl<'a> Executor<'a> {
    /// `handler` names the matched pattern in error reports.
    pub fn new(
        handler: impl Into<String>,
        settings: &'a Settings,
        target: Option<&'a str>,
        options: &'a ExecutionOptions,
    ) -> Self {
        Self {
            handler: handler.into(),
            settings,
            target,
            options,
            trace: Mutex::new(ExecutionTrace::new()),
        }
    }

    /// Runs `steps` in order against `ctx`.
    ///
    /// Returns success when every step ran or failed best-effort; the first
    /// hard failure is returned as an error.
    pub fn execute(&self, steps: &[Step], ctx: &mut Context) -> Result<ExitStatus> {
        info!("Executing handler '{}' ({} steps)", self.handler, steps.len());
        self.run_sequence(steps, ctx)?;
        Ok(ExitStatus::SUCCESS)
    }

    /// Consumes the executor and hands back its trace.
    pub fn into_trace(self) -> ExecutionTrace {
        self.trace
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run_sequence(&self, steps: &[Step], ctx: &mut Context) -> Result<()> {
        for step in steps {
            self.run_guarded(step, ctx)?;
        }
        Ok(())
    }

    /// Runs a step, downgrading its exit failure to a warning when it is
    /// best-effort.
    fn run_guarded(&self, step: &Step, ctx: &mut Context) -> Result<()> {
        match self.run_step(step, ctx) {
            Err(EngineError::StepExecution { step: label, code, .. }) if step.best_effort => {
                warn!(
                    "Step '{}' failed with exit code {} (best effort, continuing)",
                    label, code
                );
                Ok(())
            }
            Err(EngineError::GuardFailed { step: label, message, .. }) if step.best_effort => {
                warn!("Step '{}': {} (best effort, continuing)", label, message);
                Ok(())
            }
            other => other,
        }
    }

    fn run_step(&self, step: &Step, ctx: &mut Context) -> Result<()> {
        let label = step.label();
        debug!("Starting step: {}", label);
        self.record(&label, EventType::Started);

        let result = match self.admits(step, ctx) {
            Ok(true) => self.dispatch(step, ctx),
            Ok(false) => {
                debug!("Step '{}' skipped, its test is false", label);
                Ok(())
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                debug!("Step '{}' completed", label);
                self.record(&label, EventType::Completed);
            }
            Err(_) => self.record(&label, EventType::Failed),
        }
        result
    }

    /// Checks a step's `test` guard. A false test with a `fail` message is
    /// an error; without one the step is skipped.
    fn admits(&self, step: &Step, ctx: &Context) -> Result<bool> {
        let Some(guard) = &step.guard else {
            return Ok(true);
        };
        if self.evaluate(&guard.test, ctx)? {
            return Ok(true);
        }
        match &guard.fail {
            Some(message) => Err(EngineError::GuardFailed {
                handler: self.handler.clone(),
                step: step.label(),
                message: template::resolve_str(message, ctx)?,
            }),
            None => Ok(false),
        }
    }

    fn dispatch(&self, step: &Step, ctx: &mut Context) -> Result<()> {
        match &step.kind {
            StepKind::Shell { .. } | StepKind::Embedded { .. } | StepKind::Relay { .. } => {
                self.run_process(step, ctx)
            }
            StepKind::Pipeline { steps } => self.run_pipeline(step, steps, ctx),
            StepKind::Parallel { steps } => self.run_parallel(steps, ctx),
            StepKind::Conditional {
                condition,
                then,
                otherwise,
            } => self.run_conditional(condition, then, otherwise, ctx),
            StepKind::Sequence { steps } => self.run_sequence(steps, ctx),
            StepKind::Foreach { items, var, steps } => self.run_foreach(items, var, steps, ctx),
        }
    }

    fn run_process(&self, step: &Step, ctx: &mut Context) -> Result<()> {
        let prepared = self.launcher().prepare(step, ctx)?;
        let finished = process::run(prepared, sink_for(step))?;
        self.check(step, finished.code)?;
        self.store_capture(step, finished.stdout, ctx);
        Ok(())
    }

    fn run_pipeline(&self, step: &Step, members: &[Step], ctx: &mut Context) -> Result<()> {
        let launcher = self.launcher();
        let resolved: &Context = ctx;
        let prepared = members
            .iter()
            .map(|member| launcher.prepare(member, resolved))
            .collect::<Result<Vec<_>>>()?;

        let run = process::run_pipeline(prepared, sink_for(step))?;
        let code = self.options.pipeline_mode.status(&run.codes);
        if code != 0 {
            debug!("Pipeline '{}' member codes: {:?}", step.label(), run.codes);
        }
        self.check(step, code)?;
        self.store_capture(step, run.stdout, ctx);
        Ok(())
    }

    fn run_conditional(
        &self,
        condition: &Condition,
        then: &[Step],
        otherwise: &[Step],
        ctx: &mut Context,
    ) -> Result<()> {
        if self.evaluate(condition, ctx)? {
            self.run_sequence(then, ctx)
        } else {
            debug!("Condition false, {} else-steps", otherwise.len());
            self.run_sequence(otherwise, ctx)
        }
    }

    fn run_foreach(
        &self,
        items: &ForeachItems,
        var: &str,
        body: &[Step],
        ctx: &mut Context,
    ) -> Result<()> {
        let values = match items {
            ForeachItems::List(list) => list
                .iter()
                .map(|item| template::resolve_str(item, ctx))
                .collect::<Result<Vec<_>>>()?,
            ForeachItems::Expression(text) => {
                let resolved = template::resolve_str(text, ctx)?;
                shell_words::split(&resolved).map_err(|e| {
                    EngineError::Parse(format!("foreach items '{}': {}", resolved, e))
                })?
            }
        };

        debug!("Looping over {} items as '{}'", values.len(), var);
        for value in values {
            ctx.capture(var, value);
            self.run_sequence(body, ctx)?;
        }
        Ok(())
    }

    fn run_parallel(&self, members: &[Step], ctx: &mut Context) -> Result<()> {
        let snapshot = ctx.clone();

        let outcomes: Vec<(Result<()>, Context)> = thread::scope(|scope| {
            let handles: Vec<_> = members
                .iter()
                .map(|member| {
                    let mut member_ctx = snapshot.clone();
                    scope.spawn(move || {
                        let result = self.run_guarded(member, &mut member_ctx);
                        (result, member_ctx)
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(members)
                .map(|(handle, member)| {
                    handle.join().unwrap_or_else(|_| {
                        (
                            Err(EngineError::StepExecution {
                                handler: self.handler.clone(),
                                step: member.label(),
                                code: PANIC_EXIT_CODE,
                            }),
                            snapshot.clone(),
                        )
                    })
                })
                .collect()
        });

        let mut first_error = None;
        let mut merged: HashMap<String, (usize, String)> = HashMap::new();
        let mut collision = None;

        for (index, (result, member_ctx)) in outcomes.into_iter().enumerate() {
            for (name, value) in member_ctx.captures() {
                if snapshot.captured(name) == Some(value.as_str()) {
                    continue;
                }
                if let Some((writer, _)) = merged.get(name) {
                    warn!(
                        "Parallel members {} and {} both capture '{}'; keeping member {}",
                        writer, index, name, index
                    );
                    collision.get_or_insert_with(|| name.clone());
                }
                merged.insert(name.clone(), (index, value.clone()));
            }

            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            self.apply_captures(merged, ctx);
            return Err(e);
        }
        if let (Some(name), CapturePolicy::RejectCollisions) =
            (collision, self.options.capture_policy)
        {
            return Err(EngineError::CaptureCollision { name });
        }

        self.apply_captures(merged, ctx);
        Ok(())
    }

    fn apply_captures(&self, merged: HashMap<String, (usize, String)>, ctx: &mut Context) {
        for (name, (_, value)) in merged {
            ctx.capture(name, value);
        }
    }

    fn evaluate(&self, condition: &Condition, ctx: &Context) -> Result<bool> {
        let expression = match condition {
            Condition::Literal(value) => return Ok(*value),
            Condition::Expression(expression) => template::resolve_str(expression, ctx)?,
        };

        match expression.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            _ => self.launcher().test_condition(&expression, ctx),
        }
    }

    fn check(&self, step: &Step, code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(EngineError::StepExecution {
                handler: self.handler.clone(),
                step: step.label(),
                code,
            })
        }
    }

    fn store_capture(&self, step: &Step, stdout: Option<String>, ctx: &mut Context) {
        if let (Some(name), Some(stdout)) = (&step.capture, stdout) {
            ctx.capture(name.clone(), stdout.trim());
        }
    }

    fn launcher(&self) -> Launcher<'_> {
        Launcher {
            settings: self.settings,
            target: self.target,
            working_dir: self.options.working_dir.as_deref(),
        }
    }

    fn record(&self, label: &str, event_type: EventType) {
        self.trace
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add_event(label, event_type);
    }
}

fn sink_for(step: &Step) -> Sink {
    if step.capture.is_some() {
        Sink::Capture
    } else {
        Sink::Inherit
    }
}
