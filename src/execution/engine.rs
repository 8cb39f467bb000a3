//! Invocation Engine
//!
//! The entry point of the library. An [`Engine`] owns one loaded
//! [`Definition`] and turns raw argument vectors into runs:
//!
//! 1. Match the arguments to a handler
//! 2. Build the [`Context`] and inject engine variables (`RY_LIBRARY_DIR`,
//!    the document's `env:` section)
//! 3. Hand the handler's steps to the [`Executor`]
//!
//! Each run is an [`Invocation`] whose [`Phase`] can be inspected afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use super::executor::{Executor, ExitStatus};
use super::options::{CapturePolicy, ExecutionOptions, PipelineMode};
use super::trace::ExecutionTrace;
use crate::context::Context;
use crate::environment::{Settings, LIBRARY_DIR_VAR};
use crate::error::Result;
use crate::plan::render_plan;
use crate::template;
use crate::workflow::{load_workflow, match_handler, Definition};

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loaded,
    Matched,
    Resolving,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::Matched => "matched",
            Self::Resolving => "resolving",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs invocations against one loaded definition.
///
/// # Example
///
/// ```rust,no_run
/// use ry_engine::{Context, Engine};
///
/// fn main() -> Result<(), ry_engine::EngineError> {
///     let mut engine = Engine::from_path("git.yaml")?;
///     engine.set_working_dir("/srv/repo");
///
///     let args = vec!["commit".to_string(), "--amend".to_string()];
///     let status = engine.run(args, Context::process_environment())?;
///     std::process::exit(status.code());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    definition: Arc<Definition>,
    options: ExecutionOptions,
}

impl Engine {
    pub fn new(definition: impl Into<Arc<Definition>>) -> Self {
        Self {
            definition: definition.into(),
            options: ExecutionOptions::default(),
        }
    }

    /// Loads (or reuses) the document at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_workflow(path)?))
    }

    /// Sets the directory spawned processes start in.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.options.working_dir = Some(dir.into());
    }

    pub fn set_pipeline_mode(&mut self, mode: PipelineMode) {
        self.options.pipeline_mode = mode;
    }

    pub fn set_capture_policy(&mut self, policy: CapturePolicy) {
        self.options.capture_policy = policy;
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Prepares an invocation without running it.
    pub fn invocation(
        &self,
        raw_arguments: Vec<String>,
        environment: HashMap<String, String>,
    ) -> Invocation<'_> {
        Invocation {
            engine: self,
            raw_arguments,
            environment,
            phase: Phase::Loaded,
            handler: None,
            context: None,
            trace: None,
        }
    }

    /// Matches and runs `raw_arguments`.
    pub fn run(
        &self,
        raw_arguments: Vec<String>,
        environment: HashMap<String, String>,
    ) -> Result<ExitStatus> {
        self.invocation(raw_arguments, environment).run()
    }

    /// Renders what `run` would do as a shell program.
    pub fn plan(
        &self,
        raw_arguments: Vec<String>,
        environment: HashMap<String, String>,
    ) -> Result<String> {
        let matched = match_handler(&self.definition, &raw_arguments)?;
        let ctx = self.context(raw_arguments, matched.consumed, environment)?;
        let settings = Settings::from_environment(ctx.environment());
        render_plan(
            matched.steps,
            &ctx,
            &settings,
            self.definition.target.as_deref(),
        )
    }

    /// Builds the invocation context with the engine-provided variables.
    fn context(
        &self,
        raw_arguments: Vec<String>,
        consumed: usize,
        environment: HashMap<String, String>,
    ) -> Result<Context> {
        let mut ctx = Context::new(raw_arguments, consumed, environment);

        if let Some(dir) = self.definition.source.as_deref().and_then(Path::parent) {
            ctx.inject_env(LIBRARY_DIR_VAR, dir.display().to_string());
        }

        for (name, value) in &self.definition.env {
            let value = template::resolve_str(value, &ctx)?;
            debug!("Exporting {}={}", name, value);
            ctx.inject_env(name.clone(), value);
        }

        Ok(ctx)
    }
}

/// One run of an engine with a specific argument vector.
#[derive(Debug)]
pub struct Invocation<'e> {
    engine: &'e Engine,
    raw_arguments: Vec<String>,
    environment: HashMap<String, String>,
    phase: Phase,
    handler: Option<String>,
    context: Option<Context>,
    trace: Option<ExecutionTrace>,
}

impl<'e> Invocation<'e> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Label of the matched handler, once matching succeeded.
    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Final context, with every capture, once execution started.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn trace(&self) -> Option<&ExecutionTrace> {
        self.trace.as_ref()
    }

    /// Runs the invocation. Ends in [`Phase::Completed`] or [`Phase::Failed`].
    pub fn run(&mut self) -> Result<ExitStatus> {
        let result = self.execute();
        self.phase = match result {
            Ok(_) => Phase::Completed,
            Err(_) => Phase::Failed,
        };
        info!(
            "Invocation {} (handler: {})",
            self.phase,
            self.handler.as_deref().unwrap_or("none")
        );
        result
    }

    fn execute(&mut self) -> Result<ExitStatus> {
        let engine = self.engine;
        let definition = engine.definition();

        let matched = match_handler(definition, &self.raw_arguments)?;
        self.phase = Phase::Matched;
        self.handler = Some(matched.label());

        self.phase = Phase::Resolving;
        let mut ctx = engine.context(
            self.raw_arguments.clone(),
            matched.consumed,
            self.environment.clone(),
        )?;
        let settings = Settings::from_environment(ctx.environment());

        self.phase = Phase::Executing;
        let executor = Executor::new(
            matched.label(),
            &settings,
            definition.target.as_deref(),
            &engine.options,
        );
        let result = executor.execute(matched.steps, &mut ctx);

        self.trace = Some(executor.into_trace());
        self.context = Some(ctx);
        result
    }
}
