//! Process Launching
//!
//! Turns a single-process step (shell, embedded script, relay) into a ready
//! [`Command`] and runs it, alone or chained into a pipeline.
//!
//! Script bodies are written to a temporary file and handed to the
//! interpreter as `<interpreter> <file>`. The file lives as long as the
//! [`Prepared`] value, so it is removed once the child has exited.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use log::debug;
use tempfile::NamedTempFile;

use crate::context::Context;
use crate::environment::Settings;
use crate::error::{EngineError, Result};
use crate::template;
use crate::workflow::model::{RelayTarget, Step, StepKind};

/// Where a process's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Straight to the invoking process's stdout
    Inherit,
    /// Collected for a capture variable
    Capture,
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub code: i32,
    /// Collected stdout, only with [`Sink::Capture`]
    pub stdout: Option<String>,
}

/// Result of a finished pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    /// Exit codes of the members, in pipeline order
    pub codes: Vec<i32>,
    /// Collected stdout of the last member, only with [`Sink::Capture`]
    pub stdout: Option<String>,
}

/// A command ready to spawn.
#[derive(Debug)]
pub struct Prepared {
    command: Command,
    description: String,
    script: Option<NamedTempFile>,
}

impl Prepared {
    /// Text shown in logs and spawn errors.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Path of the compiled script unit, if the step has one.
    pub fn script_path(&self) -> Option<&Path> {
        self.script.as_ref().map(NamedTempFile::path)
    }
}

/// Builds commands for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct Launcher<'a> {
    pub settings: &'a Settings,
    /// Declared `target` of the document, for native relays
    pub target: Option<&'a str>,
    pub working_dir: Option<&'a Path>,
}

impl<'a> Launcher<'a> {
    /// Resolves the step's templates and builds its command.
    pub fn prepare(&self, step: &Step, ctx: &Context) -> Result<Prepared> {
        match &step.kind {
            StepKind::Shell { script, shell } => {
                let body = template::resolve_str(script, ctx)?;
                let shell = shell.as_deref().unwrap_or(&self.settings.shell);
                let source = compile_shell(&body, self.settings.errexit);
                self.script_command(shell, &source, ".sh", ctx)
            }
            StepKind::Embedded {
                language,
                script,
                interpreter,
                imports,
            } => {
                let body = template::resolve_str(script, ctx)?;
                let interpreter = interpreter
                    .clone()
                    .unwrap_or_else(|| self.settings.interpreter_for(language));
                let source = compile_embedded(language, &body, imports);
                self.script_command(&interpreter, &source, extension_for(language), ctx)
            }
            StepKind::Relay { target } => self.relay_command(target, ctx),
            _ => Err(EngineError::Parse(format!(
                "step '{}' is not a single command",
                step.label()
            ))),
        }
    }

    /// Runs a shell condition; exit status 0 means true.
    pub fn test_condition(&self, expression: &str, ctx: &Context) -> Result<bool> {
        let mut command = Command::new(&self.settings.shell);
        command.arg("-c").arg(expression);
        self.configure(&mut command, ctx);
        command.stdin(Stdio::null()).stdout(Stdio::null());

        let status = command.status().map_err(|e| {
            EngineError::io(format!("cannot evaluate condition '{}'", expression), e)
        })?;
        debug!("Condition '{}' exited with {}", expression, exit_code(status));
        Ok(status.success())
    }

    fn script_command(
        &self,
        interpreter: &str,
        source: &str,
        extension: &str,
        ctx: &Context,
    ) -> Result<Prepared> {
        let mut script = tempfile::Builder::new()
            .prefix("ry-step-")
            .suffix(extension)
            .tempfile()
            .map_err(|e| EngineError::io("cannot create script file", e))?;
        script
            .write_all(source.as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| EngineError::io("cannot write script file", e))?;

        let (program, mut args) = split_command(interpreter)?;
        args.push(script.path().display().to_string());

        let mut command = Command::new(&program);
        command.args(&args);
        self.configure(&mut command, ctx);

        debug!("Compiled script for {} at {}", program, script.path().display());
        Ok(Prepared {
            command,
            description: interpreter.to_string(),
            script: Some(script),
        })
    }

    fn relay_command(&self, target: &RelayTarget, ctx: &Context) -> Result<Prepared> {
        let (program, mut args) = match target {
            RelayTarget::Native => {
                let target = self.target.ok_or_else(|| {
                    EngineError::Parse("native relay without a declared target".to_string())
                })?;
                (target.to_string(), Vec::new())
            }
            RelayTarget::Command(command) => {
                split_command(&template::resolve_str(command, ctx)?)?
            }
        };

        // raw tokens, never the parsed flags, so '-5' stays '-5'
        args.extend(ctx.raw_arguments().iter().cloned());

        let mut command = Command::new(&program);
        command.args(&args);
        self.configure(&mut command, ctx);

        Ok(Prepared {
            command,
            description: shell_words::join(std::iter::once(&program).chain(args.iter())),
            script: None,
        })
    }

    fn configure(&self, command: &mut Command, ctx: &Context) {
        command
            .env_clear()
            .envs(ctx.process_env())
            .stderr(Stdio::inherit());

        if let Some(dir) = self.working_dir {
            command.current_dir(dir);
        }
    }
}

/// Runs one command to completion.
pub fn run(prepared: Prepared, sink: Sink) -> Result<Finished> {
    let Prepared {
        mut command,
        description,
        script: _script,
    } = prepared;

    command.stdin(Stdio::inherit()).stdout(match sink {
        Sink::Inherit => Stdio::inherit(),
        Sink::Capture => Stdio::piped(),
    });

    debug!("Spawning {}", description);
    let child = command
        .spawn()
        .map_err(|e| EngineError::io(format!("cannot start '{}'", description), e))?;
    finish(child, sink, &description)
}

/// Runs commands as a pipe chain: member i's stdout feeds member i + 1's
/// stdin. Every member is waited for.
pub fn run_pipeline(members: Vec<Prepared>, sink: Sink) -> Result<PipelineRun> {
    let count = members.len();
    let mut children: Vec<(Child, String)> = Vec::with_capacity(count);
    let mut _scripts = Vec::with_capacity(count);
    let mut upstream: Option<ChildStdout> = None;

    for (index, prepared) in members.into_iter().enumerate() {
        let Prepared {
            mut command,
            description,
            script,
        } = prepared;
        _scripts.push(script);
        let last = index + 1 == count;

        command.stdin(match upstream.take() {
            Some(stdout) => Stdio::from(stdout),
            None => Stdio::inherit(),
        });
        command.stdout(if last && sink == Sink::Inherit {
            Stdio::inherit()
        } else {
            Stdio::piped()
        });

        match command.spawn() {
            Ok(mut child) => {
                if !last {
                    upstream = child.stdout.take();
                }
                children.push((child, description));
            }
            Err(e) => {
                for (mut child, _) in children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(EngineError::io(format!("cannot start '{}'", description), e));
            }
        }
    }

    let Some((last, description)) = children.pop() else {
        return Ok(PipelineRun {
            codes: Vec::new(),
            stdout: None,
        });
    };

    // drain the tail first so a full pipe cannot stall the upstream members
    let tail = finish(last, sink, &description)?;

    let mut codes = Vec::with_capacity(count);
    for (mut child, description) in children {
        let status = child
            .wait()
            .map_err(|e| EngineError::io(format!("cannot wait for '{}'", description), e))?;
        codes.push(exit_code(status));
    }
    codes.push(tail.code);

    debug!("Pipeline exit codes: {:?}", codes);
    Ok(PipelineRun {
        codes,
        stdout: tail.stdout,
    })
}

fn finish(child: Child, sink: Sink, description: &str) -> Result<Finished> {
    let wait_error = |e: std::io::Error| EngineError::io(format!("cannot wait for '{}'", description), e);

    match sink {
        Sink::Capture => {
            let output = child.wait_with_output().map_err(wait_error)?;
            Ok(Finished {
                code: exit_code(output.status),
                stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            })
        }
        Sink::Inherit => {
            let mut child = child;
            let status = child.wait().map_err(wait_error)?;
            Ok(Finished {
                code: exit_code(status),
                stdout: None,
            })
        }
    }
}

/// Exit code of a finished process; signals map to 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Splits an interpreter or relay command line with shell word rules.
fn split_command(text: &str) -> Result<(String, Vec<String>)> {
    let mut words = shell_words::split(text)
        .map_err(|e| EngineError::Parse(format!("cannot split command '{}': {}", text, e)))?
        .into_iter();

    match words.next() {
        Some(program) => Ok((program, words.collect())),
        None => Err(EngineError::Parse("empty command".to_string())),
    }
}

/// Shell source with the configured error mode.
pub fn compile_shell(body: &str, errexit: bool) -> String {
    let mut source = String::with_capacity(body.len() + 8);
    if errexit {
        source.push_str("set -e\n");
    }
    source.push_str(body);
    if !body.ends_with('\n') {
        source.push('\n');
    }
    source
}

/// Embedded source with its import preamble.
pub fn compile_embedded(language: &str, body: &str, imports: &[String]) -> String {
    let mut source = String::new();
    if is_python(language) {
        for module in imports {
            source.push_str(&format!("import {}\n", module));
        }
    } else if !imports.is_empty() {
        debug!("Ignoring imports for {} script", language);
    }
    source.push_str(body);
    if !body.ends_with('\n') {
        source.push('\n');
    }
    source
}

fn is_python(language: &str) -> bool {
    matches!(language, "python" | "py" | "python3")
}

fn extension_for(language: &str) -> &'static str {
    match language {
        l if is_python(l) => ".py",
        "node" | "javascript" | "js" => ".js",
        "ruby" | "rb" => ".rb",
        "perl" => ".pl",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn context(raw: &[&str]) -> Context {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string());
        env.insert("GREETING".to_string(), "hello".to_string());
        Context::new(raw.iter().map(|s| s.to_string()).collect(), 0, env)
    }

    fn launcher(settings: &Settings) -> Launcher<'_> {
        Launcher {
            settings,
            target: None,
            working_dir: None,
        }
    }

    fn capture(step: &Step, ctx: &Context, settings: &Settings) -> Finished {
        let prepared = launcher(settings).prepare(step, ctx).unwrap();
        run(prepared, Sink::Capture).unwrap()
    }

    #[test]
    fn test_shell_step_captures_stdout() {
        let settings = Settings::default();
        let ctx = context(&[]);
        let done = capture(&Step::shell("echo $GREETING world"), &ctx, &settings);
        assert_eq!(done.code, 0);
        assert_eq!(done.stdout.as_deref(), Some("hello world\n"));
    }

    #[test]
    fn test_environment_is_exactly_the_context() {
        let settings = Settings::default();
        let mut ctx = context(&[]);
        ctx.capture("TAG", "v1");
        let done = capture(
            &Step::shell("echo \"${TAG}:${HOME:-unset}\""),
            &ctx,
            &settings,
        );
        assert_eq!(done.stdout.as_deref(), Some("v1:unset\n"));
    }

    #[test]
    fn test_errexit_stops_script() {
        let settings = Settings::default();
        let ctx = context(&[]);
        let done = capture(&Step::shell("false\necho after"), &ctx, &settings);
        assert_eq!(done.code, 1);
        assert_eq!(done.stdout.as_deref(), Some(""));

        let lenient = Settings {
            errexit: false,
            ..Settings::default()
        };
        let done = capture(&Step::shell("false\necho after"), &ctx, &lenient);
        assert_eq!(done.code, 0);
        assert_eq!(done.stdout.as_deref(), Some("after\n"));
    }

    #[test]
    fn test_exit_code_is_propagated() {
        let settings = Settings::default();
        let done = capture(&Step::shell("exit 7"), &context(&[]), &settings);
        assert_eq!(done.code, 7);
    }

    #[test]
    fn test_script_is_template_resolved() {
        let settings = Settings::default();
        let ctx = context(&["first", "second"]);
        let done = capture(&Step::shell("echo {{args.1}}"), &ctx, &settings);
        assert_eq!(done.stdout.as_deref(), Some("second\n"));
    }

    #[test]
    fn test_unresolved_placeholder_stops_before_spawn() {
        let settings = Settings::default();
        let err = launcher(&settings)
            .prepare(&Step::shell("echo {{env.NOPE}}"), &context(&[]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedVariable { .. }));
    }

    #[test]
    fn test_relay_forwards_raw_tokens() {
        let settings = Settings::default();
        let ctx = context(&["fmt", "-5", "--x=1"]);
        let done = capture(&Step::relay_command("printf '%s,'"), &ctx, &settings);
        assert_eq!(done.stdout.as_deref(), Some("fmt,-5,--x=1,"));
    }

    #[test]
    fn test_native_relay_uses_target() {
        let settings = Settings::default();
        let ctx = context(&["a b"]);
        let launcher = Launcher {
            settings: &settings,
            target: Some("echo"),
            working_dir: None,
        };
        let prepared = launcher.prepare(&Step::relay_native(), &ctx).unwrap();
        assert_eq!(prepared.description(), "echo 'a b'");
        let done = run(prepared, Sink::Capture).unwrap();
        assert_eq!(done.stdout.as_deref(), Some("a b\n"));
    }

    #[test]
    fn test_relay_command_with_unbalanced_quote() {
        let settings = Settings::default();
        let err = launcher(&settings)
            .prepare(&Step::relay_command("echo 'oops"), &context(&[]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_working_dir() {
        let dir = tempdir().unwrap();
        let settings = Settings::default();
        let launcher = Launcher {
            settings: &settings,
            target: None,
            working_dir: Some(dir.path()),
        };
        let prepared = launcher
            .prepare(&Step::shell("touch marker"), &context(&[]))
            .unwrap();
        assert_eq!(run(prepared, Sink::Inherit).unwrap().code, 0);
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_script_file_removed_after_run() {
        let settings = Settings::default();
        let prepared = launcher(&settings)
            .prepare(&Step::shell("true"), &context(&[]))
            .unwrap();
        let path = prepared.script_path().unwrap().to_path_buf();
        assert!(path.exists());
        run(prepared, Sink::Inherit).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_pipeline_sorts() {
        let settings = Settings::default();
        let ctx = context(&[]);
        let launcher = launcher(&settings);
        let members = vec![
            launcher.prepare(&Step::shell("printf 'B\\nA\\n'"), &ctx).unwrap(),
            launcher.prepare(&Step::shell("sort"), &ctx).unwrap(),
        ];
        let result = run_pipeline(members, Sink::Capture).unwrap();
        assert_eq!(result.codes, vec![0, 0]);
        assert_eq!(result.stdout.as_deref(), Some("A\nB\n"));
    }

    #[test]
    fn test_pipeline_reports_every_member_status() {
        let settings = Settings::default();
        let ctx = context(&[]);
        let launcher = launcher(&settings);
        let members = vec![
            launcher.prepare(&Step::shell("exit 3"), &ctx).unwrap(),
            launcher.prepare(&Step::shell("cat"), &ctx).unwrap(),
        ];
        let result = run_pipeline(members, Sink::Inherit).unwrap();
        assert_eq!(result.codes, vec![3, 0]);
    }

    #[test]
    fn test_condition() {
        let settings = Settings::default();
        let ctx = context(&[]);
        assert!(launcher(&settings).test_condition("[ \"$GREETING\" = hello ]", &ctx).unwrap());
        assert!(!launcher(&settings).test_condition("exit 1", &ctx).unwrap());
    }

    #[test]
    fn test_compile_sources() {
        assert_eq!(compile_shell("echo hi", true), "set -e\necho hi\n");
        assert_eq!(compile_shell("echo hi\n", false), "echo hi\n");

        let imports = vec!["json".to_string(), "os".to_string()];
        assert_eq!(
            compile_embedded("python", "print(1)", &imports),
            "import json\nimport os\nprint(1)\n"
        );
        assert_eq!(compile_embedded("node", "console.log(1)", &imports), "console.log(1)\n");
        assert_eq!(extension_for("py"), ".py");
        assert_eq!(extension_for("lua"), "");
    }

    #[test]
    fn test_split_command() {
        let (program, args) = split_command("python3 -u 'my script'").unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-u", "my script"]);
        assert!(split_command("   ").is_err());
    }
}
