//! Plan Rendering
//!
//! Renders a matched handler as a POSIX shell program without running
//! anything. Used by `ry --dry-run`.
//!
//! - multi-line and embedded scripts are base64-wrapped so quoting never
//!   breaks: `python3 -c "$(echo <b64> | base64 -d)"`
//! - pipelines are joined with `|`
//! - parallel members become `( ... ) &` blocks followed by `wait`
//! - conditionals become `if ...; then ... else ... fi`
//! - foreach steps become `for VAR in ...; do ... done`
//! - a `test` guard wraps its step in `if TEST; then ... fi`, with
//!   `echo FAIL >&2; exit 1` as the else-branch when the step has `fail`
//! - captures become `export NAME="$(...)"`, and later references to a
//!   captured value render as `${NAME}`

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::context::Context;
use crate::environment::Settings;
use crate::error::{EngineError, Result};
use crate::execution::process::{compile_embedded, compile_shell};
use crate::template;
use crate::workflow::model::{Condition, ForeachItems, RelayTarget, Step, StepKind};

const INDENT: &str = "  ";

/// Renders `steps` as a shell program.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use ry_engine::{plan::render_plan, Context, Settings};
/// use ry_engine::workflow::Step;
///
/// let ctx = Context::new(vec!["fix".into()], 0, HashMap::new());
/// let steps = vec![Step::shell("git commit -m '{{args.0}}'")];
/// let plan = render_plan(&steps, &ctx, &Settings::default(), None).unwrap();
/// assert!(plan.ends_with("git commit -m 'fix'\n"));
/// ```
pub fn render_plan(
    steps: &[Step],
    ctx: &Context,
    settings: &Settings,
    target: Option<&str>,
) -> Result<String> {
    let mut plan_ctx = ctx.clone();
    for step in steps {
        declare_captures(step, &mut plan_ctx);
    }

    let renderer = PlanRenderer {
        ctx: &plan_ctx,
        settings,
        target,
    };

    let mut out = String::from("#!/bin/sh\nset -e\n");
    renderer.render_steps(steps, 0, &mut out)?;
    Ok(out)
}

/// Captured values and loop variables do not exist yet; refer to the
/// shell variable.
fn declare_captures(step: &Step, ctx: &mut Context) {
    let loop_var = match &step.kind {
        StepKind::Foreach { var, .. } => Some(var),
        _ => None,
    };
    for name in step.capture.iter().chain(loop_var) {
        if ctx.captured(name).is_none() {
            ctx.capture(name.clone(), format!("${{{}}}", name));
        }
    }
    for child in step.children() {
        declare_captures(child, ctx);
    }
}

struct PlanRenderer<'a> {
    ctx: &'a Context,
    settings: &'a Settings,
    target: Option<&'a str>,
}

impl PlanRenderer<'_> {
    fn render_steps(&self, steps: &[Step], depth: usize, out: &mut String) -> Result<()> {
        for step in steps {
            self.render_step(step, depth, out)?;
        }
        Ok(())
    }

    fn render_step(&self, step: &Step, depth: usize, out: &mut String) -> Result<()> {
        let pad = INDENT.repeat(depth);

        if let Some(name) = &step.name {
            out.push_str(&format!("{}# {}\n", pad, name));
        }

        let Some(guard) = &step.guard else {
            return self.render_body(step, depth, out);
        };

        out.push_str(&format!("{}if {}; then\n", pad, self.condition(&guard.test)?));
        self.render_body(step, depth + 1, out)?;
        if let Some(message) = &guard.fail {
            let message = template::resolve_str(message, self.ctx)?;
            out.push_str(&format!("{}else\n", pad));
            out.push_str(&format!(
                "{}{}echo {} >&2; exit 1\n",
                pad,
                INDENT,
                shell_words::quote(&message)
            ));
        }
        out.push_str(&format!("{}fi\n", pad));
        Ok(())
    }

    fn render_body(&self, step: &Step, depth: usize, out: &mut String) -> Result<()> {
        let pad = INDENT.repeat(depth);

        match &step.kind {
            StepKind::Shell { .. } | StepKind::Embedded { .. } | StepKind::Relay { .. } => {
                let line = self.command_line(step)?;
                out.push_str(&format!("{}{}\n", pad, decorate(step, line)));
            }
            StepKind::Pipeline { steps } => {
                let line = steps
                    .iter()
                    .map(|member| self.command_line(member))
                    .collect::<Result<Vec<_>>>()?
                    .join(" | ");
                out.push_str(&format!("{}{}\n", pad, decorate(step, line)));
            }
            StepKind::Parallel { steps } => {
                for member in steps {
                    out.push_str(&format!("{}(\n", pad));
                    self.render_step(member, depth + 1, out)?;
                    out.push_str(&format!("{}) &\n", pad));
                }
                out.push_str(&format!("{}wait\n", pad));
            }
            StepKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                out.push_str(&format!("{}if {}; then\n", pad, self.condition(condition)?));
                self.render_branch(then, depth + 1, out)?;
                if !otherwise.is_empty() {
                    out.push_str(&format!("{}else\n", pad));
                    self.render_branch(otherwise, depth + 1, out)?;
                }
                out.push_str(&format!("{}fi\n", pad));
            }
            StepKind::Sequence { steps } => self.render_steps(steps, depth, out)?,
            StepKind::Foreach { items, var, steps } => {
                let words = match items {
                    ForeachItems::List(list) => list
                        .iter()
                        .map(|item| {
                            template::resolve_str(item, self.ctx)
                                .map(|word| shell_words::quote(&word).into_owned())
                        })
                        .collect::<Result<Vec<_>>>()?
                        .join(" "),
                    ForeachItems::Expression(text) => template::resolve_str(text, self.ctx)?,
                };
                out.push_str(&format!("{}for {} in {}; do\n", pad, var, words));
                self.render_branch(steps, depth + 1, out)?;
                out.push_str(&format!("{}done\n", pad));
            }
        }
        Ok(())
    }

    fn render_branch(&self, steps: &[Step], depth: usize, out: &mut String) -> Result<()> {
        if steps.is_empty() {
            out.push_str(&format!("{}:\n", INDENT.repeat(depth)));
            return Ok(());
        }
        self.render_steps(steps, depth, out)
    }

    /// One-line command of a process step.
    fn command_line(&self, step: &Step) -> Result<String> {
        Ok(match &step.kind {
            StepKind::Shell { script, shell } => {
                let body = template::resolve_str(script, self.ctx)?;
                match shell {
                    None if !body.trim().contains('\n') => body.trim().to_string(),
                    _ => {
                        let shell = shell.as_deref().unwrap_or(&self.settings.shell);
                        wrap(shell, "-c", &compile_shell(&body, self.settings.errexit))
                    }
                }
            }
            StepKind::Embedded {
                language,
                script,
                interpreter,
                imports,
            } => {
                let body = template::resolve_str(script, self.ctx)?;
                let interpreter = interpreter
                    .clone()
                    .unwrap_or_else(|| self.settings.interpreter_for(language));
                let flag = match language.as_str() {
                    "python" | "py" | "python3" | "sh" | "shell" | "bash" | "zsh" => "-c",
                    _ => "-e",
                };
                wrap(&interpreter, flag, &compile_embedded(language, &body, imports))
            }
            StepKind::Relay { target } => {
                let program = match target {
                    RelayTarget::Native => {
                        let target = self.target.ok_or_else(|| {
                            EngineError::Parse("native relay without a declared target".into())
                        })?;
                        shell_words::quote(target).into_owned()
                    }
                    RelayTarget::Command(command) => template::resolve_str(command, self.ctx)?,
                };
                if self.ctx.raw_arguments().is_empty() {
                    program
                } else {
                    format!("{} {}", program, shell_words::join(self.ctx.raw_arguments()))
                }
            }
            _ => format!("# {}", step.label()),
        })
    }

    fn condition(&self, condition: &Condition) -> Result<String> {
        let expression = match condition {
            Condition::Literal(value) => return Ok(value.to_string()),
            Condition::Expression(expression) => template::resolve_str(expression, self.ctx)?,
        };

        Ok(match expression.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => "true".to_string(),
            "false" | "no" | "0" | "" => "false".to_string(),
            _ => expression.trim().to_string(),
        })
    }
}

fn wrap(interpreter: &str, flag: &str, source: &str) -> String {
    format!(
        "{} {} \"$(echo {} | base64 -d)\"",
        interpreter,
        flag,
        STANDARD.encode(source)
    )
}

fn decorate(step: &Step, line: String) -> String {
    let line = match &step.capture {
        Some(name) => format!("export {}=\"$({})\"", name, line),
        None => line,
    };
    if step.best_effort {
        format!("{} || true", line)
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn context(raw: &[&str], consumed: usize) -> Context {
        let raw = raw.iter().map(|s| s.to_string()).collect();
        Context::new(raw, consumed, HashMap::new())
    }

    fn plan(steps: &[Step], ctx: &Context) -> String {
        render_plan(steps, ctx, &Settings::default(), Some("/usr/bin/git")).unwrap()
    }

    fn body(plan: &str) -> Vec<&str> {
        plan.lines().skip(2).collect()
    }

    #[test]
    fn test_header_and_simple_commands() {
        let ctx = context(&["deploy", "eu"], 1);
        let out = plan(&[Step::shell("echo to {{args.0}}")], &ctx);
        assert!(out.starts_with("#!/bin/sh\nset -e\n"));
        assert_eq!(body(&out), vec!["echo to eu"]);
    }

    #[test]
    fn test_pipeline_and_capture() {
        let ctx = context(&[], 0);
        let steps = vec![
            Step::pipeline(vec![Step::shell("printf 'B\\nA\\n'"), Step::shell("sort")])
                .captured("SORTED"),
            Step::shell("echo {{SORTED}}"),
        ];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec![
                "export SORTED=\"$(printf 'B\\nA\\n' | sort)\"",
                "echo ${SORTED}"
            ]
        );
    }

    #[test]
    fn test_parallel_blocks() {
        let ctx = context(&[], 0);
        let steps = vec![Step::parallel(vec![Step::shell("make a"), Step::shell("make b")])];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec!["(", "  make a", ") &", "(", "  make b", ") &", "wait"]
        );
    }

    #[test]
    fn test_conditional_with_and_without_else() {
        let ctx = context(&[], 0);
        let steps = vec![
            Step::conditional(
                Condition::Expression("[ -f Cargo.toml ]".into()),
                vec![Step::shell("cargo fmt")],
                vec![Step::shell("echo skip").best_effort()],
            ),
            Step::conditional(Condition::Literal(false), vec![], vec![]),
        ];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec![
                "if [ -f Cargo.toml ]; then",
                "  cargo fmt",
                "else",
                "  echo skip || true",
                "fi",
                "if false; then",
                "  :",
                "fi",
            ]
        );
    }

    #[test]
    fn test_embedded_script_is_base64_wrapped() {
        let ctx = context(&[], 0);
        let step = Step {
            kind: StepKind::Embedded {
                language: "python".into(),
                script: "print(json.dumps([1]))".into(),
                interpreter: None,
                imports: vec!["json".into()],
            },
            name: Some("emit".into()),
            capture: None,
            best_effort: false,
            guard: None,
        };
        let out = plan(&[step], &ctx);
        let lines = body(&out);
        assert_eq!(lines[0], "# emit");

        let encoded = STANDARD.encode("import json\nprint(json.dumps([1]))\n");
        assert_eq!(
            lines[1],
            format!("python3 -c \"$(echo {} | base64 -d)\"", encoded)
        );
    }

    #[test]
    fn test_multiline_shell_is_wrapped() {
        let ctx = context(&[], 0);
        let out = plan(&[Step::shell("cd src\nls")], &ctx);
        let encoded = STANDARD.encode("set -e\ncd src\nls\n");
        assert_eq!(
            body(&out),
            vec![format!("/bin/sh -c \"$(echo {} | base64 -d)\"", encoded)]
        );
    }

    #[test]
    fn test_relay_quotes_raw_arguments() {
        let ctx = context(&["commit", "-m", "two words"], 1);
        let steps = vec![Step::relay_native(), Step::relay_command("hub --noop")];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec![
                "/usr/bin/git commit -m 'two words'",
                "hub --noop commit -m 'two words'"
            ]
        );
    }

    #[test]
    fn test_foreach_loops() {
        let ctx = context(&["lint", "src", "my tests"], 1);
        let steps = vec![
            Step::foreach(
                "D",
                ForeachItems::List(vec!["{{args.0}}".into(), "{{args.1}}".into()]),
                vec![Step::shell("ls {{D}}")],
            ),
            Step::foreach("F", ForeachItems::Expression("*.rs".into()), vec![]),
        ];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec![
                "for D in src 'my tests'; do",
                "  ls ${D}",
                "done",
                "for F in *.rs; do",
                "  :",
                "done",
            ]
        );
    }

    #[test]
    fn test_guard_wraps_step() {
        let ctx = context(&[], 0);
        let steps = vec![
            Step::shell("git push")
                .named("push")
                .guarded(
                    Condition::Expression("[ -z \"$(git status -s)\" ]".into()),
                    Some("working tree is dirty".into()),
                ),
            Step::shell("cargo doc").guarded(Condition::Literal(true), None),
        ];
        assert_eq!(
            body(&plan(&steps, &ctx)),
            vec![
                "# push",
                "if [ -z \"$(git status -s)\" ]; then",
                "  git push",
                "else",
                "  echo 'working tree is dirty' >&2; exit 1",
                "fi",
                "if true; then",
                "  cargo doc",
                "fi",
            ]
        );
    }

    #[test]
    fn test_unresolved_variable_fails() {
        let ctx = context(&[], 0);
        let err = render_plan(
            &[Step::shell("echo {{env.NOPE}}")],
            &ctx,
            &Settings::default(),
            None,
        );
        assert!(err.is_err());
    }
}
