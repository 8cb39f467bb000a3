//! Load-time Directives
//!
//! YAML tags evaluated while a document is loaded, before anything runs:
//!
//! | Tag        | Argument                         | Result                     |
//! |------------|----------------------------------|----------------------------|
//! | `!env`     | `NAME` or `NAME\|default`        | variable value             |
//! | `!shell`   | command, or `{cmd, default}`     | trimmed stdout             |
//! | `!if`      | `{condition, then, else}`        | the chosen branch          |
//! | `!include` | path                             | the included document      |
//! | `!exists`  | path                             | bool                       |
//! | `!read`    | path                             | file contents              |
//! | `!json`    | inline JSON or path              | parsed value               |
//! | `!eval`    | expression over `args` and `env` | the expression's value     |
//!
//! Every string inside an argument may hold `{{env.*}}` placeholders; the
//! `!if` branches are left alone, and `!eval` uses its own `env.NAME`
//! syntax instead. Relative paths are resolved against the directory of the
//! document containing the tag.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;
use serde_yaml::{Mapping, Value};

use crate::context::Context;
use crate::environment::Settings;
use crate::error::{EngineError, Result};
use crate::template;

use super::expression::{self, Scope};

/// Mapping key whose (mapping) value is merged into the enclosing mapping.
const MERGE_KEY: &str = "<<";

/// Evaluates every directive of a parsed document.
pub struct DirectiveResolver {
    load_context: Context,
    /// Invocation arguments, seen by `!eval` as `args`
    arguments: Vec<String>,
    settings: Settings,
    /// Documents currently being loaded, outermost first
    include_stack: Vec<PathBuf>,
}

impl DirectiveResolver {
    pub fn new(environment: HashMap<String, String>) -> Self {
        let settings = Settings::from_environment(&environment);
        Self {
            load_context: Context::from_environment(environment),
            arguments: Vec::new(),
            settings,
            include_stack: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Registers the root document so that including it again is caught.
    pub fn enter_document(&mut self, path: &Path) {
        self.include_stack.push(path.to_path_buf());
    }

    /// Returns `node` with every directive replaced by its value.
    pub fn expand(&mut self, node: Value, base_dir: &Path) -> Result<Value> {
        match node {
            Value::Tagged(tagged) => {
                let tag = tag_name(&tagged.tag);
                self.evaluate(&tag, tagged.value, base_dir)
            }
            Value::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let splices = matches!(&item, Value::Tagged(t) if is_splicing(&tag_name(&t.tag)));
                    match self.expand(item, base_dir)? {
                        Value::Null if splices => {}
                        Value::Sequence(inner) if splices => out.extend(inner),
                        value => out.push(value),
                    }
                }
                Ok(Value::Sequence(out))
            }
            Value::Mapping(map) => self.expand_mapping(map, base_dir),
            other => Ok(other),
        }
    }

    fn expand_mapping(&mut self, map: Mapping, base_dir: &Path) -> Result<Value> {
        let mut out = Mapping::with_capacity(map.len());
        let mut merged = Vec::new();

        for (key, value) in map {
            let value = self.expand(value, base_dir)?;
            if key.as_str() == Some(MERGE_KEY) {
                match value {
                    Value::Mapping(inner) => merged.push(inner),
                    Value::Null => {}
                    _ => {
                        return Err(EngineError::Parse(
                            "'<<' must merge a mapping".to_string(),
                        ))
                    }
                }
            } else {
                out.insert(key, value);
            }
        }

        for inner in merged {
            for (key, value) in inner {
                if !out.contains_key(&key) {
                    out.insert(key, value);
                }
            }
        }

        Ok(Value::Mapping(out))
    }

    fn evaluate(&mut self, tag: &str, arg: Value, base_dir: &Path) -> Result<Value> {
        debug!("Evaluating directive !{}", tag);
        match tag {
            "env" => self.env_lookup(arg),
            "shell" => self.shell_capture(arg),
            "if" => self.conditional(arg, base_dir),
            "include" => self.include(arg, base_dir),
            "exists" => {
                let path = self.path_argument(tag, &arg, base_dir)?;
                Ok(Value::Bool(path.exists()))
            }
            "read" => {
                let path = self.path_argument(tag, &arg, base_dir)?;
                fs::read_to_string(&path).map(Value::String).map_err(|e| {
                    EngineError::Parse(format!("cannot read '{}': {}", path.display(), e))
                })
            }
            "json" => self.json(arg, base_dir),
            "eval" => self.eval(arg),
            other => Err(EngineError::directive(
                other,
                scalar_text(&arg).unwrap_or_default(),
                "unknown directive",
            )),
        }
    }

    fn env_lookup(&self, arg: Value) -> Result<Value> {
        let arg = self.resolved_argument("env", &arg)?;
        let (name, default) = match &arg {
            Value::Mapping(map) => (
                self.required_str("env", map, "name")?,
                self.optional_str(map, "default")?,
            ),
            _ => {
                let text = plain_scalar("env", &arg)?;
                match text.split_once('|') {
                    Some((name, default)) => (name.trim().to_string(), Some(default.to_string())),
                    None => (text.trim().to_string(), None),
                }
            }
        };

        let name = name.trim_start_matches('$');
        match (self.load_context.env(name), default) {
            (Some(value), _) => Ok(Value::String(value.to_string())),
            (None, Some(default)) => Ok(Value::String(default)),
            (None, None) => Err(EngineError::directive(
                "env",
                name,
                "variable is not set and no default is given",
            )),
        }
    }

    fn shell_capture(&self, arg: Value) -> Result<Value> {
        let arg = self.resolved_argument("shell", &arg)?;
        let (cmd, default) = match &arg {
            Value::Mapping(map) => {
                let cmd = match self.optional_str(map, "cmd")? {
                    Some(cmd) => cmd,
                    None => self.required_str("shell", map, "command")?,
                };
                (cmd, self.optional_str(map, "default")?)
            }
            _ => (plain_scalar("shell", &arg)?, None),
        };

        let output = Command::new(&self.settings.shell)
            .arg("-c")
            .arg(&cmd)
            .env_clear()
            .envs(self.load_context.environment())
            .stdin(Stdio::null())
            .output();

        let failure = match output {
            Ok(out) if out.status.success() => {
                let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
                debug!("!shell '{}' -> {} bytes", cmd, stdout.len());
                return Ok(Value::String(stdout));
            }
            Ok(out) => format!(
                "exited with {}: {}",
                out.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => format!("could not start {}: {}", self.settings.shell, e),
        };

        match default {
            Some(default) => {
                debug!("!shell '{}' failed ({}), using default", cmd, failure);
                Ok(Value::String(default))
            }
            None => Err(EngineError::directive("shell", cmd, failure)),
        }
    }

    fn conditional(&mut self, arg: Value, base_dir: &Path) -> Result<Value> {
        let Value::Mapping(mut map) = arg else {
            return Err(EngineError::directive(
                "if",
                scalar_text(&arg).unwrap_or_default(),
                "expected a mapping with condition/then/else",
            ));
        };

        let condition = map.remove("condition").unwrap_or(Value::Bool(false));
        let condition = self.expand(condition, base_dir)?;
        let chosen = if self.truthy(&condition)? { "then" } else { "else" };
        debug!("!if selected '{}' branch", chosen);

        match map.remove(chosen) {
            Some(branch) => self.expand(branch, base_dir),
            None => Ok(Value::Null),
        }
    }

    /// Load-time condition rules: bool, `a == b`, `a != b`, boolean words,
    /// otherwise a variable name that must be set and non-empty.
    fn truthy(&self, condition: &Value) -> Result<bool> {
        let text = match condition {
            Value::Bool(b) => return Ok(*b),
            Value::Null => return Ok(false),
            Value::Number(n) => return Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
            Value::String(s) => template::resolve_str(s, &self.load_context)
                .map_err(|e| EngineError::directive("if", s, e.to_string()))?,
            _ => return Ok(true),
        };

        if let Some((left, right)) = text.split_once("==") {
            return Ok(left.trim() == right.trim());
        }
        if let Some((left, right)) = text.split_once("!=") {
            return Ok(left.trim() != right.trim());
        }

        Ok(match text.trim() {
            "true" | "True" | "yes" | "1" => true,
            "false" | "False" | "no" | "0" | "" => false,
            name => self
                .load_context
                .env(name.trim_start_matches('$'))
                .map(|v| !v.is_empty())
                .unwrap_or(false),
        })
    }

    fn include(&mut self, arg: Value, base_dir: &Path) -> Result<Value> {
        let requested = self.scalar_argument("include", &arg)?;
        let path = resolve_path(base_dir, &requested);

        let canonical = path.canonicalize().map_err(|e| {
            EngineError::directive("include", &requested, format!("{}: {}", path.display(), e))
        })?;

        if self.include_stack.contains(&canonical) {
            let mut chain: Vec<String> = self
                .include_stack
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(canonical.display().to_string());
            return Err(EngineError::CircularInclude { chain });
        }

        let text = fs::read_to_string(&canonical).map_err(|e| {
            EngineError::directive("include", &requested, e.to_string())
        })?;
        let parsed: Value = serde_yaml::from_str(&text).map_err(|e| {
            EngineError::Parse(format!("{}: {}", canonical.display(), e))
        })?;

        let include_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.to_path_buf());

        self.include_stack.push(canonical);
        let expanded = self.expand(parsed, &include_dir);
        self.include_stack.pop();
        expanded
    }

    fn json(&self, arg: Value, base_dir: &Path) -> Result<Value> {
        let text = self.scalar_argument("json", &arg)?;
        let trimmed = text.trim_start();

        let source = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            text.clone()
        } else {
            let path = resolve_path(base_dir, &text);
            fs::read_to_string(&path)
                .map_err(|e| EngineError::directive("json", &text, e.to_string()))?
        };

        let json: serde_json::Value = serde_json::from_str(&source)
            .map_err(|e| EngineError::directive("json", &text, e.to_string()))?;
        serde_yaml::to_value(json).map_err(|e| EngineError::directive("json", &text, e.to_string()))
    }

    fn eval(&self, arg: Value) -> Result<Value> {
        let text = scalar_text(&arg).ok_or_else(|| {
            EngineError::directive("eval", format!("{:?}", arg), "expected an expression")
        })?;
        let scope = Scope {
            args: &self.arguments,
            env: self.load_context.environment(),
        };
        let value = expression::evaluate(&text, &scope)
            .map_err(|reason| EngineError::directive("eval", &text, reason))?;
        debug!("!eval '{}' -> {:?}", text, value);
        Ok(value)
    }

    fn path_argument(&self, directive: &str, arg: &Value, base_dir: &Path) -> Result<PathBuf> {
        let text = self.scalar_argument(directive, arg)?;
        Ok(resolve_path(base_dir, &text))
    }

    /// Scalar argument with `{{env.*}}` placeholders resolved.
    fn scalar_argument(&self, directive: &str, arg: &Value) -> Result<String> {
        plain_scalar(directive, &self.resolved_argument(directive, arg)?)
    }

    /// Resolves placeholders in every string of an argument. A placeholder
    /// that cannot be resolved fails the directive.
    fn resolved_argument(&self, directive: &str, arg: &Value) -> Result<Value> {
        template::resolve(arg, &self.load_context).map_err(|e| {
            let shown = scalar_text(arg).unwrap_or_else(|| format!("{:?}", arg));
            EngineError::directive(directive, shown, e.to_string())
        })
    }

    fn required_str(&self, directive: &str, map: &Mapping, key: &str) -> Result<String> {
        self.optional_str(map, key)?.ok_or_else(|| {
            EngineError::directive(directive, key, format!("missing '{}' key", key))
        })
    }

    fn optional_str(&self, map: &Mapping, key: &str) -> Result<Option<String>> {
        Ok(map.get(key).and_then(scalar_text))
    }
}

/// `!include` and `!if` results are spliced into an enclosing sequence.
fn is_splicing(tag: &str) -> bool {
    matches!(tag, "include" | "if")
}

fn tag_name(tag: &serde_yaml::value::Tag) -> String {
    tag.to_string().trim_start_matches('!').to_string()
}

fn plain_scalar(directive: &str, arg: &Value) -> Result<String> {
    scalar_text(arg).ok_or_else(|| {
        EngineError::directive(directive, format!("{:?}", arg), "expected a scalar argument")
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Absolute paths are kept; relative ones hang off the document directory.
fn resolve_path(base_dir: &Path, text: &str) -> PathBuf {
    let path = Path::new(text);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
