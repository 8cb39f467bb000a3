//! Step Canonicalization
//!
//! Turns a directive-free YAML value into a [`Definition`]. Every accepted
//! shorthand (bare strings, single-key step objects, nested lists) ends up
//! as one of the [`StepKind`] variants.

use serde_yaml::{Mapping, Value};

use super::model::{
    Condition, Definition, ForeachItems, Guard, Pattern, RelayTarget, Step, StepKind,
};
use crate::error::{EngineError, Result};

/// Top-level keys describing the document when their value is a scalar
/// (`env`: a mapping). With a step-list value they are ordinary patterns.
const METADATA_KEYS: &[&str] = &["name", "description", "version", "type", "target", "env"];

/// Keys holding the pattern mapping.
const COMMAND_KEYS: &[&str] = &["commands", "match"];

/// Pattern keys of the fallback handler.
const DEFAULT_KEYS: &[&str] = &["default", "*"];

/// Keys that identify a step kind.
const SHELL_KEYS: &[&str] = &["shell", "sh", "bash", "zsh"];
const PYTHON_KEYS: &[&str] = &["python", "py", "python3"];
const GROUP_KEYS: &[&str] = &["pipeline", "pipe", "parallel", "steps"];

/// Modifier keys valid on any step mapping.
const MODIFIER_KEYS: &[&str] = &[
    "name",
    "capture",
    "best_effort",
    "ignore_errors",
    "test",
    "fail",
];

/// Loop variable of a foreach step without `var`.
const DEFAULT_LOOP_VAR: &str = "item";

/// Builds the canonical definition of a whole document.
pub fn canonicalize(document: Value) -> Result<Definition> {
    let mut definition = Definition::new();

    match document {
        Value::Null => return Err(parse_error("document is empty")),
        Value::Sequence(_) | Value::String(_) => {
            definition.default = Some(handler_steps(document)?);
        }
        Value::Mapping(map) => {
            let mut body = Mapping::new();
            for (key, value) in map {
                match key.as_str() {
                    Some(k) if METADATA_KEYS.contains(&k) && is_metadata(k, &value)? => {
                        apply_metadata(&mut definition, k, value)?
                    }
                    _ => {
                        body.insert(key, value);
                    }
                }
            }

            if let Some(commands) = take_first(&mut body, COMMAND_KEYS) {
                if !body.is_empty() {
                    return Err(parse_error(format!(
                        "unexpected top-level keys next to 'commands': {}",
                        key_list(&body)
                    )));
                }
                match commands {
                    Value::Mapping(patterns) => add_patterns(&mut definition, patterns)?,
                    _ => return Err(parse_error("'commands' must be a mapping")),
                }
            } else if let Some(steps) = body.get("steps").filter(|_| body.len() == 1) {
                definition.default = Some(handler_steps(steps.clone())?);
            } else if looks_like_step(&body) {
                definition.default = Some(vec![parse_step(Value::Mapping(body))?]);
            } else {
                add_patterns(&mut definition, body)?;
            }
        }
        other => {
            return Err(parse_error(format!(
                "top level must be a mapping or a list, found {}",
                kind_name(&other)
            )))
        }
    }

    Ok(definition)
}

/// Decides whether a reserved top-level key carries metadata or a handler.
fn is_metadata(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Sequence(_) => Ok(false),
        Value::Mapping(map) if looks_like_step(map) => Ok(false),
        Value::Mapping(_) if key == "env" => Ok(true),
        Value::Mapping(_) | Value::Tagged(_) => Err(parse_error(format!(
            "top-level '{}' is neither metadata (a scalar) nor a handler (a step list)",
            key
        ))),
        _ => Ok(true),
    }
}

fn apply_metadata(definition: &mut Definition, key: &str, value: Value) -> Result<()> {
    match key {
        "name" => definition.name = Some(expect_string("name", &value)?),
        "target" => definition.target = Some(expect_string("target", &value)?),
        "env" => match value {
            Value::Mapping(vars) => {
                for (name, value) in vars {
                    let name = expect_string("env key", &name)?;
                    definition.env.push((name, scalar_string("env value", &value)?));
                }
            }
            Value::Null => {}
            _ => return Err(parse_error("'env' must be a mapping")),
        },
        // description, version and type are informational
        _ => {}
    }
    Ok(())
}

fn add_patterns(definition: &mut Definition, patterns: Mapping) -> Result<()> {
    for (key, value) in patterns {
        let text = scalar_string("pattern", &key)?;

        if DEFAULT_KEYS.contains(&text.as_str()) {
            if definition.default.is_some() {
                return Err(parse_error("default handler is defined twice"));
            }
            definition.default = Some(handler_steps(value)?);
            continue;
        }

        let pattern = Pattern::parse(&text)
            .ok_or_else(|| parse_error("pattern must contain at least one word"))?;
        let steps = handler_steps(value)?;
        definition.add_handler(pattern, steps).map_err(parse_error)?;
    }
    Ok(())
}

/// Steps of a handler or branch: a list, a single step, or nothing.
fn handler_steps(value: Value) -> Result<Vec<Step>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => step_list(items),
        single => Ok(vec![parse_step(single)?]),
    }
}

/// Parses a step list, flattening nested lists in place.
fn step_list(items: Vec<Value>) -> Result<Vec<Step>> {
    let mut steps = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Sequence(nested) => steps.extend(step_list(nested)?),
            Value::Null => {}
            other => steps.push(parse_step(other)?),
        }
    }
    Ok(steps)
}

/// Parses one step in any of its accepted shapes.
pub fn parse_step(value: Value) -> Result<Step> {
    match value {
        Value::String(script) => Ok(Step::shell(script)),
        Value::Mapping(map) => parse_step_mapping(map),
        other => Err(parse_error(format!(
            "a step must be a string or a mapping, found {}",
            kind_name(&other)
        ))),
    }
}

fn parse_step_mapping(mut map: Mapping) -> Result<Step> {
    let name = take_string(&mut map, "name")?;
    let capture = take_string(&mut map, "capture")?;
    let best_effort = take_bool(&mut map, "best_effort")?;
    let ignore_errors = take_bool(&mut map, "ignore_errors")?;
    let guard = match (map.remove("test"), take_string(&mut map, "fail")?) {
        (Some(test), fail) => Some(Guard {
            test: condition(test)?,
            fail,
        }),
        (None, Some(_)) => return Err(parse_error("'fail' needs a 'test'")),
        (None, None) => None,
    };

    let kind_keys: Vec<String> = map
        .keys()
        .filter_map(Value::as_str)
        .filter(|k| is_kind_key(k))
        .map(str::to_string)
        .collect();

    let kind_key = match kind_keys.as_slice() {
        [one] => one.clone(),
        [] => {
            return Err(parse_error(format!(
                "step has no recognised kind (keys: {})",
                key_list(&map)
            )))
        }
        many => {
            return Err(parse_error(format!(
                "step mixes several kinds: {}",
                many.join(", ")
            )))
        }
    };

    let body = map.remove(kind_key.as_str()).unwrap_or(Value::Null);
    let kind = match kind_key.as_str() {
        k if SHELL_KEYS.contains(&k) => shell_kind(k, body)?,
        k if PYTHON_KEYS.contains(&k) => {
            let interpreter = take_string(&mut map, "interpreter")?;
            let imports = take_string_list(&mut map, "imports")?;
            python_kind(body, interpreter, imports)?
        }
        "script" => {
            let interpreter = take_string(&mut map, "interpreter")?.ok_or_else(|| {
                parse_error("a 'script' step needs an 'interpreter'")
            })?;
            StepKind::Embedded {
                language: interpreter,
                script: expect_string("script", &body)?,
                interpreter: None,
                imports: Vec::new(),
            }
        }
        "relay" => relay_kind(body)?,
        "foreach" => {
            let items = map.remove("items").unwrap_or(body);
            let var = take_string(&mut map, "var")?.unwrap_or_else(|| DEFAULT_LOOP_VAR.to_string());
            let steps = handler_steps(map.remove("do").unwrap_or(Value::Null))?;
            StepKind::Foreach {
                items: foreach_items(items)?,
                var,
                steps,
            }
        }
        "if" => {
            let then = map
                .remove("then")
                .ok_or_else(|| parse_error("'if' step needs a 'then' branch"))?;
            let otherwise = map.remove("else").unwrap_or(Value::Null);
            StepKind::Conditional {
                condition: condition(body)?,
                then: handler_steps(then)?,
                otherwise: handler_steps(otherwise)?,
            }
        }
        group => {
            let Value::Sequence(items) = body else {
                return Err(parse_error(format!("'{}' must be a list of steps", group)));
            };
            let steps = step_list(items)?;
            match group {
                "pipeline" | "pipe" => StepKind::Pipeline { steps },
                "parallel" => StepKind::Parallel { steps },
                _ => StepKind::Sequence { steps },
            }
        }
    };

    if !map.is_empty() {
        return Err(parse_error(format!(
            "unknown keys on '{}' step: {}",
            kind_key,
            key_list(&map)
        )));
    }

    Ok(Step {
        kind,
        name,
        capture,
        best_effort: best_effort || ignore_errors,
        guard,
    })
}

fn shell_kind(key: &str, body: Value) -> Result<StepKind> {
    let implied_shell = match key {
        "bash" | "zsh" => Some(key.to_string()),
        _ => None,
    };

    match body {
        Value::Mapping(mut inner) => {
            let script = take_string(&mut inner, "script")?
                .ok_or_else(|| parse_error(format!("'{}' mapping needs a 'script'", key)))?;
            let shell = match take_string(&mut inner, "interpreter")? {
                Some(shell) => Some(shell),
                None => take_string(&mut inner, "shell")?.or(implied_shell),
            };
            reject_leftovers(key, &inner)?;
            Ok(StepKind::Shell { script, shell })
        }
        other => Ok(StepKind::Shell {
            script: expect_string(key, &other)?,
            shell: implied_shell,
        }),
    }
}

fn python_kind(
    body: Value,
    interpreter: Option<String>,
    imports: Vec<String>,
) -> Result<StepKind> {
    match body {
        Value::Mapping(mut inner) => {
            let script = take_string(&mut inner, "script")?
                .ok_or_else(|| parse_error("'python' mapping needs a 'script'"))?;
            let interpreter = take_string(&mut inner, "interpreter")?.or(interpreter);
            let mut all_imports = imports;
            all_imports.extend(take_string_list(&mut inner, "imports")?);
            reject_leftovers("python", &inner)?;
            Ok(StepKind::Embedded {
                language: "python".to_string(),
                script,
                interpreter,
                imports: all_imports,
            })
        }
        other => Ok(StepKind::Embedded {
            language: "python".to_string(),
            script: expect_string("python", &other)?,
            interpreter,
            imports,
        }),
    }
}

fn relay_kind(body: Value) -> Result<StepKind> {
    let target = match body {
        Value::String(s) if s.trim() == "native" => RelayTarget::Native,
        Value::String(s) if !s.trim().is_empty() => RelayTarget::Command(s),
        Value::Mapping(mut inner) => {
            let command = take_string(&mut inner, "command")?
                .ok_or_else(|| parse_error("relay mapping needs a 'command'"))?;
            reject_leftovers("relay", &inner)?;
            RelayTarget::Command(command)
        }
        _ => return Err(parse_error("relay must be 'native' or a command")),
    };
    Ok(StepKind::Relay { target })
}

/// A list of items, or one string split when the step runs. `foreach: true`
/// with a separate `items` key is accepted too.
fn foreach_items(value: Value) -> Result<ForeachItems> {
    match value {
        Value::Null | Value::Bool(true) => Ok(ForeachItems::List(Vec::new())),
        Value::Sequence(items) => Ok(ForeachItems::List(
            items
                .iter()
                .map(|v| scalar_string("foreach item", v))
                .collect::<Result<_>>()?,
        )),
        Value::String(s) => Ok(ForeachItems::Expression(s)),
        other => Err(parse_error(format!(
            "foreach items must be a list or a string, found {}",
            kind_name(&other)
        ))),
    }
}

fn condition(value: Value) -> Result<Condition> {
    match value {
        Value::Bool(b) => Ok(Condition::Literal(b)),
        Value::String(s) => Ok(Condition::Expression(s)),
        Value::Number(n) => Ok(Condition::Expression(n.to_string())),
        other => Err(parse_error(format!(
            "condition must be a bool or a string, found {}",
            kind_name(&other)
        ))),
    }
}

/// A top-level mapping is a single step when it carries a step-kind key.
fn looks_like_step(map: &Mapping) -> bool {
    map.keys().filter_map(Value::as_str).any(is_kind_key)
        && map
            .keys()
            .filter_map(Value::as_str)
            .all(|k| is_kind_key(k) || MODIFIER_KEYS.contains(&k) || is_step_extra(k))
}

fn is_kind_key(key: &str) -> bool {
    SHELL_KEYS.contains(&key)
        || PYTHON_KEYS.contains(&key)
        || GROUP_KEYS.contains(&key)
        || matches!(key, "script" | "relay" | "if" | "foreach")
}

fn is_step_extra(key: &str) -> bool {
    matches!(
        key,
        "then" | "else" | "interpreter" | "imports" | "items" | "var" | "do"
    )
}

fn take_first(map: &mut Mapping, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|k| map.remove(*k))
}

fn take_string(map: &mut Mapping, key: &str) -> Result<Option<String>> {
    map.remove(key)
        .map(|v| scalar_string(key, &v))
        .transpose()
}

fn take_bool(map: &mut Mapping, key: &str) -> Result<bool> {
    match map.remove(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(other) => Err(parse_error(format!(
            "'{}' must be true or false, found {}",
            key,
            kind_name(&other)
        ))),
    }
}

fn take_string_list(map: &mut Mapping, key: &str) -> Result<Vec<String>> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items.iter().map(|v| scalar_string(key, v)).collect(),
        Some(single) => Ok(vec![scalar_string(key, &single)?]),
    }
}

fn reject_leftovers(context: &str, map: &Mapping) -> Result<()> {
    if map.is_empty() {
        Ok(())
    } else {
        Err(parse_error(format!(
            "unknown keys in '{}': {}",
            context,
            key_list(map)
        )))
    }
}

fn expect_string(what: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(parse_error(format!(
            "'{}' must be a string, found {}",
            what,
            kind_name(other)
        ))),
    }
}

/// Strings, numbers and bools all read as text.
fn scalar_string(what: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(parse_error(format!(
            "'{}' must be a scalar, found {}",
            what,
            kind_name(other)
        ))),
    }
}

fn key_list(map: &Mapping) -> String {
    map.keys()
        .map(|k| match k {
            Value::String(s) => s.clone(),
            other => format!("{:?}", other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn parse_error(message: impl Into<String>) -> EngineError {
    EngineError::Parse(message.into())
}
