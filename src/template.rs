//! Template Substitution
//!
//! Resolves `{{path|default}}` placeholders against a [`Context`].
//!
//! - `flags.NAME` - flag parsed from the handler remainder
//! - `args.N` / `args[N]` - Nth positional (0-indexed)
//! - `args.all`, `args.rest`, `args.first`, `args.last`, `args.count`
//! - `env.NAME` - environment snapshot entry
//! - `captured.NAME` or bare `NAME` - value captured from an earlier step
//!
//! A placeholder without a default whose path is missing is an error, never
//! an empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::context::Context;
use crate::error::{EngineError, Result};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder regex is valid"));

static INDEX_ACCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("index regex is valid"));

/// Namespaces a placeholder path may start with.
pub const NAMESPACES: &[&str] = &["flags", "args", "env", "captured"];

/// One `{{...}}` occurrence, split into accessor path and optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub path: String,
    pub default: Option<String>,
}

impl Placeholder {
    /// Parses the text between the braces. The path is trimmed, the default
    /// is kept verbatim.
    pub fn parse(expr: &str) -> Self {
        let (path, default) = match expr.split_once('|') {
            Some((path, default)) => (path, Some(default.to_string())),
            None => (expr, None),
        };

        Self {
            path: INDEX_ACCESS.replace_all(path.trim(), ".$1").into_owned(),
            default,
        }
    }

    pub fn resolve(&self, ctx: &Context) -> Result<String> {
        match (lookup(ctx, &self.path), &self.default) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => Err(EngineError::UnresolvedVariable {
                path: self.path.clone(),
            }),
        }
    }
}

/// Returns true if the text contains at least one placeholder.
pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Lists the placeholders of a string, left to right.
pub fn placeholders(text: &str) -> Vec<Placeholder> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|cap| Placeholder::parse(&cap[1]))
        .collect()
}

/// Resolves every placeholder of a string.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use ry_engine::Context;
/// use ry_engine::template::resolve_str;
///
/// let ctx = Context::new(vec!["build".into(), "release".into()], 1, HashMap::new());
/// let text = resolve_str("cargo build --{{args.0}} {{flags.target|}}", &ctx).unwrap();
/// assert_eq!(text, "cargo build --release ");
/// ```
pub fn resolve_str(text: &str, ctx: &Context) -> Result<String> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for cap in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = cap.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&Placeholder::parse(&cap[1]).resolve(ctx)?);
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Resolves placeholders in every string of a nested value.
pub fn resolve(node: &Value, ctx: &Context) -> Result<Value> {
    map_strings(node, &mut |s| resolve_str(s, ctx))
}

/// Rebuilds a value with `f` applied to every string scalar.
///
/// Sequences and mapping values are visited in order; mapping keys, tags and
/// non-string scalars are kept as they are.
pub fn map_strings<F>(node: &Value, f: &mut F) -> Result<Value>
where
    F: FnMut(&str) -> Result<String>,
{
    Ok(match node {
        Value::String(s) => Value::String(f(s)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|item| map_strings(item, f))
                .collect::<Result<_>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), map_strings(value, f)?);
            }
            Value::Mapping(out)
        }
        Value::Tagged(tagged) => {
            let mut tagged = tagged.as_ref().clone();
            tagged.value = map_strings(&tagged.value, f)?;
            Value::Tagged(Box::new(tagged))
        }
        other => other.clone(),
    })
}

/// Looks a placeholder path up in the context.
fn lookup(ctx: &Context, path: &str) -> Option<String> {
    let Some((namespace, key)) = path.split_once('.') else {
        return ctx.captured(path).map(str::to_string);
    };

    match namespace {
        "flags" => ctx.flag(key).map(str::to_string),
        "env" => ctx.env(key).map(str::to_string),
        "captured" => ctx.captured(key).map(str::to_string),
        "args" => lookup_arg(ctx.positionals(), key),
        _ => None,
    }
}

fn lookup_arg(positionals: &[String], key: &str) -> Option<String> {
    match key {
        "all" => Some(positionals.join(" ")),
        "rest" => Some(positionals.get(1..).unwrap_or(&[]).join(" ")),
        "first" => Some(positionals.first().cloned().unwrap_or_default()),
        "last" => Some(positionals.last().cloned().unwrap_or_default()),
        "count" => Some(positionals.len().to_string()),
        index => index
            .parse::<usize>()
            .ok()
            .and_then(|i| positionals.get(i).cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx_with(positionals: &[&str]) -> Context {
        let raw = positionals.iter().map(|s| s.to_string()).collect();
        let mut env = HashMap::new();
        env.insert("USER".to_string(), "alice".to_string());
        Context::new(raw, 0, env)
    }

    #[test]
    fn test_literal_text_unchanged() {
        let ctx = ctx_with(&[]);
        let text = "echo plain { braces } here";
        assert_eq!(resolve_str(text, &ctx).unwrap(), text);
    }

    #[test]
    fn test_multiple_placeholders_concatenate() {
        let ctx = ctx_with(&["a", "b"]);
        let out = resolve_str("[{{args.0}}-{{args.1}}] by {{env.USER}}", &ctx).unwrap();
        assert_eq!(out, "[a-b] by alice");
    }

    #[test]
    fn test_empty_default_for_missing_positional() {
        let ctx = ctx_with(&["a"]);
        assert_eq!(resolve_str("{{args.1|}}", &ctx).unwrap(), "");
    }

    #[test]
    fn test_missing_env_without_default_fails() {
        let ctx = ctx_with(&[]);
        let err = resolve_str("{{env.MISSING}}", &ctx).unwrap_err();
        assert!(
            matches!(err, EngineError::UnresolvedVariable { ref path } if path == "env.MISSING")
        );
    }

    #[test]
    fn test_default_is_kept_verbatim() {
        let ctx = ctx_with(&[]);
        assert_eq!(resolve_str("{{ flags.msg | hello world}}", &ctx).unwrap(), " hello world");
    }

    #[test]
    fn test_default_never_raises() {
        let ctx = ctx_with(&[]);
        for path in ["flags.x", "args.9", "env.NOPE", "captured.Y", "bogus.ns", "BARE"] {
            let text = format!("{{{{{}|fallback}}}}", path);
            assert_eq!(resolve_str(&text, &ctx).unwrap(), "fallback");
        }
    }

    #[test]
    fn test_args_all_and_rest() {
        let ctx = ctx_with(&["one", "two", "three"]);
        assert_eq!(resolve_str("{{args.all}}", &ctx).unwrap(), "one two three");
        assert_eq!(resolve_str("{{args.rest}}", &ctx).unwrap(), "two three");
        assert_eq!(resolve_str("{{args.count}}", &ctx).unwrap(), "3");
        assert_eq!(resolve_str("{{args.last}}", &ctx).unwrap(), "three");
    }

    #[test]
    fn test_args_all_empty_when_no_positionals() {
        let ctx = ctx_with(&[]);
        assert_eq!(resolve_str("x{{args.all}}y{{args.rest}}z", &ctx).unwrap(), "xyz");
    }

    #[test]
    fn test_indexed_accessor() {
        let ctx = ctx_with(&["zero", "one"]);
        assert_eq!(resolve_str("{{args[1]}}", &ctx).unwrap(), "one");
    }

    #[test]
    fn test_captured_and_bare_names() {
        let mut ctx = ctx_with(&[]);
        ctx.capture("VERSION", "2.0.1");
        assert_eq!(resolve_str("v{{captured.VERSION}}", &ctx).unwrap(), "v2.0.1");
        assert_eq!(resolve_str("v{{VERSION}}", &ctx).unwrap(), "v2.0.1");
    }

    #[test]
    fn test_flags_lookup() {
        let raw = vec!["--bump=minor".to_string()];
        let ctx = Context::new(raw, 0, HashMap::new());
        assert_eq!(resolve_str("{{flags.bump}}", &ctx).unwrap(), "minor");
    }

    #[test]
    fn test_resolve_nested_structure() {
        let ctx = ctx_with(&["x"]);
        let node: Value = serde_yaml::from_str(
            r#"
outer:
  - "{{args.0}}"
  - 42
  - inner: "{{env.USER}}!"
flag: true
"#,
        )
        .unwrap();

        let resolved = resolve(&node, &ctx).unwrap();
        let expected: Value = serde_yaml::from_str(
            r#"
outer:
  - "x"
  - 42
  - inner: "alice!"
flag: true
"#,
        )
        .unwrap();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_resolve_propagates_failure_from_nested_value() {
        let ctx = ctx_with(&[]);
        let node: Value = serde_yaml::from_str("[ok, '{{env.NOPE}}']").unwrap();
        assert!(resolve(&node, &ctx).is_err());
    }

    #[test]
    fn test_placeholders_listing() {
        let found = placeholders("{{a.b}} and {{c|d}}");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].path, "a.b");
        assert_eq!(found[1].default.as_deref(), Some("d"));
        assert!(has_placeholders("x {{y}}"));
        assert!(!has_placeholders("x {y}"));
    }
}
