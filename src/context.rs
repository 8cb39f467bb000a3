//! Invocation Context
//!
//! Holds everything a single invocation knows about itself: the raw
//! argument vector, the flags and positionals parsed from the handler's
//! remainder, an environment snapshot, and values captured from step output.
//!
//! Only `captured` changes after construction.

use std::collections::{BTreeMap, HashMap};

use log::debug;

/// State threaded through every step of one invocation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    flags: BTreeMap<String, String>,
    positionals: Vec<String>,
    raw_arguments: Vec<String>,
    environment: HashMap<String, String>,
    captured: HashMap<String, String>,
}

impl Context {
    /// Builds a context for a handler that consumed the first `consumed`
    /// raw arguments as its pattern words.
    ///
    /// # Example
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use ry_engine::Context;
    ///
    /// let raw = vec!["version".to_string(), "--dry".to_string(), "minor".to_string()];
    /// let ctx = Context::new(raw, 1, HashMap::new());
    /// assert_eq!(ctx.flag("dry"), Some("true"));
    /// assert_eq!(ctx.positionals(), ["minor"]);
    /// ```
    pub fn new(
        raw_arguments: Vec<String>,
        consumed: usize,
        environment: HashMap<String, String>,
    ) -> Self {
        let remainder = raw_arguments.get(consumed..).unwrap_or(&[]);
        let (flags, positionals) = parse_remainder(remainder);

        debug!(
            "Context: {} flags, {} positionals, {} raw arguments",
            flags.len(),
            positionals.len(),
            raw_arguments.len()
        );

        Self {
            flags,
            positionals,
            raw_arguments,
            environment,
            captured: HashMap::new(),
        }
    }

    /// Context with only an environment, used while loading documents.
    pub fn from_environment(environment: HashMap<String, String>) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    /// Snapshot of the current process environment.
    pub fn process_environment() -> HashMap<String, String> {
        std::env::vars().collect()
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    pub fn flags(&self) -> &BTreeMap<String, String> {
        &self.flags
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }

    /// Original argument tokens, exactly as the user typed them.
    pub fn raw_arguments(&self) -> &[String] {
        &self.raw_arguments
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn captured(&self, name: &str) -> Option<&str> {
        self.captured.get(name).map(String::as_str)
    }

    pub fn captures(&self) -> &HashMap<String, String> {
        &self.captured
    }

    /// Records a step's output. Later steps see the new value.
    pub fn capture(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        debug!("Captured {} ({} bytes)", name, value.len());
        self.captured.insert(name, value);
    }

    /// Adds an engine-provided variable (library dir, document `env:` entries)
    /// before execution starts.
    pub fn inject_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(name.into(), value.into());
    }

    /// Environment handed to spawned processes: the snapshot plus every
    /// captured variable.
    pub fn process_env(&self) -> HashMap<String, String> {
        let mut env = self.environment.clone();
        env.extend(self.captured.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Splits the handler remainder into flags and positionals.
fn parse_remainder(tokens: &[String]) -> (BTreeMap<String, String>, Vec<String>) {
    let mut flags = BTreeMap::new();
    let mut positionals = Vec::new();
    let mut options_done = false;

    for token in tokens {
        if options_done {
            positionals.push(token.clone());
            continue;
        }

        if token == "--" {
            options_done = true;
        } else if let Some(long) = token.strip_prefix("--") {
            match long.split_once('=') {
                Some((name, value)) => flags.insert(name.to_string(), value.to_string()),
                None => flags.insert(long.to_string(), "true".to_string()),
            };
        } else if token.len() > 1 && token.starts_with('-') && !looks_numeric(token) {
            flags.insert(token[1..].to_string(), "true".to_string());
        } else {
            positionals.push(token.clone());
        }
    }

    (flags, positionals)
}

/// `-5`, `-0.25` and friends are values, not options.
fn looks_numeric(token: &str) -> bool {
    let rest = &token[1..];
    rest.starts_with(|c: char| c.is_ascii_digit() || c == '.') && rest.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_remainder_skips_consumed_words() {
        let ctx = Context::new(args(&["deploy", "prod", "eu"]), 1, HashMap::new());
        assert_eq!(ctx.positionals(), ["prod", "eu"]);
        assert_eq!(ctx.raw_arguments().len(), 3);
    }

    #[test]
    fn test_long_flags_with_and_without_value() {
        let ctx = Context::new(args(&["--force", "--level=3", "x"]), 0, HashMap::new());
        assert_eq!(ctx.flag("force"), Some("true"));
        assert_eq!(ctx.flag("level"), Some("3"));
        assert_eq!(ctx.positionals(), ["x"]);
    }

    #[test]
    fn test_short_flag() {
        let ctx = Context::new(args(&["-v", "file"]), 0, HashMap::new());
        assert_eq!(ctx.flag("v"), Some("true"));
        assert_eq!(ctx.positionals(), ["file"]);
    }

    #[test]
    fn test_negative_number_is_positional() {
        let ctx = Context::new(args(&["offset", "-5", "-0.5"]), 1, HashMap::new());
        assert!(ctx.flags().is_empty());
        assert_eq!(ctx.positionals(), ["-5", "-0.5"]);
    }

    #[test]
    fn test_double_dash_ends_options() {
        let ctx = Context::new(args(&["--a", "--", "--b", "-c"]), 0, HashMap::new());
        assert_eq!(ctx.flag("a"), Some("true"));
        assert_eq!(ctx.flag("b"), None);
        assert_eq!(ctx.positionals(), ["--b", "-c"]);
    }

    #[test]
    fn test_consumed_beyond_length() {
        let ctx = Context::new(args(&["a"]), 5, HashMap::new());
        assert!(ctx.positionals().is_empty());
    }

    #[test]
    fn test_capture_visible_and_exported() {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/u".to_string());
        let mut ctx = Context::new(Vec::new(), 0, env);

        ctx.capture("VERSION", "1.2.3");

        assert_eq!(ctx.captured("VERSION"), Some("1.2.3"));
        let process_env = ctx.process_env();
        assert_eq!(process_env.get("VERSION").map(String::as_str), Some("1.2.3"));
        assert_eq!(process_env.get("HOME").map(String::as_str), Some("/home/u"));
    }

    #[test]
    fn test_inject_env() {
        let mut ctx = Context::from_environment(HashMap::new());
        ctx.inject_env("RY_LIBRARY_DIR", "/libs/git");
        assert_eq!(ctx.env("RY_LIBRARY_DIR"), Some("/libs/git"));
    }
}
