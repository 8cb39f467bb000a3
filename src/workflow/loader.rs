//! Workflow Loader
//!
//! Reads a workflow document, evaluates its load-time directives, and turns
//! the result into a validated [`Definition`].
//!
//! Loaded definitions are cached for the lifetime of the process, keyed by
//! canonical path and a fingerprint of what directives can observe (the
//! environment snapshot and the invocation arguments). A document reached
//! through several symlinks or relative spellings is only parsed once per
//! snapshot; a different snapshot loads it again.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use once_cell::sync::Lazy;
use serde_yaml::Value;

use super::directives::DirectiveResolver;
use super::model::Definition;
use super::normalize::canonicalize;
use super::validator::validate_definition;
use crate::context::Context;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    fingerprint: u64,
}

static DEFINITION_CACHE: Lazy<Mutex<HashMap<CacheKey, Arc<Definition>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Loads documents against a fixed environment snapshot.
#[derive(Debug, Clone)]
pub struct Loader {
    environment: HashMap<String, String>,
    arguments: Vec<String>,
}

impl Loader {
    /// `environment` is what `!env`, `!if`, `!shell` and `!eval` see.
    pub fn new(environment: HashMap<String, String>) -> Self {
        Self {
            environment,
            arguments: Vec::new(),
        }
    }

    /// Makes the invocation arguments visible to `!eval` as `args`.
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Hash of everything directives can observe besides the file itself.
    fn fingerprint(&self) -> u64 {
        let mut entries: Vec<_> = self.environment.iter().collect();
        entries.sort();

        let mut hasher = DefaultHasher::new();
        entries.hash(&mut hasher);
        self.arguments.hash(&mut hasher);
        hasher.finish()
    }

    /// Loads a document from disk, reusing an earlier load of the same file.
    pub fn load_path(&self, path: &Path) -> Result<Arc<Definition>> {
        let canonical = path.canonicalize().map_err(|e| {
            EngineError::io(format!("cannot open workflow '{}'", path.display()), e)
        })?;

        let key = CacheKey {
            path: canonical,
            fingerprint: self.fingerprint(),
        };

        if let Some(cached) = cache().get(&key) {
            debug!("Definition cache hit: {}", key.path.display());
            return Ok(Arc::clone(cached));
        }

        let definition = Arc::new(self.load_uncached(&key.path)?);
        cache().insert(key, Arc::clone(&definition));
        Ok(definition)
    }

    /// Loads a document from disk without touching the cache.
    pub fn load_uncached(&self, path: &Path) -> Result<Definition> {
        info!("Loading workflow from: {}", path.display());

        let canonical = path.canonicalize().map_err(|e| {
            EngineError::io(format!("cannot open workflow '{}'", path.display()), e)
        })?;
        let text = fs::read_to_string(&canonical).map_err(|e| {
            EngineError::io(format!("cannot read workflow '{}'", path.display()), e)
        })?;
        debug!("YAML content loaded ({} bytes)", text.len());

        let base_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut resolver = self.resolver();
        resolver.enter_document(&canonical);

        let mut definition = self.build(&text, &base_dir, &mut resolver).map_err(|e| match e {
            EngineError::Parse(msg) => {
                EngineError::Parse(format!("{}: {}", canonical.display(), msg))
            }
            other => other,
        })?;
        definition.source = Some(canonical);

        info!(
            "Loaded {} handlers{}",
            definition.len(),
            if definition.default.is_some() {
                " plus default"
            } else {
                ""
            }
        );
        Ok(definition)
    }

    /// Loads a document held in memory. Relative directive paths resolve
    /// against `base_dir`.
    pub fn load_str(&self, text: &str, base_dir: &Path) -> Result<Definition> {
        let mut resolver = self.resolver();
        self.build(text, base_dir, &mut resolver)
    }

    fn resolver(&self) -> DirectiveResolver {
        DirectiveResolver::new(self.environment.clone()).with_arguments(self.arguments.clone())
    }

    fn build(
        &self,
        text: &str,
        base_dir: &Path,
        resolver: &mut DirectiveResolver,
    ) -> Result<Definition> {
        let raw: Value =
            serde_yaml::from_str(text).map_err(|e| EngineError::Parse(e.to_string()))?;
        let expanded = resolver.expand(raw, base_dir)?;
        let definition = canonicalize(expanded)?;
        validate_definition(&definition)?;
        Ok(definition)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Context::process_environment())
    }
}

/// Loads a workflow with the current process environment.
///
/// # Example
///
/// ```rust,no_run
/// use ry_engine::workflow::load_workflow;
///
/// fn main() -> Result<(), ry_engine::EngineError> {
///     let definition = load_workflow("git.yaml")?;
///     println!("Loaded {} handlers", definition.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Arc<Definition>> {
    Loader::default().load_path(path.as_ref())
}

/// Forgets every cached definition.
pub fn clear_cache() {
    cache().clear();
}

/// Canonical form of a definition as YAML, as shown by `--dump`.
pub fn dump_definition(definition: &Definition) -> Result<String> {
    serde_yaml::to_string(definition).map_err(|e| EngineError::Parse(e.to_string()))
}

fn cache() -> std::sync::MutexGuard<'static, HashMap<CacheKey, Arc<Definition>>> {
    DEFINITION_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::matcher::match_handler;
    use crate::workflow::model::{Step, StepKind};
    use std::fs;
    use tempfile::tempdir;

    fn loader() -> Loader {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env.insert("STAGE".to_string(), "prod".to_string());
        Loader::new(env)
    }

    #[test]
    fn test_load_with_include_and_env() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("common.yaml"), "- echo common\n").unwrap();
        fs::write(
            dir.path().join("main.yaml"),
            r#"
target: !env GIT_BIN|/usr/bin/git
deploy:
  - !include common.yaml
  - echo "to {{args.0}}"
default:
  - relay: native
"#,
        )
        .unwrap();

        let def = loader().load_uncached(&dir.path().join("main.yaml")).unwrap();
        assert_eq!(def.target.as_deref(), Some("/usr/bin/git"));
        assert_eq!(
            def.handler("deploy").unwrap().steps,
            vec![Step::shell("echo common"), Step::shell("echo \"to {{args.0}}\"")]
        );
        assert!(def.source.is_some());
    }

    #[test]
    fn test_cache_returns_same_definition() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached.yaml");
        fs::write(&path, "- echo one\n").unwrap();

        let loader = loader();
        let first = loader.load_path(&path).unwrap();
        fs::write(&path, "- echo two\n").unwrap();
        let second = loader.load_path(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let fresh = loader.load_uncached(&path).unwrap();
        assert_eq!(fresh.default, Some(vec![Step::shell("echo two")]));
    }

    #[test]
    fn test_cache_separates_environment_snapshots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("staged.yaml");
        fs::write(&path, "target: !env GIT_BIN|/usr/bin/git\nstatus: echo s\n").unwrap();

        let plain = loader();
        let mut custom_env = HashMap::new();
        custom_env.insert("GIT_BIN".to_string(), "/opt/git/bin/git".to_string());
        let custom = Loader::new(custom_env);

        let first = plain.load_path(&path).unwrap();
        let second = custom.load_path(&path).unwrap();
        assert_eq!(first.target.as_deref(), Some("/usr/bin/git"));
        assert_eq!(second.target.as_deref(), Some("/opt/git/bin/git"));

        assert!(Arc::ptr_eq(&first, &plain.load_path(&path).unwrap()));
    }

    #[test]
    fn test_cache_separates_arguments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("args.yaml");
        fs::write(&path, "name: !eval str(len(args))\nstatus: echo s\n").unwrap();

        let none = loader().load_path(&path).unwrap();
        let two = loader()
            .with_arguments(vec!["a".into(), "b".into()])
            .load_path(&path)
            .unwrap();
        assert_eq!(none.name.as_deref(), Some("0"));
        assert_eq!(two.name.as_deref(), Some("2"));
    }

    #[test]
    fn test_reserved_word_patterns_match() {
        let def = loader()
            .load_str(
                "'version --bump': [echo bump]\nversion: [echo plain]\ndefault: [echo dflt]\n",
                Path::new("."),
            )
            .unwrap();

        let plain = match_handler(&def, &["version".to_string()]).unwrap();
        assert_eq!(plain.label(), "version");

        let raw: Vec<String> = ["version", "--bump", "minor"].iter().map(|s| s.to_string()).collect();
        let bump = match_handler(&def, &raw).unwrap();
        assert_eq!(bump.label(), "version --bump");
        assert_eq!(bump.consumed, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = loader().load_path(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "a: [unclosed\n").unwrap();
        let err = loader().load_uncached(&path).unwrap_err();
        assert!(matches!(err, EngineError::Parse(ref msg) if msg.contains("bad.yaml")));
    }

    #[test]
    fn test_empty_document_is_parse_error() {
        let err = loader().load_str("", Path::new(".")).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_load_str_with_conditional_directive() {
        let def = loader()
            .load_str(
                r#"
- !if
  condition: "{{env.STAGE}} == prod"
  then: [echo careful]
  else: [echo relaxed]
"#,
                Path::new("."),
            )
            .unwrap();
        assert_eq!(def.default, Some(vec![Step::shell("echo careful")]));
    }

    #[test]
    fn test_validation_runs_after_load() {
        let err = loader()
            .load_str("- pipeline:\n    - steps: [echo a]\n", Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("not a single command"));
    }

    #[test]
    fn test_dump_definition() {
        let def = loader()
            .load_str("status:\n  shell: git status\n  capture: S\n", Path::new("."))
            .unwrap();
        assert!(matches!(
            def.handler("status").unwrap().steps[0].kind,
            StepKind::Shell { .. }
        ));
        let yaml = dump_definition(&def).unwrap();
        assert!(yaml.contains("pattern: status"));
        assert!(yaml.contains("capture: S"));
    }
}
