//! Build configuration (kiln.toml)
//!
//! Precedence, lowest first: built-in defaults, `kiln.toml`, `KILN_*`
//! environment variables, then whatever the caller sets through the `with_*`
//! methods. Relative paths are resolved against the directory holding the
//! configuration file.

use crate::error::{BuildResult, ConfigError};
use crate::pubapi::{CompatibilityPolicy, MemberSuperset, StrictEquality};
use crate::scan::{build_globset, ScanRequest, MODULE_MARKER};
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file
pub const CONFIG_FILE: &str = "kiln.toml";

/// Name of the ledger file inside the state directory
pub const LEDGER_FILE: &str = "kiln.state";

/// How public-API changes are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompatibilityMode {
    /// Any change to a public API recompiles dependents
    #[default]
    Strict,
    /// Only removals recompile dependents
    MemberSuperset,
}

impl CompatibilityMode {
    pub fn policy(self) -> Box<dyn CompatibilityPolicy> {
        match self {
            Self::Strict => Box::new(StrictEquality),
            Self::MemberSuperset => Box::new(MemberSuperset),
        }
    }
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct BuildSettings {
    /// Directories the compiler writes artifacts into
    pub output_roots: Vec<PathBuf>,
    /// Directory holding the ledger
    pub state_dir: PathBuf,
    /// Compilers to run at once (0 = number of cores)
    pub parallelism: usize,
    /// Arguments passed through to every compiler invocation
    pub compiler_args: Vec<String>,
    /// Explicit configuration fingerprint; computed when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Leave files under the output roots alone even if no package produced them
    pub permit_unidentified_artifacts: bool,
    /// Glob patterns (relative to an output root) of files that may exist
    /// without being produced by the build
    pub permitted_artifacts: Vec<String>,
    pub compatibility: CompatibilityMode,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            output_roots: vec![PathBuf::from("out")],
            state_dir: PathBuf::from(".kiln"),
            parallelism: 0,
            compiler_args: Vec::new(),
            fingerprint: None,
            permit_unidentified_artifacts: false,
            permitted_artifacts: Vec::new(),
            compatibility: CompatibilityMode::Strict,
        }
    }
}

/// `[sources]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SourceSettings {
    pub roots: Vec<PathBuf>,
    pub generated: Vec<PathBuf>,
    pub link_only: Vec<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub suffixes: Vec<String>,
    pub module_marker: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("src")],
            generated: Vec::new(),
            link_only: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            suffixes: Vec::new(),
            module_marker: MODULE_MARKER.to_string(),
        }
    }
}

/// Complete build configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub sources: SourceSettings,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration text; `file` is only used in error messages
    pub fn from_toml_str(text: &str, file: &Path) -> BuildResult<Self> {
        let config: Self = toml::from_str(text).map_err(|error| ConfigError::TomlParseError {
            file: file.to_path_buf(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. Relative paths in it are taken relative to
    /// its directory.
    pub fn load_from_file(path: &Path) -> BuildResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        let text = fs::read_to_string(path).map_err(ConfigError::from)?;
        let mut config = Self::from_toml_str(&text, path)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Find `kiln.toml` in `start_dir` or the nearest ancestor, apply
    /// environment overrides. Falls back to defaults rooted at `start_dir`.
    pub fn load_from_directory(start_dir: &Path) -> BuildResult<Self> {
        let mut current = start_dir.to_path_buf();
        let mut config = loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.is_file() {
                break Self::load_from_file(&candidate)?;
            }
            if !current.pop() {
                break Self::new().with_base_dir(start_dir);
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `KILN_PARALLELISM` and `KILN_STATE_DIR`
    pub fn apply_env_overrides(&mut self) -> BuildResult<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> BuildResult<()> {
        if let Some(value) = lookup("KILN_PARALLELISM") {
            self.build.parallelism = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "KILN_PARALLELISM".to_string(),
                reason: format!("'{}' is not a non-negative integer", value),
            })?;
        }
        if let Some(value) = lookup("KILN_STATE_DIR") {
            self.build.state_dir = PathBuf::from(value);
        }
        self.validate()
    }

    pub fn validate(&self) -> BuildResult<()> {
        if self.build.output_roots.is_empty() {
            return Err(invalid("build.output_roots", "at least one output root is required"));
        }
        if self.build.fingerprint.as_deref().is_some_and(|f| f.trim().is_empty() || f.contains(char::is_whitespace)) {
            return Err(invalid("build.fingerprint", "must be a single non-empty token"));
        }
        if self.sources.module_marker.trim().is_empty() {
            return Err(invalid("sources.module_marker", "must not be empty"));
        }
        for suffix in &self.sources.suffixes {
            if !suffix.starts_with('.') {
                return Err(invalid("sources.suffixes", format!("'{}' must start with '.'", suffix)));
            }
        }
        build_globset(&self.build.permitted_artifacts)?;
        build_globset(&self.sources.include)?;
        build_globset(&self.sources.exclude)?;
        Ok(())
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.build.output_roots = vec![root.into()];
        self
    }

    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sources.roots = vec![root.into()];
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build.state_dir = dir.into();
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.build.parallelism = parallelism;
        self
    }

    pub fn with_compiler_args(mut self, args: Vec<String>) -> Self {
        self.build.compiler_args = args;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.build.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.sources.suffixes = suffixes;
        self
    }

    pub fn with_permit_unidentified_artifacts(mut self, permit: bool) -> Self {
        self.build.permit_unidentified_artifacts = permit;
        self
    }

    pub fn with_compatibility(mut self, mode: CompatibilityMode) -> Self {
        self.build.compatibility = mode;
        self
    }

    /// Resolve a configured path against the base directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn output_roots(&self) -> Vec<PathBuf> {
        self.build.output_roots.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.build.state_dir).join(LEDGER_FILE)
    }

    /// Effective number of concurrent compilers
    pub fn parallelism(&self) -> usize {
        match self.build.parallelism {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    pub fn scan_request(&self) -> ScanRequest {
        let resolve_all = |paths: &[PathBuf]| paths.iter().map(|p| self.resolve(p)).collect();
        ScanRequest {
            roots: resolve_all(&self.sources.roots),
            include: self.sources.include.clone(),
            exclude: self.sources.exclude.clone(),
            suffixes: self.sources.suffixes.clone(),
            generated: resolve_all(&self.sources.generated),
            link_only: resolve_all(&self.sources.link_only),
            module_marker: self.sources.module_marker.clone(),
        }
    }

    /// Identity of everything that affects what the compiler produces. A
    /// ledger written under a different fingerprint is not trusted.
    pub fn fingerprint(&self) -> String {
        if let Some(explicit) = &self.build.fingerprint {
            return explicit.clone();
        }

        let mut hasher = Sha256::new();
        let mut field = |name: &str, values: &mut dyn Iterator<Item = String>| {
            hasher.update(name.as_bytes());
            for value in values {
                hasher.update([0u8]);
                hasher.update(value.as_bytes());
            }
            hasher.update([0xffu8]);
        };
        field("args", &mut self.build.compiler_args.iter().cloned());
        field("out", &mut self.build.output_roots.iter().map(|p| p.display().to_string()));
        field("roots", &mut self.sources.roots.iter().map(|p| p.display().to_string()));
        field("generated", &mut self.sources.generated.iter().map(|p| p.display().to_string()));
        field("link", &mut self.sources.link_only.iter().map(|p| p.display().to_string()));
        field("include", &mut self.sources.include.iter().cloned());
        field("exclude", &mut self.sources.exclude.iter().cloned());
        field("suffixes", &mut self.sources.suffixes.iter().cloned());
        format!("{:x}", hasher.finalize())
    }

    /// Files under the output roots that may exist without an owner
    pub fn artifact_allow_list(&self) -> BuildResult<ArtifactAllowList> {
        Ok(ArtifactAllowList {
            roots: self.output_roots(),
            patterns: build_globset(&self.build.permitted_artifacts)?,
            paths: BTreeSet::from([self.ledger_path()]),
            permit_all: self.build.permit_unidentified_artifacts,
        })
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> crate::error::BuildError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Decides which unidentified files are left alone
#[derive(Debug, Clone, Default)]
pub struct ArtifactAllowList {
    roots: Vec<PathBuf>,
    patterns: Option<GlobSet>,
    paths: BTreeSet<PathBuf>,
    permit_all: bool,
}

impl ArtifactAllowList {
    pub fn permits_all(&self) -> bool {
        self.permit_all
    }

    pub fn permits(&self, path: &Path) -> bool {
        if self.permit_all || self.paths.contains(path) {
            return true;
        }
        let Some(patterns) = &self.patterns else {
            return false;
        };
        self.roots
            .iter()
            .filter_map(|root| path.strip_prefix(root).ok())
            .any(|relative| patterns.is_match(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::new();
        assert_eq!(config.build.output_roots, vec![PathBuf::from("out")]);
        assert_eq!(config.sources.module_marker, "kiln-module");
        assert_eq!(config.build.compatibility, CompatibilityMode::Strict);
        assert!(config.parallelism() >= 1);
    }

    #[test]
    fn test_parse_sections() {
        let text = r#"
[build]
output_roots = ["bin"]
parallelism = 3
compiler_args = ["-g"]
permitted_artifacts = ["**/*.keep"]
compatibility = "member-superset"

[sources]
roots = ["src", "more"]
suffixes = [".src"]
"#;
        let config = BuildConfig::from_toml_str(text, Path::new("kiln.toml")).unwrap();
        assert_eq!(config.build.parallelism, 3);
        assert_eq!(config.build.compatibility, CompatibilityMode::MemberSuperset);
        assert_eq!(config.sources.roots.len(), 2);
        assert_eq!(config.build.state_dir, PathBuf::from(".kiln"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = BuildConfig::from_toml_str("[build]\nturbo = true\n", Path::new("kiln.toml"))
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::TomlParseError { .. })
        ));
    }

    #[test]
    fn test_invalid_suffix() {
        let err = BuildConfig::from_toml_str("[sources]\nsuffixes = [\"src\"]\n", Path::new("k"))
            .unwrap_err();
        assert!(err.to_string().contains("sources.suffixes"));
    }

    #[test]
    fn test_overrides() {
        let mut config = BuildConfig::new();
        config
            .apply_overrides(|key| match key {
                "KILN_PARALLELISM" => Some("7".to_string()),
                "KILN_STATE_DIR" => Some("/tmp/state".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.parallelism(), 7);
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/state/kiln.state"));

        let err = config
            .apply_overrides(|key| (key == "KILN_PARALLELISM").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("KILN_PARALLELISM"));
    }

    #[test]
    fn test_fingerprint() {
        let a = BuildConfig::new();
        let b = BuildConfig::new().with_compiler_args(vec!["-O".to_string()]);
        assert_eq!(a.fingerprint(), BuildConfig::new().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert_eq!(a.with_fingerprint("abc").fingerprint(), "abc");
    }

    #[test]
    fn test_load_from_directory_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kiln.toml"), "[build]\noutput_roots = [\"bin\"]\n").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let config = BuildConfig::load_from_directory(&nested).unwrap();
        assert_eq!(config.output_roots(), vec![dir.path().join("bin")]);
        assert_eq!(config.scan_request().roots, vec![dir.path().join("src")]);
    }

    #[test]
    fn test_missing_file() {
        let err = BuildConfig::load_from_file(Path::new("/nonexistent/kiln.toml")).unwrap_err();
        assert!(matches!(err, BuildError::Config(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_allow_list() {
        let mut config = BuildConfig::new().with_base_dir("/w");
        config.build.permitted_artifacts = vec!["**/*.keep".to_string()];
        let allow = config.artifact_allow_list().unwrap();

        assert!(allow.permits(Path::new("/w/out/a/b.keep")));
        assert!(allow.permits(Path::new("/w/.kiln/kiln.state")));
        assert!(!allow.permits(Path::new("/w/out/a/b.out")));
        assert!(!allow.permits_all());
    }
}
