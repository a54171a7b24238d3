//! Build ledger: the persisted textual encoding of a build state
//!
//! The ledger is line oriented. The first character of each line is its kind:
//!
//! ```text
//! # kiln build state ver 0.4          version banner (first line)
//! R <fingerprint>                     configuration fingerprint
//! M <module>:                         begin module
//! P <package>                         begin package
//! S <C|L> <path> <ms>                 compiled or link-only source
//! G <C|L> <path> <ms>                 same, generated
//! D <S|C> <from-type> -> <to-type>    in-graph or classpath dependency
//! I <type> [<signature>]              public API item
//! A <path> <ms>                       artifact
//! ```
//!
//! A ledger is either trusted completely or not at all: any syntax error,
//! version mismatch or fingerprint mismatch yields an empty state.

use crate::artifacts;
use crate::error::{BuildError, BuildResult};
use crate::ids::{ModuleId, PackageId, TypeId};
use crate::state::{BuildState, DependencyKind, Source};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Ledger format version written to and expected in the banner
pub const LEDGER_VERSION: &str = "0.4";

const BANNER_PREFIX: &str = "# kiln build state ver ";

/// Result of reading a ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLoad {
    /// Previous build state; empty unless the ledger was trusted
    pub state: BuildState,
    pub fingerprint_matches: bool,
    pub version_matches: bool,
    pub well_formed: bool,
    /// Why the ledger was rejected
    pub problem: Option<String>,
    /// Artifacts deleted because their timestamp no longer matched, with
    /// the packages that owned them
    pub tampered: Vec<(PackageId, PathBuf)>,
}

impl LedgerLoad {
    pub fn is_trusted(&self) -> bool {
        self.fingerprint_matches && self.version_matches && self.well_formed
    }

    fn rejected(version_matches: bool, well_formed: bool, problem: String) -> Self {
        Self {
            state: BuildState::new(),
            fingerprint_matches: false,
            version_matches,
            well_formed,
            problem: Some(problem),
            tampered: Vec::new(),
        }
    }
}

/// Encode a build state. Output is sorted and byte-deterministic.
pub fn encode(state: &BuildState, fingerprint: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}{}", BANNER_PREFIX, LEDGER_VERSION);
    out.push_str("# Recorded state of the previous build. Do not edit.\n");
    let _ = writeln!(out, "R {}", fingerprint);

    for (module_id, module) in state.modules() {
        let _ = writeln!(out, "M {}:", module_id);
        for package_id in module.packages() {
            let Some(package) = state.package(package_id) else {
                continue;
            };
            let _ = writeln!(out, "P {}", package_id.name);

            for source in package.sources().values() {
                let kind = if source.is_generated() { 'G' } else { 'S' };
                let link = if source.is_link_only() { 'L' } else { 'C' };
                let _ = writeln!(
                    out,
                    "{} {} {} {}",
                    kind,
                    link,
                    source.path(),
                    source.last_modified()
                );
            }

            for kind in [DependencyKind::InGraph, DependencyKind::Classpath] {
                for (from, targets) in package.dependencies(kind) {
                    for to in targets {
                        let _ = writeln!(out, "D {} {} -> {}", kind.tag(), from, to);
                    }
                }
            }

            for (owner, signature) in package.pubapi().items() {
                match signature {
                    Some(signature) => {
                        let _ = writeln!(out, "I {} {}", owner, signature);
                    }
                    None => {
                        let _ = writeln!(out, "I {}", owner);
                    }
                }
            }

            for (path, timestamp) in package.artifacts() {
                let _ = writeln!(out, "A {} {}", path.to_string_lossy(), timestamp);
            }
        }
    }

    out
}

/// Decode a ledger written by [`encode`], checking it against the current
/// configuration fingerprint.
pub fn decode(text: &str, fingerprint: &str) -> LedgerLoad {
    let first = text.lines().next().unwrap_or("");
    let Some(comment) = first.strip_prefix('#') else {
        return LedgerLoad::rejected(
            false,
            false,
            "missing version banner on line 1".to_string(),
        );
    };
    let found = comment
        .rsplit_once("ver ")
        .map(|(_, v)| v.trim())
        .unwrap_or("");
    if found != LEDGER_VERSION {
        return LedgerLoad::rejected(
            false,
            true,
            format!(
                "ledger version '{}' does not match expected '{}'",
                found, LEDGER_VERSION
            ),
        );
    }

    let (mut state, recorded) = match parse_body(text) {
        Ok(parsed) => parsed,
        Err(err) => return LedgerLoad::rejected(true, false, err.to_string()),
    };

    if recorded.as_deref() != Some(fingerprint) {
        return LedgerLoad::rejected(
            true,
            true,
            "configuration fingerprint changed since the previous build".to_string(),
        );
    }

    state.calculate_dependents();
    LedgerLoad {
        state,
        fingerprint_matches: true,
        version_matches: true,
        well_formed: true,
        problem: None,
        tampered: Vec::new(),
    }
}

fn parse_body(text: &str) -> BuildResult<(BuildState, Option<String>)> {
    let mut state = BuildState::new();
    let mut fingerprint = None;
    let mut module: Option<ModuleId> = None;
    let mut package: Option<PackageId> = None;

    for (idx, line) in text.lines().enumerate().skip(1) {
        let lineno = idx + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));
        let syntax = |reason: String| BuildError::ledger_syntax(lineno, reason);

        match tag {
            "R" => fingerprint = Some(rest.to_string()),
            "M" => {
                let name = rest
                    .strip_suffix(':')
                    .ok_or_else(|| syntax("module line must end with ':'".to_string()))?;
                let id = ModuleId::new(name).map_err(|e| syntax(e.to_string()))?;
                state.lookup_module_or_create(&id);
                module = Some(id);
                package = None;
            }
            "P" => {
                let current = module
                    .clone()
                    .ok_or_else(|| syntax("package outside of a module".to_string()))?;
                let id = PackageId::new(current, rest).map_err(|e| syntax(e.to_string()))?;
                state.lookup_package_or_create(&id);
                package = Some(id);
            }
            "S" | "G" => {
                let owner = package
                    .as_ref()
                    .ok_or_else(|| syntax("source outside of a package".to_string()))?;
                let (link, rest) = rest
                    .split_once(' ')
                    .ok_or_else(|| syntax("truncated source line".to_string()))?;
                let link_only = match link {
                    "C" => false,
                    "L" => true,
                    other => return Err(syntax(format!("unknown source kind '{}'", other))),
                };
                let (path, timestamp) = split_timestamp(rest).map_err(&syntax)?;
                if state.source(path).is_some() {
                    return Err(syntax(format!("duplicate source '{}'", path)));
                }
                let source = Source::new(path, timestamp)
                    .with_generated(tag == "G")
                    .with_link_only(link_only);
                state
                    .add_source(owner, source)
                    .map_err(|e| syntax(e.to_string()))?;
            }
            "D" => {
                let owner = package
                    .as_ref()
                    .ok_or_else(|| syntax("dependency outside of a package".to_string()))?;
                let (kind, rest) = rest
                    .split_once(' ')
                    .ok_or_else(|| syntax("truncated dependency line".to_string()))?;
                let kind = DependencyKind::from_tag(kind)
                    .ok_or_else(|| syntax(format!("unknown dependency kind '{}'", kind)))?;
                let (from, to) = rest
                    .split_once(" -> ")
                    .ok_or_else(|| syntax("dependency line without '->'".to_string()))?;
                let from: TypeId = from.parse().map_err(|e: BuildError| syntax(e.to_string()))?;
                let to: TypeId = to.parse().map_err(|e: BuildError| syntax(e.to_string()))?;
                if let Some(pkg) = state.package_mut(owner) {
                    pkg.add_dependency(kind, from, to);
                }
            }
            "I" => {
                let owner = package
                    .as_ref()
                    .ok_or_else(|| syntax("API item outside of a package".to_string()))?;
                let (ty, signature) = match rest.split_once(' ') {
                    Some((ty, signature)) => (ty, Some(signature)),
                    None => (rest, None),
                };
                let ty: TypeId = ty.parse().map_err(|e: BuildError| syntax(e.to_string()))?;
                if let Some(pkg) = state.package_mut(owner) {
                    let api = pkg.pubapi_mut();
                    match signature {
                        Some(signature) => api.add_member(ty, signature),
                        None => api.add_type(ty),
                    }
                }
            }
            "A" => {
                let owner = package
                    .clone()
                    .ok_or_else(|| syntax("artifact outside of a package".to_string()))?;
                let (path, timestamp) = split_timestamp(rest).map_err(&syntax)?;
                let path = PathBuf::from(path);
                if state.artifact_owner(&path).is_some() {
                    return Err(syntax(format!("duplicate artifact '{}'", path.display())));
                }
                state
                    .add_artifact(&owner, path, timestamp)
                    .map_err(|e| syntax(e.to_string()))?;
            }
            other => return Err(syntax(format!("unknown line kind '{}'", other))),
        }
    }

    Ok((state, fingerprint))
}

fn split_timestamp(rest: &str) -> Result<(&str, i64), String> {
    let (path, timestamp) = rest
        .rsplit_once(' ')
        .ok_or_else(|| "missing timestamp".to_string())?;
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|_| format!("invalid timestamp '{}'", timestamp))?;
    Ok((path, timestamp))
}

/// The ledger file of one build directory
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and decode the ledger, then drop artifacts that were touched
    /// since they were recorded. Returns `None` when there is no ledger.
    pub fn load(&self, fingerprint: &str) -> Option<LedgerLoad> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                return Some(LedgerLoad::rejected(
                    false,
                    false,
                    format!("cannot read {}: {}", self.path.display(), e),
                ))
            }
        };

        let mut load = decode(&text, fingerprint);
        if load.is_trusted() {
            load.tampered = artifacts::drop_tampered(&mut load.state);
        }
        Some(load)
    }

    /// Write the ledger through a temporary file and an atomic rename, so a
    /// crash never leaves a half-written ledger behind.
    pub fn save(&self, state: &BuildState, fingerprint: &str) -> BuildResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
        }
        let tmp = self.temp_path();
        fs::write(&tmp, encode(state, fingerprint)).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| BuildError::io(&self.path, e))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
