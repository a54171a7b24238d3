//! Source discovery
//!
//! The orchestrator only sees [`SourceScanner`]. [`FsScanner`] is the default
//! implementation: it walks source roots, filters with glob patterns and
//! derives each file's module and package from where it sits.
//!
//! A directory holding a marker file (`kiln-module` by default) is a module
//! root; the first non-empty line of the marker names the module. A file's
//! package is its directory relative to the nearest module root, with `/`
//! replaced by `.`. Files outside any module root belong to the default
//! module, relative to the scan root.

use crate::artifacts::modified_millis;
use crate::error::{BuildError, BuildResult};
use crate::ids::{ModuleId, PackageId};
use crate::state::Source;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default name of the module marker file
pub const MODULE_MARKER: &str = "kiln-module";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Roots whose sources are compiled
    pub roots: Vec<PathBuf>,
    /// Glob patterns a path (relative to its root) must match; empty = all
    pub include: Vec<String>,
    /// Glob patterns that exclude a path (relative to its root)
    pub exclude: Vec<String>,
    /// Accepted suffixes including the dot; empty = all
    pub suffixes: Vec<String>,
    /// Roots whose sources are generated and compiled
    pub generated: Vec<PathBuf>,
    /// Roots whose sources are visible but never compiled
    pub link_only: Vec<PathBuf>,
    pub module_marker: String,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            suffixes: Vec::new(),
            generated: Vec::new(),
            link_only: Vec::new(),
            module_marker: MODULE_MARKER.to_string(),
        }
    }
}

/// A discovered source with the package it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedSource {
    pub package: PackageId,
    pub source: Source,
}

pub trait SourceScanner: Send + Sync {
    fn scan(&self, request: &ScanRequest) -> BuildResult<Vec<ScannedSource>>;
}

/// Compile glob patterns into one set; `None` when there are no patterns
pub fn build_globset(patterns: &[String]) -> BuildResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| BuildError::InvalidPattern {
                pattern: pattern.clone(),
                error: e.to_string(),
            })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|e| BuildError::InvalidPattern {
        pattern: patterns.join(", "),
        error: e.to_string(),
    })?;
    Ok(Some(set))
}

/// Walks the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl FsScanner {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Copy)]
enum RootKind {
    Compiled,
    Generated,
    LinkOnly,
}

struct Filters {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    suffixes: Vec<String>,
}

impl Filters {
    fn accepts(&self, relative: &Path) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(relative) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(relative) {
                return false;
            }
        }
        if self.suffixes.is_empty() {
            return true;
        }
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

impl SourceScanner for FsScanner {
    fn scan(&self, request: &ScanRequest) -> BuildResult<Vec<ScannedSource>> {
        let filters = Filters {
            include: build_globset(&request.include)?,
            exclude: build_globset(&request.exclude)?,
            suffixes: request.suffixes.clone(),
        };

        let roots = request
            .roots
            .iter()
            .map(|r| (r, RootKind::Compiled))
            .chain(request.generated.iter().map(|r| (r, RootKind::Generated)))
            .chain(request.link_only.iter().map(|r| (r, RootKind::LinkOnly)));

        let mut found = Vec::new();
        for (root, kind) in roots {
            scan_root(root, kind, &filters, &request.module_marker, &mut found)?;
        }
        tracing::debug!(sources = found.len(), "scanned source roots");
        Ok(found)
    }
}

fn scan_root(
    root: &Path,
    kind: RootKind,
    filters: &Filters,
    marker: &str,
    found: &mut Vec<ScannedSource>,
) -> BuildResult<()> {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "source root does not exist, skipping");
        return Ok(());
    }

    // Directory -> (module, module root) for directories already resolved
    let mut modules: BTreeMap<PathBuf, (ModuleId, PathBuf)> = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| BuildError::ScanError(e.to_string()))?;
        if !entry.file_type().is_file() || entry.file_name() == OsStr::new(marker) {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if !filters.accepts(relative) {
            continue;
        }

        let dir = path.parent().unwrap_or(root);
        let (module, module_root) = resolve_module(dir, root, marker, &mut modules)?;
        let package_dir = dir.strip_prefix(&module_root).unwrap_or(Path::new(""));
        let package_name = package_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(".");
        let package = PackageId::new(module, package_name)?;

        let last_modified = modified_millis(path).map_err(|e| BuildError::io(path, e))?;
        let source = Source::new(path_key(path), last_modified)
            .with_generated(matches!(kind, RootKind::Generated))
            .with_link_only(matches!(kind, RootKind::LinkOnly));

        found.push(ScannedSource { package, source });
    }
    Ok(())
}

/// Find the module owning `dir` by looking for the nearest marker between
/// `dir` and the scan root.
fn resolve_module(
    dir: &Path,
    root: &Path,
    marker: &str,
    cache: &mut BTreeMap<PathBuf, (ModuleId, PathBuf)>,
) -> BuildResult<(ModuleId, PathBuf)> {
    if let Some(hit) = cache.get(dir) {
        return Ok(hit.clone());
    }

    let marker_path = dir.join(marker);
    let resolved = if marker_path.is_file() {
        let text = fs::read_to_string(&marker_path).map_err(|e| BuildError::io(&marker_path, e))?;
        let name = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        (ModuleId::new(name)?, dir.to_path_buf())
    } else if dir == root {
        (ModuleId::default_module(), root.to_path_buf())
    } else {
        match dir.parent() {
            Some(parent) if parent.starts_with(root) => resolve_module(parent, root, marker, cache)?,
            _ => (ModuleId::default_module(), root.to_path_buf()),
        }
    };

    cache.insert(dir.to_path_buf(), resolved.clone());
    Ok(resolved)
}

/// Ledger key of a file: its path with `/` separators
fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
