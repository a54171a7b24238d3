//! Artifact reconciliation
//!
//! Keeps the files under the output roots consistent with what the build
//! state says was produced. Artifact paths are compared exactly as recorded,
//! so output roots and compiler-reported paths must share the same base.

use crate::error::{BuildError, BuildResult};
use crate::ids::PackageId;
use crate::state::BuildState;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Last-modified time of a file in milliseconds since the Unix epoch
pub fn modified_millis(path: &Path) -> std::io::Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    };
    Ok(millis)
}

/// Recorded artifacts that no longer exist on disk, with their owners
pub fn find_missing(prev: &BuildState) -> Vec<(PackageId, PathBuf)> {
    let mut missing = Vec::new();
    for (id, package) in prev.packages() {
        for path in package.artifacts().keys() {
            if !path.exists() {
                missing.push((id.clone(), path.clone()));
            }
        }
    }
    missing
}

/// Delete every artifact whose on-disk timestamp differs from the recorded
/// one and forget it. Missing files are left recorded so that
/// [`find_missing`] reports them. Returns the dropped artifacts with their
/// former owners.
pub fn drop_tampered(state: &mut BuildState) -> Vec<(PackageId, PathBuf)> {
    let mut tampered = Vec::new();
    for path in state.artifact_paths() {
        let Some((owner, recorded)) = state.artifact_owner(&path).and_then(|owner| {
            let recorded = state.package(owner)?.artifacts().get(&path).copied()?;
            Some((owner.clone(), recorded))
        }) else {
            continue;
        };
        let Ok(actual) = modified_millis(&path) else {
            continue;
        };
        if actual != recorded {
            tracing::warn!(
                artifact = %path.display(),
                recorded,
                actual,
                "artifact modified outside the build, deleting"
            );
            delete_file(&path);
            state.remove_artifact(&path);
            tampered.push((owner, path));
        }
    }
    tampered
}

/// Delete files under the output roots that no package produced.
pub fn sweep_unidentified(
    roots: &[PathBuf],
    known: &BTreeSet<PathBuf>,
    permitted: &dyn Fn(&Path) -> bool,
) -> BuildResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                BuildError::io(path, std::io::Error::new(ErrorKind::Other, e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if known.contains(path) || permitted(path) {
                continue;
            }
            tracing::warn!(artifact = %path.display(), "removing unidentified artifact");
            delete_file(path);
            removed.push(path.to_path_buf());
        }
    }
    Ok(removed)
}

/// For recompiled packages, delete artifacts recorded in `prev` that were
/// not produced again in `now`.
pub fn remove_superfluous(
    prev: &BuildState,
    now: &BuildState,
    recompiled: &BTreeSet<PackageId>,
) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for id in recompiled {
        let Some(old) = prev.package(id) else {
            continue;
        };
        let fresh = now.package(id).map(|p| p.artifacts());
        for path in old.artifacts().keys() {
            if fresh.is_some_and(|f| f.contains_key(path)) {
                continue;
            }
            tracing::debug!(package = %id, artifact = %path.display(), "removing superfluous artifact");
            if delete_file(path) {
                removed.push(path.clone());
            }
        }
    }
    removed
}

/// Delete the recorded artifacts of packages about to be recompiled. The
/// records stay; the files are rewritten or reported missing later.
pub fn purge_packages(state: &BuildState, packages: &BTreeSet<PackageId>) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for id in packages {
        let Some(package) = state.package(id) else {
            continue;
        };
        for path in package.artifacts().keys() {
            if delete_file(path) {
                removed.push(path.clone());
            }
        }
    }
    removed
}

/// Empty every output root. Used when there is no ledger to reconcile with.
pub fn wipe_output_roots(roots: &[PathBuf]) -> BuildResult<usize> {
    let mut removed = 0;
    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(BuildError::io(root, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| BuildError::io(root, e))?;
            let path = entry.path();
            let result = if entry.file_type().map_err(|e| BuildError::io(&path, e))?.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| BuildError::io(&path, e))?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(entries = removed, "wiped output directories for a clean build");
    }
    Ok(removed)
}

/// Remove a file, treating "already gone" as success. Returns whether a
/// file was actually deleted.
fn delete_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(artifact = %path.display(), error = %e, "could not delete artifact");
            false
        }
    }
}
