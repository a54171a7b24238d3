//! Source change detection between the previous and the current build

use crate::ids::PackageId;
use crate::state::{BuildState, Source};
use std::fmt;

/// Changed source information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedSource {
    /// Source path
    pub path: String,
    /// Package that must be rebuilt because of the change
    pub package: PackageId,
    /// Type of change
    pub change_type: ChangeType,
}

/// Type of source change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Source present now but not in the previous build
    Added,
    /// Source recorded in the previous build but gone now
    Removed,
    /// Timestamp moved forward, or the compile/link/generated flags changed
    Modified,
    /// Timestamp moved backwards; clocks should only advance
    ModifiedBackwards,
}

impl ChangeType {
    /// Taint reason recorded for the owning package
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Added => "source added",
            Self::Removed => "source removed",
            Self::Modified => "source modified",
            Self::ModifiedBackwards => "source modified (timestamp moved backwards)",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Compares the sources of two build states
#[derive(Debug, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect changes from `prev` to `now`, in path order
    pub fn detect_changes(&self, prev: &BuildState, now: &BuildState) -> Vec<ChangedSource> {
        let mut changes = Vec::new();

        for source in now.sources() {
            let Some(package) = source.package() else {
                continue;
            };
            let change_type = match prev.source(source.path()) {
                None => Some(ChangeType::Added),
                Some(previous) if previous.package() != Some(package) => {
                    // Moved between packages: the old owner loses a source.
                    if let Some(old_owner) = previous.package() {
                        changes.push(ChangedSource {
                            path: source.path().to_string(),
                            package: old_owner.clone(),
                            change_type: ChangeType::Removed,
                        });
                    }
                    Some(ChangeType::Added)
                }
                Some(previous) => Self::compare(previous, source),
            };
            if let Some(change_type) = change_type {
                changes.push(ChangedSource {
                    path: source.path().to_string(),
                    package: package.clone(),
                    change_type,
                });
            }
        }

        for source in prev.sources() {
            if now.source(source.path()).is_some() {
                continue;
            }
            if let Some(package) = source.package() {
                changes.push(ChangedSource {
                    path: source.path().to_string(),
                    package: package.clone(),
                    change_type: ChangeType::Removed,
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    /// Check if a source has changed
    fn compare(previous: &Source, current: &Source) -> Option<ChangeType> {
        if current.last_modified() < previous.last_modified() {
            return Some(ChangeType::ModifiedBackwards);
        }
        if current.last_modified() > previous.last_modified()
            || current.is_link_only() != previous.is_link_only()
            || current.is_generated() != previous.is_generated()
        {
            return Some(ChangeType::Modified);
        }
        None
    }
}
