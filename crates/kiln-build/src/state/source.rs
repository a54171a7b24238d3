//! Compilation units

use crate::ids::PackageId;

/// A single source file known to the build.
///
/// The path is the identity: a `/`-separated name relative to the build's
/// working root. Everything else is fixed at creation except the back-link to
/// the owning package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    path: String,
    suffix: String,
    last_modified: i64,
    generated: bool,
    link_only: bool,
    package: Option<PackageId>,
}

impl Source {
    /// Create a compiled, non-generated source. `last_modified` is in
    /// milliseconds since the Unix epoch.
    pub fn new(path: impl Into<String>, last_modified: i64) -> Self {
        let path = path.into();
        let suffix = suffix_of(&path);
        Self {
            path,
            suffix,
            last_modified,
            generated: false,
            link_only: false,
            package: None,
        }
    }

    pub fn with_generated(mut self, generated: bool) -> Self {
        self.generated = generated;
        self
    }

    /// Link-only sources are visible to the compiler for cross references but
    /// are never compile targets themselves.
    pub fn with_link_only(mut self, link_only: bool) -> Self {
        self.link_only = link_only;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// File suffix including the dot (`".src"`), empty when there is none
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn is_link_only(&self) -> bool {
        self.link_only
    }

    pub fn package(&self) -> Option<&PackageId> {
        self.package.as_ref()
    }

    pub(crate) fn set_package(&mut self, package: PackageId) {
        self.package = Some(package);
    }
}

fn suffix_of(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[idx..].to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_from_file_name() {
        assert_eq!(Source::new("src/app/Main.src", 1).suffix(), ".src");
        assert_eq!(Source::new("src/app.d/Makefile", 1).suffix(), "");
        assert_eq!(Source::new(".hidden", 1).suffix(), "");
    }

    #[test]
    fn test_flags_default_off() {
        let source = Source::new("a/B.src", 10);
        assert!(!source.is_generated());
        assert!(!source.is_link_only());
        assert!(source.package().is_none());
        assert_eq!(source.last_modified(), 10);
    }

    #[test]
    fn test_builder_flags() {
        let source = Source::new("gen/B.src", 10)
            .with_generated(true)
            .with_link_only(true);
        assert!(source.is_generated());
        assert!(source.is_link_only());
    }
}
