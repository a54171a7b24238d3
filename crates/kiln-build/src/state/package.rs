//! Packages: the unit of incremental granularity

use crate::ids::{PackageId, TypeId};
use crate::pubapi::PubApi;
use crate::state::Source;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Type-level dependency map: declaring type -> depended-on types
pub type TypeDependencies = BTreeMap<TypeId, BTreeSet<TypeId>>;

/// Which side of the build a dependency was resolved on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Resolved against a type compiled in this build
    InGraph,
    /// Resolved against a type outside the build (class path, libraries)
    Classpath,
}

impl DependencyKind {
    /// One-character tag used in the ledger
    pub fn tag(self) -> char {
        match self {
            Self::InGraph => 'S',
            Self::Classpath => 'C',
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "S" => Some(Self::InGraph),
            "C" => Some(Self::Classpath),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    id: PackageId,
    sources: BTreeMap<String, Source>,
    artifacts: BTreeMap<PathBuf, i64>,
    in_graph: TypeDependencies,
    classpath: TypeDependencies,
    dependents: BTreeSet<PackageId>,
    pubapi: PubApi,
}

impl Package {
    pub fn new(id: PackageId) -> Self {
        Self {
            id,
            sources: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            in_graph: BTreeMap::new(),
            classpath: BTreeMap::new(),
            dependents: BTreeSet::new(),
            pubapi: PubApi::new(),
        }
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn sources(&self) -> &BTreeMap<String, Source> {
        &self.sources
    }

    /// Sources that are actual compile targets
    pub fn compilable_sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values().filter(|s| !s.is_link_only())
    }

    pub(crate) fn insert_source(&mut self, mut source: Source) {
        source.set_package(self.id.clone());
        self.sources.insert(source.path().to_string(), source);
    }

    pub(crate) fn take_sources(&mut self) -> BTreeMap<String, Source> {
        std::mem::take(&mut self.sources)
    }

    pub fn artifacts(&self) -> &BTreeMap<PathBuf, i64> {
        &self.artifacts
    }

    pub(crate) fn insert_artifact(&mut self, path: PathBuf, timestamp: i64) {
        self.artifacts.insert(path, timestamp);
    }

    pub(crate) fn remove_artifact(&mut self, path: &Path) -> Option<i64> {
        self.artifacts.remove(path)
    }

    pub(crate) fn take_artifacts(&mut self) -> BTreeMap<PathBuf, i64> {
        std::mem::take(&mut self.artifacts)
    }

    pub fn dependencies(&self, kind: DependencyKind) -> &TypeDependencies {
        match kind {
            DependencyKind::InGraph => &self.in_graph,
            DependencyKind::Classpath => &self.classpath,
        }
    }

    pub fn add_dependency(&mut self, kind: DependencyKind, from: TypeId, to: TypeId) {
        let deps = match kind {
            DependencyKind::InGraph => &mut self.in_graph,
            DependencyKind::Classpath => &mut self.classpath,
        };
        deps.entry(from).or_default().insert(to);
    }

    pub fn set_dependencies(&mut self, kind: DependencyKind, deps: TypeDependencies) {
        match kind {
            DependencyKind::InGraph => self.in_graph = deps,
            DependencyKind::Classpath => self.classpath = deps,
        }
    }

    /// Packages this one depends on through in-graph edges, excluding itself
    pub fn depended_packages(&self) -> BTreeSet<PackageId> {
        self.in_graph
            .values()
            .flatten()
            .map(|to| to.package.clone())
            .filter(|pkg| *pkg != self.id)
            .collect()
    }

    pub fn dependents(&self) -> &BTreeSet<PackageId> {
        &self.dependents
    }

    pub(crate) fn set_dependents(&mut self, dependents: BTreeSet<PackageId>) {
        self.dependents = dependents;
    }

    pub fn pubapi(&self) -> &PubApi {
        &self.pubapi
    }

    pub fn set_pubapi(&mut self, pubapi: PubApi) {
        self.pubapi = pubapi;
    }

    pub(crate) fn pubapi_mut(&mut self) -> &mut PubApi {
        &mut self.pubapi
    }

    /// A package compiled in some build has produced artifacts or an API
    pub fn has_been_compiled(&self) -> bool {
        !self.artifacts.is_empty() || !self.pubapi.is_empty()
    }

    /// Take over the build products of a package that was not recompiled.
    ///
    /// Sources are left alone; the API is merged so that partial surfaces
    /// learned during this build are kept on top of the recorded one.
    pub(crate) fn adopt_products_of(&mut self, prev: &Package) {
        self.artifacts = prev.artifacts.clone();
        self.in_graph = prev.in_graph.clone();
        self.classpath = prev.classpath.clone();
        self.pubapi = prev.pubapi.merge(&self.pubapi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(s: &str) -> PackageId {
        s.parse().unwrap()
    }

    fn ty(s: &str) -> TypeId {
        s.parse().unwrap()
    }

    #[test]
    fn test_dependency_kind_tags() {
        assert_eq!(DependencyKind::InGraph.tag(), 'S');
        assert_eq!(DependencyKind::from_tag("C"), Some(DependencyKind::Classpath));
        assert_eq!(DependencyKind::from_tag("X"), None);
    }

    #[test]
    fn test_depended_packages_skips_self() {
        let mut package = Package::new(pkg("app:ui"));
        package.add_dependency(DependencyKind::InGraph, ty("app:ui.Button"), ty("app:ui.Widget"));
        package.add_dependency(DependencyKind::InGraph, ty("app:ui.Button"), ty("app:core.Event"));
        package.add_dependency(DependencyKind::Classpath, ty("app:ui.Button"), ty("std:io.File"));

        let deps = package.depended_packages();
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&pkg("app:core")));
    }

    #[test]
    fn test_insert_source_sets_back_link() {
        let mut package = Package::new(pkg("app:ui"));
        package.insert_source(Source::new("src/ui/Button.src", 5));
        let source = &package.sources()["src/ui/Button.src"];
        assert_eq!(source.package(), Some(&pkg("app:ui")));
    }

    #[test]
    fn test_has_been_compiled() {
        let mut package = Package::new(pkg("app:ui"));
        assert!(!package.has_been_compiled());

        package.insert_artifact(PathBuf::from("out/ui/Button.out"), 7);
        assert!(package.has_been_compiled());
    }

    #[test]
    fn test_compilable_sources_excludes_link_only() {
        let mut package = Package::new(pkg("app:ui"));
        package.insert_source(Source::new("src/ui/A.src", 1));
        package.insert_source(Source::new("lib/ui/B.src", 1).with_link_only(true));
        assert_eq!(package.compilable_sources().count(), 1);
    }

    #[test]
    fn test_adopt_products_merges_api() {
        let mut prev = Package::new(pkg("app:ui"));
        prev.insert_artifact(PathBuf::from("out/ui/A.out"), 3);
        prev.set_pubapi(PubApi::new().with_member(ty("app:ui.A"), "fn a()"));

        let mut now = Package::new(pkg("app:ui"));
        now.set_pubapi(PubApi::new().with_member(ty("app:ui.B"), "fn b()"));
        now.adopt_products_of(&prev);

        assert_eq!(now.artifacts().len(), 1);
        assert!(now.pubapi().contains_type(&ty("app:ui.A")));
        assert!(now.pubapi().contains_type(&ty("app:ui.B")));
    }
}
