//! In-memory build graph
//!
//! A [`BuildState`] owns every module and package of one build. Sources and
//! artifacts live inside their packages; the state keeps flattened indexes
//! from path to owning package. Two different owners for the same path is an
//! internal consistency violation.

mod module;
mod package;
mod source;

pub use module::Module;
pub use package::{DependencyKind, Package, TypeDependencies};
pub use source::Source;

use crate::error::{BuildError, BuildResult};
use crate::graph::DependencyGraph;
use crate::ids::{ModuleId, PackageId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Complete snapshot of one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
    modules: BTreeMap<ModuleId, Module>,
    packages: BTreeMap<PackageId, Package>,
    sources: BTreeMap<String, PackageId>,
    artifacts: BTreeMap<PathBuf, PackageId>,
}

impl BuildState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn modules(&self) -> &BTreeMap<ModuleId, Module> {
        &self.modules
    }

    pub fn packages(&self) -> &BTreeMap<PackageId, Package> {
        &self.packages
    }

    pub fn package(&self, id: &PackageId) -> Option<&Package> {
        self.packages.get(id)
    }

    pub fn package_mut(&mut self, id: &PackageId) -> Option<&mut Package> {
        self.packages.get_mut(id)
    }

    pub fn lookup_module_or_create(&mut self, id: &ModuleId) -> &mut Module {
        self.modules
            .entry(id.clone())
            .or_insert_with(|| Module::new(id.clone()))
    }

    /// Find a package, creating it (and its module) on first reference
    pub fn lookup_package_or_create(&mut self, id: &PackageId) -> &mut Package {
        if !self.packages.contains_key(id) {
            self.lookup_module_or_create(&id.module).add_package(id.clone());
        }
        self.packages
            .entry(id.clone())
            .or_insert_with(|| Package::new(id.clone()))
    }

    /// Look up a source by path through the flattened index
    pub fn source(&self, path: &str) -> Option<&Source> {
        let owner = self.sources.get(path)?;
        self.packages.get(owner)?.sources().get(path)
    }

    /// Every source in path order
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources
            .iter()
            .filter_map(|(path, owner)| self.packages.get(owner)?.sources().get(path))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Register a source with its owning package, creating the package on
    /// demand. A path can only ever belong to one source.
    pub fn add_source(&mut self, package: &PackageId, source: Source) -> BuildResult<()> {
        if let Some(owner) = self.sources.get(source.path()) {
            return Err(BuildError::invariant(format!(
                "source '{}' is claimed by both {} and {}",
                source.path(),
                owner,
                package
            )));
        }
        self.sources
            .insert(source.path().to_string(), package.clone());
        self.lookup_package_or_create(package).insert_source(source);
        Ok(())
    }

    /// Owner of a recorded artifact
    pub fn artifact_owner(&self, path: &Path) -> Option<&PackageId> {
        self.artifacts.get(path)
    }

    /// All recorded artifact paths
    pub fn artifact_paths(&self) -> BTreeSet<PathBuf> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn add_artifact(
        &mut self,
        package: &PackageId,
        path: PathBuf,
        timestamp: i64,
    ) -> BuildResult<()> {
        if let Some(owner) = self.artifacts.get(&path) {
            if owner != package {
                return Err(BuildError::invariant(format!(
                    "artifact '{}' is claimed by both {} and {}",
                    path.display(),
                    owner,
                    package
                )));
            }
        }
        self.artifacts.insert(path.clone(), package.clone());
        self.lookup_package_or_create(package)
            .insert_artifact(path, timestamp);
        Ok(())
    }

    /// Forget a recorded artifact. Returns its recorded timestamp.
    pub fn remove_artifact(&mut self, path: &Path) -> Option<i64> {
        let owner = self.artifacts.remove(path)?;
        self.packages.get_mut(&owner)?.remove_artifact(path)
    }

    /// Replace every artifact of a package
    pub fn set_package_artifacts(
        &mut self,
        package: &PackageId,
        artifacts: BTreeMap<PathBuf, i64>,
    ) -> BuildResult<()> {
        let previous = self.lookup_package_or_create(package).take_artifacts();
        for path in previous.keys() {
            self.artifacts.remove(path);
        }
        for (path, timestamp) in artifacts {
            self.add_artifact(package, path, timestamp)?;
        }
        Ok(())
    }

    /// Drop all sources of a package, keeping its other records
    pub fn remove_package_sources(&mut self, package: &PackageId) {
        if let Some(pkg) = self.packages.get_mut(package) {
            for path in pkg.take_sources().keys() {
                self.sources.remove(path);
            }
        }
    }

    /// Sources of every package in a module
    pub fn module_sources(&self, module: &ModuleId) -> Vec<&Source> {
        self.module_packages(module)
            .flat_map(|pkg| pkg.sources().values())
            .collect()
    }

    /// Artifacts of every package in a module
    pub fn module_artifacts(&self, module: &ModuleId) -> BTreeMap<&Path, i64> {
        self.module_packages(module)
            .flat_map(|pkg| pkg.artifacts().iter())
            .map(|(path, ts)| (path.as_path(), *ts))
            .collect()
    }

    fn module_packages<'a>(&'a self, module: &ModuleId) -> impl Iterator<Item = &'a Package> {
        self.modules
            .get(module)
            .into_iter()
            .flat_map(|m| m.packages().iter())
            .filter_map(|id| self.packages.get(id))
    }

    /// Rebuild the flattened source and artifact indexes from the packages.
    pub fn flatten(&mut self) -> BuildResult<()> {
        let mut sources = BTreeMap::new();
        let mut artifacts = BTreeMap::new();

        for (id, package) in &self.packages {
            for path in package.sources().keys() {
                if let Some(owner) = sources.insert(path.clone(), id.clone()) {
                    return Err(BuildError::invariant(format!(
                        "source '{}' is claimed by both {} and {}",
                        path, owner, id
                    )));
                }
            }
            for path in package.artifacts().keys() {
                if let Some(owner) = artifacts.insert(path.clone(), id.clone()) {
                    return Err(BuildError::invariant(format!(
                        "artifact '{}' is claimed by both {} and {}",
                        path.display(),
                        owner,
                        id
                    )));
                }
            }
        }

        self.sources = sources;
        self.artifacts = artifacts;
        Ok(())
    }

    /// Fill in every package's dependents from the in-graph dependencies
    pub fn calculate_dependents(&mut self) {
        let graph = DependencyGraph::from_state(self);
        for (id, package) in self.packages.iter_mut() {
            package.set_dependents(graph.dependents_of(id).clone());
        }
    }

    /// Carry over untouched packages from the previous build.
    ///
    /// Every package of `prev` that was neither recompiled nor removed gets its
    /// artifacts, dependencies and API from `prev`.
    pub fn copy_packages_except(
        &mut self,
        prev: &BuildState,
        recompiled: &BTreeSet<PackageId>,
        removed: &BTreeSet<PackageId>,
    ) -> BuildResult<()> {
        for (id, prev_package) in &prev.packages {
            if recompiled.contains(id) || removed.contains(id) {
                continue;
            }
            self.lookup_package_or_create(id)
                .adopt_products_of(prev_package);
        }
        self.flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TypeId;
    use crate::pubapi::PubApi;

    fn pkg(s: &str) -> PackageId {
        s.parse().unwrap()
    }

    fn ty(s: &str) -> TypeId {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_source_creates_package_and_module() {
        let mut state = BuildState::new();
        state
            .add_source(&pkg("app:ui"), Source::new("src/ui/Button.src", 1))
            .unwrap();

        assert!(state.package(&pkg("app:ui")).is_some());
        assert!(state.modules().contains_key(&ModuleId::new("app").unwrap()));
        assert_eq!(
            state.source("src/ui/Button.src").unwrap().package(),
            Some(&pkg("app:ui"))
        );
    }

    #[test]
    fn test_source_collision_is_invariant_violation() {
        let mut state = BuildState::new();
        state
            .add_source(&pkg("app:ui"), Source::new("src/Shared.src", 1))
            .unwrap();
        let err = state
            .add_source(&pkg("app:core"), Source::new("src/Shared.src", 1))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_artifact_collision_is_invariant_violation() {
        let mut state = BuildState::new();
        state
            .add_artifact(&pkg("app:ui"), PathBuf::from("out/X.out"), 1)
            .unwrap();
        assert!(state
            .add_artifact(&pkg("app:core"), PathBuf::from("out/X.out"), 1)
            .is_err());
    }

    #[test]
    fn test_set_package_artifacts_replaces_index() {
        let mut state = BuildState::new();
        let id = pkg("app:ui");
        state
            .add_artifact(&id, PathBuf::from("out/Old.out"), 1)
            .unwrap();

        let mut fresh = BTreeMap::new();
        fresh.insert(PathBuf::from("out/New.out"), 2);
        state.set_package_artifacts(&id, fresh).unwrap();

        assert!(state.artifact_owner(Path::new("out/Old.out")).is_none());
        assert_eq!(state.artifact_owner(Path::new("out/New.out")), Some(&id));
    }

    #[test]
    fn test_remove_package_sources() {
        let mut state = BuildState::new();
        let id = pkg("app:ui");
        state.add_source(&id, Source::new("src/ui/A.src", 1)).unwrap();
        state.remove_package_sources(&id);
        assert!(state.source("src/ui/A.src").is_none());
        assert!(state.package(&id).unwrap().sources().is_empty());
    }

    #[test]
    fn test_module_aggregate_views() {
        let mut state = BuildState::new();
        state
            .add_source(&pkg("app:ui"), Source::new("src/ui/A.src", 1))
            .unwrap();
        state
            .add_source(&pkg("app:core"), Source::new("src/core/B.src", 1))
            .unwrap();
        state
            .add_artifact(&pkg("app:core"), PathBuf::from("out/B.out"), 3)
            .unwrap();

        let module = ModuleId::new("app").unwrap();
        assert_eq!(state.module_sources(&module).len(), 2);
        assert_eq!(state.module_artifacts(&module).len(), 1);
    }

    #[test]
    fn test_calculate_dependents() {
        let mut state = BuildState::new();
        state
            .lookup_package_or_create(&pkg("app:ui"))
            .add_dependency(DependencyKind::InGraph, ty("app:ui.Button"), ty("app:core.Event"));
        state.lookup_package_or_create(&pkg("app:core"));
        state.calculate_dependents();

        let core = state.package(&pkg("app:core")).unwrap();
        assert!(core.dependents().contains(&pkg("app:ui")));
    }

    #[test]
    fn test_copy_packages_except() {
        let mut prev = BuildState::new();
        for name in ["app:keep", "app:again", "app:gone"] {
            let id = pkg(name);
            prev.lookup_package_or_create(&id)
                .set_pubapi(PubApi::new().with_member(id.type_id("T").unwrap(), "fn t()"));
            prev.add_artifact(&id, PathBuf::from(format!("out/{}.out", id.name)), 1)
                .unwrap();
        }

        let mut now = BuildState::new();
        let recompiled = BTreeSet::from([pkg("app:again")]);
        let removed = BTreeSet::from([pkg("app:gone")]);
        now.copy_packages_except(&prev, &recompiled, &removed).unwrap();

        assert!(now.package(&pkg("app:keep")).unwrap().has_been_compiled());
        assert!(now.package(&pkg("app:again")).is_none());
        assert!(now.package(&pkg("app:gone")).is_none());
        assert_eq!(
            now.artifact_owner(Path::new("out/keep.out")),
            Some(&pkg("app:keep"))
        );
    }
}
