//! Package dependency graph with a reverse (dependents) index
//!
//! The graph is a plain directed graph over package ids and may contain
//! cycles. Nothing here assumes a DAG; `find_cycle` only exists so cycles can
//! be reported.
use crate::ids::PackageId;
use crate::state::{BuildState, Package};
use std::collections::{BTreeMap, BTreeSet};

static NO_PACKAGES: BTreeSet<PackageId> = BTreeSet::new();

/// Forward and reverse package edges derived from in-graph type dependencies
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Package -> packages it depends on
    dependencies: BTreeMap<PackageId, BTreeSet<PackageId>>,
    /// Package -> packages that depend on it
    dependents: BTreeMap<PackageId, BTreeSet<PackageId>>,
}

impl DependencyGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Reverse every package's in-graph dependency map once
    pub fn from_state(state: &BuildState) -> Self {
        let mut graph = Self::new();
        for package in state.packages().values() {
            graph.add_package_edges(package);
        }
        graph
    }

    /// Add all edges implied by a package's in-graph dependencies
    pub fn add_package_edges(&mut self, package: &Package) {
        for dep in package.depended_packages() {
            self.add_edge(package.id().clone(), dep);
        }
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: PackageId, to: PackageId) {
        if from == to {
            return;
        }
        self.dependents
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.dependencies.entry(from).or_default().insert(to);
    }

    pub fn dependencies_of(&self, package: &PackageId) -> &BTreeSet<PackageId> {
        self.dependencies.get(package).unwrap_or(&NO_PACKAGES)
    }

    pub fn dependents_of(&self, package: &PackageId) -> &BTreeSet<PackageId> {
        self.dependents.get(package).unwrap_or(&NO_PACKAGES)
    }

    pub fn dependent_count(&self, package: &PackageId) -> usize {
        self.dependents_of(package).len()
    }

    /// Number of packages with at least one outgoing edge
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Find one cycle, returned as the package path that closes it
    pub fn find_cycle(&self) -> Option<Vec<PackageId>> {
        let mut visited = BTreeSet::new();
        for package in self.dependencies.keys() {
            if visited.contains(package) {
                continue;
            }
            if let Some(cycle) = self.cycle_from(package, &mut visited) {
                return Some(cycle);
            }
        }
        None
    }

    /// Depth-first walk from `start` with an explicit stack
    fn cycle_from(
        &self,
        start: &PackageId,
        visited: &mut BTreeSet<PackageId>,
    ) -> Option<Vec<PackageId>> {
        let mut path = vec![start.clone()];
        let mut on_path = BTreeSet::from([start.clone()]);
        let mut pending = vec![self.dependencies_of(start).iter()];
        visited.insert(start.clone());

        while let Some(deps) = pending.last_mut() {
            match deps.next() {
                Some(dep) if on_path.contains(dep) => {
                    let begin = path.iter().position(|p| p == dep).unwrap_or(0);
                    let mut cycle = path[begin..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(dep) if visited.contains(dep) => {}
                Some(dep) => {
                    visited.insert(dep.clone());
                    on_path.insert(dep.clone());
                    path.push(dep.clone());
                    pending.push(self.dependencies_of(dep).iter());
                }
                None => {
                    pending.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(&done);
                    }
                }
            }
        }
        None
    }
}

/// Render a cycle as `a -> b -> a`
pub fn format_cycle(cycle: &[PackageId]) -> String {
    cycle
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
