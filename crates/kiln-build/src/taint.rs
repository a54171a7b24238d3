//! Dependency tainting
//!
//! A tainted package must be recompiled. Tainting is transitive over the
//! dependents index: whoever depends on a tainted package is tainted too.
//! Packages are marked before their dependents are queued, so cyclic graphs
//! terminate and deep chains need no stack.

use crate::graph::DependencyGraph;
use crate::ids::PackageId;
use crate::state::{BuildState, Package};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct TaintEngine {
    graph: DependencyGraph,
    /// Tainted package -> why it was first tainted
    tainted: BTreeMap<PackageId, String>,
}

impl TaintEngine {
    /// Engine with the dependents index of `prev`
    pub fn from_state(prev: &BuildState) -> Self {
        Self {
            graph: DependencyGraph::from_state(prev),
            tainted: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Learn the edges of a package compiled during this build
    pub fn extend_dependents(&mut self, package: &Package) {
        self.graph.add_package_edges(package);
    }

    /// Mark a package and everything depending on it. Returns whether the
    /// package itself was newly tainted.
    pub fn taint(&mut self, package: &PackageId, reason: &str) -> bool {
        if !self.mark(package, reason) {
            return false;
        }

        let mut pending = vec![package.clone()];
        while let Some(current) = pending.pop() {
            let inherited = format!("depends on {}", current);
            let dependents: Vec<PackageId> = self.graph.dependents_of(&current).iter().cloned().collect();
            for dependent in dependents {
                if self.mark(&dependent, &inherited) {
                    pending.push(dependent);
                }
            }
        }
        true
    }

    fn mark(&mut self, package: &PackageId, reason: &str) -> bool {
        if self.tainted.contains_key(package) {
            return false;
        }
        tracing::debug!(package = %package, reason, "tainted");
        self.tainted.insert(package.clone(), reason.to_string());
        true
    }

    /// Taint the dependents of a package but not the package itself
    pub fn taint_dependents(
        &mut self,
        package: &PackageId,
        reason: &str,
        except: &BTreeSet<PackageId>,
    ) {
        let dependents: Vec<PackageId> = self
            .graph
            .dependents_of(package)
            .iter()
            .filter(|d| !except.contains(*d))
            .cloned()
            .collect();
        for dependent in &dependents {
            self.taint(dependent, reason);
        }
    }

    pub fn is_tainted(&self, package: &PackageId) -> bool {
        self.tainted.contains_key(package)
    }

    /// Tainted packages in sorted order
    pub fn tainted(&self) -> BTreeSet<PackageId> {
        self.tainted.keys().cloned().collect()
    }

    pub fn reason(&self, package: &PackageId) -> Option<&str> {
        self.tainted.get(package).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.tainted.clear();
    }

    pub fn len(&self) -> usize {
        self.tainted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tainted.is_empty()
    }
}
