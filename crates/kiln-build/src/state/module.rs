//! Modules group packages

use crate::ids::{ModuleId, PackageId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    id: ModuleId,
    packages: BTreeSet<PackageId>,
}

impl Module {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            packages: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn packages(&self) -> &BTreeSet<PackageId> {
        &self.packages
    }

    pub(crate) fn add_package(&mut self, package: PackageId) {
        self.packages.insert(package);
    }
}
