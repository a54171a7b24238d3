//! Public-API snapshots and the compatibility predicate that drives re-taint
//!
//! A snapshot maps each externally visible type of a package to the set of its
//! visible member signatures. Snapshots are merged per type when only
//! dependency surfaces are known, replaced wholesale when the package itself is
//! compiled, and compared against the previous build to decide whether
//! dependents must be recompiled.

use crate::ids::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Structured summary of a package's visible surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubApi {
    types: BTreeMap<TypeId, BTreeSet<String>>,
}

impl PubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Number of types in the snapshot
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Record a visible type with no members (yet)
    pub fn add_type(&mut self, owner: TypeId) {
        self.types.entry(owner).or_default();
    }

    /// Record one member signature of a type.
    ///
    /// Whitespace runs are collapsed to single spaces so that a signature
    /// always fits on one ledger line.
    pub fn add_member(&mut self, owner: TypeId, signature: &str) {
        let normalized = signature.split_whitespace().collect::<Vec<_>>().join(" ");
        let members = self.types.entry(owner).or_default();
        if !normalized.is_empty() {
            members.insert(normalized);
        }
    }

    /// Builder-style variant of [`PubApi::add_member`]
    pub fn with_member(mut self, owner: TypeId, signature: &str) -> Self {
        self.add_member(owner, signature);
        self
    }

    pub fn contains_type(&self, owner: &TypeId) -> bool {
        self.types.contains_key(owner)
    }

    pub fn members(&self, owner: &TypeId) -> Option<&BTreeSet<String>> {
        self.types.get(owner)
    }

    /// Visible types in sorted order
    pub fn types(&self) -> impl Iterator<Item = &TypeId> {
        self.types.keys()
    }

    /// Type-level union: each type present in `partial` replaces that type's
    /// entry, every other type is kept.
    pub fn merge(&self, partial: &PubApi) -> PubApi {
        let mut merged = self.clone();
        for (owner, members) in &partial.types {
            merged.types.insert(owner.clone(), members.clone());
        }
        merged
    }

    /// Wholesale replacement by the snapshot of a fully compiled package
    pub fn replace(&self, full: &PubApi) -> PubApi {
        full.clone()
    }

    /// Compatibility under the default (strict) policy
    pub fn is_backward_compatible_with(&self, older: &PubApi) -> bool {
        StrictEquality.is_compatible(older, self)
    }

    pub fn is_backward_compatible_with_policy(
        &self,
        older: &PubApi,
        policy: &dyn CompatibilityPolicy,
    ) -> bool {
        policy.is_compatible(older, self)
    }

    /// Ordered list of differences going from `older` to `self`
    pub fn diff(&self, older: &PubApi) -> Vec<ApiDelta> {
        let owners: BTreeSet<&TypeId> = self.types.keys().chain(older.types.keys()).collect();
        let mut deltas = Vec::new();

        for owner in owners {
            match (older.types.get(owner), self.types.get(owner)) {
                (Some(_), None) => deltas.push(ApiDelta::TypeRemoved(owner.clone())),
                (None, Some(_)) => deltas.push(ApiDelta::TypeAdded(owner.clone())),
                (Some(before), Some(after)) => {
                    for signature in before.difference(after) {
                        deltas.push(ApiDelta::MemberRemoved {
                            owner: owner.clone(),
                            signature: signature.clone(),
                        });
                    }
                    for signature in after.difference(before) {
                        deltas.push(ApiDelta::MemberAdded {
                            owner: owner.clone(),
                            signature: signature.clone(),
                        });
                    }
                }
                (None, None) => {}
            }
        }

        deltas
    }

    /// Flat item view used by the ledger: a type with no members yields one
    /// `(type, None)` item, otherwise one item per member.
    pub fn items(&self) -> Vec<(&TypeId, Option<&str>)> {
        let mut items = Vec::new();
        for (owner, members) in &self.types {
            if members.is_empty() {
                items.push((owner, None));
            } else {
                items.extend(members.iter().map(|m| (owner, Some(m.as_str()))));
            }
        }
        items
    }
}

/// One human-readable API difference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiDelta {
    TypeAdded(TypeId),
    TypeRemoved(TypeId),
    MemberAdded { owner: TypeId, signature: String },
    MemberRemoved { owner: TypeId, signature: String },
}

impl fmt::Display for ApiDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeAdded(owner) => write!(f, "+ type {}", owner),
            Self::TypeRemoved(owner) => write!(f, "- type {}", owner),
            Self::MemberAdded { owner, signature } => write!(f, "+ {}: {}", owner, signature),
            Self::MemberRemoved { owner, signature } => write!(f, "- {}: {}", owner, signature),
        }
    }
}

/// Decides whether a new snapshot can stand in for an older one without
/// recompiling dependents. Must be deterministic and total.
pub trait CompatibilityPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_compatible(&self, older: &PubApi, newer: &PubApi) -> bool;
}

/// Any difference at all is incompatible
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictEquality;

impl CompatibilityPolicy for StrictEquality {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn is_compatible(&self, older: &PubApi, newer: &PubApi) -> bool {
        older == newer
    }
}

/// Additions are compatible, removals are not
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberSuperset;

impl CompatibilityPolicy for MemberSuperset {
    fn name(&self) -> &'static str {
        "superset"
    }

    fn is_compatible(&self, older: &PubApi, newer: &PubApi) -> bool {
        older.types.iter().all(|(owner, members)| {
            newer
                .types
                .get(owner)
                .is_some_and(|current| current.is_superset(members))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ty(s: &str) -> TypeId {
        s.parse().unwrap()
    }

    fn widget_api() -> PubApi {
        PubApi::new()
            .with_member(ty("app:ui.Widget"), "fn draw(&self)")
            .with_member(ty("app:ui.Widget"), "fn size(&self) -> u32")
    }

    #[test]
    fn test_empty_snapshot() {
        let api = PubApi::new();
        assert!(api.is_empty());
        assert_eq!(api.len(), 0);
        assert!(api.items().is_empty());
    }

    #[test]
    fn test_add_member_normalizes_whitespace() {
        let api = PubApi::new().with_member(ty("app:ui.Widget"), "fn  draw(\n&self )");
        let members = api.members(&ty("app:ui.Widget")).unwrap();
        assert!(members.contains("fn draw( &self )"));
    }

    #[test]
    fn test_merge_replaces_only_partial_types() {
        let mut base = widget_api();
        base.add_member(ty("app:ui.Button"), "fn click(&self)");

        let partial = PubApi::new().with_member(ty("app:ui.Widget"), "fn draw(&self)");
        let merged = base.merge(&partial);

        assert_eq!(merged.members(&ty("app:ui.Widget")).unwrap().len(), 1);
        assert!(merged.contains_type(&ty("app:ui.Button")));
    }

    #[test]
    fn test_replace_discards_previous_types() {
        let base = widget_api();
        let full = PubApi::new().with_member(ty("app:ui.Button"), "fn click(&self)");
        let replaced = base.replace(&full);
        assert!(!replaced.contains_type(&ty("app:ui.Widget")));
        assert_eq!(replaced, full);
    }

    #[test]
    fn test_strict_policy_flags_additions() {
        let older = widget_api();
        let newer = older
            .clone()
            .with_member(ty("app:ui.Widget"), "fn hide(&mut self)");
        assert!(!newer.is_backward_compatible_with(&older));
        assert!(older.is_backward_compatible_with(&older.clone()));
    }

    #[test]
    fn test_superset_policy_accepts_additions_only() {
        let older = widget_api();
        let grown = older
            .clone()
            .with_member(ty("app:ui.Widget"), "fn hide(&mut self)");
        let shrunk = PubApi::new().with_member(ty("app:ui.Widget"), "fn draw(&self)");

        assert!(grown.is_backward_compatible_with_policy(&older, &MemberSuperset));
        assert!(!shrunk.is_backward_compatible_with_policy(&older, &MemberSuperset));
    }

    #[test]
    fn test_diff_is_ordered_and_readable() {
        let older = widget_api().with_member(ty("app:ui.Old"), "fn gone()");
        let newer = PubApi::new()
            .with_member(ty("app:ui.Widget"), "fn draw(&self)")
            .with_member(ty("app:ui.Widget"), "fn show(&self)")
            .with_member(ty("app:ui.Zed"), "fn z()");

        let rendered: Vec<String> = newer.diff(&older).iter().map(|d| d.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "- type app:ui.Old".to_string(),
                "- app:ui.Widget: fn size(&self) -> u32".to_string(),
                "+ app:ui.Widget: fn show(&self)".to_string(),
                "+ type app:ui.Zed".to_string(),
            ]
        );
    }

    #[test]
    fn test_items_include_memberless_types() {
        let mut api = PubApi::new();
        api.add_type(ty("app:ui.Marker"));
        api.add_member(ty("app:ui.Widget"), "fn draw(&self)");

        let items = api.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], (&ty("app:ui.Marker"), None));
        assert_eq!(items[1], (&ty("app:ui.Widget"), Some("fn draw(&self)")));
    }
}
