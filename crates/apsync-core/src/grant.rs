//! Grants and ordered grant sets.

use std::collections::HashSet;
use std::fmt;

use crate::catalog::ObjectKind;

/// A single permission on a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    /// Normalized (uppercase) permission token, e.g. `SELECT`.
    pub permission: String,
    pub on_type: ObjectKind,
    /// Dotted object path, e.g. `DB.SCHEMA.TABLE`. Empty for account grants.
    pub on: String,
}

impl Grant {
    pub fn new(permission: impl AsRef<str>, on_type: ObjectKind, on: impl Into<String>) -> Self {
        Self {
            permission: permission.as_ref().trim().to_ascii_uppercase(),
            on_type,
            on: on.into(),
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.on.is_empty() {
            write!(f, "{} ON {}", self.permission, self.on_type)
        } else {
            write!(f, "{} ON {} {}", self.permission, self.on_type, self.on)
        }
    }
}

/// Deduplicated set of grants.
///
/// Iteration yields database grants first, then schema, table/view and column
/// grants, with anything else last. Inside a rank, grants keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: Vec<Grant>,
    index: HashSet<Grant>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a grant. Returns `false` when it was already present.
    pub fn add(&mut self, grant: Grant) -> bool {
        if self.index.contains(&grant) {
            return false;
        }
        let rank = grant.on_type.rank();
        let position = self.grants.partition_point(|g| g.on_type.rank() <= rank);
        self.index.insert(grant.clone());
        self.grants.insert(position, grant);
        true
    }

    pub fn contains(&self, grant: &Grant) -> bool {
        self.index.contains(grant)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Grant> {
        self.grants.iter()
    }

    /// Grants in `self` that are not in `other`, in `self`'s order.
    pub fn difference(&self, other: &GrantSet) -> GrantSet {
        self.iter()
            .filter(|g| !other.contains(g))
            .cloned()
            .collect()
    }

    /// Keep only grants matching the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&Grant) -> bool) {
        self.grants.retain(|g| keep(g));
        self.index = self.grants.iter().cloned().collect();
    }

    /// Whether any grant below database/schema level is present.
    pub fn has_descendant_grants(&self) -> bool {
        self.grants
            .iter()
            .any(|g| !matches!(g.on_type, ObjectKind::Database | ObjectKind::Schema))
    }
}

impl Extend<Grant> for GrantSet {
    fn extend<T: IntoIterator<Item = Grant>>(&mut self, iter: T) {
        for grant in iter {
            self.add(grant);
        }
    }
}

impl FromIterator<Grant> for GrantSet {
    fn from_iter<T: IntoIterator<Item = Grant>>(iter: T) -> Self {
        let mut set = GrantSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a GrantSet {
    type Item = &'a Grant;
    type IntoIter = std::slice::Iter<'a, Grant>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Symmetric difference between the grants found on an object and the grants
/// expected for it.
#[derive(Debug, Clone, Default)]
pub struct GrantDiff {
    pub to_add: GrantSet,
    pub to_remove: GrantSet,
}

impl GrantDiff {
    /// `to_add = expected − found`, `to_remove = found − expected`.
    pub fn between(found: &GrantSet, expected: &GrantSet) -> Self {
        Self {
            to_add: expected.difference(found),
            to_remove: found.difference(expected),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}
