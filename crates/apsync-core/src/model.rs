//! Access Provider model.
//!
//! An [`AccessProvider`] is the unit of desired state handed to the export
//! engine. The import direction produces [`ExternalAccessProvider`]s, which
//! carry the extra lock and ownership metadata the warehouse side knows about.

use serde::{Deserialize, Serialize};

use crate::catalog::ObjectKind;
use crate::filter::FilterExpression;

/// Which applier handles an Access Provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessProviderKind {
    Grant,
    Mask,
    Filtered,
    Share,
    Purpose,
    Deny,
}

impl AccessProviderKind {
    /// Kinds the export engine reconciles.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            AccessProviderKind::Grant
                | AccessProviderKind::Mask
                | AccessProviderKind::Filtered
                | AccessProviderKind::Share
        )
    }
}

/// Namespace a grant Access Provider's role is generated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleScope {
    #[default]
    AccountRole,
    DatabaseRole,
    ApplicationRole,
}

/// Grantees of an Access Provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoItem {
    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Roles this Access Provider is granted to. Either `ID:<access provider id>`
    /// or a native (possibly namespaced) role name.
    #[serde(default)]
    pub inherit_from: Vec<String>,

    /// Consumer accounts, for shares.
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Reference to a warehouse object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataObjectReference {
    pub full_name: String,

    #[serde(rename = "type")]
    pub object_type: String,
}

impl DataObjectReference {
    pub fn new(full_name: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            object_type: object_type.into(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_data_object_type(&self.object_type)
    }

    /// Whether this references an object inside an inbound share.
    pub fn is_shared(&self) -> bool {
        self.object_type.to_ascii_lowercase().starts_with("shared-")
    }

    /// Dotted path segments.
    pub fn path(&self) -> Vec<&str> {
        if self.full_name.is_empty() {
            return Vec::new();
        }
        self.full_name.split('.').collect()
    }

    pub fn database(&self) -> Option<&str> {
        self.path().first().copied()
    }
}

/// Objects and permissions of an Access Provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatItem {
    pub data_object: DataObjectReference,

    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Owner metadata, stamped on roles as tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// Desired state for one grant, mask, filter or share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProvider {
    /// Stable id across runs.
    pub id: String,

    /// Native name recorded by the previous run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_hint: Option<String>,

    #[serde(rename = "action")]
    pub kind: AccessProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_scope: Option<RoleScope>,

    #[serde(default)]
    pub who: WhoItem,

    #[serde(default)]
    pub what: Vec<WhatItem>,

    /// Structured row-filter predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<FilterExpression>,

    /// Legacy row-filter predicate with `{column}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_rule: Option<String>,

    /// Requested mask generator, e.g. `SHA256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_type: Option<String>,

    #[serde(default)]
    pub owners: Vec<Owner>,

    #[serde(default)]
    pub who_locked: bool,

    #[serde(default)]
    pub inheritance_locked: bool,

    #[serde(default)]
    pub what_locked: bool,

    #[serde(default)]
    pub name_locked: bool,

    #[serde(default)]
    pub delete_locked: bool,

    #[serde(default)]
    pub delete: bool,
}

impl AccessProvider {
    /// A minimal Access Provider of the given kind.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: AccessProviderKind) -> Self {
        Self {
            id: id.into(),
            external_id: None,
            name: name.into(),
            naming_hint: None,
            kind,
            role_scope: None,
            who: WhoItem::default(),
            what: Vec::new(),
            filter_criteria: None,
            policy_rule: None,
            mask_type: None,
            owners: Vec::new(),
            who_locked: false,
            inheritance_locked: false,
            what_locked: false,
            name_locked: false,
            delete_locked: false,
            delete: false,
        }
    }

    /// The hint native names are derived from.
    pub fn hint(&self) -> &str {
        self.naming_hint
            .as_deref()
            .filter(|hint| !hint.trim().is_empty())
            .unwrap_or(&self.name)
    }

    pub fn scope(&self) -> RoleScope {
        self.role_scope.unwrap_or_default()
    }

    /// Whether nothing about who/inheritance/what is locked.
    pub fn fully_unlocked(&self) -> bool {
        !self.who_locked && !self.inheritance_locked && !self.what_locked
    }
}

/// Outcome of processing one Access Provider, handed back to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProviderFeedback {
    pub access_provider: String,

    #[serde(default)]
    pub actual_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AccessProviderFeedback {
    pub fn new(access_provider: impl Into<String>) -> Self {
        Self {
            access_provider: access_provider.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.errors.push(error.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Access Provider reconstructed from warehouse state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccessProvider {
    pub external_id: String,

    pub name: String,

    pub naming_hint: String,

    #[serde(rename = "action")]
    pub kind: AccessProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_scope: Option<RoleScope>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub who: WhoItem,

    #[serde(default)]
    pub what: Vec<WhatItem>,

    /// Raw body text for imported masking and row access policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(default)]
    pub owners: Vec<Owner>,

    #[serde(default)]
    pub not_internalizable: bool,

    #[serde(default)]
    pub incomplete: bool,

    #[serde(default)]
    pub who_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who_locked_reason: Option<String>,

    #[serde(default)]
    pub inheritance_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance_locked_reason: Option<String>,

    #[serde(default)]
    pub what_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_locked_reason: Option<String>,

    #[serde(default)]
    pub name_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_locked_reason: Option<String>,

    #[serde(default)]
    pub delete_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_locked_reason: Option<String>,
}

impl ExternalAccessProvider {
    pub fn new(
        external_id: impl Into<String>,
        name: impl Into<String>,
        kind: AccessProviderKind,
    ) -> Self {
        let name = name.into();
        Self {
            external_id: external_id.into(),
            naming_hint: name.clone(),
            name,
            kind,
            role_scope: None,
            resource_type: None,
            who: WhoItem::default(),
            what: Vec::new(),
            policy: None,
            owners: Vec::new(),
            not_internalizable: false,
            incomplete: false,
            who_locked: false,
            who_locked_reason: None,
            inheritance_locked: false,
            inheritance_locked_reason: None,
            what_locked: false,
            what_locked_reason: None,
            name_locked: false,
            name_locked_reason: None,
            delete_locked: false,
            delete_locked_reason: None,
        }
    }

    /// Lock who, inheritance, name and delete while leaving what editable.
    pub fn lock_partially(&mut self, reason: &str) {
        self.who_locked = true;
        self.who_locked_reason = Some(reason.to_string());
        self.inheritance_locked = true;
        self.inheritance_locked_reason = Some(reason.to_string());
        self.name_locked = true;
        self.name_locked_reason = Some(reason.to_string());
        self.delete_locked = true;
        self.delete_locked_reason = Some(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_access_provider() {
        let yaml = r#"
id: ap-1
name: Sales readers
action: grant
roleScope: databaseRole
who:
  users: [alice@example.com]
  inheritFrom: ["ID:ap-2"]
what:
  - dataObject: { fullName: SALES.PUBLIC.ORDERS, type: table }
    permissions: [SELECT]
whatLocked: true
"#;
        let ap: AccessProvider = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(ap.kind, AccessProviderKind::Grant);
        assert_eq!(ap.scope(), RoleScope::DatabaseRole);
        assert_eq!(ap.hint(), "Sales readers");
        assert_eq!(ap.who.inherit_from, vec!["ID:ap-2"]);
        assert_eq!(ap.what[0].data_object.kind(), ObjectKind::Table);
        assert_eq!(ap.what[0].data_object.database(), Some("SALES"));
        assert!(ap.what_locked);
        assert!(!ap.fully_unlocked());
    }

    #[test]
    fn test_naming_hint_preferred() {
        let mut ap = AccessProvider::new("1", "Display Name", AccessProviderKind::Grant);
        ap.naming_hint = Some("hint".to_string());
        assert_eq!(ap.hint(), "hint");

        ap.naming_hint = Some("  ".to_string());
        assert_eq!(ap.hint(), "Display Name");
    }

    #[test]
    fn test_unsupported_kinds() {
        assert!(AccessProviderKind::Share.is_supported());
        assert!(!AccessProviderKind::Purpose.is_supported());
        assert!(!AccessProviderKind::Deny.is_supported());
    }

    #[test]
    fn test_shared_reference() {
        let reference = DataObjectReference::new("PARTNER_DB.PUBLIC.T", "shared-table");
        assert!(reference.is_shared());
        assert_eq!(reference.path(), vec!["PARTNER_DB", "PUBLIC", "T"]);
    }
}
