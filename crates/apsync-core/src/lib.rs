//! # apsync-core
//!
//! Shared types for reconciling abstract Access Providers with the native
//! authorization objects of a SQL data warehouse.
//!
//! This crate provides:
//! - The Access Provider model (who / what / locks) and feedback records
//! - Namespaced role identifiers (account, database and application roles)
//! - The naming engine used to derive native role names
//! - The permission catalog and ordered grant sets
//! - The structured row-filter expression tree
//! - Configuration loading
//!
//! Everything in here is pure: no warehouse access happens in this crate.

pub mod catalog;
pub mod config;
pub mod filter;
pub mod grant;
pub mod locking;
pub mod model;
pub mod naming;
pub mod role_id;

pub use catalog::{CatalogError, ObjectKind, PermissionCatalog};
pub use config::{ConfigError, ConnectionConfig, OwnerTagConfig, SyncConfig};
pub use filter::{
    Aggregator, AggregatorOperator, Comparison, ComparisonOperator, ExpressionVisitor,
    FilterExpression, Literal, Reference, ReferenceEntityType,
};
pub use grant::{Grant, GrantDiff, GrantSet};
pub use model::{
    AccessProvider, AccessProviderFeedback, AccessProviderKind, DataObjectReference,
    ExternalAccessProvider, Owner, RoleScope, WhatItem, WhoItem,
};
pub use naming::{NamingConstraints, NamingError, UniqueNameGenerator};
pub use role_id::{RoleId, RoleIdError, RoleNamespace};
