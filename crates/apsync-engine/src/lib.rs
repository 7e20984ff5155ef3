//! # apsync-engine
//!
//! Export direction: reconciles desired Access Providers with a warehouse.
//!
//! A run goes through these stages:
//!
//! 1. **Classify** every Access Provider as create, update, rename or delete
//!    and compute the final role name of each grant ([`classify`]).
//! 2. Apply masks, then filters, then shares. Their who clauses reference the
//!    role names computed in step 1 ([`masks`], [`filters`], [`shares`]).
//! 3. Apply grants: drop deleted roles, then create/rename/update the rest
//!    ([`grants`], [`rename`], [`merge`]).
//!
//! Every processed Access Provider yields exactly one
//! [`AccessProviderFeedback`](apsync_core::AccessProviderFeedback) record,
//! delivered to a [`FeedbackSink`].
//!
//! All warehouse access goes through the [`Repository`](apsync_repository::Repository)
//! held by the [`RunContext`], which also carries the per-run caches.

pub mod classify;
pub mod context;
pub mod error;
pub mod expand;
pub mod feedback;
pub mod filters;
pub mod grants;
pub mod masks;
pub mod merge;
pub mod naming;
pub mod rename;
pub mod shares;
pub mod syncer;
pub mod who;

pub use classify::{Action, Classification, Mutation};
pub use context::RunContext;
pub use error::SyncError;
pub use feedback::{CollectingFeedbackSink, FeedbackSink};
pub use syncer::ExportSyncer;
