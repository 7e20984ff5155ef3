//! # apsync-import
//!
//! Import direction: reads warehouse roles and policies back into
//! [`ExternalAccessProvider`](apsync_core::ExternalAccessProvider)s.
//!
//! The same locking rules as export apply, so that an imported Access
//! Provider exported again leaves the warehouse unchanged:
//! - system roles and malformed namespaced ids are not internalizable
//! - roles of excluded owners are not internalizable, or only partially
//!   locked when group linking is enabled
//! - masking and row access policies are imported read-only

pub mod error;
pub mod importer;
pub mod policies;
pub mod what;

pub use error::ImportError;
pub use importer::SourceImporter;
