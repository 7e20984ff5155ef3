//! SQL adapter for apsync.
//!
//! [`SqlRepository`] implements the [`apsync_repository::Repository`] contract
//! by building statements (see [`statements`]) and handing them to a
//! [`QueryExecutor`]. The production executor, [`SqlxExecutor`], runs them on a
//! sqlx connection pool and enforces the row limit on listings.

pub mod executor;
pub mod repository;
pub mod statements;

pub use executor::{QueryExecutor, Row, SqlxExecutor, SqlxExecutorOptions};
pub use repository::SqlRepository;
