//! Read-side persistence boundary for flowmesh.
//!
//! Provides the [`ObjectStore`] trait and [`SqliteObjectStore`] /
//! [`PostgresObjectStore`] implementations for resolving step objects and
//! stamping a flow's latest run time.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use backend::ObjectStore;
pub use error::StoreError;
pub use postgres::PostgresObjectStore;
pub use sqlite::SqliteObjectStore;
