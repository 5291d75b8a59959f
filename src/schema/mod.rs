//! Schema Catalog
//!
//! Introspects and caches the authorized schema shape per dataset scope.

pub mod catalog;
pub mod postgres;
pub mod snapshot;

pub use catalog::{SchemaCatalog, SchemaSource};
pub use postgres::PgSchemaSource;
pub use snapshot::{ColumnShape, SchemaSnapshot, TableShape};
