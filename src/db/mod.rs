//! Database module for PostgreSQL connection and audit persistence

pub mod audit_repo;
pub mod connection;

pub use audit_repo::{PgAuditLog, AUDIT_TABLE_DDL};
pub use connection::{init_pool, ping, DbPool, PoolSettings};
