mod catalog;
mod database;
mod registry;
pub(crate) mod row;
pub mod sanitize;
pub mod schema;

pub use database::{Database, JsonRow, SqlParams};
pub use registry::{DatabaseHealth, DatabaseRegistry, HealthReport};
pub use sanitize::SqlSanitizeError;
pub use schema::{DatabaseKind, SchemaReport};

pub(crate) use database::query_rows;
