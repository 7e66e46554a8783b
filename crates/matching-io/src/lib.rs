//! Adapters for `visigrid-matching`: CSV and SQLite record stores, and a
//! SQLite-backed attribute index.

pub mod csv;
pub mod sqlite;
pub mod sqlite_index;

use visigrid_matching::{Attribute, AttributeIndex, HashIndex, IndexConfig, MatchError};

pub use crate::csv::{ColumnType, ColumnTypes};
pub use crate::sqlite::SqliteStore;
pub use crate::sqlite_index::SqliteIndex;

/// Build the index backend a job config asks for.
pub fn open_index<A: Attribute + 'static>(
    config: &IndexConfig,
) -> Result<Box<dyn AttributeIndex<A>>, MatchError> {
    Ok(match config {
        IndexConfig::Memory => Box::new(HashIndex::new()),
        IndexConfig::Sqlite { path: Some(path) } => Box::new(SqliteIndex::open(path)?),
        IndexConfig::Sqlite { path: None } => Box::new(SqliteIndex::in_memory()?),
    })
}
