// Attribute index stored as a SQLite set table

use std::path::Path;

use log::warn;
use rusqlite::{params, Connection};

use visigrid_matching::{Attribute, AttributeIndex, MatchError, RecordId, Value};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attribute_index (
    attr TEXT NOT NULL,
    value TEXT NOT NULL,           -- JSON encoding of the typed value
    record_id INTEGER NOT NULL,
    UNIQUE (attr, value, record_id)
);
"#;

/// Set-per-(attribute, value) index in SQLite. Each handle starts from an
/// empty table; ids come back in insertion order.
pub struct SqliteIndex {
    conn: Connection,
}

impl SqliteIndex {
    pub fn in_memory() -> Result<Self, MatchError> {
        let conn = Connection::open_in_memory().map_err(MatchError::index)?;
        Self::from_connection(conn)
    }

    pub fn open(path: &Path) -> Result<Self, MatchError> {
        let conn = Connection::open(path).map_err(MatchError::index)?;
        Self::from_connection(conn)
    }

    /// Create the table if needed and flush anything a previous run left.
    pub fn from_connection(conn: Connection) -> Result<Self, MatchError> {
        conn.execute_batch(SCHEMA).map_err(MatchError::index)?;
        let mut index = Self { conn };
        let stale = index.len()?;
        if stale > 0 {
            warn!("flushing {stale} stale entries from attribute index");
        }
        index.flush()?;
        Ok(index)
    }

    /// Total `(attr, value, id)` entries.
    pub fn len(&self) -> Result<usize, MatchError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM attribute_index", [], |row| row.get(0))
            .map_err(MatchError::index)?;
        usize::try_from(count).map_err(MatchError::index)
    }

    pub fn is_empty(&self) -> Result<bool, MatchError> {
        Ok(self.len()? == 0)
    }

    fn flush(&mut self) -> Result<(), MatchError> {
        self.conn
            .execute("DELETE FROM attribute_index", [])
            .map_err(MatchError::index)?;
        Ok(())
    }
}

/// JSON key for a value. Keys are equal exactly when the values are, so
/// negative zero is folded into zero first.
fn value_key(value: &Value) -> Result<String, MatchError> {
    match value {
        Value::Float(x) if x.0 == 0.0 => serde_json::to_string(&Value::from(0.0)),
        _ => serde_json::to_string(value),
    }
    .map_err(MatchError::index)
}

impl<A: Attribute> AttributeIndex<A> for SqliteIndex {
    fn put(&mut self, attr: &A, value: Option<&Value>, id: RecordId) -> Result<(), MatchError> {
        let Some(value) = value else {
            return Ok(());
        };
        let id = i64::try_from(id.0).map_err(MatchError::index)?;
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO attribute_index (attr, value, record_id) VALUES (?1, ?2, ?3)",
            )
            .map_err(MatchError::index)?;
        stmt.execute(params![attr.to_string(), value_key(value)?, id])
            .map_err(MatchError::index)?;
        Ok(())
    }

    fn get(&self, attr: &A, value: &Value) -> Result<Option<Vec<RecordId>>, MatchError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT record_id FROM attribute_index WHERE attr = ?1 AND value = ?2 ORDER BY rowid",
            )
            .map_err(MatchError::index)?;
        let rows = stmt
            .query_map(params![attr.to_string(), value_key(value)?], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(MatchError::index)?;

        let mut ids = Vec::new();
        for raw in rows {
            let raw = raw.map_err(MatchError::index)?;
            let id = u64::try_from(raw).map_err(MatchError::index)?;
            ids.push(RecordId(id));
        }
        Ok(if ids.is_empty() { None } else { Some(ids) })
    }

    fn clear(&mut self) -> Result<(), MatchError> {
        self.flush()
    }
}
