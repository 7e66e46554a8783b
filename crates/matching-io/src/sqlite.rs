// Record store backed by a SQLite table

use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Statement};

use visigrid_matching::store::Visitor;
use visigrid_matching::{MatchError, RecordId, Row, Store, Value};

use crate::csv::DATE_FORMAT;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Rows of one table, keyed by an integer primary key.
///
/// Iteration pages through the table in key order, `batch_size` rows at a
/// time, so only one page is resident. The optional filter is a SQL predicate
/// applied to iteration only; point lookups by key ignore it.
pub struct SqliteStore {
    conn: Connection,
    table: String,
    key: String,
    filter: Option<String>,
    batch_size: usize,
    date_columns: HashSet<String>,
}

impl SqliteStore {
    pub fn new(conn: Connection, table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
            key: key.into(),
            filter: None,
            batch_size: DEFAULT_BATCH_SIZE,
            date_columns: HashSet::new(),
        }
    }

    pub fn open(
        path: &Path,
        table: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, MatchError> {
        let conn = Connection::open(path).map_err(MatchError::store)?;
        Ok(Self::new(conn, table, key))
    }

    pub fn with_filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// TEXT columns to read as `%Y-%m-%d` dates.
    pub fn with_date_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn page_sql(&self) -> String {
        let key = quote_ident(&self.key);
        let filter = self
            .filter
            .as_ref()
            .map(|f| format!(" AND ({f})"))
            .unwrap_or_default();
        format!(
            "SELECT * FROM {} WHERE {key} > ?1{filter} ORDER BY {key} LIMIT ?2",
            quote_ident(&self.table)
        )
    }

    /// One page of `(key, row)` after `after`, in key order.
    fn page(&self, stmt: &mut Statement<'_>, after: i64) -> Result<Vec<(i64, Row)>, MatchError> {
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let limit = i64::try_from(self.batch_size).map_err(MatchError::store)?;
        let mut rows = stmt.query(params![after, limit]).map_err(MatchError::store)?;

        let mut page = Vec::new();
        while let Some(row) = rows.next().map_err(MatchError::store)? {
            page.push(self.convert(row, &columns)?);
        }
        Ok(page)
    }

    fn convert(&self, row: &rusqlite::Row<'_>, columns: &[String]) -> Result<(i64, Row), MatchError> {
        let mut key = None;
        let mut record = Row::new();
        for (i, name) in columns.iter().enumerate() {
            let cell = row.get_ref(i).map_err(MatchError::store)?;
            if *name == self.key {
                key = Some(cell.as_i64().map_err(|_| {
                    MatchError::Store(format!("key column '{name}' must be an integer"))
                })?);
            }
            if let Some(value) = self.convert_cell(name, cell)? {
                record.set(name.clone(), value);
            }
        }
        let key = key.ok_or_else(|| {
            MatchError::Store(format!("key column '{}' not in table '{}'", self.key, self.table))
        })?;
        Ok((key, record))
    }

    fn convert_cell(&self, column: &str, cell: ValueRef<'_>) -> Result<Option<Value>, MatchError> {
        Ok(match cell {
            ValueRef::Null => None,
            ValueRef::Integer(n) => Some(Value::Int(n)),
            ValueRef::Real(x) => Some(Value::from(x)),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    MatchError::Store(format!("column '{column}': invalid UTF-8: {e}"))
                })?;
                if self.date_columns.contains(column) {
                    let date = NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| {
                        MatchError::Store(format!("column '{column}': cannot parse {text:?} as date"))
                    })?;
                    Some(Value::Date(date))
                } else {
                    Some(Value::from(text))
                }
            }
            ValueRef::Blob(_) => {
                return Err(MatchError::Store(format!(
                    "column '{column}': blob values are not supported"
                )))
            }
        })
    }
}

impl Store for SqliteStore {
    type Record = Row;

    fn for_each(&self, visit: &mut Visitor<'_, Row>) -> Result<(), MatchError> {
        let mut stmt = self.conn.prepare(&self.page_sql()).map_err(MatchError::store)?;
        let mut after = i64::MIN;
        let mut pages = 0usize;
        loop {
            let page = self.page(&mut stmt, after)?;
            pages += 1;
            for (key, row) in &page {
                visit(record_id(*key)?, row)?;
            }
            match page.last() {
                Some((key, _)) if page.len() == self.batch_size => after = *key,
                _ => break,
            }
        }
        debug!("read '{}' in {pages} pages", self.table);
        Ok(())
    }

    fn find(&self, id: RecordId) -> Result<Cow<'_, Row>, MatchError> {
        let key = i64::try_from(id.0).map_err(MatchError::store)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(&self.table),
            quote_ident(&self.key)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(MatchError::store)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params![key]).map_err(MatchError::store)?;
        match rows.next().map_err(MatchError::store)? {
            Some(row) => Ok(Cow::Owned(self.convert(row, &columns)?.1)),
            None => Err(MatchError::RecordNotFound(id)),
        }
    }
}

fn record_id(key: i64) -> Result<RecordId, MatchError> {
    u64::try_from(key)
        .map(RecordId)
        .map_err(|_| MatchError::Store(format!("negative key {key} cannot be a record id")))
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use visigrid_matching::{Deduplicator, Matcher, RuleSet};

    const SCHEMA: &str = r#"
CREATE TABLE txns (
    id INTEGER PRIMARY KEY,
    mid TEXT,
    esn TEXT,
    amount REAL,
    qty INTEGER,
    posted TEXT,
    kind TEXT
);
INSERT INTO txns VALUES (1, '7275551111', '11111111111', 25.0, 2, '2010-06-01', 'sale');
INSERT INTO txns VALUES (2, '8135554444', '22222222222', 10.5, NULL, '2010-06-02', 'sale');
INSERT INTO txns VALUES (5, '7275551111', '33333333333', 25.0, 1, '2010-06-15', 'refund');
INSERT INTO txns VALUES (9, '2015559999', NULL, 3.0, 4, '2010-06-20', 'sale');
"#;

    fn store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        SqliteStore::new(conn, "txns", "id").with_date_columns(["posted"])
    }

    fn ids(store: &SqliteStore) -> Vec<u64> {
        store.ids().unwrap().into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn iterates_in_key_order_across_pages() {
        let s = store().with_batch_size(2);
        assert_eq!(ids(&s), vec![1, 2, 5, 9]);

        let s = store().with_batch_size(4);
        assert_eq!(ids(&s), vec![1, 2, 5, 9]);
    }

    #[test]
    fn maps_sqlite_types() {
        let s = store();
        let row = s.find(RecordId(2)).unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
        assert_eq!(row.get("mid"), Some(&Value::from("8135554444")));
        assert_eq!(row.get("amount"), Some(&Value::from(10.5)));
        assert_eq!(row.get("qty"), None);
        assert_eq!(
            row.get("posted"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2010, 6, 2).unwrap()))
        );
    }

    #[test]
    fn filter_applies_to_iteration_only() {
        let s = store().with_filter("kind = 'sale'").with_batch_size(1);
        assert_eq!(ids(&s), vec![1, 2, 9]);
        assert!(s.find(RecordId(5)).is_ok());
    }

    #[test]
    fn missing_key_is_not_found() {
        let s = store();
        assert!(matches!(
            s.find(RecordId(3)),
            Err(MatchError::RecordNotFound(RecordId(3)))
        ));
    }

    #[test]
    fn blobs_are_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, data BLOB); INSERT INTO t VALUES (1, x'00ff');")
            .unwrap();
        let s = SqliteStore::new(conn, "t", "id");
        let err = s.ids().unwrap_err();
        assert!(err.to_string().contains("blob"));
    }

    #[test]
    fn bad_date_text_is_a_store_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, d TEXT); INSERT INTO t VALUES (1, 'June 1');")
            .unwrap();
        let s = SqliteStore::new(conn, "t", "id").with_date_columns(["d"]);
        assert!(matches!(s.find(RecordId(1)), Err(MatchError::Store(_))));
    }

    #[test]
    fn drives_matcher_and_deduplicator() {
        let mut rules = RuleSet::new();
        rules.join("mid".to_string(), "mid".to_string(), 1.0).unwrap();
        let mut matcher = Matcher::new(rules)
            .with_left_store(store().with_batch_size(3))
            .with_right_store(store().with_filter("kind = 'refund'"));
        matcher.run().unwrap();
        assert_eq!(matcher.left_matches().len(), 1);
        assert_eq!(matcher.left_matches()[&RecordId(1)].right, RecordId(5));

        let mut dedup = Deduplicator::new(store());
        dedup.match_attr("amount".to_string());
        dedup.deduplicate().unwrap();
        assert_eq!(
            dedup.groups(),
            &[
                vec![RecordId(1), RecordId(5)],
                vec![RecordId(2)],
                vec![RecordId(9)]
            ]
        );
    }
}
