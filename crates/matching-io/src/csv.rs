// CSV import into an in-memory store

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::Deserialize;

use visigrid_matching::{MatchError, Row, Value, VecStore};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a column's cells become values. Untyped columns are text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    Float,
    Date,
    DateTime,
    Bool,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "datetime"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

pub type ColumnTypes = HashMap<String, ColumnType>;

pub fn read_store(path: &Path, types: &ColumnTypes) -> Result<VecStore<Row>, MatchError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| MatchError::Store(format!("cannot read {}: {e}", path.display())))?;
    let rows = read_rows(reader, types)?;
    debug!("loaded {} rows from {}", rows.len(), path.display());
    Ok(VecStore::new(rows))
}

/// Parse CSV text with a header row. Empty cells are left absent.
pub fn parse_rows(data: &str, types: &ColumnTypes) -> Result<Vec<Row>, MatchError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_bytes());
    read_rows(reader, types)
}

fn read_rows<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    types: &ColumnTypes,
) -> Result<Vec<Row>, MatchError> {
    let headers: Vec<String> = reader
        .headers()
        .map_err(MatchError::store)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if let Some(missing) = types.keys().find(|name| !headers.contains(*name)) {
        return Err(MatchError::Store(format!(
            "typed column '{missing}' not found in header"
        )));
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(MatchError::store)?;
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            let kind = types.get(header).copied().unwrap_or_default();
            let value = parse_cell(cell, kind).ok_or_else(|| {
                MatchError::Store(format!(
                    "row {}, column '{header}': cannot parse {cell:?} as {kind}",
                    i + 1
                ))
            })?;
            row.set(header.clone(), value);
        }
        rows.push(row);
    }

    Ok(rows)
}

fn parse_cell(cell: &str, kind: ColumnType) -> Option<Value> {
    let trimmed = cell.trim();
    match kind {
        ColumnType::Text => Some(Value::from(cell)),
        ColumnType::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        ColumnType::Float => trimmed.parse::<f64>().ok().map(Value::from),
        ColumnType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .ok()
            .map(Value::from),
        ColumnType::DateTime => NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
            .ok()
            .map(Value::from),
        ColumnType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use visigrid_matching::{RecordId, Store};

    fn types(pairs: &[(&str, ColumnType)]) -> ColumnTypes {
        pairs
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect()
    }

    #[test]
    fn parses_typed_columns() {
        let data = "\
name,amount,count,posted,at,cleared
Basecamp,25.0,2,2012-01-01,2012-01-01 09:30:00,true
Github,25,,2012-01-02,,0
";
        let t = types(&[
            ("amount", ColumnType::Float),
            ("count", ColumnType::Integer),
            ("posted", ColumnType::Date),
            ("at", ColumnType::DateTime),
            ("cleared", ColumnType::Bool),
        ]);
        let rows = parse_rows(data, &t).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].get("name"), Some(&Value::from("Basecamp")));
        assert_eq!(rows[0].get("amount"), Some(&Value::from(25.0)));
        assert_eq!(rows[0].get("count"), Some(&Value::from(2i64)));
        assert_eq!(
            rows[0].get("posted"),
            Some(&Value::from(NaiveDate::from_ymd_opt(2012, 1, 1).unwrap()))
        );
        assert!(matches!(rows[0].get("at"), Some(Value::DateTime(_))));
        assert_eq!(rows[0].get("cleared"), Some(&Value::Bool(true)));

        // "25" and "25.0" are the same float.
        assert_eq!(rows[1].get("amount"), rows[0].get("amount"));
        assert_eq!(rows[1].get("count"), None);
        assert_eq!(rows[1].get("at"), None);
        assert_eq!(rows[1].get("cleared"), Some(&Value::Bool(false)));
    }

    #[test]
    fn parse_error_names_row_and_column() {
        let data = "name,posted\nok,2012-01-01\nbad,01/02/2012\n";
        let err = parse_rows(data, &types(&[("posted", ColumnType::Date)])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 2"), "{msg}");
        assert!(msg.contains("'posted'"), "{msg}");
    }

    #[test]
    fn rejects_unknown_typed_column() {
        let err = parse_rows("a,b\n1,2\n", &types(&[("c", ColumnType::Integer)])).unwrap_err();
        assert!(err.to_string().contains("'c'"));
    }

    #[test]
    fn reads_store_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mid,esn").unwrap();
        writeln!(file, "7275551111,11111111111").unwrap();
        writeln!(file, "8135554444,").unwrap();

        let store = read_store(file.path(), &ColumnTypes::new()).unwrap();
        assert_eq!(store.len(), 2);
        let second = store.find(RecordId(1)).unwrap();
        assert_eq!(second.get("mid"), Some(&Value::from("8135554444")));
        assert_eq!(second.get("esn"), None);
    }

    #[test]
    fn file_parse_error_names_row_and_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mid,amount").unwrap();
        writeln!(file, "7275551111,25.00").unwrap();
        writeln!(file, "8135554444,twenty").unwrap();

        let err = read_store(file.path(), &types(&[("amount", ColumnType::Float)])).unwrap_err();
        assert!(matches!(err, MatchError::Store(_)));
        assert!(err.to_string().contains("row 2, column 'amount'"));
    }

    #[test]
    fn missing_file_is_a_store_error() {
        let err = read_store(Path::new("/nonexistent/rows.csv"), &ColumnTypes::new()).unwrap_err();
        assert!(matches!(err, MatchError::Store(_)));
    }
}
