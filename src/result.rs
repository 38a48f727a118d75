//! Aggregated query results.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::{Result, SessionError};
use crate::value::{Column, Row};

/// Result of an aggregating query.
///
/// A query either produced a row set or a status, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Rows {
        fields: Vec<Column>,
        rows: Vec<Row>,
    },
    Status {
        affected_rows: u64,
        insert_id: u64,
    },
}

impl QueryResult {
    /// Get a reference to the rows (empty for a status result)
    #[inline]
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            QueryResult::Status { .. } => &[],
        }
    }

    #[inline]
    pub fn fields(&self) -> &[Column] {
        match self {
            QueryResult::Rows { fields, .. } => fields,
            QueryResult::Status { .. } => &[],
        }
    }

    pub fn is_row_set(&self) -> bool {
        matches!(self, QueryResult::Rows { .. })
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryResult::Status { affected_rows, .. } => Some(*affected_rows),
            QueryResult::Rows { .. } => None,
        }
    }

    pub fn insert_id(&self) -> Option<u64> {
        match self {
            QueryResult::Status { insert_id, .. } => Some(*insert_id),
            QueryResult::Rows { .. } => None,
        }
    }

    /// Get the number of rows returned
    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Get the first row, or None if empty
    pub fn first(&self) -> Option<&Row> {
        self.rows().first()
    }

    /// Get a single row, failing if there is not exactly one row
    pub fn one(&self) -> Result<&Row> {
        match self.rows() {
            [row] => Ok(row),
            rows => Err(SessionError::Protocol(format!(
                "Expected exactly 1 row, got {}",
                rows.len()
            ))),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields().iter().map(|c| c.name.as_str()).collect()
    }

    /// Render the result as JSON.
    ///
    /// Row sets become an array of objects keyed by column name; a status
    /// result becomes `{"affected_rows": .., "insert_id": ..}`.
    pub fn to_json(&self) -> Result<Json> {
        let QueryResult::Rows { fields, rows } = self else {
            return serde_json::to_value(self)
                .map_err(|e| SessionError::Protocol(format!("JSON encoding failed: {}", e)));
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut object = Map::with_capacity(fields.len());
            for (column, value) in fields.iter().zip(row.iter()) {
                let value = serde_json::to_value(value)
                    .map_err(|e| SessionError::Protocol(format!("JSON encoding failed: {}", e)))?;
                object.insert(column.name.clone(), value);
            }
            out.push(Json::Object(object));
        }
        Ok(Json::Array(out))
    }
}
