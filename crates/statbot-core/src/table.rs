//! Tabular input data and schema inference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Numeric view of the cell, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            // Nested structures are flattened to their JSON text.
            other => Value::Str(other.to_string()),
        }
    }
}

/// An immutable, column-ordered table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    /// Builds a table, rejecting rows whose arity disagrees with the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> AgentResult<Self> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(AgentError::Validation(format!(
                    "row {} has {} cells, expected {}",
                    idx,
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Builds a table from a list of records, as parsed from a JSON array of
    /// objects. Column order follows the first record; missing keys become
    /// nulls and unknown keys in later records are rejected.
    pub fn from_records(records: &[BTreeMap<String, serde_json::Value>]) -> AgentResult<Self> {
        let Some(first) = records.first() else {
            return Ok(Self {
                columns: Vec::new(),
                rows: Vec::new(),
            });
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        let mut rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            for key in record.keys() {
                if !columns.contains(key) {
                    return Err(AgentError::Validation(format!(
                        "record {} has unknown column {:?}",
                        idx, key
                    )));
                }
            }
            let row = columns
                .iter()
                .map(|c| {
                    record
                        .get(c)
                        .cloned()
                        .map(Value::from)
                        .unwrap_or(Value::Null)
                })
                .collect();
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Iterates one row as `(column, value)` pairs.
    pub fn row(&self, idx: usize) -> Option<impl Iterator<Item = (&str, &Value)>> {
        self.rows
            .get(idx)
            .map(|row| self.columns.iter().map(String::as_str).zip(row.iter()))
    }

    /// Infers column roles from the data.
    ///
    /// A column is numeric when every non-null cell is an int or float and at
    /// least one cell is present. String and bool columns are categorical.
    pub fn schema(&self) -> TableSchema {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for (col_idx, name) in self.columns.iter().enumerate() {
            let mut saw_numeric = false;
            let mut saw_categorical = false;
            let mut saw_value = false;
            for row in &self.rows {
                match &row[col_idx] {
                    Value::Null => {}
                    Value::Int(_) | Value::Float(_) => {
                        saw_numeric = true;
                        saw_value = true;
                    }
                    Value::Str(_) | Value::Bool(_) => {
                        saw_categorical = true;
                        saw_value = true;
                    }
                }
            }
            if saw_value && saw_numeric && !saw_categorical {
                numeric.push(name.clone());
            } else if saw_categorical {
                categorical.push(name.clone());
            }
        }
        TableSchema {
            columns: self.columns.clone(),
            numeric_columns: numeric,
            categorical_columns: categorical,
            row_count: self.rows.len(),
        }
    }
}

/// Summary of a table's shape, used to ground code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub row_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_table() -> DataTable {
        DataTable::new(
            vec!["region".into(), "sales".into(), "returns".into()],
            vec![
                vec![
                    Value::Str("North".into()),
                    Value::Int(1200),
                    Value::Float(3.5),
                ],
                vec![
                    Value::Str("South".into()),
                    Value::Int(900),
                    Value::Null,
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let result = DataTable::new(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Int(1)]],
        );
        match result {
            Err(AgentError::Validation(msg)) => assert!(msg.contains("row 0")),
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_inference() {
        let schema = sales_table().schema();
        assert_eq!(schema.numeric_columns, vec!["sales", "returns"]);
        assert_eq!(schema.categorical_columns, vec!["region"]);
        assert_eq!(schema.row_count, 2);
    }

    #[test]
    fn test_all_null_column_is_neither() {
        let table = DataTable::new(
            vec!["empty".into()],
            vec![vec![Value::Null], vec![Value::Null]],
        )
        .unwrap();
        let schema = table.schema();
        assert!(schema.numeric_columns.is_empty());
        assert!(schema.categorical_columns.is_empty());
    }

    #[test]
    fn test_from_records_fills_missing_with_null() {
        let records: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(
            r#"[{"name": "a", "score": 1}, {"name": "b"}]"#,
        )
        .unwrap();
        let table = DataTable::from_records(&records).unwrap();
        assert_eq!(table.columns(), ["name", "score"]);
        assert_eq!(table.rows()[1][1], Value::Null);
    }

    #[test]
    fn test_from_records_rejects_unknown_column() {
        let records: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_str(
            r#"[{"name": "a"}, {"name": "b", "extra": 1}]"#,
        )
        .unwrap();
        assert!(DataTable::from_records(&records).is_err());
    }

    #[test]
    fn test_row_iteration() {
        let table = sales_table();
        let pairs: Vec<(&str, &Value)> = table.row(0).unwrap().collect();
        assert_eq!(pairs[0].0, "region");
        assert_eq!(pairs[1].1, &Value::Int(1200));
        assert!(table.row(5).is_none());
    }
}
