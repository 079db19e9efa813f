// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::dataset::column::{Column, DataType};
use crate::error::{AskError, AskResult};
use std::collections::HashMap;
use std::sync::Arc;

/// A single cell read out of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl CellValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Int(i) => serde_json::json!(i),
            CellValue::Float(f) => serde_json::json!(f),
            CellValue::Str(s) => serde_json::json!(s),
            CellValue::Bool(b) => serde_json::json!(b),
        }
    }
}

/// An ordered, immutable collection of typed columns. All columns have the
/// same length; cloning a frame clones `Arc` handles, never cell storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    name: String,
    columns: HashMap<String, Arc<Column>>,
    column_order: Vec<String>,
    row_count: usize,
}

impl DataFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: HashMap::new(),
            column_order: Vec::new(),
            row_count: 0,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> AskResult<Self> {
        self.add_column(name, column)?;
        Ok(self)
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> AskResult<()> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(AskError::dataset(format!("Duplicate column '{name}'")));
        }
        if !self.column_order.is_empty() && column.len() != self.row_count {
            return Err(AskError::dataset(format!(
                "Column '{}' has {} rows, expected {}",
                name,
                column.len(),
                self.row_count
            )));
        }
        self.row_count = column.len();
        self.column_order.push(name.clone());
        self.columns.insert(name, Arc::new(column));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.column_order.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn cell(&self, column: &str, row: usize) -> Option<CellValue> {
        let col = self.columns.get(column)?;
        if row >= col.len() {
            return None;
        }
        Some(match col.as_ref() {
            Column::Int64(data) => data[row].map_or(CellValue::Null, CellValue::Int),
            Column::Float64(data) => data[row].map_or(CellValue::Null, CellValue::Float),
            Column::String(data) => data[row]
                .as_ref()
                .map_or(CellValue::Null, |s| CellValue::Str(s.to_string())),
            Column::Boolean(data) => data[row].map_or(CellValue::Null, CellValue::Bool),
        })
    }

    /// New frame holding only the rows named by `indices`, in order. The
    /// source frame is untouched; this is how every "transforming" helper
    /// in the sandbox produces its output.
    pub fn select_rows(&self, indices: &[usize]) -> DataFrame {
        let mut frame = DataFrame::new(format!("{}_view", self.name));
        frame.row_count = indices.len();
        for name in &self.column_order {
            let column = self.columns[name].select_rows(indices);
            frame.column_order.push(name.clone());
            frame.columns.insert(name.clone(), Arc::new(column));
        }
        frame
    }

    /// One-line-per-column schema description used in generation prompts.
    pub fn schema_summary(&self) -> String {
        let mut out = String::new();
        for name in &self.column_order {
            let col = &self.columns[name];
            out.push_str(&format!(
                "- {} ({}, {} rows, {} nulls)\n",
                name,
                col.data_type(),
                col.len(),
                col.null_count()
            ));
        }
        out
    }

    /// Up to `limit` rows rendered as `col=value` pairs for prompt context.
    pub fn sample_rows(&self, limit: usize) -> Vec<String> {
        let mut rows = Vec::new();
        for row in 0..self.row_count.min(limit) {
            let rendered: Vec<String> = self
                .column_order
                .iter()
                .map(|name| {
                    let value = self.columns[name]
                        .get_string(row)
                        .unwrap_or_else(|| "null".to_string());
                    format!("{name}={value}")
                })
                .collect();
            rows.push(rendered.join(", "));
        }
        rows
    }

    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = (0..self.row_count)
            .map(|row| {
                let mut object = serde_json::Map::new();
                for name in &self.column_order {
                    let cell = self
                        .cell(name, row)
                        .map_or(serde_json::Value::Null, |c| c.to_json());
                    object.insert(name.clone(), cell);
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "columns": self.column_order,
            "row_count": self.row_count,
            "rows": rows,
        })
    }

    pub fn column_types(&self) -> Vec<(String, DataType)> {
        self.column_order
            .iter()
            .map(|name| (name.clone(), self.columns[name].data_type()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> DataFrame {
        DataFrame::new("sales")
            .with_column(
                "region",
                Column::from_strings(vec![
                    Some("north".to_string()),
                    Some("south".to_string()),
                    Some("north".to_string()),
                ]),
            )
            .unwrap()
            .with_column(
                "revenue",
                Column::from_f64(vec![Some(100.0), Some(250.5), None]),
            )
            .unwrap()
    }

    #[test]
    fn test_mismatched_column_length_rejected() {
        let result = sales().with_column("bad", Column::from_i64(vec![Some(1)]));
        assert!(result.is_err());
    }

    #[test]
    fn test_cell_access() {
        let frame = sales();
        assert_eq!(
            frame.cell("region", 1),
            Some(CellValue::Str("south".to_string()))
        );
        assert_eq!(frame.cell("revenue", 2), Some(CellValue::Null));
        assert_eq!(frame.cell("missing", 0), None);
    }

    #[test]
    fn test_select_rows_leaves_source_intact() {
        let frame = sales();
        let view = frame.select_rows(&[0, 2]);
        assert_eq!(view.row_count(), 2);
        assert_eq!(frame.row_count(), 3);
        assert_eq!(view.cell("region", 1), Some(CellValue::Str("north".to_string())));
    }

    #[test]
    fn test_schema_summary_lists_all_columns() {
        let summary = sales().schema_summary();
        assert!(summary.contains("region (string"));
        assert!(summary.contains("revenue (float64"));
        assert!(summary.contains("1 nulls"));
    }
}
