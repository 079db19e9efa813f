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

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int64,
    Float64,
    String,
    Boolean,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Int64 => write!(f, "int64"),
            DataType::Float64 => write!(f, "float64"),
            DataType::String => write!(f, "string"),
            DataType::Boolean => write!(f, "boolean"),
        }
    }
}

/// Typed, nullable column storage. Cells live behind `Arc` slices so a
/// column handed to an execution namespace is a snapshot that shares
/// storage but cannot write back into it.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Arc<[Option<i64>]>),
    Float64(Arc<[Option<f64>]>),
    String(Arc<[Option<Arc<str>>]>),
    Boolean(Arc<[Option<bool>]>),
}

impl Column {
    pub fn from_i64(values: Vec<Option<i64>>) -> Self {
        Column::Int64(values.into())
    }

    pub fn from_f64(values: Vec<Option<f64>>) -> Self {
        Column::Float64(values.into())
    }

    pub fn from_strings(values: Vec<Option<String>>) -> Self {
        Column::String(
            values
                .into_iter()
                .map(|v| v.map(Arc::from))
                .collect::<Vec<_>>()
                .into(),
        )
    }

    pub fn from_bool(values: Vec<Option<bool>>) -> Self {
        Column::Boolean(values.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int64(data) => data.len(),
            Column::Float64(data) => data.len(),
            Column::String(data) => data.len(),
            Column::Boolean(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Column::Int64(_) => DataType::Int64,
            Column::Float64(_) => DataType::Float64,
            Column::String(_) => DataType::String,
            Column::Boolean(_) => DataType::Boolean,
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            Column::Int64(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::Float64(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::String(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::Boolean(data) => data.iter().filter(|v| v.is_none()).count(),
        }
    }

    pub fn get_string(&self, index: usize) -> Option<String> {
        match self {
            Column::Int64(data) => data.get(index)?.map(|v| v.to_string()),
            Column::Float64(data) => data.get(index)?.map(|v| v.to_string()),
            Column::String(data) => data.get(index)?.as_ref().map(|v| v.to_string()),
            Column::Boolean(data) => data.get(index)?.map(|v| v.to_string()),
        }
    }

    pub fn to_f64(&self, index: usize) -> Option<f64> {
        match self {
            Column::Int64(data) => data.get(index)?.map(|v| v as f64),
            Column::Float64(data) => *data.get(index)?,
            Column::Boolean(data) => data.get(index)?.map(|v| if v { 1.0 } else { 0.0 }),
            Column::String(_) => None,
        }
    }

    /// New column holding only the rows named by `indices`, in order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        match self {
            Column::Int64(data) => Column::Int64(
                indices
                    .iter()
                    .map(|&i| data.get(i).copied().flatten())
                    .collect::<Vec<_>>()
                    .into(),
            ),
            Column::Float64(data) => Column::Float64(
                indices
                    .iter()
                    .map(|&i| data.get(i).copied().flatten())
                    .collect::<Vec<_>>()
                    .into(),
            ),
            Column::String(data) => Column::String(
                indices
                    .iter()
                    .map(|&i| data.get(i).cloned().flatten())
                    .collect::<Vec<_>>()
                    .into(),
            ),
            Column::Boolean(data) => Column::Boolean(
                indices
                    .iter()
                    .map(|&i| data.get(i).copied().flatten())
                    .collect::<Vec<_>>()
                    .into(),
            ),
        }
    }
}
