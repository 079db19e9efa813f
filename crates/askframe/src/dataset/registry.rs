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

use crate::dataset::frame::DataFrame;
use crate::error::{AskError, AskResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Named dataset handles for one calling session. Read-only during a
/// query: executors receive `Arc` snapshots, never the registry itself.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    frames: HashMap<String, Arc<DataFrame>>,
    order: Vec<String>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, frame: DataFrame) -> AskResult<()> {
        let name = name.into();
        if !is_valid_binding_name(&name) {
            return Err(AskError::registry(format!(
                "Dataset name '{name}' is not a valid identifier"
            )));
        }
        if self.frames.contains_key(&name) {
            return Err(AskError::registry(format!(
                "Dataset '{name}' is already registered"
            )));
        }
        self.order.push(name.clone());
        self.frames.insert(name, Arc::new(frame));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<DataFrame>> {
        self.frames.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.frames.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Snapshot of every binding, in registration order.
    pub fn bindings(&self) -> Vec<(String, Arc<DataFrame>)> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.frames[name].clone()))
            .collect()
    }

    /// All column names across all registered frames, for the classifier.
    pub fn known_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for name in &self.order {
            for col in self.frames[name].column_names() {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
        }
        columns
    }
}

fn is_valid_binding_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::column::Column;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DatasetRegistry::new();
        let frame = DataFrame::new("orders")
            .with_column("qty", Column::from_i64(vec![Some(1), Some(2)]))
            .unwrap();
        registry.register("orders", frame).unwrap();
        assert!(registry.contains("orders"));
        assert_eq!(registry.get("orders").unwrap().row_count(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = DatasetRegistry::new();
        registry.register("t", DataFrame::new("t")).unwrap();
        assert!(registry.register("t", DataFrame::new("t")).is_err());
    }

    #[test]
    fn test_invalid_binding_name_rejected() {
        let mut registry = DatasetRegistry::new();
        assert!(registry.register("1bad", DataFrame::new("x")).is_err());
        assert!(registry.register("has space", DataFrame::new("x")).is_err());
    }
}
