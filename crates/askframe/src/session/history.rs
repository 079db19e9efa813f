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

use crate::exec::ExecutionResult;
use crate::validate::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One generation round. `execution` is present only when the validation
/// report was accepted; rejected and provider-failed attempts stop at the
/// report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub snippet: String,
    pub validation: ValidationReport,
    pub execution: Option<ExecutionResult>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(attempt: u32, snippet: impl Into<String>, validation: ValidationReport) -> Self {
        Self {
            attempt,
            snippet: snippet.into(),
            validation,
            execution: None,
            feedback: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit trail for one query. Records go in and never come
/// out changed; the whole log serialises to JSON for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    pub query_id: Uuid,
    pub query_text: String,
    attempts: Vec<AttemptRecord>,
}

impl HistoryLog {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            query_text: query_text.into(),
            attempts: Vec::new(),
        }
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Keep only the most recent record; used when history recording is
    /// switched off but the final attempt still matters.
    pub fn keep_last(&mut self) {
        if self.attempts.len() > 1 {
            self.attempts.drain(..self.attempts.len() - 1);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted() -> ValidationReport {
        ValidationReport {
            accepted: true,
            violations: Vec::new(),
        }
    }

    #[test]
    fn test_records_accumulate_in_order() {
        let mut log = HistoryLog::new("total revenue?");
        log.push(AttemptRecord::new(1, "open('x')", accepted()));
        log.push(AttemptRecord::new(2, "sum(orders.revenue)", accepted()));
        assert_eq!(log.len(), 2);
        assert_eq!(log.attempts()[0].attempt, 1);
        assert_eq!(log.attempts()[1].snippet, "sum(orders.revenue)");
    }

    #[test]
    fn test_keep_last() {
        let mut log = HistoryLog::new("q");
        log.push(AttemptRecord::new(1, "a", accepted()));
        log.push(AttemptRecord::new(2, "b", accepted()));
        log.keep_last();
        assert_eq!(log.len(), 1);
        assert_eq!(log.attempts()[0].snippet, "b");
    }

    #[test]
    fn test_serialises_for_export() {
        let mut log = HistoryLog::new("q");
        log.push(AttemptRecord::new(1, "count(t)", accepted()));
        let json = log.to_json();
        assert_eq!(json["query_text"], "q");
        assert_eq!(json["attempts"][0]["snippet"], "count(t)");
    }
}
