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

//! Sandboxed snippet execution. The namespace holds dataset snapshots and
//! nothing else; helpers come from the curated registry; a gas budget
//! bounds interpreter work and a wall-clock watchdog bounds everything the
//! gas meter cannot see (slow extension helpers included).

pub mod helpers;
pub mod interpreter;

pub use helpers::{HelperCtx, HelperFn, HelperRegistry};
pub use interpreter::{EvalError, EvalOutcome, GasMeter, Interpreter, Value};

use crate::dataset::DataFrame;
use crate::lang::Snippet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Raised,
    Rejected,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Ok => write!(f, "ok"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
            ExecutionStatus::Raised => write!(f, "raised"),
            ExecutionStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Outcome of one execution attempt. Faults never escape the executor;
/// they land here as a status and a sanitised `error_detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub value: Option<serde_json::Value>,
    pub output: Vec<String>,
    pub error_detail: Option<String>,
    pub elapsed_ms: u64,
    pub gas_used: u64,
}

impl ExecutionResult {
    /// Synthetic result for a snippet the validator refused; recorded in
    /// history so rejected attempts read the same way as executed ones.
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            value: None,
            output: Vec::new(),
            error_detail: Some(detail.into()),
            elapsed_ms: 0,
            gas_used: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    helpers: HelperRegistry,
    gas_limit: u64,
    timeout: Duration,
}

impl Executor {
    pub fn new(gas_limit: u64, timeout_seconds: f64) -> Self {
        Self {
            helpers: HelperRegistry::builtin(),
            gas_limit,
            timeout: Duration::from_secs_f64(timeout_seconds.max(0.001)),
        }
    }

    /// Replace the built-in registry, e.g. to add extension helpers. The
    /// validator's allow-list must be widened with the same names.
    pub fn with_helpers(mut self, helpers: HelperRegistry) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn register_helper(&mut self, name: impl Into<String>, helper: HelperFn) {
        self.helpers.register(name, helper);
    }

    /// Run an accepted snippet against dataset snapshots. The interpreter
    /// runs on a blocking thread under `tokio::time::timeout`; an attempt
    /// that overruns is abandoned and reported as `timeout`.
    #[instrument(skip(self, snippet, bindings), fields(gas_limit = self.gas_limit))]
    pub async fn execute(
        &self,
        snippet: &Snippet,
        bindings: HashMap<String, Arc<DataFrame>>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let helpers = self.helpers.clone();
        let gas_limit = self.gas_limit;
        let snippet = snippet.clone();

        let task = tokio::task::spawn_blocking(move || {
            Interpreter::new(bindings, &helpers, gas_limit).run(&snippet)
        });

        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => match outcome.result {
                Ok(value) => {
                    debug!(gas_used = outcome.gas_used, "snippet evaluated");
                    ExecutionResult {
                        status: ExecutionStatus::Ok,
                        value: Some(value.to_json()),
                        output: outcome.output,
                        error_detail: None,
                        elapsed_ms: elapsed(started),
                        gas_used: outcome.gas_used,
                    }
                }
                Err(eval_error) => {
                    debug!(error = %eval_error, gas_used = outcome.gas_used, "snippet raised");
                    ExecutionResult {
                        status: ExecutionStatus::Raised,
                        value: None,
                        output: outcome.output,
                        error_detail: Some(eval_error.to_string()),
                        elapsed_ms: elapsed(started),
                        gas_used: outcome.gas_used,
                    }
                }
            },
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "evaluation task failed");
                ExecutionResult {
                    status: ExecutionStatus::Raised,
                    value: None,
                    output: Vec::new(),
                    error_detail: Some("Evaluation task failed".to_string()),
                    elapsed_ms: elapsed(started),
                    gas_used: 0,
                }
            }
            Err(_) => {
                // The evaluation thread is abandoned, so its meter is
                // unreachable; gas stays at zero for a timeout.
                warn!(timeout_ms = self.timeout.as_millis() as u64, "snippet timed out");
                ExecutionResult {
                    status: ExecutionStatus::Timeout,
                    value: None,
                    output: Vec::new(),
                    error_detail: Some(format!(
                        "Execution exceeded the {:.1}s time limit",
                        self.timeout.as_secs_f64()
                    )),
                    elapsed_ms: elapsed(started),
                    gas_used: 0,
                }
            }
        }
    }
}
