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

//! The repair loop: CLASSIFY once, then GENERATE -> VALIDATE -> EXECUTE
//! with failure diagnostics fed back into the next generation round,
//! bounded by the attempt budget. Exhausting the budget is a `Failed`
//! outcome with full history, not an error.

pub mod history;

pub use history::{AttemptRecord, HistoryLog};

use crate::classifier::{ClassificationResult, QueryClassifier};
use crate::config::AskConfig;
use crate::dataset::DatasetRegistry;
use crate::error::{AskError, AskResult};
use crate::exec::{ExecutionResult, Executor, HelperFn};
use crate::lang::parse_snippet;
use crate::llm::{extract_snippet, ModelProvider, PromptBuilder};
use crate::validate::{SnippetValidator, ValidationReport};
use frame_contracts::GenerationRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed,
}

/// Everything one query produced: terminal status, the successful result
/// if there was one, the classification, and the attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub result: Option<ExecutionResult>,
    pub classification: ClassificationResult,
    pub history: HistoryLog,
}

pub struct Session {
    provider: Arc<dyn ModelProvider>,
    config: AskConfig,
    executor: Executor,
    classifier: QueryClassifier,
}

impl Session {
    pub fn new(provider: Arc<dyn ModelProvider>, config: AskConfig) -> AskResult<Self> {
        config.validate()?;
        let executor = Executor::new(config.gas_limit, config.timeout_seconds);
        Ok(Self {
            provider,
            config,
            executor,
            classifier: QueryClassifier::new(),
        })
    }

    /// Register an extension helper; its name joins the validator
    /// allow-list automatically.
    pub fn register_helper(&mut self, name: impl Into<String>, helper: HelperFn) {
        self.executor.register_helper(name, helper);
    }

    /// Names the validator accepts as callables: every registered helper
    /// plus the configured extensions.
    fn allowed_helpers(&self) -> Vec<String> {
        let mut names = self.executor.helpers().names();
        for extension in &self.config.allowlist_extensions {
            if !names.contains(extension) {
                names.push(extension.clone());
            }
        }
        names
    }

    /// Classification without generation, for callers that want to inspect
    /// the category, matched signals, and suggestions up front.
    pub fn analyze(&self, query_text: &str, registry: &DatasetRegistry) -> ClassificationResult {
        self.classifier.classify(query_text, &registry.known_columns())
    }

    /// Pre-flight warnings (empty query, no known columns referenced)
    /// without spending any attempt budget.
    pub fn validate_query(&self, query_text: &str, registry: &DatasetRegistry) -> Vec<String> {
        self.classifier.preflight(query_text, &registry.known_columns())
    }

    /// Run the full pipeline for one query. Returns `Err` only for
    /// precondition violations; a query the model cannot answer within the
    /// budget comes back as `SessionStatus::Failed` with its history.
    #[instrument(skip(self, registry), fields(provider = self.provider.provider_name()))]
    pub async fn ask(
        &self,
        query_text: &str,
        registry: &DatasetRegistry,
    ) -> AskResult<SessionOutcome> {
        if registry.is_empty() {
            return Err(AskError::registry("No datasets registered"));
        }

        let classification = self.analyze(query_text, registry);
        info!(
            category = %classification.category,
            confidence = classification.confidence,
            "query classified"
        );

        let dataset_names: Vec<String> = registry.names().to_vec();
        let validator = SnippetValidator::new(
            dataset_names,
            self.allowed_helpers(),
            self.config.max_statements,
        );
        let prompts = PromptBuilder::new(self.config.sample_rows, self.allowed_helpers());
        let bindings: HashMap<String, Arc<_>> = registry.bindings().into_iter().collect();

        let mut history = HistoryLog::new(query_text);
        let mut feedback: Vec<String> = Vec::new();
        let mut completed: Option<ExecutionResult> = None;

        for attempt in 1..=self.config.max_attempts {
            info!(attempt, max_attempts = self.config.max_attempts, "generating snippet");
            let request = GenerationRequest::new(
                prompts.user_prompt(query_text, &classification, registry, &feedback),
                Some(prompts.system_prompt()),
            );

            let raw = match self.provider.generate(request).await {
                Ok(raw) => raw,
                Err(provider_error) => {
                    warn!(error = %provider_error, "provider failed");
                    let note = format!("provider unavailable: {provider_error}");
                    let mut record = AttemptRecord::new(
                        attempt,
                        "",
                        ValidationReport {
                            accepted: false,
                            violations: Vec::new(),
                        },
                    );
                    record.feedback = Some(note.clone());
                    history.push(record);
                    feedback.push(note);
                    continue;
                }
            };

            let snippet_text = extract_snippet(&raw);
            let report = validator.validate(&snippet_text);
            let mut record = AttemptRecord::new(attempt, snippet_text.clone(), report.clone());

            if !report.accepted {
                let summary = report.rejection_summary();
                info!(attempt, violations = report.violations.len(), "snippet rejected");
                record.feedback = Some(summary.clone());
                history.push(record);
                feedback.push(summary);
                continue;
            }

            // Accepted snippets re-parse cleanly: the validator already did.
            let snippet = parse_snippet(&snippet_text)
                .map_err(|e| AskError::processing(format!("validated snippet failed to parse: {e}")))?;
            let result = self.executor.execute(&snippet, bindings.clone()).await;
            let ok = result.is_ok();
            if !ok {
                let detail = result
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| format!("execution ended with status {}", result.status));
                info!(attempt, status = %result.status, "execution failed");
                record.feedback = Some(detail.clone());
                feedback.push(detail);
            }
            record.execution = Some(result.clone());
            history.push(record);

            if ok {
                completed = Some(result);
                break;
            }
        }

        if !self.config.record_history {
            history.keep_last();
        }

        let status = if completed.is_some() {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        info!(?status, attempts = history.len(), "session finished");
        Ok(SessionOutcome {
            status,
            result: completed,
            classification,
            history,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider.provider_name())
            .field("config", &self.config)
            .finish()
    }
}
