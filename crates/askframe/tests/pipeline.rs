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

//! End-to-end pipeline tests with a scripted provider standing in for a
//! live model.

use askframe::config::AskConfig;
use askframe::dataset::{Column, DataFrame, DatasetRegistry};
use askframe::exec::{ExecutionStatus, HelperCtx, Value};
use askframe::llm::ModelProvider;
use askframe::session::{Session, SessionStatus};
use askframe::validate::ViolationKind;
use async_trait::async_trait;
use frame_contracts::{GenerationRequest, ProviderError, ProviderResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays a fixed script of replies and records every request it saw.
struct ScriptedProvider {
    replies: Mutex<VecDeque<ProviderResult<String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ProviderResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn seen_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Internal("script exhausted".to_string())))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn health_check(&self) -> ProviderResult<()> {
        Ok(())
    }
}

fn registry() -> DatasetRegistry {
    let orders = DataFrame::new("orders")
        .with_column(
            "qty",
            Column::from_i64(vec![Some(3), Some(1), Some(7), Some(2)]),
        )
        .unwrap()
        .with_column(
            "revenue",
            Column::from_f64(vec![Some(120.5), Some(45.0), Some(310.25), None]),
        )
        .unwrap();
    let mut registry = DatasetRegistry::new();
    registry.register("orders", orders).unwrap();
    registry
}

fn fenced(code: &str) -> ProviderResult<String> {
    Ok(format!("```\n{code}\n```"))
}

#[tokio::test]
async fn test_clean_snippet_completes_first_attempt() {
    let provider = ScriptedProvider::new(vec![fenced("sum(orders.revenue)")]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let outcome = session
        .ask("What is the total revenue?", &registry())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.history.len(), 1);
    let result = outcome.result.unwrap();
    assert_eq!(result.status, ExecutionStatus::Ok);
    assert_eq!(result.value, Some(serde_json::json!(475.75)));
}

#[tokio::test]
async fn test_rejected_snippet_is_never_executed_and_repaired() {
    let provider = ScriptedProvider::new(vec![
        fenced("import os\nopen('orders.csv')"),
        fenced("sum(orders.revenue)"),
    ]);
    let session = Session::new(provider.clone(), AskConfig::default()).unwrap();
    let outcome = session.ask("total revenue", &registry()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.history.len(), 2);

    let first = &outcome.history.attempts()[0];
    assert!(!first.validation.accepted);
    assert!(first.execution.is_none(), "rejected snippet must not run");
    assert!(first
        .validation
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::DisallowedImport));

    // The repair round must see the first round's diagnostics.
    let prompts = provider.seen_prompts();
    assert!(prompts[1].contains("PREVIOUS ATTEMPTS FAILED"));
    assert!(prompts[1].contains("import"));
}

#[tokio::test]
async fn test_budget_exhaustion_yields_failed_with_exact_records() {
    let provider = ScriptedProvider::new(vec![
        fenced("delete(orders)"),
        fenced("drop(orders)"),
        fenced("remove(orders)"),
    ]);
    let config = AskConfig {
        max_attempts: 3,
        ..AskConfig::default()
    };
    let session = Session::new(provider, config).unwrap();
    let registry = registry();
    let outcome = session.ask("delete all rows", &registry).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.history.len(), 3);
    for record in outcome.history.attempts() {
        assert!(!record.validation.accepted);
        assert!(record.execution.is_none());
    }
    // The dataset survives every hostile attempt untouched.
    assert_eq!(registry.get("orders").unwrap().row_count(), 4);
}

#[tokio::test]
async fn test_runtime_error_feeds_back_and_recovers() {
    let provider = ScriptedProvider::new(vec![
        fenced("1 / 0"),
        fenced("mean(orders.qty)"),
    ]);
    let session = Session::new(provider.clone(), AskConfig::default()).unwrap();
    let outcome = session.ask("average quantity", &registry()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    let first = &outcome.history.attempts()[0];
    assert!(first.validation.accepted);
    assert_eq!(
        first.execution.as_ref().unwrap().status,
        ExecutionStatus::Raised
    );
    assert!(provider.seen_prompts()[1].contains("Division by zero"));
    assert_eq!(
        outcome.result.unwrap().value,
        Some(serde_json::json!(3.25))
    );
}

#[tokio::test]
async fn test_provider_failure_counts_against_budget() {
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Network("connection refused".to_string())),
        fenced("count(orders)"),
    ]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let outcome = session.ask("how many orders", &registry()).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.history.len(), 2);
    let first = &outcome.history.attempts()[0];
    assert!(!first.validation.accepted);
    assert!(first.execution.is_none());
    assert!(first
        .feedback
        .as_ref()
        .unwrap()
        .contains("provider unavailable"));
}

#[tokio::test]
async fn test_all_provider_failures_exhaust_budget() {
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Timeout),
        Err(ProviderError::Timeout),
        Err(ProviderError::Timeout),
    ]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let outcome = session.ask("anything", &registry()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.history.len(), 3);
}

#[tokio::test]
async fn test_empty_registry_is_a_precondition_error() {
    let provider = ScriptedProvider::new(vec![fenced("1")]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let empty = DatasetRegistry::new();
    assert!(session.ask("anything", &empty).await.is_err());
}

#[tokio::test]
async fn test_slow_extension_helper_hits_watchdog() {
    let provider = ScriptedProvider::new(vec![fenced("stall()")]);
    let config = AskConfig {
        max_attempts: 1,
        timeout_seconds: 0.05,
        ..AskConfig::default()
    };
    let mut session = Session::new(provider, config).unwrap();
    session.register_helper(
        "stall",
        Arc::new(|_args: &[Value], _ctx: &mut HelperCtx<'_>| {
            std::thread::sleep(std::time::Duration::from_millis(500));
            Ok(Value::Null)
        }),
    );

    let outcome = session.ask("stall please", &registry()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Failed);
    let record = &outcome.history.attempts()[0];
    assert!(record.validation.accepted, "extension must be allow-listed");
    assert_eq!(
        record.execution.as_ref().unwrap().status,
        ExecutionStatus::Timeout
    );
}

#[tokio::test]
async fn test_filter_pipeline_and_captured_output() {
    let provider = ScriptedProvider::new(vec![fenced(
        "big = filter(orders, orders.qty > 2)\nprint('matching orders:', count(big))\ncount(big)",
    )]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let outcome = session
        .ask("how many orders have qty above 2", &registry())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    let result = outcome.result.unwrap();
    assert_eq!(result.value, Some(serde_json::json!(2)));
    assert_eq!(result.output, vec!["matching orders: 2".to_string()]);
}

#[tokio::test]
async fn test_history_disabled_keeps_final_record_only() {
    let provider = ScriptedProvider::new(vec![
        fenced("nonsense_helper(orders)"),
        fenced("count(orders)"),
    ]);
    let config = AskConfig {
        record_history: false,
        ..AskConfig::default()
    };
    let session = Session::new(provider, config).unwrap();
    let outcome = session.ask("how many orders", &registry()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(outcome.history.attempts()[0].attempt, 2);
}

#[tokio::test]
async fn test_prose_wrapped_reply_still_extracts() {
    let provider = ScriptedProvider::new(vec![Ok(
        "Here is the snippet you need:\n```python\nmax(orders.revenue)\n```\nIt finds the maximum."
            .to_string(),
    )]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let outcome = session.ask("largest revenue", &registry()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(
        outcome.result.unwrap().value,
        Some(serde_json::json!(310.25))
    );
}

#[tokio::test]
async fn test_classification_is_deterministic_across_runs() {
    let registry = registry();
    let provider = ScriptedProvider::new(vec![fenced("sum(orders.revenue)")]);
    let session = Session::new(provider, AskConfig::default()).unwrap();
    let first = session.analyze("what is the total revenue per region", &registry);
    let second = session.analyze("what is the total revenue per region", &registry);
    assert_eq!(first, second);
}
