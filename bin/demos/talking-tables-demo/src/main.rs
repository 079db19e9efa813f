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

use askframe::config::AskConfig;
use askframe::dataset::{Column, DataFrame, DatasetRegistry};
use askframe::llm::{ModelProvider, OllamaProvider, OpenAIProvider};
use askframe::session::{Session, SessionStatus};
use askframe::AskError;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;

const ORDERS_CSV: &str = "\
order_id:int,customer:str,region:str,qty:int,revenue:float
1001,acme,north,3,120.5
1002,globex,south,1,45.0
1003,acme,north,7,310.25
1004,initech,east,2,null
1005,globex,west,5,199.99
1006,hooli,south,4,88.0";

const CUSTOMERS_CSV: &str = "\
name:str,country:str,active:bool
acme,uk,true
globex,de,true
initech,us,false
hooli,us,true";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    dotenvy::dotenv().ok();
    info!("Environment variables loaded");

    let provider = build_provider()?;
    info!(provider = provider.provider_name(), "Model provider initialised");

    let config = match std::env::var("ASKFRAME_CONFIG") {
        Ok(path) => AskConfig::from_yaml_file(path)?,
        Err(_) => AskConfig::default(),
    };
    let session = Session::new(provider, config)?;

    let mut registry = DatasetRegistry::new();
    registry.register("orders", parse_csv("orders", ORDERS_CSV)?)?;
    registry.register("customers", parse_csv("customers", CUSTOMERS_CSV)?)?;

    println!("\nTalking Tables Interactive Demo");
    println!("═══════════════════════════════════════════════════════════════");
    println!("Ask natural-language questions about the in-memory datasets.");
    println!();
    println!("Loaded datasets:");
    for (name, frame) in registry.bindings() {
        println!(
            "   {name}: {} rows, columns {}",
            frame.row_count(),
            frame.column_names().join(", ")
        );
    }
    println!();
    println!("Examples:");
    println!("   \"What is the total revenue?\"");
    println!("   \"How many orders have qty above 3?\"");
    println!("   \"Which columns contain missing values?\"");
    println!();
    println!("Tips:");
    println!("   - Type 'schema' to see column details.");
    println!("   - Type 'history' to export the last query's attempt log.");
    println!("   - Type 'exit' to quit.");
    println!("═══════════════════════════════════════════════════════════════");

    let mut last_history: Option<serde_json::Value> = None;

    loop {
        print!("\nEnter your question: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }
        if input.eq_ignore_ascii_case("schema") {
            for (name, frame) in registry.bindings() {
                println!("\n{name}:\n{}", frame.schema_summary());
            }
            continue;
        }
        if input.eq_ignore_ascii_case("history") {
            match &last_history {
                Some(log) => println!("{}", serde_json::to_string_pretty(log)?),
                None => println!("No query has run yet."),
            }
            continue;
        }

        println!("{}", "─".repeat(80));

        for warning in session.validate_query(input, &registry) {
            println!("Note: {warning}");
        }

        match session.ask(input, &registry).await {
            Ok(outcome) => {
                println!(
                    "Category: {} (confidence {:.2})",
                    outcome.classification.category, outcome.classification.confidence
                );
                for suggestion in &outcome.classification.suggestions {
                    println!("Hint: {suggestion}");
                }
                match outcome.status {
                    SessionStatus::Completed => {
                        let result = outcome.result.expect("completed outcome carries a result");
                        for line in &result.output {
                            println!("{line}");
                        }
                        if let Some(value) = &result.value {
                            println!("Answer: {}", serde_json::to_string_pretty(value)?);
                        }
                        println!(
                            "(attempts: {}, gas: {}, elapsed: {}ms)",
                            outcome.history.len(),
                            result.gas_used,
                            result.elapsed_ms
                        );
                    }
                    SessionStatus::Failed => {
                        println!(
                            "Could not answer after {} attempt(s).",
                            outcome.history.len()
                        );
                        if let Some(last) = outcome.history.attempts().last() {
                            if let Some(feedback) = &last.feedback {
                                println!("Last failure: {feedback}");
                            }
                        }
                    }
                }
                last_history = Some(outcome.history.to_json());
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}

fn build_provider() -> Result<Arc<dyn ModelProvider>, Box<dyn std::error::Error>> {
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        let model =
            std::env::var("ASKFRAME_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        return Ok(Arc::new(OpenAIProvider::new(api_key, model, None, Some(60))?));
    }
    let model = std::env::var("ASKFRAME_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
    let base_url = std::env::var("OLLAMA_BASE_URL").ok();
    Ok(Arc::new(OllamaProvider::new(
        base_url,
        model,
        Some(60),
        Some(2),
    )?))
}

/// Tiny typed-CSV reader for the demo's embedded sample data. The header
/// carries `name:type` pairs; `null` cells become nulls.
fn parse_csv(name: &str, text: &str) -> Result<DataFrame, AskError> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| AskError::dataset("CSV text is empty"))?;

    let mut specs = Vec::new();
    for field in header.split(',') {
        let (column, kind) = field
            .split_once(':')
            .ok_or_else(|| AskError::dataset(format!("Header field '{field}' lacks a type")))?;
        specs.push((column.trim().to_string(), kind.trim().to_string()));
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); specs.len()];
    for line in lines {
        let row: Vec<&str> = line.split(',').collect();
        if row.len() != specs.len() {
            return Err(AskError::dataset(format!(
                "Row '{line}' has {} fields, expected {}",
                row.len(),
                specs.len()
            )));
        }
        for (i, value) in row.iter().enumerate() {
            cells[i].push(value.trim().to_string());
        }
    }

    let mut frame = DataFrame::new(name);
    for ((column, kind), values) in specs.into_iter().zip(cells) {
        let parsed = match kind.as_str() {
            "int" => Column::from_i64(
                values
                    .iter()
                    .map(|v| parse_cell(v, |s| s.parse::<i64>().ok()))
                    .collect::<Result<_, _>>()
                    .map_err(|v| AskError::dataset(format!("Bad int cell '{v}' in '{column}'")))?,
            ),
            "float" => Column::from_f64(
                values
                    .iter()
                    .map(|v| parse_cell(v, |s| s.parse::<f64>().ok()))
                    .collect::<Result<_, _>>()
                    .map_err(|v| AskError::dataset(format!("Bad float cell '{v}' in '{column}'")))?,
            ),
            "bool" => Column::from_bool(
                values
                    .iter()
                    .map(|v| parse_cell(v, |s| s.parse::<bool>().ok()))
                    .collect::<Result<_, _>>()
                    .map_err(|v| AskError::dataset(format!("Bad bool cell '{v}' in '{column}'")))?,
            ),
            "str" => Column::from_strings(
                values
                    .iter()
                    .map(|v| {
                        if v == "null" {
                            None
                        } else {
                            Some(v.clone())
                        }
                    })
                    .collect(),
            ),
            other => {
                return Err(AskError::dataset(format!(
                    "Unknown column type '{other}' for '{column}'"
                )))
            }
        };
        frame.add_column(column, parsed)?;
    }
    Ok(frame)
}

fn parse_cell<T>(value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>, String> {
    if value == "null" {
        return Ok(None);
    }
    parse(value).map(Some).ok_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_samples_parse() {
        let orders = parse_csv("orders", ORDERS_CSV).unwrap();
        assert_eq!(orders.row_count(), 6);
        assert_eq!(orders.column_count(), 5);
        assert_eq!(orders.column("revenue").unwrap().null_count(), 1);

        let customers = parse_csv("customers", CUSTOMERS_CSV).unwrap();
        assert_eq!(customers.row_count(), 4);
    }

    #[test]
    fn test_ragged_row_rejected() {
        assert!(parse_csv("t", "a:int,b:int\n1").is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse_csv("t", "a:date\n2024-01-01").is_err());
    }
}
