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

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const SUGGESTION_THRESHOLD: f64 = 0.34;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    DataQuality,
    Join,
    Aggregation,
    Filtering,
    Visualization,
    Statistical,
    Unknown,
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryCategory::DataQuality => "data_quality",
            QueryCategory::Join => "join",
            QueryCategory::Aggregation => "aggregation",
            QueryCategory::Filtering => "filtering",
            QueryCategory::Visualization => "visualization",
            QueryCategory::Statistical => "statistical",
            QueryCategory::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Tie-break order: earlier wins when scores are equal, keeping
/// classification deterministic.
const CATEGORY_PRIORITY: [QueryCategory; 7] = [
    QueryCategory::DataQuality,
    QueryCategory::Join,
    QueryCategory::Aggregation,
    QueryCategory::Filtering,
    QueryCategory::Visualization,
    QueryCategory::Statistical,
    QueryCategory::Unknown,
];

static SIGNAL_TABLE: Lazy<Vec<(QueryCategory, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            QueryCategory::DataQuality,
            vec![
                "missing", "null", "nulls", "duplicate", "duplicates", "empty", "invalid",
                "incomplete", "quality", "clean",
            ],
        ),
        (
            QueryCategory::Join,
            vec![
                "join", "merge", "combine", "across", "between", "compare", "versus", "vs",
                "relationship between",
            ],
        ),
        (
            QueryCategory::Aggregation,
            vec![
                "total", "sum", "average", "mean", "count", "minimum", "maximum", "min", "max",
                "per", "by", "group", "overall",
            ],
        ),
        (
            QueryCategory::Filtering,
            vec![
                "filter", "where", "only", "greater than", "less than", "more than", "above",
                "below", "top", "bottom", "first", "last", "exclude",
            ],
        ),
        (
            QueryCategory::Visualization,
            vec![
                "chart", "plot", "graph", "histogram", "heatmap", "scatter", "trend", "visualise",
                "visualize", "draw", "show me a",
            ],
        ),
        (
            QueryCategory::Statistical,
            vec![
                "correlation", "distribution", "median", "deviation", "variance", "percentile",
                "outlier", "outliers", "regression", "significance",
            ],
        ),
    ]
});

static SUGGESTIONS: Lazy<Vec<(QueryCategory, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            QueryCategory::DataQuality,
            vec![
                "Name the column to inspect, e.g. 'how many missing values in revenue?'",
                "Ask about duplicates explicitly, e.g. 'are there duplicate customer ids?'",
            ],
        ),
        (
            QueryCategory::Join,
            vec![
                "Name both datasets, e.g. 'compare revenue between orders and refunds'",
            ],
        ),
        (
            QueryCategory::Aggregation,
            vec![
                "State the measure and the column, e.g. 'what is the total revenue?'",
                "Add a grouping, e.g. 'average income by region'",
            ],
        ),
        (
            QueryCategory::Filtering,
            vec![
                "State the condition, e.g. 'orders where quantity is greater than 10'",
            ],
        ),
        (
            QueryCategory::Visualization,
            vec![
                "Name the chart type and columns, e.g. 'histogram of customer ages'",
            ],
        ),
        (
            QueryCategory::Statistical,
            vec![
                "Name the two columns, e.g. 'correlation between age and income'",
            ],
        ),
        (
            QueryCategory::Unknown,
            vec![
                "Mention a column name from the dataset in your question",
                "Try a concrete measure such as total, average, or count",
            ],
        ),
    ]
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: QueryCategory,
    pub confidence: f64,
    pub matched_signals: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Deterministic, pure signal-phrase classifier. Never fails: input that
/// matches nothing yields `Unknown` with confidence 0 and generic hints.
#[derive(Debug, Clone, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query_text: &str, known_columns: &[String]) -> ClassificationResult {
        let lowered = query_text.to_lowercase();

        let mut best = QueryCategory::Unknown;
        let mut best_score = 0usize;
        let mut best_total = 1usize;
        let mut best_signals: Vec<String> = Vec::new();

        for category in CATEGORY_PRIORITY {
            let (score, total, signals) = self.score(category, &lowered, known_columns);
            if score > best_score {
                best = category;
                best_score = score;
                best_total = total;
                best_signals = signals;
            }
        }

        let confidence = if best_score == 0 {
            0.0
        } else {
            (best_score as f64 / best_total as f64).min(1.0)
        };

        let suggestions = if confidence < SUGGESTION_THRESHOLD {
            suggestions_for(best)
        } else {
            Vec::new()
        };

        ClassificationResult {
            category: best,
            confidence,
            matched_signals: best_signals,
            suggestions,
        }
    }

    /// Pre-flight warnings for a query, before any generation happens.
    pub fn preflight(&self, query_text: &str, known_columns: &[String]) -> Vec<String> {
        let mut warnings = Vec::new();
        if query_text.trim().is_empty() {
            warnings.push("Query is empty".to_string());
            return warnings;
        }
        let lowered = query_text.to_lowercase();
        if !known_columns
            .iter()
            .any(|col| lowered.contains(&col.to_lowercase()))
        {
            warnings.push("Query references no known column names".to_string());
        }
        warnings
    }

    fn score(
        &self,
        category: QueryCategory,
        lowered: &str,
        known_columns: &[String],
    ) -> (usize, usize, Vec<String>) {
        let signals = match SIGNAL_TABLE.iter().find(|(c, _)| *c == category) {
            Some((_, signals)) => signals,
            None => return (0, 1, Vec::new()),
        };
        let mut matched: Vec<String> = signals
            .iter()
            .filter(|signal| contains_phrase(lowered, signal))
            .map(|signal| signal.to_string())
            .collect();

        // Comparative phrasing over two or more known names reads as a join
        // even without an explicit "join" keyword.
        if category == QueryCategory::Join {
            let named = known_columns
                .iter()
                .filter(|col| contains_phrase(lowered, &col.to_lowercase()))
                .count();
            if named >= 2 && !matched.is_empty() {
                matched.push("multiple named columns".to_string());
            }
        }

        (matched.len(), signals.len(), matched)
    }
}

/// Whole-word containment so "summary" does not trigger on "sum".
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(phrase) {
        let begin = start + pos;
        let end = begin + phrase.len();
        let left_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = end;
    }
    false
}

fn suggestions_for(category: QueryCategory) -> Vec<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, hints)| hints.iter().map(|h| h.to_string()).collect())
        .unwrap_or_default()
}

/// Example phrasings per category, used by callers to guide users.
pub fn query_examples(category: QueryCategory) -> Vec<&'static str> {
    match category {
        QueryCategory::DataQuality => vec![
            "How many missing values are in the income column?",
            "Are there duplicate customer ids?",
        ],
        QueryCategory::Join => vec![
            "Compare average revenue between orders and refunds",
        ],
        QueryCategory::Aggregation => vec![
            "What is the total revenue?",
            "What is the average income by region?",
        ],
        QueryCategory::Filtering => vec![
            "Show orders where quantity is greater than 10",
        ],
        QueryCategory::Visualization => vec![
            "Show me a histogram of customer ages",
        ],
        QueryCategory::Statistical => vec![
            "What is the correlation between age and income?",
        ],
        QueryCategory::Unknown => vec!["What is the total revenue?"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_aggregation_query() {
        let classifier = QueryClassifier::new();
        let result = classifier.classify("What is the total revenue?", &cols(&["revenue"]));
        assert_eq!(result.category, QueryCategory::Aggregation);
        assert!(result.confidence > 0.0);
        assert!(result.matched_signals.contains(&"total".to_string()));
    }

    #[test]
    fn test_visualization_query() {
        let classifier = QueryClassifier::new();
        let result = classifier.classify("Plot a histogram of ages", &cols(&["age"]));
        assert_eq!(result.category, QueryCategory::Visualization);
    }

    #[test]
    fn test_data_quality_query() {
        let classifier = QueryClassifier::new();
        let result = classifier.classify(
            "How many missing values and duplicates are there?",
            &cols(&["income"]),
        );
        assert_eq!(result.category, QueryCategory::DataQuality);
    }

    #[test]
    fn test_unknown_query_yields_zero_confidence_and_hints() {
        let classifier = QueryClassifier::new();
        let result = classifier.classify("hello there", &[]);
        assert_eq!(result.category, QueryCategory::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert!(result.matched_signals.is_empty());
        assert!(!result.suggestions.is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = QueryClassifier::new();
        let columns = cols(&["revenue", "region"]);
        let a = classifier.classify("average revenue by region", &columns);
        let b = classifier.classify("average revenue by region", &columns);
        assert_eq!(a, b);
    }

    #[test]
    fn test_whole_word_matching() {
        assert!(contains_phrase("the total revenue", "total"));
        assert!(!contains_phrase("subtotals listed", "total"));
        assert!(!contains_phrase("summary of data", "sum"));
    }

    #[test]
    fn test_preflight_warns_on_unknown_columns() {
        let classifier = QueryClassifier::new();
        let warnings = classifier.preflight("total of profits", &cols(&["revenue"]));
        assert_eq!(warnings.len(), 1);
        let warnings = classifier.preflight("total of revenue", &cols(&["revenue"]));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_examples_exist_for_every_category() {
        for category in CATEGORY_PRIORITY {
            assert!(!query_examples(category).is_empty());
        }
    }
}
