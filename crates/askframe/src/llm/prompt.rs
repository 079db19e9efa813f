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

use crate::classifier::{ClassificationResult, QueryCategory};
use crate::dataset::DatasetRegistry;

/// Assembles the system/user prompt pair for snippet generation. The
/// system prompt pins the output language (a grammar reference card plus
/// the helper allow-list); the user prompt carries schemas, sample rows,
/// category guidance, the question, and any accumulated failure feedback.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    sample_rows: usize,
    helper_names: Vec<String>,
}

impl PromptBuilder {
    pub fn new(sample_rows: usize, helper_names: Vec<String>) -> Self {
        Self {
            sample_rows,
            helper_names,
        }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You translate questions about tabular data into a tiny expression language.\n\
             \n\
             LANGUAGE REFERENCE\n\
             - Literals: integers, floats, 'strings', true/false, null.\n\
             - Lists: [1, 2, 3]. Indexing: xs[0], xs[-1].\n\
             - Columns: dataset.column yields the column as a list.\n\
             - Operators: + - * / %, comparisons (== != < <= > >=), and/or/not.\n\
             - Conditional: value if condition else fallback.\n\
             - Assignment: name = expression. Separate statements with newlines.\n\
             - Comments start with #.\n\
             There are NO loops, NO function definitions, and NO imports.\n\
             \n\
             AVAILABLE HELPERS (the only callable functions): {}\n\
             filter(frame, mask) keeps rows where the mask list is true;\n\
             build masks with column comparisons, e.g. orders.qty > 3.\n\
             \n\
             RULES\n\
             - Use only the datasets and columns listed in the request.\n\
             - The value of the last statement is the answer; use print()\n\
               only for supplementary output.\n\
             - Reply with the code alone inside a single fenced code block.",
            self.helper_names.join(", ")
        )
    }

    pub fn user_prompt(
        &self,
        query_text: &str,
        classification: &ClassificationResult,
        registry: &DatasetRegistry,
        feedback: &[String],
    ) -> String {
        let mut prompt = String::from("DATASETS\n");
        for (name, frame) in registry.bindings() {
            prompt.push_str(&format!("{name}:\n{}", frame.schema_summary()));
            let samples = frame.sample_rows(self.sample_rows);
            if !samples.is_empty() {
                prompt.push_str("  sample rows:\n");
                for row in samples {
                    prompt.push_str(&format!("    {row}\n"));
                }
            }
        }

        prompt.push_str(&format!(
            "\nQUERY CATEGORY: {} (confidence {:.2})\n",
            classification.category, classification.confidence
        ));
        if let Some(guidance) = category_guidance(classification.category) {
            prompt.push_str(&format!("GUIDANCE: {guidance}\n"));
        }

        if !feedback.is_empty() {
            prompt.push_str("\nPREVIOUS ATTEMPTS FAILED. Fix every issue below:\n");
            for (i, item) in feedback.iter().enumerate() {
                prompt.push_str(&format!("{}. {item}\n", i + 1));
            }
        }

        prompt.push_str(&format!("\nQUESTION: {query_text}\n"));
        prompt
    }
}

fn category_guidance(category: QueryCategory) -> Option<&'static str> {
    match category {
        QueryCategory::Aggregation => {
            Some("Aggregate with sum/mean/min/max/count over a column list.")
        }
        QueryCategory::Filtering => {
            Some("Build a boolean mask from column comparisons and pass it to filter().")
        }
        QueryCategory::DataQuality => {
            Some("Compare count() of a column against len() of the frame to measure nulls.")
        }
        QueryCategory::Statistical => {
            Some("Combine mean/min/max; there is no built-in variance helper.")
        }
        QueryCategory::Join => {
            Some("There is no join helper; answer from the individual datasets.")
        }
        QueryCategory::Visualization => {
            Some("Plotting is unavailable; return the underlying numbers instead.")
        }
        QueryCategory::Unknown => None,
    }
}
