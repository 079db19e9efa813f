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

use tracing::debug;

/// Pull the snippet out of raw model output. Prefers the first fenced
/// code block (any language tag); otherwise strips obvious prose lines
/// and returns what is left. The validator judges the result either way.
pub fn extract_snippet(text: &str) -> String {
    let blocks = extract_code_blocks(text);
    if let Some((language, content)) = blocks.into_iter().next() {
        debug!(language = language.as_deref().unwrap_or("none"), "Extracted fenced snippet");
        return content.trim().to_string();
    }

    // No fence: drop lines that read as prose rather than code.
    let code_lines: Vec<&str> = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !is_prose_line(trimmed)
        })
        .collect();
    code_lines.join("\n").trim().to_string()
}

fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut blocks = Vec::new();
    let mut remaining = text;
    while let Some(start) = remaining.find("```") {
        let after_fence = &remaining[start + 3..];
        let Some(end) = after_fence.find("```") else {
            break;
        };
        let block = &after_fence[..end];
        let (language, content) = match block.split_once('\n') {
            Some((first, rest)) => {
                let tag = first.trim();
                if tag.is_empty() || tag.contains(' ') {
                    (None, block)
                } else {
                    (Some(tag.to_string()), rest)
                }
            }
            None => (None, block),
        };
        blocks.push((language, content.to_string()));
        remaining = &after_fence[end + 3..];
    }
    blocks
}

fn is_prose_line(line: &str) -> bool {
    let lowered = line.to_lowercase();
    lowered.ends_with(':')
        || lowered.starts_with("here")
        || lowered.starts_with("this ")
        || lowered.starts_with("the ")
        || lowered.starts_with("note")
        || lowered.starts_with("explanation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_with_language_tag() {
        let raw = "Here is the code:\n```python\nsum(orders.revenue)\n```\nThat sums it.";
        assert_eq!(extract_snippet(raw), "sum(orders.revenue)");
    }

    #[test]
    fn test_fenced_block_without_tag() {
        let raw = "```\nx = 1\nx + 1\n```";
        assert_eq!(extract_snippet(raw), "x = 1\nx + 1");
    }

    #[test]
    fn test_first_block_wins() {
        let raw = "```\nfirst()\n```\ntext\n```\nsecond()\n```";
        assert_eq!(extract_snippet(raw), "first()");
    }

    #[test]
    fn test_bare_code_passes_through() {
        assert_eq!(extract_snippet("  count(orders)  "), "count(orders)");
    }

    #[test]
    fn test_prose_lines_stripped_without_fence() {
        let raw = "Here is what you need:\nsum(orders.revenue)";
        assert_eq!(extract_snippet(raw), "sum(orders.revenue)");
    }
}
