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

//! Static allow-list validation of generated snippets. A snippet is never
//! executed here: it is tokenised, scanned against a deny-list of
//! I/O/process/eval primitives, parsed, and its tree walked against the
//! explicit allow-list. All violations are collected in one pass so
//! repair feedback can address everything at once.

use crate::lang::ast::{AstNode, Expr, Snippet, Span, Stmt};
use crate::lang::lexer::{tokenize, TokenKind};
use crate::lang::parser::parse_snippet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Names that perform I/O, process control, reflection, or code execution
/// in the languages models like to imitate. Any appearance, in any
/// position, is a rejection.
static DENY_LIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "eval",
        "exec",
        "compile",
        "open",
        "input",
        "file",
        "read_csv",
        "to_csv",
        "read_file",
        "write_file",
        "write",
        "socket",
        "connect",
        "request",
        "requests",
        "http",
        "urlopen",
        "fetch",
        "download",
        "system",
        "subprocess",
        "popen",
        "shell",
        "os",
        "sys",
        "getattr",
        "setattr",
        "delattr",
        "globals",
        "locals",
        "vars",
        "drop",
        "delete",
        "remove",
        "importlib",
        "__import__",
    ])
});

/// Import-equivalent keywords from host languages; the snippet grammar has
/// no import form, so these can only appear as stray identifiers.
static IMPORT_LIKE: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["import", "require", "include", "from"]));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ParseError,
    DisallowedImport,
    DisallowedCall,
    UnknownIdentifier,
    ShadowsDataset,
    TooManyStatements,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ViolationKind::ParseError => "parse error",
            ViolationKind::DisallowedImport => "disallowed import",
            ViolationKind::DisallowedCall => "disallowed call",
            ViolationKind::UnknownIdentifier => "unknown identifier",
            ViolationKind::ShadowsDataset => "shadows dataset",
            ViolationKind::TooManyStatements => "too many statements",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
    pub line: u32,
    pub column: u32,
}

impl Violation {
    fn new(kind: ViolationKind, detail: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            detail: detail.into(),
            line: span.line,
            column: span.column,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}: {}",
            self.kind, self.line, self.column, self.detail
        )
    }
}

/// Produced for every snippet, accepted or not, for audit symmetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub accepted: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn rejection_summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct SnippetValidator {
    dataset_names: HashSet<String>,
    allowed_helpers: HashSet<String>,
    max_statements: usize,
}

impl SnippetValidator {
    pub fn new<I, J>(dataset_names: I, allowed_helpers: J, max_statements: usize) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            dataset_names: dataset_names.into_iter().collect(),
            allowed_helpers: allowed_helpers.into_iter().collect(),
            max_statements: max_statements.max(1),
        }
    }

    /// Validate without executing. Never panics and never runs the
    /// snippet; a snippet that cannot even be tokenised is a rejection,
    /// not a crash.
    pub fn validate(&self, source: &str) -> ValidationReport {
        let mut violations = Vec::new();

        let tokens = match tokenize(source) {
            Ok(tokens) => tokens,
            Err(err) => {
                violations.push(Violation::new(
                    ViolationKind::ParseError,
                    err.to_string(),
                    err.span(),
                ));
                return ValidationReport {
                    accepted: false,
                    violations,
                };
            }
        };

        // Deny-list pre-scan over raw tokens. This names the dangerous
        // construct even when the surrounding text does not parse (e.g.
        // `import socket`).
        for token in &tokens {
            if let TokenKind::Ident(name) = &token.kind {
                let lowered = name.to_lowercase();
                if IMPORT_LIKE.contains(lowered.as_str()) {
                    violations.push(Violation::new(
                        ViolationKind::DisallowedImport,
                        format!("'{name}' is an import construct and is not permitted"),
                        token.span,
                    ));
                } else if DENY_LIST.contains(lowered.as_str()) {
                    violations.push(Violation::new(
                        ViolationKind::DisallowedCall,
                        format!("'{name}' performs I/O, process control, or code execution"),
                        token.span,
                    ));
                }
            }
        }

        match parse_snippet(source) {
            Ok(snippet) => self.walk(&snippet, &mut violations),
            Err(err) => {
                violations.push(Violation::new(
                    ViolationKind::ParseError,
                    err.to_string(),
                    err.span(),
                ));
            }
        }

        ValidationReport {
            accepted: violations.is_empty(),
            violations,
        }
    }

    fn walk(&self, snippet: &Snippet, violations: &mut Vec<Violation>) {
        if snippet.statements.len() > self.max_statements {
            violations.push(Violation::new(
                ViolationKind::TooManyStatements,
                format!(
                    "{} top-level statements, at most {} are allowed",
                    snippet.statements.len(),
                    self.max_statements
                ),
                snippet.statements[self.max_statements].span(),
            ));
        }

        let mut assigned: HashSet<String> = HashSet::new();
        for stmt in &snippet.statements {
            match stmt {
                Stmt::Assign { name, span, value } => {
                    self.walk_expr(value, &assigned, violations);
                    if self.dataset_names.contains(name) {
                        violations.push(Violation::new(
                            ViolationKind::ShadowsDataset,
                            format!("Assignment to '{name}' shadows a dataset binding"),
                            *span,
                        ));
                    } else {
                        assigned.insert(name.clone());
                    }
                }
                Stmt::Expr(node) => self.walk_expr(node, &assigned, violations),
            }
        }
    }

    fn walk_expr(&self, node: &AstNode, assigned: &HashSet<String>, violations: &mut Vec<Violation>) {
        match &node.expr {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if self.is_denied(name) {
                    // Already reported by the token pre-scan.
                    return;
                }
                if !self.dataset_names.contains(name)
                    && !self.allowed_helpers.contains(name)
                    && !assigned.contains(name)
                {
                    violations.push(Violation::new(
                        ViolationKind::UnknownIdentifier,
                        format!("'{name}' is not a dataset, helper, or assigned name"),
                        node.span,
                    ));
                }
            }
            Expr::List(items) => {
                for item in items {
                    self.walk_expr(item, assigned, violations);
                }
            }
            Expr::Attribute { base, name } => {
                // Attribute names are column projections; the dangerous
                // ones are caught by the token pre-scan, the rest are
                // checked against real columns at execution time.
                let _ = name;
                self.walk_expr(base, assigned, violations);
            }
            Expr::Index { base, index } => {
                self.walk_expr(base, assigned, violations);
                self.walk_expr(index, assigned, violations);
            }
            Expr::Call { name, args } => {
                if !self.is_denied(name) && !self.allowed_helpers.contains(name) {
                    violations.push(Violation::new(
                        ViolationKind::DisallowedCall,
                        format!("'{name}' is not on the helper allow-list"),
                        node.span,
                    ));
                }
                for arg in args {
                    self.walk_expr(arg, assigned, violations);
                }
            }
            Expr::Unary { operand, .. } => self.walk_expr(operand, assigned, violations),
            Expr::Binary { left, right, .. } => {
                self.walk_expr(left, assigned, violations);
                self.walk_expr(right, assigned, violations);
            }
            Expr::Conditional {
                value,
                condition,
                fallback,
            } => {
                self.walk_expr(value, assigned, violations);
                self.walk_expr(condition, assigned, violations);
                self.walk_expr(fallback, assigned, violations);
            }
        }
    }

    fn is_denied(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        DENY_LIST.contains(lowered.as_str()) || IMPORT_LIKE.contains(lowered.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SnippetValidator {
        SnippetValidator::new(
            vec!["orders".to_string(), "customers".to_string()],
            vec![
                "sum".to_string(),
                "mean".to_string(),
                "count".to_string(),
                "filter".to_string(),
                "print".to_string(),
            ],
            5,
        )
    }

    #[test]
    fn test_clean_snippet_accepted_with_empty_report() {
        let report = validator().validate("sum(orders.revenue)");
        assert!(report.accepted);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_import_rejected_with_named_construct() {
        let report = validator().validate("import socket");
        assert!(!report.accepted);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::DisallowedImport && v.detail.contains("import")));
    }

    #[test]
    fn test_io_call_rejected() {
        let report = validator().validate("open('data.csv')");
        assert!(!report.accepted);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::DisallowedCall && v.detail.contains("open")));
    }

    #[test]
    fn test_unknown_identifier_rejected() {
        let report = validator().validate("sum(payments.amount)");
        assert!(!report.accepted);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::UnknownIdentifier && v.detail.contains("payments")));
    }

    #[test]
    fn test_unlisted_helper_rejected() {
        let report = validator().validate("pivot(orders)");
        assert!(!report.accepted);
        assert_eq!(report.violations[0].kind, ViolationKind::DisallowedCall);
    }

    #[test]
    fn test_shadowing_dataset_rejected() {
        let report = validator().validate("orders = 1");
        assert!(!report.accepted);
        assert_eq!(report.violations[0].kind, ViolationKind::ShadowsDataset);
    }

    #[test]
    fn test_assigned_names_are_usable_later() {
        let report = validator().validate("small = filter(orders, orders.qty < 3)\ncount(small)");
        assert!(report.accepted, "{:?}", report.violations);
    }

    #[test]
    fn test_statement_cap() {
        let report = validator().validate("1\n2\n3\n4\n5\n6");
        assert!(!report.accepted);
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::TooManyStatements));
    }

    #[test]
    fn test_all_violations_collected_in_one_pass() {
        let report = validator().validate("orders = open('x')\nsum(ghost.col)");
        assert!(!report.accepted);
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::DisallowedCall));
        assert!(kinds.contains(&ViolationKind::ShadowsDataset));
        assert!(kinds.contains(&ViolationKind::UnknownIdentifier));
    }

    #[test]
    fn test_parse_failure_is_rejection_not_crash() {
        let report = validator().validate("sum(((");
        assert!(!report.accepted);
        assert_eq!(report.violations[0].kind, ViolationKind::ParseError);
    }

    #[test]
    fn test_pathological_nesting_is_rejection_not_crash() {
        let source = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let report = validator().validate(&source);
        assert!(!report.accepted);
        assert_eq!(report.violations[0].kind, ViolationKind::ParseError);
        assert!(report.violations[0].detail.contains("nesting"));
    }

    #[test]
    fn test_violation_locations_are_recorded() {
        let report = validator().validate("sum(orders.revenue)\nopen('x')");
        let violation = report
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::DisallowedCall)
            .unwrap();
        assert_eq!(violation.line, 2);
        assert_eq!(violation.column, 1);
    }
}
