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

use crate::lang::ast::{AstNode, BinaryOp, Expr, Literal, Snippet, Span, Stmt, UnaryOp};
use crate::lang::lexer::{tokenize, Token, TokenKind};
use thiserror::Error;

/// Cap on expression nesting, enforced both while recursing and over the
/// finished tree, so pathological input is a parse error instead of a
/// stack overflow anywhere downstream.
const MAX_NESTING_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected character '{character}' at {span}")]
    UnexpectedCharacter { character: char, span: Span },
    #[error("Unterminated string literal at {span}")]
    UnterminatedString { span: Span },
    #[error("Invalid number '{text}' at {span}")]
    InvalidNumber { text: String, span: Span },
    #[error("Unexpected token {found} at {span}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        span: Span,
    },
    #[error("Expression nesting exceeds {limit} levels at {span}")]
    NestingTooDeep { limit: usize, span: Span },
    #[error("Empty snippet")]
    EmptySnippet,
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedCharacter { span, .. }
            | ParseError::UnterminatedString { span }
            | ParseError::InvalidNumber { span, .. }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::NestingTooDeep { span, .. } => *span,
            ParseError::EmptySnippet => Span::new(1, 1),
        }
    }
}

/// Parse snippet text into an AST without evaluating anything.
pub fn parse_snippet(source: &str) -> Result<Snippet, ParseError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Snippet, ParseError> {
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.check(&TokenKind::Eof) {
            statements.push(self.statement()?);
            if !self.check(&TokenKind::Eof) {
                self.expect_separator()?;
                self.skip_separators();
            }
        }
        if statements.is_empty() {
            return Err(ParseError::EmptySnippet);
        }
        let snippet = Snippet { statements };
        check_tree_depth(&snippet)?;
        Ok(snippet)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        // Assignment requires ident '=' lookahead; everything else is an
        // expression statement.
        if let TokenKind::Ident(name) = &self.peek().kind {
            if self.peek_ahead(1).kind == TokenKind::Assign {
                let name = name.clone();
                let span = self.peek().span;
                self.advance();
                self.advance();
                let value = self.expression()?;
                return Ok(Stmt::Assign { name, span, value });
            }
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn expression(&mut self) -> Result<AstNode, ParseError> {
        self.enter_nesting()?;
        let result = self.conditional();
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<AstNode, ParseError> {
        let value = self.or_expr()?;
        if self.check(&TokenKind::If) {
            self.advance();
            let condition = self.or_expr()?;
            self.expect(TokenKind::Else, "'else'")?;
            let fallback = self.expression()?;
            let span = value.span;
            return Ok(AstNode::new(
                Expr::Conditional {
                    value: Box::new(value),
                    condition: Box::new(condition),
                    fallback: Box::new(fallback),
                },
                span,
            ));
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> Result<AstNode, ParseError> {
        let mut left = self.and_expr()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<AstNode, ParseError> {
        let mut left = self.not_expr()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<AstNode, ParseError> {
        if self.check(&TokenKind::Not) {
            let span = self.peek().span;
            self.enter_nesting()?;
            self.advance();
            let operand = self.not_expr()?;
            self.depth -= 1;
            return Ok(AstNode::new(
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<AstNode, ParseError> {
        let left = self.additive()?;
        let op = match self.peek().kind {
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::NotEqual => Some(BinaryOp::NotEqual),
            TokenKind::Greater => Some(BinaryOp::GreaterThan),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            TokenKind::Less => Some(BinaryOp::LessThan),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.additive()?;
            return Ok(binary(op, left, right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<AstNode, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<AstNode, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<AstNode, ParseError> {
        if self.check(&TokenKind::Minus) {
            let span = self.peek().span;
            self.enter_nesting()?;
            self.advance();
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(AstNode::new(
                Expr::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<AstNode, ParseError> {
        let mut node = self.primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let (name, span) = self.expect_ident("attribute name")?;
                    node = AstNode::new(
                        Expr::Attribute {
                            base: Box::new(node),
                            name,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    let span = self.peek().span;
                    self.advance();
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    node = AstNode::new(
                        Expr::Index {
                            base: Box::new(node),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    // Only bare helper names are callable; fail closed on
                    // anything fancier.
                    let span = self.peek().span;
                    let name = match &node.expr {
                        Expr::Ident(name) => name.clone(),
                        _ => {
                            return Err(ParseError::UnexpectedToken {
                                found: "'('".to_string(),
                                expected: "a named helper before the call".to_string(),
                                span,
                            })
                        }
                    };
                    self.advance();
                    let args = self.call_args()?;
                    node = AstNode::new(Expr::Call { name, args }, node.span);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn call_args(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut args = Vec::new();
        if self.check(&TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            self.expect(TokenKind::RParen, "')'")?;
            break;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<AstNode, ParseError> {
        let token = self.peek().clone();
        let span = token.span;
        let node = match token.kind {
            TokenKind::Int(value) => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Int(value)), span)
            }
            TokenKind::Float(value) => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Float(value)), span)
            }
            TokenKind::Str(value) => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Str(value)), span)
            }
            TokenKind::True => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Bool(true)), span)
            }
            TokenKind::False => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Bool(false)), span)
            }
            TokenKind::Null => {
                self.advance();
                AstNode::new(Expr::Literal(Literal::Null), span)
            }
            TokenKind::Ident(name) => {
                self.advance();
                AstNode::new(Expr::Ident(name), span)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.check(&TokenKind::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                AstNode::new(Expr::List(items), span)
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    found: describe(&other),
                    expected: "an expression".to_string(),
                    span,
                })
            }
        };
        Ok(node)
    }

    fn enter_nesting(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
                span: self.peek().span,
            });
        }
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), ParseError> {
        if self.peek().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: describe(&self.peek().kind),
                expected: expected.to_string(),
                span: self.peek().span,
            })
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        let token = self.peek().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.advance();
            Ok((name, token.span))
        } else {
            Err(ParseError::UnexpectedToken {
                found: describe(&token.kind),
                expected: expected.to_string(),
                span: token.span,
            })
        }
    }

    fn expect_separator(&mut self) -> Result<(), ParseError> {
        if self.check(&TokenKind::Separator) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: describe(&self.peek().kind),
                expected: "a newline or ';' between statements".to_string(),
                span: self.peek().span,
            })
        }
    }

    fn skip_separators(&mut self) {
        while self.check(&TokenKind::Separator) {
            self.advance();
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_ahead(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }
}

fn binary(op: BinaryOp, left: AstNode, right: AstNode) -> AstNode {
    let span = left.span;
    AstNode::new(
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// Left-leaning operator chains are built in loops above, so the
/// recursion guard never sees their depth; this walk is iterative for
/// the same reason.
fn check_tree_depth(snippet: &Snippet) -> Result<(), ParseError> {
    let mut stack: Vec<(&AstNode, usize)> = Vec::new();
    for stmt in &snippet.statements {
        match stmt {
            Stmt::Assign { value, .. } => stack.push((value, 1)),
            Stmt::Expr(node) => stack.push((node, 1)),
        }
    }
    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
                span: node.span,
            });
        }
        match &node.expr {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::List(items) => stack.extend(items.iter().map(|item| (item, depth + 1))),
            Expr::Attribute { base, .. } => stack.push((base, depth + 1)),
            Expr::Index { base, index } => {
                stack.push((base, depth + 1));
                stack.push((index, depth + 1));
            }
            Expr::Call { args, .. } => stack.extend(args.iter().map(|arg| (arg, depth + 1))),
            Expr::Unary { operand, .. } => stack.push((operand, depth + 1)),
            Expr::Binary { left, right, .. } => {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
            Expr::Conditional {
                value,
                condition,
                fallback,
            } => {
                stack.push((value, depth + 1));
                stack.push((condition, depth + 1));
                stack.push((fallback, depth + 1));
            }
        }
    }
    Ok(())
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Int(value) => format!("number {value}"),
        TokenKind::Float(value) => format!("number {value}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Separator => "end of statement".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_attribute() {
        let snippet = parse_snippet("sum(orders.revenue)").unwrap();
        assert_eq!(snippet.statements.len(), 1);
        match &snippet.statements[0] {
            Stmt::Expr(node) => match &node.expr {
                Expr::Call { name, args } => {
                    assert_eq!(name, "sum");
                    assert_eq!(args.len(), 1);
                    assert!(matches!(args[0].expr, Expr::Attribute { .. }));
                }
                other => panic!("expected call, got {other:?}"),
            },
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assignment_and_result() {
        let snippet = parse_snippet("high = filter(orders, orders.qty > 5)\ncount(high)").unwrap();
        assert_eq!(snippet.statements.len(), 2);
        assert!(matches!(&snippet.statements[0], Stmt::Assign { name, .. } if name == "high"));
    }

    #[test]
    fn test_parse_conditional_expression() {
        let snippet = parse_snippet("1 if sum(x) > 0 else -1").unwrap();
        match &snippet.statements[0] {
            Stmt::Expr(node) => assert!(matches!(node.expr, Expr::Conditional { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let snippet = parse_snippet("1 + 2 * 3").unwrap();
        match &snippet.statements[0] {
            Stmt::Expr(node) => match &node.expr {
                Expr::Binary { op, right, .. } => {
                    assert_eq!(*op, BinaryOp::Add);
                    assert!(matches!(
                        right.expr,
                        Expr::Binary {
                            op: BinaryOp::Multiply,
                            ..
                        }
                    ));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_call_on_expression_is_rejected() {
        assert!(parse_snippet("(sum)(x)").is_err());
        assert!(parse_snippet("orders.filter(x)").is_err());
    }

    #[test]
    fn test_empty_snippet_is_error() {
        assert_eq!(parse_snippet("  \n \n"), Err(ParseError::EmptySnippet));
    }

    #[test]
    fn test_error_carries_location() {
        let err = parse_snippet("sum(").unwrap_err();
        assert_eq!(err.span().line, 1);
    }

    #[test]
    fn test_deep_parenthesis_nesting_rejected() {
        let source = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(
            parse_snippet(&source).unwrap_err(),
            ParseError::NestingTooDeep { .. }
        ));
    }

    #[test]
    fn test_deep_unary_chain_rejected() {
        let source = format!("{}1", "-".repeat(200_000));
        assert!(matches!(
            parse_snippet(&source).unwrap_err(),
            ParseError::NestingTooDeep { .. }
        ));
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let source = format!("0{}", " + 1".repeat(500));
        assert!(matches!(
            parse_snippet(&source).unwrap_err(),
            ParseError::NestingTooDeep { .. }
        ));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        assert!(parse_snippet("((1 + 2) * (3 - 4)) / abs(-5)").is_ok());
    }

    #[test]
    fn test_list_literal() {
        let snippet = parse_snippet("[1, 2.5, 'x']").unwrap();
        match &snippet.statements[0] {
            Stmt::Expr(node) => match &node.expr {
                Expr::List(items) => assert_eq!(items.len(), 3),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
