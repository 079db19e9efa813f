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

use crate::lang::ast::Span;
use crate::lang::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    If,
    Else,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqualEqual,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Assign,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Separator,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokenise snippet text. Comments (`#` to end of line) are skipped;
/// newlines and `;` both become statement separators.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut pos = 0;
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    macro_rules! push {
        ($kind:expr, $span:expr) => {
            tokens.push(Token {
                kind: $kind,
                span: $span,
            })
        };
    }

    while pos < chars.len() {
        let c = chars[pos];
        let span = Span::new(line, column);
        match c {
            ' ' | '\t' | '\r' => {
                pos += 1;
                column += 1;
            }
            '\n' => {
                push!(TokenKind::Separator, span);
                pos += 1;
                line += 1;
                column = 1;
            }
            '#' => {
                while pos < chars.len() && chars[pos] != '\n' {
                    pos += 1;
                    column += 1;
                }
            }
            ';' => {
                push!(TokenKind::Separator, span);
                pos += 1;
                column += 1;
            }
            '+' => {
                push!(TokenKind::Plus, span);
                pos += 1;
                column += 1;
            }
            '-' => {
                push!(TokenKind::Minus, span);
                pos += 1;
                column += 1;
            }
            '*' => {
                push!(TokenKind::Star, span);
                pos += 1;
                column += 1;
            }
            '/' => {
                push!(TokenKind::Slash, span);
                pos += 1;
                column += 1;
            }
            '%' => {
                push!(TokenKind::Percent, span);
                pos += 1;
                column += 1;
            }
            '.' => {
                push!(TokenKind::Dot, span);
                pos += 1;
                column += 1;
            }
            ',' => {
                push!(TokenKind::Comma, span);
                pos += 1;
                column += 1;
            }
            '(' => {
                push!(TokenKind::LParen, span);
                pos += 1;
                column += 1;
            }
            ')' => {
                push!(TokenKind::RParen, span);
                pos += 1;
                column += 1;
            }
            '[' => {
                push!(TokenKind::LBracket, span);
                pos += 1;
                column += 1;
            }
            ']' => {
                push!(TokenKind::RBracket, span);
                pos += 1;
                column += 1;
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    push!(TokenKind::EqualEqual, span);
                    pos += 2;
                    column += 2;
                } else {
                    push!(TokenKind::Assign, span);
                    pos += 1;
                    column += 1;
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    push!(TokenKind::NotEqual, span);
                    pos += 2;
                    column += 2;
                } else {
                    return Err(ParseError::UnexpectedCharacter { character: '!', span });
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    push!(TokenKind::GreaterEqual, span);
                    pos += 2;
                    column += 2;
                } else {
                    push!(TokenKind::Greater, span);
                    pos += 1;
                    column += 1;
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    push!(TokenKind::LessEqual, span);
                    pos += 2;
                    column += 2;
                } else {
                    push!(TokenKind::Less, span);
                    pos += 1;
                    column += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut literal = String::new();
                let mut offset = 1;
                loop {
                    match chars.get(pos + offset) {
                        Some('\\') => {
                            match chars.get(pos + offset + 1) {
                                Some('n') => literal.push('\n'),
                                Some('t') => literal.push('\t'),
                                Some(&escaped) => literal.push(escaped),
                                None => {
                                    return Err(ParseError::UnterminatedString { span });
                                }
                            }
                            offset += 2;
                        }
                        Some(&ch) if ch == quote => {
                            offset += 1;
                            break;
                        }
                        Some('\n') | None => {
                            return Err(ParseError::UnterminatedString { span });
                        }
                        Some(&ch) => {
                            literal.push(ch);
                            offset += 1;
                        }
                    }
                }
                push!(TokenKind::Str(literal), span);
                pos += offset;
                column += offset as u32;
            }
            c if c.is_ascii_digit() => {
                let mut end = pos;
                let mut is_float = false;
                while end < chars.len()
                    && (chars[end].is_ascii_digit()
                        || (chars[end] == '.'
                            && !is_float
                            && chars.get(end + 1).is_some_and(|c| c.is_ascii_digit())))
                {
                    if chars[end] == '.' {
                        is_float = true;
                    }
                    end += 1;
                }
                let text: String = chars[pos..end].iter().collect();
                let kind = if is_float {
                    TokenKind::Float(text.parse().map_err(|_| ParseError::InvalidNumber {
                        text: text.clone(),
                        span,
                    })?)
                } else {
                    TokenKind::Int(text.parse().map_err(|_| ParseError::InvalidNumber {
                        text: text.clone(),
                        span,
                    })?)
                };
                push!(kind, span);
                column += (end - pos) as u32;
                pos = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let word: String = chars[pos..end].iter().collect();
                let kind = match word.as_str() {
                    "true" | "True" => TokenKind::True,
                    "false" | "False" => TokenKind::False,
                    "null" | "None" => TokenKind::Null,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "if" => TokenKind::If,
                    "else" => TokenKind::Else,
                    _ => TokenKind::Ident(word),
                };
                push!(kind, span);
                column += (end - pos) as u32;
                pos = end;
            }
            other => {
                return Err(ParseError::UnexpectedCharacter {
                    character: other,
                    span,
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(line, column),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_expression() {
        let tokens = tokenize("sum(orders.revenue) > 10.5").unwrap();
        let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        assert!(matches!(kinds[0], TokenKind::Ident(name) if name == "sum"));
        assert!(matches!(kinds[1], TokenKind::LParen));
        assert!(matches!(kinds[3], TokenKind::Dot));
        assert!(matches!(kinds[6], TokenKind::Greater));
        assert!(matches!(kinds[7], TokenKind::Float(f) if (*f - 10.5).abs() < f64::EPSILON));
    }

    #[test]
    fn test_tokenize_tracks_positions() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].kind, TokenKind::Separator);
        assert_eq!(tokens[2].span, Span::new(2, 3));
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""a\nb""#).unwrap();
        assert!(matches!(&tokens[0].kind, TokenKind::Str(s) if s == "a\nb"));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(tokenize("\"oops").is_err());
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("1 # the answer").unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(matches!(tokens[0].kind, TokenKind::Int(1)));
    }

    #[test]
    fn test_python_style_keywords() {
        let tokens = tokenize("True False None").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::True);
        assert_eq!(tokens[1].kind, TokenKind::False);
        assert_eq!(tokens[2].kind, TokenKind::Null);
    }
}
