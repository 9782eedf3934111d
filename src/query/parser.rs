//! Lexer and recursive-descent parser for the SQL subset
//!
//! Syntax errors carry the byte position and offending token so a caller can
//! self-correct.

use super::ast::{AggFunc, BinaryOp, Expr, OrderKey, SelectItem, SelectStatement, UnaryOp};
use crate::dataset::Value;
use crate::{Result, TabLensError};

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Comma,
    LParen,
    RParen,
    Star,
    Plus,
    Minus,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
    text: String,
}

fn syntax_error(token: &Token, detail: impl Into<String>) -> TabLensError {
    TabLensError::QuerySyntax {
        position: token.pos,
        token: if token.text.is_empty() {
            "<end of input>".to_string()
        } else {
            token.text.clone()
        },
        detail: detail.into(),
    }
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b',' => {
                tokens.push(tok(TokenKind::Comma, i, ","));
                i += 1;
            }
            b'(' => {
                tokens.push(tok(TokenKind::LParen, i, "("));
                i += 1;
            }
            b')' => {
                tokens.push(tok(TokenKind::RParen, i, ")"));
                i += 1;
            }
            b'*' => {
                tokens.push(tok(TokenKind::Star, i, "*"));
                i += 1;
            }
            b'+' => {
                tokens.push(tok(TokenKind::Plus, i, "+"));
                i += 1;
            }
            b'-' => {
                tokens.push(tok(TokenKind::Minus, i, "-"));
                i += 1;
            }
            b'/' => {
                tokens.push(tok(TokenKind::Slash, i, "/"));
                i += 1;
            }
            b'%' => {
                tokens.push(tok(TokenKind::Percent, i, "%"));
                i += 1;
            }
            b'=' => {
                tokens.push(tok(TokenKind::Eq, i, "="));
                i += 1;
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(tok(TokenKind::NotEq, i, "!="));
                    i += 2;
                } else {
                    return Err(TabLensError::QuerySyntax {
                        position: i,
                        token: "!".to_string(),
                        detail: "expected '!='".to_string(),
                    });
                }
            }
            b'<' => match bytes.get(i + 1) {
                Some(b'=') => {
                    tokens.push(tok(TokenKind::LtEq, i, "<="));
                    i += 2;
                }
                Some(b'>') => {
                    tokens.push(tok(TokenKind::NotEq, i, "<>"));
                    i += 2;
                }
                _ => {
                    tokens.push(tok(TokenKind::Lt, i, "<"));
                    i += 1;
                }
            },
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(tok(TokenKind::GtEq, i, ">="));
                    i += 2;
                } else {
                    tokens.push(tok(TokenKind::Gt, i, ">"));
                    i += 1;
                }
            }
            b'\'' => {
                let (s, end) = lex_quoted(input, i, '\'')?;
                tokens.push(Token {
                    kind: TokenKind::Str(s.clone()),
                    pos: i,
                    text: s,
                });
                i = end;
            }
            b'"' => {
                // Double-quoted identifiers, as in "column name".
                let (s, end) = lex_quoted(input, i, '"')?;
                tokens.push(Token {
                    kind: TokenKind::Ident(s.clone()),
                    pos: i,
                    text: s,
                });
                i = end;
            }
            b'0'..=b'9' | b'.' => {
                let start = i;
                let mut has_dot = false;
                let mut has_exp = false;
                while i < bytes.len() {
                    match bytes[i] {
                        b'0'..=b'9' => i += 1,
                        b'.' if !has_dot && !has_exp => {
                            has_dot = true;
                            i += 1;
                        }
                        b'e' | b'E' if !has_exp => {
                            has_exp = true;
                            i += 1;
                            if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let text = &input[start..i];
                let kind = if has_dot || has_exp {
                    TokenKind::Float(text.parse::<f64>().map_err(|_| {
                        TabLensError::QuerySyntax {
                            position: start,
                            token: text.to_string(),
                            detail: "invalid numeric literal".to_string(),
                        }
                    })?)
                } else {
                    TokenKind::Int(text.parse::<i64>().map_err(|_| {
                        TabLensError::QuerySyntax {
                            position: start,
                            token: text.to_string(),
                            detail: "integer literal out of range".to_string(),
                        }
                    })?)
                };
                tokens.push(tok(kind, start, text));
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let text = &input[start..i];
                tokens.push(tok(TokenKind::Ident(text.to_string()), start, text));
            }
            _ => {
                return Err(TabLensError::QuerySyntax {
                    position: i,
                    token: input[i..].chars().take(1).collect(),
                    detail: "unexpected character".to_string(),
                })
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: input.len(),
        text: String::new(),
    });
    Ok(tokens)
}

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "LIMIT", "AS", "AND", "OR", "NOT", "IS",
    "ASC", "DESC", "DISTINCT",
];

fn is_reserved(name: &str) -> bool {
    RESERVED
        .iter()
        .any(|kw| name.eq_ignore_ascii_case(kw))
}

fn tok(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        pos,
        text: text.to_string(),
    }
}

fn lex_quoted(input: &str, start: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut chars = input[start + 1..].char_indices();
    while let Some((offset, c)) = chars.next() {
        if c == quote {
            // Doubled quote is an escaped quote.
            let after = start + 1 + offset + c.len_utf8();
            if input[after..].starts_with(quote) {
                out.push(quote);
                chars.next();
            } else {
                return Ok((out, after));
            }
        } else {
            out.push(c);
        }
    }
    Err(TabLensError::QuerySyntax {
        position: start,
        token: input[start..].chars().take(8).collect(),
        detail: "unterminated quoted token".to_string(),
    })
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a complete SELECT statement.
pub fn parse(sql: &str) -> Result<SelectStatement> {
    Parser::new(sql)?.parse_select()
}

impl Parser {
    fn new(sql: &str) -> Result<Self> {
        Ok(Self {
            tokens: lex(sql)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(syntax_error(self.peek(), format!("expected {kw}")))
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(syntax_error(self.peek(), format!("expected {what}")))
        }
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect_keyword("SELECT")?;

        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);
            if !matches!(self.peek().kind, TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect_keyword("FROM")?;
        let table = match self.advance() {
            Token {
                kind: TokenKind::Ident(name),
                ..
            }
            | Token {
                kind: TokenKind::Str(name),
                ..
            } => name,
            other => return Err(syntax_error(&other, "expected table name")),
        };

        let where_clause = if self.eat_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                group_by.push(self.parse_expr()?);
                if !matches!(self.peek().kind, TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let expr = self.parse_expr()?;
                let desc = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderKey { expr, desc });
                if !matches!(self.peek().kind, TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            match self.advance() {
                Token {
                    kind: TokenKind::Int(n),
                    ..
                } if n >= 0 => Some(n as usize),
                other => return Err(syntax_error(&other, "expected row count after LIMIT")),
            }
        } else {
            None
        };

        match &self.peek().kind {
            TokenKind::Eof => Ok(SelectStatement {
                items,
                table,
                where_clause,
                group_by,
                order_by,
                limit,
            }),
            _ => Err(syntax_error(self.peek(), "unexpected trailing input")),
        }
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if matches!(self.peek().kind, TokenKind::Star) {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }
        let expr = self.parse_expr()?;
        let alias = if self.eat_keyword("AS") {
            match self.advance() {
                Token {
                    kind: TokenKind::Ident(name),
                    ..
                } => Some(name),
                other => return Err(syntax_error(&other, "expected alias after AS")),
            }
        } else if let TokenKind::Ident(name) = &self.peek().kind {
            // Bare alias, unless the identifier is a keyword. Quoted
            // identifiers are not distinguishable here, which is acceptable:
            // a bare alias never needs quoting.
            if is_reserved(name) {
                None
            } else {
                let name = name.clone();
                self.advance();
                Some(name)
            }
        } else {
            None
        };
        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let op = match self.peek().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::LtEq => BinaryOp::LtEq,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::GtEq => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek().kind, TokenKind::Minus) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Value::Integer(n))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "closing ')'")?;
                Ok(expr)
            }
            TokenKind::Ident(ref name) => {
                if name.eq_ignore_ascii_case("NULL") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if name.eq_ignore_ascii_case("TRUE") {
                    return Ok(Expr::Literal(Value::Boolean(true)));
                }
                if name.eq_ignore_ascii_case("FALSE") {
                    return Ok(Expr::Literal(Value::Boolean(false)));
                }
                if matches!(self.peek().kind, TokenKind::LParen) {
                    return self.parse_function(&token, &name);
                }
                if is_reserved(&name) {
                    return Err(syntax_error(&token, "expected expression"));
                }
                Ok(Expr::Column(name.clone()))
            }
            _ => Err(syntax_error(&token, "expected expression")),
        }
    }

    fn parse_function(&mut self, at: &Token, name: &str) -> Result<Expr> {
        let func = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "AVG" => AggFunc::Avg,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            _ => return Err(syntax_error(at, format!("unknown function '{name}'"))),
        };
        self.expect(&TokenKind::LParen, "'('")?;

        let distinct = self.eat_keyword("DISTINCT");
        if distinct && func != AggFunc::Count {
            return Err(syntax_error(at, "DISTINCT is only supported with COUNT"));
        }

        let arg = if matches!(self.peek().kind, TokenKind::Star) {
            if func != AggFunc::Count {
                return Err(syntax_error(self.peek(), "'*' is only valid in COUNT(*)"));
            }
            self.advance();
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        self.expect(&TokenKind::RParen, "closing ')'")?;
        Ok(Expr::Aggregate {
            func,
            arg,
            distinct,
        })
    }
}
