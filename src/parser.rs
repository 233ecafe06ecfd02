// ABOUTME: Pratt parser turning a token stream into statements and expressions

use crate::ast::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp};
use crate::lexer::lex;
use crate::token::{Keyword, Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParseError {
    #[error("unexpected token {found} at {span}, expected {expected}")]
    Unexpected {
        found: String,
        expected: String,
        span: Span,
    },
    #[error("{0}")]
    Lex(#[from] crate::lexer::LexError),
}

/// Binding power pair: (left binding power, right binding power) for infix
/// operators, used the usual Pratt way (right < left means left-associative).
fn infix_binding_power(kind: &TokenKind) -> Option<(u8, u8)> {
    use TokenKind::*;
    Some(match kind {
        Keyword(Keyword::Or) => (10, 11),
        Keyword(Keyword::And) => (20, 21),
        EqEq | NotEq => (40, 41),
        Lt | Le | Gt | Ge => (50, 51),
        Plus | Minus => (60, 61),
        Star | Slash | Percent => (70, 71),
        _ => return None,
    })
}

const CALL_BP: u8 = 90;
const UNARY_BP: u8 = 80;
const NOT_BP: u8 = 30;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn from_source(src: &str) -> Result<Self, ParseError> {
        Ok(Parser::new(lex(src)?))
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.bump())
        } else {
            let found = self.peek().kind.to_string();
            let span = self.peek().span;
            Err(ParseError::Unexpected {
                found,
                expected: expected.to_string(),
                span,
            })
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let span = self.peek().span;
                self.bump();
                Ok((name, span))
            }
            other => Err(ParseError::Unexpected {
                found: other.to_string(),
                expected: "identifier".to_string(),
                span: self.peek().span,
            }),
        }
    }

    pub fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Def) => self.parse_def(),
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::LBrace => self.parse_block_stmt(),
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_block_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().span;
        let stmts = self.parse_block()?;
        Ok(Stmt::Block(stmts, start))
    }

    fn parse_def(&mut self) -> Result<Stmt, ParseError> {
        let start = self.bump().span; // 'def'
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (param, _) = self.expect_ident()?;
                params.push(param);
                if self.check(&TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::Def {
            name,
            params,
            body,
            span: start,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.bump().span; // 'if'
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr(0)?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.check(&TokenKind::Keyword(Keyword::Else)) {
            self.bump();
            if self.check(&TokenKind::Keyword(Keyword::If)) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            span: start,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.bump().span; // 'while'
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr(0)?;
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            cond,
            body,
            span: start,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let start = self.bump().span; // 'return'
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Return { value, span: start })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let start = self.bump().span; // 'import'
        let path = match self.peek_kind().clone() {
            TokenKind::String(s) => {
                self.bump();
                s
            }
            other => {
                return Err(ParseError::Unexpected {
                    found: other.to_string(),
                    expected: "string literal".to_string(),
                    span: self.peek().span,
                })
            }
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Import { path, span: start })
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start_span = self.peek().span;
        if let TokenKind::Ident(name) = self.peek_kind().clone() {
            if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Eq)) {
                self.bump(); // ident
                self.bump(); // '='
                let value = self.parse_expr(0)?;
                self.expect(TokenKind::Semicolon, "';'")?;
                return Ok(Stmt::Expr(
                    Expr::Assign {
                        name,
                        value: Box::new(value),
                        span: start_span,
                    },
                    start_span,
                ));
            }
        }
        let expr = self.parse_expr(0)?;
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Expr(expr, start_span))
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let kind = self.peek_kind().clone();
            if let TokenKind::LParen = kind {
                if CALL_BP < min_bp {
                    break;
                }
                lhs = self.parse_call(lhs)?;
                continue;
            }
            if let TokenKind::LBracket = kind {
                if CALL_BP < min_bp {
                    break;
                }
                lhs = self.parse_index(lhs)?;
                continue;
            }
            let Some((lbp, rbp)) = infix_binding_power(&kind) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            let op_span = self.peek().span;
            self.bump();
            let rhs = self.parse_expr(rbp)?;
            lhs = match kind {
                TokenKind::Keyword(Keyword::And) => Expr::Logical {
                    op: LogicalOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span: op_span,
                },
                TokenKind::Keyword(Keyword::Or) => Expr::Logical {
                    op: LogicalOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span: op_span,
                },
                _ => Expr::Binary {
                    op: binary_op_for(&kind),
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span: op_span,
                },
            };
        }

        Ok(lhs)
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let span = self.bump().span; // '('
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr(0)?);
                if self.check(&TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn parse_index(&mut self, target: Expr) -> Result<Expr, ParseError> {
        let span = self.bump().span; // '['
        let index = self.parse_expr(0)?;
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
            span,
        })
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number(n) => {
                self.bump();
                Ok(Expr::Number(n, tok.span))
            }
            TokenKind::String(ref s) => {
                let s = s.clone();
                self.bump();
                Ok(Expr::Str(s, tok.span))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Ok(Expr::Bool(true, tok.span))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Ok(Expr::Bool(false, tok.span))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.bump();
                Ok(Expr::Nil(tok.span))
            }
            TokenKind::Ident(ref name) => {
                let name = name.clone();
                self.bump();
                Ok(Expr::Ident(name, tok.span))
            }
            TokenKind::Minus => {
                self.bump();
                let expr = self.parse_expr(UNARY_BP)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                    span: tok.span,
                })
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.bump();
                let expr = self.parse_expr(NOT_BP)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr(0)?);
                        if self.check(&TokenKind::Comma) {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::List(items, tok.span))
            }
            other => Err(ParseError::Unexpected {
                found: other.to_string(),
                expected: "expression".to_string(),
                span: tok.span,
            }),
        }
    }
}

fn binary_op_for(kind: &TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::NotEq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        other => unreachable!("not a binary operator token: {other:?}"),
    }
}

pub fn parse(src: &str) -> Result<Vec<Stmt>, ParseError> {
    Parser::from_source(src)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let stmts = parse("1 + 2 * 3;").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Binary { op: BinaryOp::Add, rhs, .. }, _) => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn parses_and_or_short_circuit_tree() {
        let stmts = parse("true or false and false;").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Logical { op: LogicalOp::Or, rhs, .. }, _) => {
                assert!(matches!(**rhs, Expr::Logical { op: LogicalOp::And, .. }));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn parses_def_and_call() {
        let stmts = parse("def add(a, b) { return a + b; } add(1, 2);").unwrap();
        assert!(matches!(stmts[0], Stmt::Def { .. }));
        assert!(matches!(stmts[1], Stmt::Expr(Expr::Call { .. }, _)));
    }

    #[test]
    fn parses_if_else() {
        let stmts = parse("if (true) { 1; } else { 2; }").unwrap();
        assert!(matches!(
            stmts[0],
            Stmt::If {
                else_branch: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parses_assignment_vs_equality() {
        let stmts = parse("x = 1; y = x == 1;").unwrap();
        assert!(matches!(stmts[0], Stmt::Expr(Expr::Assign { .. }, _)));
        match &stmts[1] {
            Stmt::Expr(Expr::Assign { value, .. }, _) => {
                assert!(matches!(**value, Expr::Binary { op: BinaryOp::Eq, .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_index_and_call_chain() {
        let stmts = parse("a[0](1);").unwrap();
        assert!(matches!(
            stmts[0],
            Stmt::Expr(Expr::Call { .. }, _)
        ));
    }

    #[test]
    fn parse_error_on_missing_semicolon() {
        assert!(parse("1 + 2").is_err());
    }

    #[test]
    fn parses_standalone_and_nested_blocks() {
        let stmts = parse("{ x = 1; }").unwrap();
        assert!(matches!(stmts[0], Stmt::Block(..)));

        let stmts = parse("while (true) { { x = 1; } }").unwrap();
        match &stmts[0] {
            Stmt::While { body, .. } => {
                assert!(matches!(body[0], Stmt::Block(..)));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }
}
