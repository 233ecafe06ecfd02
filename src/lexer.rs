// ABOUTME: Converts PyRaf source text into a flat token stream

use crate::token::{Keyword, Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum LexError {
    #[error("unexpected character {ch:?} at {line}:{col}")]
    UnexpectedChar { ch: char, line: u32, col: u32 },
    #[error("unterminated string starting at {line}:{col}")]
    UnterminatedString { line: u32, col: u32 },
}

pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span(&self, start_line: u32, start_col: u32) -> Span {
        Span::new(start_line, start_col)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self, start_line: u32, start_col: u32) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value: f64 = text.parse().expect("lexer only admits valid number text");
        Token::new(
            TokenKind::Number(value),
            text,
            self.span(start_line, start_col),
        )
    }

    fn lex_ident(&mut self, start_line: u32, start_col: u32) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z') | Some(b'A'..=b'Z') | Some(b'0'..=b'9') | Some(b'_'))
        {
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        let span = self.span(start_line, start_col);
        match Keyword::lookup(&text) {
            Some(kw) => Token::new(TokenKind::Keyword(kw), text, span),
            None => Token::new(TokenKind::Ident(text.clone()), text, span),
        }
    }

    fn lex_string(&mut self, start_line: u32, start_col: u32) -> Result<Token, LexError> {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(LexError::UnterminatedString {
                        line: start_line,
                        col: start_col,
                    })
                }
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    match self.bump() {
                        Some(b'n') => value.push('\n'),
                        Some(b't') => value.push('\t'),
                        Some(b'"') => value.push('"'),
                        Some(b'\\') => value.push('\\'),
                        Some(other) => value.push(other as char),
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: start_line,
                                col: start_col,
                            })
                        }
                    }
                }
                Some(_) => {
                    // Re-decode as UTF-8 one scalar at a time by falling back to the
                    // str view; ASCII fast path covers the common case above.
                    let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or("");
                    let ch = rest.chars().next().unwrap();
                    for _ in 0..ch.len_utf8() {
                        self.bump();
                    }
                    value.push(ch);
                }
            }
        }
        Ok(Token::new(
            TokenKind::String(value),
            "",
            self.span(start_line, start_col),
        ))
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let ch = match self.peek() {
            None => return Ok(Token::new(TokenKind::Eof, "", self.span(line, col))),
            Some(c) => c,
        };

        if ch.is_ascii_digit() {
            return Ok(self.lex_number(line, col));
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            return Ok(self.lex_ident(line, col));
        }
        if ch == b'"' {
            return self.lex_string(line, col);
        }

        macro_rules! single {
            ($kind:expr) => {{
                self.bump();
                Ok(Token::new($kind, (ch as char).to_string(), self.span(line, col)))
            }};
        }

        match ch {
            b'(' => single!(TokenKind::LParen),
            b')' => single!(TokenKind::RParen),
            b'{' => single!(TokenKind::LBrace),
            b'}' => single!(TokenKind::RBrace),
            b'[' => single!(TokenKind::LBracket),
            b']' => single!(TokenKind::RBracket),
            b',' => single!(TokenKind::Comma),
            b';' => single!(TokenKind::Semicolon),
            b'+' => single!(TokenKind::Plus),
            b'-' => single!(TokenKind::Minus),
            b'*' => single!(TokenKind::Star),
            b'/' => single!(TokenKind::Slash),
            b'%' => single!(TokenKind::Percent),
            b'=' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Token::new(TokenKind::EqEq, "==", self.span(line, col)))
                } else {
                    Ok(Token::new(TokenKind::Eq, "=", self.span(line, col)))
                }
            }
            b'!' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Token::new(TokenKind::NotEq, "!=", self.span(line, col)))
                } else {
                    Err(LexError::UnexpectedChar {
                        ch: '!',
                        line,
                        col,
                    })
                }
            }
            b'<' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Token::new(TokenKind::Le, "<=", self.span(line, col)))
                } else {
                    Ok(Token::new(TokenKind::Lt, "<", self.span(line, col)))
                }
            }
            b'>' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Token::new(TokenKind::Ge, ">=", self.span(line, col)))
                } else {
                    Ok(Token::new(TokenKind::Gt, ">", self.span(line, col)))
                }
            }
            _ => {
                let rest = std::str::from_utf8(&self.src[self.pos..]).unwrap_or("");
                let bad = rest.chars().next().unwrap_or('\u{FFFD}');
                for _ in 0..bad.len_utf8() {
                    self.bump();
                }
                Err(LexError::UnexpectedChar {
                    ch: bad,
                    line,
                    col,
                })
            }
        }
    }
}

pub fn lex(src: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let is_eof = tok.is_eof();
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_arithmetic() {
        assert_eq!(
            kinds("1 + 2 * 3"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Star,
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_keywords_vs_idents() {
        assert_eq!(
            kinds("if while foo"),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Keyword(Keyword::While),
                TokenKind::Ident("foo".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_escapes() {
        assert_eq!(
            kinds("\"a\\nb\""),
            vec![TokenKind::String("a\nb".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn skips_line_comments() {
        assert_eq!(
            kinds("1 // comment\n2"),
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]
        );
    }

    #[test]
    fn tracks_line_and_col() {
        let tokens = lex("1\n  2").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].span, Span::new(2, 3));
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(matches!(
            lex("\"abc"),
            Err(LexError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn unexpected_char_errors() {
        assert!(matches!(lex("1 @ 2"), Err(LexError::UnexpectedChar { ch: '@', .. })));
    }
}
