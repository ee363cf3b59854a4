//! Tokenizer for Jet source text.
//!
//! Converts a byte stream into tokens. The surface syntax is ASCII-only:
//! integer literals with an optional minus sign, symbols over a fixed
//! alphabet, strings without escape processing, `#t`/`#f`/`#eof`, comments
//! from `;` to end of line, parentheses and brackets, and the reader-macro
//! prefixes `'`, `` ` ``, `,` and `,@`.
//!
//! Lookahead is a single byte, borrowed from the underlying reader's buffer
//! without consuming it, so a tokenizer can be dropped and recreated between
//! top-level forms (the `read` builtin does exactly that).

use crate::error::{Error, JetResult};
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Fixnum(i64),
    Symbol(String),
    Str(String),
    Boolean(bool),
    /// The `#eof` literal.
    EofObject,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    /// `'`
    Quote,
    /// `` ` ``
    QuasiQuote,
    /// `,`
    Unquote,
    /// `,@`
    UnquoteSplicing,
    /// `.` in dotted-pair position
    Dot,
    /// End of input.
    Eof,
}

pub struct Tokenizer<'a> {
    input: &'a mut dyn BufRead,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || b"_-+/*?!=.".contains(&c)
}

fn is_ident_body(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

fn is_delimiter(c: u8) -> bool {
    c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b'[' | b']' | b';' | b'"')
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a mut dyn BufRead) -> Tokenizer<'a> {
        Tokenizer { input }
    }

    fn peek(&mut self) -> Option<u8> {
        match self.input.fill_buf() {
            Ok(buffer) => buffer.first().copied(),
            Err(_) => None,
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.input.consume(1);
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b';') => {
                    // comment to end of line
                    while let Some(c) = self.bump() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> JetResult<Token> {
        self.skip_whitespace_and_comments();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };
        match c {
            b'(' => {
                self.bump();
                Ok(Token::LeftParen)
            }
            b')' => {
                self.bump();
                Ok(Token::RightParen)
            }
            b'[' => {
                self.bump();
                Ok(Token::LeftBracket)
            }
            b']' => {
                self.bump();
                Ok(Token::RightBracket)
            }
            b'\'' => {
                self.bump();
                Ok(Token::Quote)
            }
            b'`' => {
                self.bump();
                Ok(Token::QuasiQuote)
            }
            b',' => {
                self.bump();
                if self.peek() == Some(b'@') {
                    self.bump();
                    Ok(Token::UnquoteSplicing)
                } else {
                    Ok(Token::Unquote)
                }
            }
            b'"' => self.read_string(),
            b'#' => self.read_hash(),
            b'0'..=b'9' => self.read_fixnum(false),
            b'-' => {
                self.bump();
                match self.peek() {
                    Some(d) if d.is_ascii_digit() => self.read_fixnum(true),
                    _ => Ok(Token::Symbol(self.read_symbol_body(b'-'))),
                }
            }
            b'.' => {
                self.bump();
                match self.peek() {
                    Some(d) if is_ident_body(d) => Ok(Token::Symbol(self.read_symbol_body(b'.'))),
                    _ => Ok(Token::Dot),
                }
            }
            c if is_ident_start(c) => {
                self.bump();
                Ok(Token::Symbol(self.read_symbol_body(c)))
            }
            c => Err(Error::read(format!(
                "unexpected char when scanning atom: {}",
                c as char
            ))),
        }
    }

    fn read_symbol_body(&mut self, first: u8) -> String {
        let mut name = String::new();
        name.push(first as char);
        while let Some(c) = self.peek() {
            if !is_ident_body(c) {
                break;
            }
            name.push(c as char);
            self.bump();
        }
        name
    }

    fn read_fixnum(&mut self, negative: bool) -> JetResult<Token> {
        let mut digits = String::new();
        if negative {
            digits.push('-');
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c as char);
                self.bump();
            } else if is_delimiter(c) {
                break;
            } else {
                return Err(Error::read(format!(
                    "unexpected char in numeric literal: {}",
                    c as char
                )));
            }
        }
        digits
            .parse::<i64>()
            .map(Token::Fixnum)
            .map_err(|_| Error::read(format!("invalid integer literal: {}", digits)))
    }

    fn read_string(&mut self) -> JetResult<Token> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                // no escape processing: the terminator is the next quote
                Some(b'"') => return Ok(Token::Str(text)),
                Some(c) => text.push(c as char),
                None => {
                    return Err(Error::read(
                        "unexpected EOF while scanning string literal",
                    ))
                }
            }
        }
    }

    fn read_hash(&mut self) -> JetResult<Token> {
        self.bump();
        match self.peek() {
            Some(b't') => {
                self.bump();
                Ok(Token::Boolean(true))
            }
            Some(b'f') => {
                self.bump();
                Ok(Token::Boolean(false))
            }
            Some(b'e') => {
                for expected in b"eof" {
                    match self.bump() {
                        Some(c) if c == *expected => {}
                        _ => return Err(Error::read("unknown # literal")),
                    }
                }
                Ok(Token::EofObject)
            }
            _ => Err(Error::read("unknown # literal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens(source: &str) -> Vec<Token> {
        let mut input = Cursor::new(source.as_bytes());
        let mut tokenizer = Tokenizer::new(&mut input);
        let mut out = Vec::new();
        loop {
            let token = tokenizer.next_token().unwrap();
            if token == Token::Eof {
                return out;
            }
            out.push(token);
        }
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            tokens("(foo 42 \"bar\")"),
            vec![
                Token::LeftParen,
                Token::Symbol("foo".to_string()),
                Token::Fixnum(42),
                Token::Str("bar".to_string()),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn comments_and_whitespace_separate() {
        assert_eq!(
            tokens("hello ; comment\n world"),
            vec![
                Token::Symbol("hello".to_string()),
                Token::Symbol("world".to_string()),
            ]
        );
    }

    #[test]
    fn negative_numbers_and_dash_symbols() {
        assert_eq!(
            tokens("-45 - -x"),
            vec![
                Token::Fixnum(-45),
                Token::Symbol("-".to_string()),
                Token::Symbol("-x".to_string()),
            ]
        );
    }

    #[test]
    fn numeric_literals_must_end_at_a_delimiter() {
        let mut input = Cursor::new("12ab".as_bytes());
        let mut tokenizer = Tokenizer::new(&mut input);
        assert!(tokenizer.next_token().is_err());
    }

    #[test]
    fn hash_literals() {
        assert_eq!(
            tokens("#t #f #eof"),
            vec![Token::Boolean(true), Token::Boolean(false), Token::EofObject]
        );
    }

    #[test]
    fn reader_macro_prefixes() {
        assert_eq!(
            tokens("'x `y ,z ,@w"),
            vec![
                Token::Quote,
                Token::Symbol("x".to_string()),
                Token::QuasiQuote,
                Token::Symbol("y".to_string()),
                Token::Unquote,
                Token::Symbol("z".to_string()),
                Token::UnquoteSplicing,
                Token::Symbol("w".to_string()),
            ]
        );
    }

    #[test]
    fn dots_and_dotted_pairs() {
        assert_eq!(
            tokens("(a . b)"),
            vec![
                Token::LeftParen,
                Token::Symbol("a".to_string()),
                Token::Dot,
                Token::Symbol("b".to_string()),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn strings_take_no_escapes() {
        assert_eq!(
            tokens("\"a\\n\""),
            vec![Token::Str("a\\n".to_string())]
        );
    }

    #[test]
    fn symbol_alphabet() {
        assert_eq!(
            tokens("set! pair? a-b /= _x a1"),
            vec![
                Token::Symbol("set!".to_string()),
                Token::Symbol("pair?".to_string()),
                Token::Symbol("a-b".to_string()),
                Token::Symbol("/=".to_string()),
                Token::Symbol("_x".to_string()),
                Token::Symbol("a1".to_string()),
            ]
        );
    }
}
