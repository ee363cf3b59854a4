//! Parser for Jet s-expressions.
//!
//! Consumes tokens and produces unevaluated value trees through the GC heap.
//! Every intermediate is rooted: the parser allocates freely, so a collection
//! can happen between any two tokens.
//!
//! Lists open with `(` or `[` and must close with the matching delimiter.
//! Dotted pairs are supported; nesting is limited to 1024 levels. At end of
//! input the parser returns the EOF object, which is how the driver loop and
//! the `read` builtin detect exhaustion.

use crate::error::{Error, JetResult};
use crate::gc::{self, roots::FrameGuard, GcRef};
use crate::interner;
use crate::tokenizer::{Token, Tokenizer};
use crate::{gc_local, gc_local_vec};
use std::io::BufRead;

/// Maximum nested list depth.
const MAX_LIST_DEPTH: usize = 1024;

/// Reads one s-expression from the input. Returns the EOF object when the
/// input is exhausted.
pub fn parse(input: &mut dyn BufRead) -> JetResult<GcRef> {
    let mut tokenizer = Tokenizer::new(input);
    let mut depth: Vec<Token> = Vec::new();
    let token = tokenizer.next_token()?;
    if token == Token::Eof {
        return Ok(gc::alloc_eof());
    }
    parse_from_token(token, &mut tokenizer, &mut depth)
}

fn parse_from_token(
    token: Token,
    tokenizer: &mut Tokenizer,
    depth: &mut Vec<Token>,
) -> JetResult<GcRef> {
    match token {
        Token::Fixnum(n) => Ok(gc::alloc_fixnum(n)),
        Token::Str(text) => Ok(gc::alloc_string(text)),
        Token::Boolean(b) => Ok(gc::alloc_bool(b)),
        Token::EofObject => Ok(gc::alloc_eof()),
        Token::Symbol(name) => Ok(gc::alloc_symbol(interner::intern(&name))),
        Token::LeftParen => parse_list(tokenizer, depth, Token::RightParen),
        Token::LeftBracket => parse_list(tokenizer, depth, Token::RightBracket),
        Token::RightParen | Token::RightBracket => Err(Error::read("unexpected list terminator")),
        Token::Dot => Err(Error::read("unexpected '.'")),
        Token::Quote => parse_reader_macro(interner::QUOTE, tokenizer, depth),
        Token::QuasiQuote => parse_reader_macro(interner::QUASIQUOTE, tokenizer, depth),
        Token::Unquote => parse_reader_macro(interner::UNQUOTE, tokenizer, depth),
        Token::UnquoteSplicing => {
            parse_reader_macro(interner::UNQUOTE_SPLICING, tokenizer, depth)
        }
        Token::Eof => Err(Error::read("unexpected end of input")),
    }
}

/// `'x` reads as `(quote x)`, and likewise for the quasiquote family.
fn parse_reader_macro(
    symbol: usize,
    tokenizer: &mut Tokenizer,
    depth: &mut Vec<Token>,
) -> JetResult<GcRef> {
    let frame = FrameGuard::new("parse_reader_macro");
    gc_local!(frame, quoted, list);

    let token = tokenizer.next_token()?;
    quoted = parse_from_token(token, tokenizer, depth)?;
    list = gc::alloc_cons(quoted, gc::empty());
    let head = gc::alloc_symbol(symbol);
    Ok(gc::alloc_cons(head, list))
}

fn parse_list(
    tokenizer: &mut Tokenizer,
    depth: &mut Vec<Token>,
    closer: Token,
) -> JetResult<GcRef> {
    if depth.len() >= MAX_LIST_DEPTH {
        return Err(Error::read("list nesting level exceeded maximum depth"));
    }
    depth.push(closer.clone());
    let result = parse_list_body(tokenizer, depth, &closer);
    depth.pop();
    result
}

fn parse_list_body(
    tokenizer: &mut Tokenizer,
    depth: &mut Vec<Token>,
    closer: &Token,
) -> JetResult<GcRef> {
    let frame = FrameGuard::new("parse_list");
    gc_local_vec!(frame, elements);
    gc_local!(frame, tail, list);

    tail = gc::empty();
    loop {
        let token = tokenizer.next_token()?;
        if token == *closer {
            break;
        }
        match token {
            Token::RightParen | Token::RightBracket => {
                return Err(Error::read("mismatched list terminator"));
            }
            Token::Eof => {
                return Err(Error::read("unclosed list (unexpected end of input)"));
            }
            Token::Dot => {
                // dotted pair: exactly one tail atom, then the terminator
                if elements.is_empty() {
                    return Err(Error::read("unexpected '.'"));
                }
                let token = tokenizer.next_token()?;
                tail = parse_from_token(token, tokenizer, depth)?;
                let end = tokenizer.next_token()?;
                if end != *closer {
                    return Err(Error::read("expected list terminator after dotted pair"));
                }
                break;
            }
            token => {
                let element = parse_from_token(token, tokenizer, depth)?;
                elements.push(element);
            }
        }
    }

    list = tail;
    for index in (0..elements.len()).rev() {
        list = gc::alloc_cons(elements[index], list);
    }
    Ok(list)
}
