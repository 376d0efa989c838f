//! Reading starts where the lexer dropped off, and turns the token stream into
//! [`Value`]s, one form at a time.
use logos::SpannedIter;

use crate::{
    lexer::{LexerError, Span, Token},
    value::{list, Fixnum, Symbol, Value},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("unexpected end of input")]
    UnexpectedEof { span: Span },
    #[error("unexpected )")]
    UnexpectedClose { span: Span },
}

impl ReadError {
    /// Where in the source the error was detected.
    pub fn span(&self) -> Span {
        match self {
            Self::Lexer { span, .. }
            | Self::UnexpectedEof { span }
            | Self::UnexpectedClose { span } => span.clone(),
        }
    }
}

pub struct Reader<'src> {
    tokens: SpannedIter<'src, Token>,
    end: usize,
}

impl<'src> Reader<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            tokens: Token::lexer(source).spanned(),
            end: source.len(),
        }
    }

    /// Reads the next form, or `None` once only whitespace and comments remain.
    pub fn read(&mut self) -> Result<Option<Value>, ReadError> {
        let Some((token, span)) = self.next_token()? else {
            return Ok(None);
        };
        match token {
            Token::LParen => self.read_tail().map(Some),
            Token::RParen => Err(ReadError::UnexpectedClose { span }),
            atom => Ok(Some(atom_value(atom))),
        }
    }

    /// Reads exactly one form, treating end of input as an error.
    pub fn read_one(&mut self) -> Result<Value, ReadError> {
        self.read()?.ok_or(ReadError::UnexpectedEof {
            span: self.end..self.end,
        })
    }

    // Elements up to the matching `)`, with the `(` already consumed.
    fn read_tail(&mut self) -> Result<Value, ReadError> {
        let mut elements = vec![];
        loop {
            let Some((token, _)) = self.next_token()? else {
                return Err(ReadError::UnexpectedEof {
                    span: self.end..self.end,
                });
            };
            match token {
                Token::RParen => break,
                Token::LParen => elements.push(self.read_tail()?),
                atom => elements.push(atom_value(atom)),
            }
        }
        Ok(list::list(elements))
    }

    fn next_token(&mut self) -> Result<Option<(Token, Span)>, ReadError> {
        for (token, span) in self.tokens.by_ref() {
            match token {
                Ok(tok) if tok.is_trivia() => continue,
                Ok(tok) => return Ok(Some((tok, span))),
                Err(error) => return Err(ReadError::Lexer { error, span }),
            }
        }
        Ok(None)
    }
}

impl Iterator for Reader<'_> {
    type Item = Result<Value, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

fn atom_value(token: Token) -> Value {
    match token {
        Token::Identifier(name) => match name.as_ref() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            "nil" => Value::Nil,
            _ => Value::Symbol(Symbol::new(name)),
        },
        // the lexer already range-checked the literal
        Token::Fixnum(n) => Fixnum::new(n).map_or(Value::Number(n), Value::Fixnum),
        Token::Character(c) => Value::Character(c),
        other => unreachable!("{other:?} is not an atom"),
    }
}

/// Reads the first form of `source`.
pub fn read(source: &str) -> Result<Value, ReadError> {
    Reader::new(source).read_one()
}
