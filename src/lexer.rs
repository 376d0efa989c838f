pub use logos::Span;
use logos::{Lexer, Logos};

use crate::value::Fixnum;

fn read_fixnum(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    let slice = lexer.slice();
    if !slice.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LexerError::MalformedNumber);
    }
    // Every slice is digits only, so the only way to fail is overflow
    let value = slice
        .parse::<i64>()
        .map_err(|_| LexerError::NumberTooBig)?;
    Fixnum::new(value)
        .map(Fixnum::get)
        .ok_or(LexerError::NumberTooBig)
}

fn read_character(lexer: &mut Lexer<Token>) -> Result<char, LexerError> {
    // skip the \ at the front
    let mut chars = lexer.slice().chars().skip(1);
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(LexerError::MalformedCharacter),
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("malformed number")]
    MalformedNumber,
    #[error("number literal too big")]
    NumberTooBig,
    #[error("malformed character literal")]
    MalformedCharacter,
}

/// Tokens are lexed from some source, and can arbitrarily borrow from it.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
pub enum Token {
    #[regex("[ \t\x0C]+")]
    IntralineWhitespace,
    #[token("\n")]
    #[token("\r\n")]
    #[token("\r")]
    LineEnding,
    #[regex(r";[^\n]*")]
    Comment,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    // Anything that does not start with a digit is a name. `true`, `false` and
    // `nil` are recognized by the reader, not here.
    #[regex(r#"[^ \t\x0C\r\n();\\0-9][^ \t\x0C\r\n()]*"#, |l| Box::from(l.slice()))]
    Identifier(Box<str>),
    // Tokens starting with a digit must be all digits
    #[regex(r#"[0-9][^ \t\x0C\r\n()]*"#, read_fixnum)]
    Fixnum(i64),
    #[regex(r#"\\[^ \t\x0C\r\n]"#, read_character)]
    Character(char),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }

    /// Whitespace and comments, which carry no meaning for the reader.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            Self::IntralineWhitespace | Self::LineEnding | Self::Comment
        )
    }
}

#[cfg(test)]
mod tests {
    use assert2::{assert, check, let_assert};

    use super::{LexerError, Token};

    fn significant(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source)
            .filter(|tok| !tok.as_ref().is_ok_and(Token::is_trivia))
            .collect()
    }

    #[test]
    fn identifier_checklist() {
        macro_rules! test_valid {
            ($source:literal) => {{
                let mut lexer = Token::lexer($source);
                let token = lexer.next();
                let_assert!(Some(Ok(Token::Identifier(name))) = token);
                assert!(name.as_ref() == $source);
                assert!(lexer.slice() == $source);
            }};
        }

        test_valid!("+");
        test_valid!("-");
        test_valid!("*");
        test_valid!("/");
        test_valid!("let");
        test_valid!("fn");
        test_valid!("x1");
        test_valid!("->string");
        test_valid!("a;b");
        test_valid!("λ");
        test_valid!("true");
        test_valid!("trueish");
    }

    #[test]
    fn test_fixnum() {
        check!(Token::lexer("0").next() == Some(Ok(Token::Fixnum(0))));
        check!(Token::lexer("42").next() == Some(Ok(Token::Fixnum(42))));
        check!(Token::lexer("12abc").next() == Some(Err(LexerError::MalformedNumber)));
        check!(
            Token::lexer("99999999999999999999").next() == Some(Err(LexerError::NumberTooBig))
        );
        // fits in an i64 but not in 63 bits
        check!(
            Token::lexer("4611686018427387904").next() == Some(Err(LexerError::NumberTooBig))
        );
        check!(
            Token::lexer("4611686018427387903").next()
                == Some(Ok(Token::Fixnum(4611686018427387903)))
        );
    }

    #[test]
    fn test_character() {
        check!(Token::lexer(r"\a").next() == Some(Ok(Token::Character('a'))));
        check!(Token::lexer(r"\(").next() == Some(Ok(Token::Character('('))));
        check!(Token::lexer(r"\λ").next() == Some(Ok(Token::Character('λ'))));
    }

    #[test]
    fn comments_and_whitespace() {
        check!(
            significant("(+ 1 ; the rest is ignored\n 2)")
                == vec![
                    Ok(Token::LParen),
                    Ok(Token::Identifier(Box::from("+"))),
                    Ok(Token::Fixnum(1)),
                    Ok(Token::Fixnum(2)),
                    Ok(Token::RParen),
                ]
        );
    }

    #[test]
    fn parens_split_tokens() {
        check!(
            significant("(fn(x)x)")
                == vec![
                    Ok(Token::LParen),
                    Ok(Token::Identifier(Box::from("fn"))),
                    Ok(Token::LParen),
                    Ok(Token::Identifier(Box::from("x"))),
                    Ok(Token::RParen),
                    Ok(Token::Identifier(Box::from("x"))),
                    Ok(Token::RParen),
                ]
        );
    }
}
