//! Tokenizing legacy line-oriented files (`.ram` and `.mc`).
//!
//! Both formats hold one entry per line. Blank lines are skipped, and
//! `#` starts a comment that runs to the end of the line (on its own line or after an entry).
//!
//! [`Token`] is the lexical unit, and [`data_lines`] groups tokens back into
//! the non-blank lines of a file.

use std::ops::Range;

use logos::{Lexer, Logos};

/// A unit of information in a legacy file.
#[derive(Debug, Logos, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+", error = LexErr)]
pub enum Token {
    /// An unsigned decimal value (e.g., `9006`).
    #[regex(r"[0-9]+", lex_unsigned, priority = 3)]
    Unsigned(u32),

    /// Any other run of non-blank characters (e.g., an instruction name, or a malformed number).
    #[regex(r"[^ \t\r\f\n#]+")]
    Text,

    /// A comment, which starts with `#` and spans the remaining part of the line.
    #[regex(r"#[^\n]*")]
    Comment,

    /// A new line
    #[token("\n")]
    NewLine
}

/// Any errors raised in attempting to read a value from a line.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, thiserror::Error)]
pub enum LexErr {
    /// Numeric literal cannot fit within the range of a u32.
    #[error("numeric token does not fit 32-bit unsigned integer")]
    DoesNotFitU32,
    /// Line holds something other than exactly one unsigned number.
    #[error("line is not a single unsigned integer")]
    NotANumber,
    /// A symbol was used which does not occur in any token.
    #[default]
    #[error("unrecognized symbol")]
    InvalidSymbol
}

fn lex_unsigned(lx: &Lexer<'_, Token>) -> Result<u32, LexErr> {
    lx.slice()
        .parse::<u32>()
        .map_err(|_| LexErr::DoesNotFitU32)
}

/// A non-blank line of a legacy file.
#[derive(Debug, PartialEq, Eq)]
pub struct Line<'s> {
    /// 1-indexed line number in the source.
    pub line_no: usize,
    /// The line's content, without surrounding whitespace or comment.
    pub text: &'s str,
    /// The line's content read as a single unsigned integer.
    pub value: Result<u32, LexErr>,
}

/// Splits a legacy file into its non-blank, non-comment lines.
///
/// ```
/// use vn_ensemble::project::lex::data_lines;
///
/// let lines = data_lines("9006\n1005 # comment\n\n# only a comment\nADD\n");
/// let texts: Vec<_> = lines.iter().map(|l| l.text).collect();
/// assert_eq!(texts, ["9006", "1005", "ADD"]);
/// assert_eq!(lines[1].value, Ok(1005));
/// assert!(lines[2].value.is_err());
/// assert_eq!(lines[2].line_no, 5);
/// ```
pub fn data_lines(src: &str) -> Vec<Line<'_>> {
    let mut lines = vec![];
    let mut current: Vec<(Result<Token, LexErr>, Range<usize>)> = vec![];
    let mut line_no = 1;

    for (token, span) in Token::lexer(src).spanned() {
        match token {
            Ok(Token::NewLine) => {
                lines.extend(finish_line(src, line_no, &mut current));
                line_no += 1;
            },
            Ok(Token::Comment) => {},
            token => current.push((token, span)),
        }
    }
    lines.extend(finish_line(src, line_no, &mut current));

    lines
}

fn finish_line<'s>(src: &'s str, line_no: usize, tokens: &mut Vec<(Result<Token, LexErr>, Range<usize>)>) -> Option<Line<'s>> {
    let start = tokens.first()?.1.start;
    let end = tokens.last()?.1.end;

    let value = match tokens.as_slice() {
        [(Ok(Token::Unsigned(n)), _)] => Ok(*n),
        [(Err(e), _)] => Err(*e),
        _ => Err(LexErr::NotANumber),
    };
    tokens.clear();

    Some(Line { line_no, text: &src[start..end], value })
}
