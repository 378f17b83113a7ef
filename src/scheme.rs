//! Datum grammar and the pull-parser.
//!
//! The grammar is the classic s-expression surface: `(` and `)` delimit
//! branches, `;` starts a line comment, `'` abbreviates `quote`, `"..."`
//! is a string literal read verbatim to the closing quote (no escape
//! sequences), and every other maximal run of non-delimiter characters
//! is a word classified as a boolean, number, keyword or identifier.
//!
//! [`Parser`] pulls one datum at a time from an internal text buffer.
//! The buffer can be fed incrementally (a REPL feeds one line per
//! prompt), and a parse failure whose failure point is the end of the
//! buffer is reported as [`ParseErrorKind::Incomplete`] - the caller
//! decides whether more input can still arrive. Hard syntax errors
//! consume one character so the driver can keep going.

use nom::IResult;
use nom::Parser as _;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::char;
use nom::error::{Error as NomError, ErrorKind};

use crate::ast::{self, Node, kw};
use crate::{ParseError, ParseErrorKind};

/// Characters that terminate a word token.
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | ';' | '\'' | '"')
}

/// Skip whitespace and `;` line comments.
fn skip_trivia(mut input: &str) -> &str {
    loop {
        let trimmed = input.trim_start();
        if let Some(comment) = trimmed.strip_prefix(';') {
            match comment.find('\n') {
                Some(i) => input = &comment[i + 1..],
                None => return &comment[comment.len()..],
            }
        } else {
            return trimmed;
        }
    }
}

/// Token pattern for numbers: `-?[0-9]+(.[0-9]*)?`.
fn is_number_token(word: &str) -> bool {
    let unsigned = word.strip_prefix('-').unwrap_or(word);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    frac_part.is_none_or(|frac| frac.bytes().all(|b| b.is_ascii_digit()))
}

/// Classify a word token into its node kind.
fn classify(word: &str) -> Node {
    if word == "#t" || word == "#f" {
        return Node::Boolean(word == "#t");
    }
    if is_number_token(word)
        && let Ok(n) = word.parse::<f64>()
    {
        return Node::Number(n);
    }
    if ast::is_keyword(word) {
        return Node::Keyword(word.to_owned());
    }
    Node::Identifier(word.to_owned())
}

fn error_at(input: &str, kind: ErrorKind) -> nom::Err<NomError<&str>> {
    nom::Err::Error(NomError::new(input, kind))
}

/// Parse one datum. The error position (the remaining input inside the
/// error) distinguishes "ran off the end" from genuine bad syntax, so
/// dispatch on the first character rather than trying alternatives.
fn parse_node(input: &str) -> IResult<&str, Node> {
    let input = skip_trivia(input);
    match input.chars().next() {
        None => Err(error_at(input, ErrorKind::Eof)),
        Some('\'') => parse_quoted(input),
        Some('(') => parse_list(input),
        Some(')') => Err(error_at(input, ErrorKind::Char)),
        Some('"') => parse_string(input),
        Some(_) => parse_word(input),
    }
}

/// `'datum` reads as `(quote datum)`.
fn parse_quoted(input: &str) -> IResult<&str, Node> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, datum) = parse_node(rest)?;
    Ok((rest, Node::Branch(vec![kw("quote"), datum])))
}

fn parse_list(input: &str) -> IResult<&str, Node> {
    let (mut rest, _) = char('(').parse(input)?;
    let mut children = Vec::new();
    loop {
        rest = skip_trivia(rest);
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((after, Node::Branch(children)));
        }
        if rest.is_empty() {
            // Unclosed list: the failure point is the buffer end.
            return Err(error_at(rest, ErrorKind::Char));
        }
        let (after, child) = parse_node(rest)?;
        children.push(child);
        rest = after;
    }
}

/// A string literal runs to the next `"`; there is no escape handling.
fn parse_string(input: &str) -> IResult<&str, Node> {
    let (rest, _) = char('"').parse(input)?;
    let (rest, contents) = take_while(|c: char| c != '"').parse(rest)?;
    let (rest, _) = char('"').parse(rest)?;
    Ok((rest, Node::String(contents.to_owned())))
}

fn parse_word(input: &str) -> IResult<&str, Node> {
    let (rest, word) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;
    Ok((rest, classify(word)))
}

/// A resumable pull-parser over a growing text buffer.
pub struct Parser {
    buf: String,
    pos: usize,
    eof: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            buf: String::new(),
            pos: 0,
            eof: false,
        }
    }

    /// A parser over a complete source text (fed and finished).
    pub fn from_source(source: &str) -> Self {
        let mut parser = Parser::new();
        parser.feed(source);
        parser.finish();
        parser
    }

    /// Append source text to the buffer.
    pub fn feed(&mut self, text: &str) {
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        self.buf.push_str(text);
    }

    /// Mark that no more input will arrive.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }

    /// Pull the next datum.
    ///
    /// - `None`: nothing but trivia remains in the buffer.
    /// - `Some(Err(e))` with `e.is_incomplete()`: the buffer holds a
    ///   prefix of a datum. Nothing is consumed; feed more text and call
    ///   again (or treat as an error if the input is finished).
    /// - `Some(Err(_))` otherwise: bad syntax; one character has been
    ///   consumed so the caller can continue.
    pub fn next(&mut self) -> Option<Result<Node, ParseError>> {
        let remaining = &self.buf[self.pos..];
        let trimmed = skip_trivia(remaining);
        if trimmed.is_empty() {
            return None;
        }

        match parse_node(trimmed) {
            Ok((rest, node)) => {
                self.pos = self.buf.len() - rest.len();
                Some(Ok(node))
            }
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                if e.input.is_empty() {
                    Some(Err(ParseError::incomplete()))
                } else {
                    let error_pos = self.buf.len() - e.input.len();
                    let snippet: String = e.input.chars().take(10).collect();
                    let first_len = e.input.chars().next().map_or(1, char::len_utf8);
                    self.pos = error_pos + first_len;
                    Some(Err(ParseError::new(
                        ParseErrorKind::InvalidSyntax,
                        format!("invalid syntax near '{snippet}'"),
                    )))
                }
            }
            Err(nom::Err::Incomplete(_)) => Some(Err(ParseError::incomplete())),
        }
    }
}

/// Parse a single datum from a complete source string. Used pervasively
/// in tests; trailing content after the first datum is ignored.
pub fn parse_one(source: &str) -> Result<Node, ParseError> {
    match Parser::from_source(source).next() {
        Some(result) => result,
        None => Err(ParseError::incomplete()),
    }
}
