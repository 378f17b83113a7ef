//! Schemelet - a tree-walking interpreter for a small Scheme dialect.
//!
//! The interpreter reads source text one datum at a time, rewrites each
//! top-level form through user-defined `syntax-rules` macros, and evaluates
//! the result against a lexically scoped, mutable environment:
//!
//! ```scheme
//! (define (sign x)
//!   (cond ((> x 0) 1)
//!         ((= x 0) 0)
//!         (else -1)))
//! (sign -100)          ; => -1
//!
//! (define-syntax when
//!   (syntax-rules () ((_ pred b1 ...) (if pred (begin b1 ...)))))
//! (when #t 'yes)       ; => yes
//! ```
//!
//! Tail calls never grow the host stack: user functions return a
//! continuation `(node, env)` instead of a value whenever their last body
//! form is about to be evaluated, and a single trampoline loop
//! ([`evaluator::eval_loop`]) consumes those continuations. `apply` and
//! `force` participate in the same protocol, so applied calls and forced
//! promises stay in tail position.
//!
//! Runtime failures are ordinary values ([`value::Value::Error`]) that
//! propagate like any other result; the [`ParseError`] type below covers
//! only the host-level concern of turning text into syntax trees.
//!
//! ## Modules
//!
//! - `ast`: syntax nodes produced by the parser and rewritten by macros
//! - `scheme`: datum grammar and the resumable pull-parser
//! - `value`: runtime values, mutable pair cells, the `Step` contract
//! - `env`: environment frame chain and the global macro registry
//! - `macros`: `syntax-rules` pattern matching and template expansion
//! - `evaluator`: special forms, function application, the trampoline
//! - `builtinops`: primitive procedures installed in the global frame
//! - `interpreter`: read-expand-eval-print driver with timeout support

use std::fmt;

/// Maximum number of macro rewrites applied to a single top-level form.
/// Rewriting stops with an error once the cap is hit, so a macro that
/// expands to a use of itself cannot loop the expander forever.
pub const MAX_MACRO_APPLICATIONS: usize = 100;

/// Categorizes the different kinds of parsing failures.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray `)`, malformed datum)
    InvalidSyntax,
    /// Input ended before the datum was complete (unclosed parens,
    /// unterminated string, dangling quote). More input may still arrive.
    Incomplete,
}

/// A structured error describing a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for the "ran out of input mid-datum" case.
    pub fn incomplete() -> Self {
        Self::new(ParseErrorKind::Incomplete, "unexpected end of input")
    }

    /// True when feeding more source text could turn this into a success.
    pub fn is_incomplete(&self) -> bool {
        self.kind == ParseErrorKind::Incomplete
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub mod ast;
pub mod builtinops;
pub mod env;
pub mod evaluator;
pub mod interpreter;
pub mod macros;
pub mod scheme;
pub mod value;
