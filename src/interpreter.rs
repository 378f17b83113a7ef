//! The read-expand-eval-print driver.
//!
//! An [`Interpreter`] owns the pull-parser, an output sink, the global
//! environment and an optional per-form timeout. Construction installs
//! the default builtins plus the two I/O primitives that need host
//! state: `display` (writes to the sink) and `read` (pulls the next
//! datum from the same parser the driver reads from and returns it
//! quoted).
//!
//! Each top-level form goes through the same pipeline: parse, expand
//! macros to a fixed point, evaluate on the trampoline (checking the
//! deadline between iterations when a timeout is set), then print the
//! result unless it is the unspecified value. Errors - parse errors,
//! expansion errors, error values - are printed and the loop continues
//! with the next form.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::ast::{Node, kw};
use crate::builtinops::{self, Arity, builtin_value};
use crate::env::Env;
use crate::evaluator::{eval_loop, eval_loop_until};
use crate::scheme::Parser;
use crate::value::{Step, Value};

/// Shared writable output sink. Tests hand in a `Vec<u8>` to capture
/// everything the session printed.
pub type OutputSink = Rc<RefCell<dyn Write>>;

pub struct Interpreter {
    parser: Rc<RefCell<Parser>>,
    out: OutputSink,
    global: Env,
    timeout: Duration,
}

impl Interpreter {
    /// Build an interpreter around a parser and an output sink. A zero
    /// `timeout` disables the per-form deadline.
    pub fn new(parser: Parser, out: OutputSink, timeout: Duration) -> Self {
        let parser = Rc::new(RefCell::new(parser));
        let global = Env::global(builtinops::default_frame());

        let display_out = Rc::clone(&out);
        global.define(
            "display",
            builtin_value("display", Arity::Exact(1), move |args| {
                let _ = writeln!(display_out.borrow_mut(), "{}", args[0]);
                Step::Done(Value::Void)
            }),
        );

        // read pulls the next datum from the interpreter's own input and
        // evaluates it quoted, yielding the datum as a value.
        let read_parser = Rc::clone(&parser);
        let read_env = global.clone();
        global.define(
            "read",
            builtin_value("read", Arity::Exact(0), move |_args| {
                let datum = read_parser.borrow_mut().next();
                Step::Done(match datum {
                    None => Value::Error("end of input".to_owned()),
                    Some(Err(e)) => Value::Error(format!(
                        "an error occurred while reading from input: {e}"
                    )),
                    Some(Ok(node)) => {
                        let quoted = Node::Branch(vec![kw("quote"), node]);
                        eval_loop(&quoted, &read_env)
                    }
                })
            }),
        );

        Interpreter {
            parser,
            out,
            global,
            timeout,
        }
    }

    /// Append source text to the input buffer.
    pub fn feed(&self, text: &str) {
        self.parser.borrow_mut().feed(text);
    }

    /// Mark the input as finished.
    pub fn finish(&self) {
        self.parser.borrow_mut().finish();
    }

    pub fn global_env(&self) -> &Env {
        &self.global
    }

    fn print_line(&self, line: &str) {
        let _ = writeln!(self.out.borrow_mut(), "{line}");
    }

    /// Expand, evaluate and print one parsed form.
    fn eval_node(&self, node: Node) {
        let node = match self.global.expand(node) {
            Ok(node) => node,
            Err(msg) => {
                self.print_line(&format!("{}", Value::Error(msg)));
                return;
            }
        };

        let deadline = (!self.timeout.is_zero()).then(|| Instant::now() + self.timeout);
        match eval_loop_until(&node, &self.global, deadline) {
            None => self.print_line("Timed out."),
            Some(Value::Void) => {}
            Some(value) => self.print_line(&format!("{value}")),
        }
    }

    /// Parse and run one form. Returns `false` once no further progress
    /// is possible (input exhausted, or truncated at end of input).
    fn eval_next(&self) -> bool {
        let parsed = self.parser.borrow_mut().next();
        match parsed {
            None => false,
            Some(Err(e)) => {
                self.print_line(&format!("An error occurred while parsing next input: {e}"));
                // A hard error consumed a character; an incomplete form
                // at the end of a finished input cannot make progress.
                !e.is_incomplete()
            }
            Some(Ok(node)) => {
                self.eval_node(node);
                true
            }
        }
    }

    /// Run every form until the input is exhausted.
    pub fn read_loop(&self) {
        while self.eval_next() {}
    }

    /// Evaluate all complete forms currently buffered. Returns `true`
    /// when the buffer ends in a partial form and more input is
    /// expected - the line-oriented REPL shows a continuation prompt.
    pub fn pump(&self) -> bool {
        loop {
            let parsed = self.parser.borrow_mut().next();
            match parsed {
                None => return false,
                Some(Err(e)) if e.is_incomplete() => {
                    if self.parser.borrow().at_eof() {
                        self.print_line(&format!(
                            "An error occurred while parsing next input: {e}"
                        ));
                        return false;
                    }
                    return true;
                }
                Some(Err(e)) => {
                    self.print_line(&format!("An error occurred while parsing next input: {e}"));
                }
                Some(Ok(node)) => self.eval_node(node),
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    /// Run a complete session over the given source lines and return
    /// everything it printed.
    fn run_session(source: &str, timeout: Duration) -> String {
        let sink = Rc::new(RefCell::new(Vec::<u8>::new()));
        let out: OutputSink = sink.clone();
        let interpreter = Interpreter::new(Parser::from_source(source), out, timeout);
        interpreter.read_loop();
        String::from_utf8(sink.borrow().clone()).unwrap()
    }

    /// Whole-session tests: inputs on the left, the exact sequence of
    /// printed lines on the right. Unspecified results print nothing.
    #[test]
    #[expect(clippy::too_many_lines)] // one row per session keeps the corpus scannable
    fn test_sessions() {
        let sessions: Vec<(&str, Vec<&str>, Vec<&str>)> = vec![
            ("numbers", vec!["42", "334"], vec!["42", "334"]),
            (
                "basic arithmetic",
                vec![
                    "(+ 1 2)",
                    "(- 13 8)",
                    "(* 15 20)",
                    "(/ 300 50)",
                    "(+ 1 2 (- 3 (* 4 5 (/ 10 5) 6) 7) 8 9)",
                ],
                vec!["3", "5", "300", "6", "-224"],
            ),
            (
                "define numbers",
                vec!["(define xx 2)", "(define po 5)", "(* xx po xx)"],
                vec!["20"],
            ),
            (
                "basic lambda",
                vec!["(lambda (x) (* x 2))", "((lambda (x) (* x 2)) 2)"],
                vec!["<function>", "4"],
            ),
            (
                "define lambda",
                vec![
                    "(define double (lambda (x) (* x 2)))",
                    "double",
                    "(double 3)",
                    "(double 5)",
                ],
                vec!["<function>", "6", "10"],
            ),
            (
                "define lambda (syntax sugar)",
                vec!["(define (double x) (* x 2))", "(double 3)", "(double 5)"],
                vec!["6", "10"],
            ),
            (
                "booleans",
                vec![
                    "#t",
                    "#f",
                    "(> 3 2)",
                    "(>= 3 3)",
                    "(= 0 1)",
                    "(zero? 0)",
                    "(even? 4)",
                    "(odd? 4)",
                    "(not (= 0 1))",
                ],
                vec!["#t", "#f", "#t", "#t", "#f", "#t", "#t", "#f", "#t"],
            ),
            (
                "short circuit",
                vec![
                    "(and)",
                    "(or)",
                    "(and 3 4)",
                    "(and (= 5 0) (/ 5 0))",
                    "(or #f #t)",
                    "(or #f 5)",
                ],
                vec!["#t", "#f", "4", "#f", "#t", "5"],
            ),
            (
                "if",
                vec![
                    "(define (my-div x y) (if (= y 0) 0 (/ x y)))",
                    "(my-div 10 5)",
                    "(my-div 10 0)",
                ],
                vec!["2", "0"],
            ),
            (
                "cond",
                vec![
                    "(define (sign x) (cond ((> x 0) 1) ((= x 0) 0) (else -1)))",
                    "(sign 5)",
                    "(sign 0)",
                    "(sign -100)",
                ],
                vec!["1", "0", "-1"],
            ),
            (
                "let",
                vec![
                    "(define (let-test x) (let ((x (+ x 1)) (y (+ x 2))) (* x y)))",
                    "(define (let-test-2 x) (let* ((x (+ x 1)) (y (+ x 2))) (* x y)))",
                    "(let-test 1)",
                    "(let-test-2 1)",
                ],
                vec!["6", "8"],
            ),
            (
                "cons",
                vec![
                    "(cons 1 2)",
                    "(cons 1 (cons 2 3))",
                    "(cons (cons 1 2) 3)",
                    "(car (cons 1 2))",
                    "(cdr (cons 1 2))",
                    "(cadr (cons 1 (cons 2 3)))",
                ],
                vec!["(1 . 2)", "(1 2 . 3)", "((1 . 2) . 3)", "1", "2", "2"],
            ),
            (
                "quote",
                vec![
                    "'po",
                    "(quote po)",
                    "'()",
                    "'(1 2 3)",
                    "(caddr '(1 2 3))",
                    "'(1 . 2)",
                    "(cdr '(1 . 2))",
                    "'(define (xx po) (po))",
                    "(cadadr '(define (xx po) (po)))",
                ],
                vec![
                    "po",
                    "po",
                    "()",
                    "(1 2 3)",
                    "3",
                    "(1 . 2)",
                    "2",
                    "(define (xx po) (po))",
                    "po",
                ],
            ),
            (
                "set!",
                vec!["(define po 20)", "po", "(set! po 50)", "po"],
                vec!["20", "50"],
            ),
            (
                "set-car, cdr",
                vec![
                    "(define p (cons 1 2))",
                    "p",
                    "(set-car! p 3)",
                    "p",
                    "(set-cdr! p 4)",
                    "p",
                ],
                vec!["(1 . 2)", "(3 . 2)", "(3 . 4)"],
            ),
            (
                "variadic length functions 1",
                vec![
                    "(define f (lambda x x))",
                    "(f)",
                    "(f 1)",
                    "(f 1 2 3 4 5)",
                    "(define (f . x) x)",
                    "(f)",
                    "(f 1)",
                    "(f 1 2 3 4 5)",
                ],
                vec!["()", "(1)", "(1 2 3 4 5)", "()", "(1)", "(1 2 3 4 5)"],
            ),
            (
                "variadic length functions 2",
                vec![
                    "(define f (lambda (x y . z) (list x y z)))",
                    "(f 1 2)",
                    "(f 1 2 3)",
                    "(f 1 2 3 4 5)",
                    "(define (f x y . z) (list x y z))",
                    "(f 1 2)",
                    "(f 1 2 3)",
                    "(f 1 2 3 4 5)",
                ],
                vec![
                    "(1 2 ())",
                    "(1 2 (3))",
                    "(1 2 (3 4 5))",
                    "(1 2 ())",
                    "(1 2 (3))",
                    "(1 2 (3 4 5))",
                ],
            ),
            (
                "macros",
                vec![
                    "(define-syntax when (syntax-rules () ((_ pred b1 ...) (if pred (begin b1 ...)))))",
                    "(define-syntax while (syntax-rules () ((_ pred b1 ...) (begin (define (loop) (when pred b1 ... (loop))) (loop)))))",
                    "(define-syntax for (syntax-rules () ((_ (i from to) b1 ...) (begin (define (loop i) (when (< i to) b1 ... (loop (+ i 1)))) (loop from)))))",
                    "(define-syntax inc! (syntax-rules () ((_ x) (begin (set! x (+ x 1)) x)) ((_ x i) (begin (set! x (+ x i)) x))))",
                    "(when #f (/ 1 0))",
                    "(let ((i 0)) (while (< i 3) (display i) (set! i (+ i 1))))",
                    "(for (i 0 3) (display i))",
                    "(define i 0)",
                    "(inc! i)",
                    "(inc! i 3)",
                    "i",
                ],
                vec!["0", "1", "2", "0", "1", "2", "1", "4", "4"],
            ),
            (
                "promise / stream",
                vec![
                    "(define-syntax s-cons (syntax-rules () ((_ a b) (cons a (delay b)))))",
                    "(define (s-car s) (car s))",
                    "(define (s-cdr s) (force (cdr s)))",
                    "(define (s-null? s) (null? s))",
                    "(define (s-head s n) (cond ((s-null? s) '()) ((<= n 0) '()) (else (cons (s-car s) (s-head (s-cdr s) (- n 1))))))",
                    "(define (integers-from n) (s-cons n (integers-from (+ n 1))))",
                    "(define integers* (integers-from 1))",
                    "(s-head integers* 10)",
                    "(s-head integers* 5)",
                ],
                vec!["(1 2 3 4 5 6 7 8 9 10)", "(1 2 3 4 5)"],
            ),
            (
                "display and errors",
                vec![
                    "(display \"hi\")",
                    "(display (cons 1 2))",
                    "(/ 1 0)",
                    "(car '())",
                    "unbound-name",
                ],
                vec![
                    "\"hi\"",
                    "(1 . 2)",
                    "error: division by 0",
                    "error: expected pair, but got ()",
                    "error: unbound identifier: unbound-name",
                ],
            ),
            (
                "read",
                vec!["(read)", "(1 2 3)", "(read)"],
                vec!["(1 2 3)", "error: end of input"],
            ),
        ];

        for (name, inputs, outputs) in sessions {
            let got = run_session(&inputs.join("\n"), Duration::ZERO);
            let mut expected = outputs.join("\n");
            if !expected.is_empty() {
                expected.push('\n');
            }
            assert_eq!(got, expected, "session: {name}");
        }
    }

    #[test]
    fn test_timeout_abandons_form_and_continues() {
        let source = "(define (spin) (spin))\n(spin)\n(+ 40 2)";
        let got = run_session(source, Duration::from_millis(50));
        assert_eq!(got, "Timed out.\n42\n");
    }

    #[test]
    fn test_zero_timeout_means_no_deadline() {
        let source = "(define (count n) (if (= n 0) 'ok (count (- n 1))))\n(count 100000)";
        assert_eq!(run_session(source, Duration::ZERO), "ok\n");
    }

    #[test]
    fn test_parse_error_recovery() {
        let got = run_session(") 42", Duration::ZERO);
        assert!(
            got.contains("An error occurred while parsing next input"),
            "{got}"
        );
        assert!(got.ends_with("42\n"), "{got}");
    }

    #[test]
    fn test_truncated_input_reports_and_stops() {
        let got = run_session("(+ 1 2) (car", Duration::ZERO);
        assert!(got.starts_with("3\n"), "{got}");
        assert!(got.contains("unexpected end of input"), "{got}");
    }

    #[test]
    fn test_pump_reports_pending_form() {
        let sink = Rc::new(RefCell::new(Vec::<u8>::new()));
        let out: OutputSink = sink.clone();
        let interpreter = Interpreter::new(Parser::new(), out, Duration::ZERO);

        interpreter.feed("(+ 1\n");
        assert!(interpreter.pump(), "open form should report pending");
        interpreter.feed("2)\n(* 2 3)\n");
        assert!(!interpreter.pump());
        assert_eq!(String::from_utf8(sink.borrow().clone()).unwrap(), "3\n6\n");
    }

    #[test]
    fn test_expansion_cap_is_reported() {
        let source = "(define-syntax spin (syntax-rules () ((_ x) (spin x))))\n(spin 1)\n42";
        let got = run_session(source, Duration::ZERO);
        assert!(
            got.contains("error: exceeded macro recursive application limit (100)"),
            "{got}"
        );
        assert!(got.ends_with("42\n"), "{got}");
    }

    #[test]
    fn test_macro_scope_is_global() {
        // define-syntax inside a let still registers globally.
        let source = "(let ((x 1)) (define-syntax k (syntax-rules () ((_) 7))))\n(k)";
        assert_eq!(run_session(source, Duration::ZERO), "7\n");
    }
}
