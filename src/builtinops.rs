//! Primitive procedures installed in the global frame.
//!
//! Every builtin shares the canonical callable signature
//! `Fn(Vec<Value>) -> Step`: most are eager and wrap their result in
//! `Step::Done`, while `apply` and `force` return `Step::Tail`
//! continuations so the call they stand for happens in tail position.
//!
//! Failures are error *values*. A builtin that receives an `Error` as an
//! argument does not special-case it - the argument simply fails the
//! type check and produces a fresh error, which keeps the first failure
//! in an expression dominant.
//!
//! Arity is validated once, in the registration wrapper, against a
//! declared [`Arity`]; the implementations can then index their
//! arguments freely.

use std::rc::Rc;

use crate::env::Frame;
use crate::evaluator::{apply_function, complete};
use crate::value::{Builtin, PairCell, Step, Value, cons};

/// Expected number of arguments for a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Check an argument count, describing the mismatch on failure.
    pub fn validate(&self, got: usize) -> Result<(), String> {
        let plural = |n: usize| if n == 1 { "argument" } else { "arguments" };
        match *self {
            Arity::Exact(n) if got != n => Err(format!(
                "expected exactly {n} {}, but got {got}",
                plural(n)
            )),
            Arity::AtLeast(n) if got < n => Err(format!(
                "expected at least {n} {}, but got {got}",
                plural(n)
            )),
            _ => Ok(()),
        }
    }
}

/// Wrap a function as a builtin value with arity validation in front.
/// Also used by the interpreter host to install its I/O glue.
pub(crate) fn builtin_value(
    name: &str,
    arity: Arity,
    f: impl Fn(Vec<Value>) -> Step + 'static,
) -> Value {
    let owned_name = name.to_owned();
    let func = Box::new(move |args: Vec<Value>| {
        if let Err(msg) = arity.validate(args.len()) {
            return Step::Done(Value::Error(format!("{owned_name}: {msg}")));
        }
        f(args)
    });
    Value::Builtin(Rc::new(Builtin {
        name: name.to_owned(),
        func,
    }))
}

/// Register a builtin whose result may be a tail continuation.
fn install_raw(
    frame: &mut Frame,
    name: &str,
    arity: Arity,
    f: impl Fn(Vec<Value>) -> Step + 'static,
) {
    frame.insert(name.to_owned(), builtin_value(name, arity, f));
}

/// Register an eager builtin.
fn install(frame: &mut Frame, name: &str, arity: Arity, f: impl Fn(Vec<Value>) -> Value + 'static) {
    install_raw(frame, name, arity, move |args| Step::Done(f(args)));
}

/// Coerce every argument to a number, or produce the error value for the
/// first one that is not.
fn numeric_args(args: &[Value]) -> Result<Vec<f64>, Value> {
    args.iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Number(n) => Ok(*n),
            other => Err(Value::Error(format!(
                "expected {i}-th argument to be number, but got {other}"
            ))),
        })
        .collect()
}

/// Adapt a function over plain numbers into a builtin body.
fn numbers_fn(f: impl Fn(Vec<f64>) -> Value + 'static) -> impl Fn(Vec<Value>) -> Value + 'static {
    move |args| match numeric_args(&args) {
        Ok(nums) => f(nums),
        Err(e) => e,
    }
}

fn install_compare(frame: &mut Frame, name: &str, op: fn(f64, f64) -> bool) {
    install(
        frame,
        name,
        Arity::Exact(2),
        numbers_fn(move |nums| Value::Bool(op(nums[0], nums[1]))),
    );
}

fn install_predicate(frame: &mut Frame, name: &str, test: fn(&Value) -> bool) {
    install(frame, name, Arity::Exact(1), move |args| {
        Value::Bool(test(&args[0]))
    });
}

/// A numeric predicate that only accepts integral doubles.
fn install_parity(frame: &mut Frame, name: &str, test: fn(f64) -> bool) {
    install(
        frame,
        name,
        Arity::Exact(1),
        numbers_fn(move |nums| {
            let n = nums[0];
            if n.trunc() != n {
                return Value::Error(format!("expected integer argument, but got {n}"));
            }
            Value::Bool(test(n))
        }),
    );
}

fn as_pair(value: &Value) -> Result<&Rc<PairCell>, Value> {
    match value {
        Value::Pair(cell) => Ok(cell),
        other => Err(Value::Error(format!("expected pair, but got {other}"))),
    }
}

/// Install every `cXXr` accessor for 2 <= depth <= 4 (`cadr`, `cddr`,
/// `caddr`, `cadadr`, ...). The `a`/`d` letters compose car/cdr applied
/// right to left, exactly as the names read.
fn install_cxr(frame: &mut Frame) {
    for depth in 2usize..=4 {
        for mask in 0u32..(1 << depth) {
            let mut letters = Vec::with_capacity(depth);
            for position in 0..depth {
                let take_car = mask & (1 << position) == 0;
                letters.push(if take_car { 'a' } else { 'd' });
            }
            let name = format!("c{}r", letters.iter().collect::<String>());
            install(frame, &name, Arity::Exact(1), move |mut args| {
                let mut cur = args.remove(0);
                for letter in letters.iter().rev() {
                    cur = match as_pair(&cur) {
                        Ok(cell) => {
                            if *letter == 'a' {
                                cell.car()
                            } else {
                                cell.cdr()
                            }
                        }
                        Err(e) => return e,
                    };
                }
                cur
            });
        }
    }
}

/// Build the global frame holding every default builtin. The interpreter
/// host adds the I/O glue (`display`, `read`) on top of this.
#[expect(clippy::too_many_lines)] // one registration per builtin reads best flat
pub fn default_frame() -> Frame {
    let mut frame = Frame::new();
    let f = &mut frame;

    // Arithmetic. `-` and `/` fold left over the tail; with a single
    // argument there is nothing to fold and the argument comes back.
    install(
        f,
        "+",
        Arity::Any,
        numbers_fn(|nums| Value::Number(nums.iter().sum())),
    );
    install(
        f,
        "-",
        Arity::AtLeast(1),
        numbers_fn(|nums| Value::Number(nums[1..].iter().fold(nums[0], |a, b| a - b))),
    );
    install(
        f,
        "*",
        Arity::Any,
        numbers_fn(|nums| Value::Number(nums.iter().product())),
    );
    install(
        f,
        "/",
        Arity::AtLeast(1),
        numbers_fn(|nums| {
            let mut result = nums[0];
            for &n in &nums[1..] {
                if n == 0.0 {
                    return Value::Error("division by 0".to_owned());
                }
                result /= n;
            }
            Value::Number(result)
        }),
    );

    // Comparison (strictly binary).
    install_compare(f, ">", |a, b| a > b);
    install_compare(f, ">=", |a, b| a >= b);
    install_compare(f, "=", |a, b| a == b);
    install_compare(f, "<=", |a, b| a <= b);
    install_compare(f, "<", |a, b| a < b);

    // Predicates.
    install(
        f,
        "zero?",
        Arity::Exact(1),
        numbers_fn(|nums| Value::Bool(nums[0] == 0.0)),
    );
    install_parity(f, "even?", |n| n % 2.0 == 0.0);
    install_parity(f, "odd?", |n| n % 2.0 != 0.0);
    install_predicate(f, "number?", |v| matches!(v, Value::Number(_)));
    install_predicate(f, "boolean?", |v| matches!(v, Value::Bool(_)));
    install_predicate(f, "symbol?", |v| matches!(v, Value::Symbol(_)));
    install_predicate(f, "string?", |v| matches!(v, Value::String(_)));
    install_predicate(f, "null?", |v| matches!(v, Value::Null));
    install_predicate(f, "list?", Value::is_list);
    install(f, "not", Arity::Exact(1), |args| {
        Value::Bool(!args[0].is_truthy())
    });

    // Numeric helpers.
    install(
        f,
        "max",
        Arity::AtLeast(1),
        numbers_fn(|nums| Value::Number(nums[1..].iter().fold(nums[0], |a, &b| a.max(b)))),
    );
    install(
        f,
        "min",
        Arity::AtLeast(1),
        numbers_fn(|nums| Value::Number(nums[1..].iter().fold(nums[0], |a, &b| a.min(b)))),
    );
    install(
        f,
        "sqrt",
        Arity::Exact(1),
        numbers_fn(|nums| Value::Number(nums[0].sqrt())),
    );
    install(
        f,
        "modulo",
        Arity::Exact(2),
        numbers_fn(|nums| {
            // Integer modulo of the truncated operands.
            let (a, b) = (nums[0].trunc() as i64, nums[1].trunc() as i64);
            if b == 0 {
                return Value::Error("division by 0".to_owned());
            }
            Value::Number((a % b) as f64)
        }),
    );

    // Pairs and lists.
    install(f, "cons", Arity::Exact(2), |mut args| {
        let cdr = args.remove(1);
        let car = args.remove(0);
        cons(car, cdr)
    });
    install(f, "car", Arity::Exact(1), |args| match as_pair(&args[0]) {
        Ok(cell) => cell.car(),
        Err(e) => e,
    });
    install(f, "cdr", Arity::Exact(1), |args| match as_pair(&args[0]) {
        Ok(cell) => cell.cdr(),
        Err(e) => e,
    });
    install_cxr(f);
    install(f, "list", Arity::Any, Value::list_from);
    install(f, "set-car!", Arity::Exact(2), |mut args| {
        let value = args.remove(1);
        match as_pair(&args[0]) {
            Ok(cell) => {
                cell.set_car(value);
                Value::Void
            }
            Err(e) => e,
        }
    });
    install(f, "set-cdr!", Arity::Exact(2), |mut args| {
        let value = args.remove(1);
        match as_pair(&args[0]) {
            Ok(cell) => {
                cell.set_cdr(value);
                Value::Void
            }
            Err(e) => e,
        }
    });

    // Equality: all three delegate to structural equality; functions
    // and promises compare by identity inside it.
    for name in ["equal?", "eq?", "eqv?"] {
        install(f, name, Arity::Exact(2), |args| {
            Value::Bool(args[0] == args[1])
        });
    }

    // Higher-order. `apply` returns the callee's continuation untouched
    // so the applied call stays in tail position; `map` forces each
    // application through the trampoline.
    install_raw(f, "apply", Arity::Exact(2), |mut args| {
        let list = args.remove(1);
        let func = args.remove(0);
        let Some(elements) = list.list_elements() else {
            return Step::Done(Value::Error(format!("expected list, but got {list}")));
        };
        apply_function(&func, elements)
    });
    install(f, "map", Arity::Exact(2), |mut args| {
        let list = args.remove(1);
        let func = args.remove(0);
        let Some(elements) = list.list_elements() else {
            return Value::Error(format!("expected list, but got {list}"));
        };
        let mapped = elements
            .into_iter()
            .map(|element| complete(apply_function(&func, vec![element])))
            .collect();
        Value::list_from(mapped)
    });

    // Strings and symbols.
    install(f, "symbol->string", Arity::Exact(1), |args| {
        match &args[0] {
            Value::Symbol(s) => Value::String(s.clone()),
            other => Value::Error(format!("expected symbol, but got {other}")),
        }
    });
    install(f, "string->symbol", Arity::Exact(1), |args| {
        match &args[0] {
            Value::String(s) => Value::Symbol(s.clone()),
            other => Value::Error(format!("expected string, but got {other}")),
        }
    });
    install(f, "string-append", Arity::Any, |args| {
        let mut result = String::new();
        for (i, value) in args.iter().enumerate() {
            match value {
                Value::String(s) => result.push_str(s),
                other => {
                    return Value::Error(format!(
                        "expected {i}-th argument to be string, but got {other}"
                    ));
                }
            }
        }
        Value::String(result)
    });

    // Lazy evaluation: forcing resumes the captured node in tail
    // position. Not memoized.
    install_raw(f, "force", Arity::Exact(1), |args| match &args[0] {
        Value::Promise(p) => Step::Tail(p.node.clone(), p.env.clone()),
        other => Step::Done(Value::Error(format!("expected promise, but got {other}"))),
    });

    // Explicit error construction.
    install(f, "error", Arity::Any, |args| {
        let parts: Vec<String> = args
            .iter()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => format!("{other}"),
            })
            .collect();
        let message = if parts.is_empty() {
            "Error".to_owned()
        } else {
            parts.join(" ")
        };
        Value::Error(message)
    });

    frame
}
