//! Runtime values produced by evaluation.
//!
//! The central type is [`Value`], a tagged sum covering numbers, booleans,
//! symbols, strings, mutable cons cells, the `()` and unspecified
//! singletons, callables, promises and error values. Errors are ordinary
//! values here: a failing primitive returns `Value::Error` and the caller
//! passes it along like any other result.
//!
//! Pair cells use shared interior mutability (`Rc<PairCell>` with
//! `RefCell` slots) so that `set-car!` / `set-cdr!` are observed through
//! every alias of the pair, never by a private copy.
//!
//! [`Step`] is the contract between callables and the trampoline: a call
//! either produces a final value eagerly or hands back a `(node, env)`
//! continuation for the trampoline to evaluate in tail position.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::Node;
use crate::env::Env;

/// A cons cell with independently mutable car and cdr slots.
pub struct PairCell {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl PairCell {
    pub fn new(car: Value, cdr: Value) -> Self {
        PairCell {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.borrow_mut() = value;
    }
}

/// Parameter shape of a user-defined function.
pub enum Params {
    /// `(lambda (a b c) ...)` - exact arity
    Fixed(Vec<String>),
    /// `(lambda (a b . rest) ...)` - at least `fixed.len()` arguments,
    /// the tail collected into a proper list bound to `rest`
    Rest { fixed: Vec<String>, rest: String },
    /// `(lambda args ...)` - any arity, all arguments collected
    Collect(String),
}

/// A user-defined function closing over its definition-site environment.
/// The body is one or more forms; all but the last run through the
/// trampoline on invocation and the last becomes a tail continuation.
pub struct Lambda {
    pub params: Params,
    pub body: Vec<Node>,
    pub env: Env,
}

/// Canonical callable signature shared by primitives and the evaluator:
/// invoked with evaluated arguments, returns either an eager result or a
/// tail continuation.
pub type BuiltinFn = dyn Fn(Vec<Value>) -> Step;

/// A primitive procedure registered in the global frame.
pub struct Builtin {
    pub name: String,
    pub func: Box<BuiltinFn>,
}

/// A delayed computation: the wrapped sub-tree plus the environment it
/// was captured in. `force` resumes it as a tail continuation. Forcing is
/// not memoized; each `force` re-enters the captured node.
pub struct Promise {
    pub node: Node,
    pub env: Env,
}

/// Result of one evaluation step or one function call.
pub enum Step {
    /// A final value.
    Done(Value),
    /// Evaluate `node` in `env` and treat its result as the answer.
    /// Consumed by the trampoline so tail calls do not grow the stack.
    Tail(Node, Env),
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Symbol(String),
    String(String),
    Pair(Rc<PairCell>),
    Null,
    Void,
    Closure(Rc<Lambda>),
    Builtin(Rc<Builtin>),
    Promise(Rc<Promise>),
    Error(String),
}

impl Value {
    /// `#f` is the sole non-truthy value; `()`, `0`, `""` and `<void>`
    /// all count as true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    /// True for `()` and for any pair chain terminated by `()`.
    /// Recurses along the cdr chain; cyclic pairs are user error.
    pub fn is_list(&self) -> bool {
        let mut cur = self.clone();
        loop {
            match cur {
                Value::Null => return true,
                Value::Pair(cell) => cur = cell.cdr(),
                _ => return false,
            }
        }
    }

    /// Collect the elements of a proper list, or `None` for anything
    /// that is not one (including dotted pairs).
    pub fn list_elements(&self) -> Option<Vec<Value>> {
        let mut elements = Vec::new();
        let mut cur = self.clone();
        loop {
            match cur {
                Value::Null => return Some(elements),
                Value::Pair(cell) => {
                    elements.push(cell.car());
                    cur = cell.cdr();
                }
                _ => return None,
            }
        }
    }

    /// Build a proper null-terminated list from the given elements.
    pub fn list_from(elements: Vec<Value>) -> Value {
        let mut result = Value::Null;
        for element in elements.into_iter().rev() {
            result = Value::Pair(Rc::new(PairCell::new(element, result)));
        }
        result
    }

    /// Short type tag used in primitive error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Null => "null",
            Value::Void => "void",
            Value::Closure(_) | Value::Builtin(_) => "function",
            Value::Promise(_) => "promise",
            Value::Error(_) => "error",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Structural equality through the current cell contents.
            (Value::Pair(a), Value::Pair(b)) => a.car() == b.car() && a.cdr() == b.cdr(),
            (Value::Null, Value::Null) => true,
            (Value::Void, Value::Void) => true,
            // Callables and promises compare by identity only. Builtins
            // are registered once per name, so name equality is identity.
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

fn fmt_pair_tail(cell: &PairCell, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", cell.car())?;
    match cell.cdr() {
        Value::Pair(next) => {
            write!(f, " ")?;
            fmt_pair_tail(&next, f)
        }
        Value::Null => Ok(()),
        other => write!(f, " . {other}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Pair(cell) => {
                write!(f, "(")?;
                fmt_pair_tail(cell, f)?;
                write!(f, ")")
            }
            Value::Null => write!(f, "()"),
            Value::Void => write!(f, "<void>"),
            Value::Closure(_) | Value::Builtin(_) => write!(f, "<function>"),
            Value::Promise(_) => write!(f, "<promise>"),
            Value::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

/// Convenience constructor for pairs.
pub fn cons(car: Value, cdr: Value) -> Value {
    Value::Pair(Rc::new(PairCell::new(car, cdr)))
}
