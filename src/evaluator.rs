//! The recursive evaluator and its trampoline.
//!
//! [`eval`] performs a single step: it accepts a syntax node plus an
//! environment and returns a [`Step`] - either a finished value or a
//! `(node, env)` continuation for a sub-form in tail position.
//! [`eval_loop`] is the trampoline that keeps stepping until a value
//! appears; it is the only place where tail chains unwind, so arbitrarily
//! long chains of tail calls run in constant host-stack space.
//!
//! Sub-forms that are *not* in tail position (a `let` binding's
//! right-hand side, every `begin` body form but the last, function
//! arguments) are evaluated through the trampoline immediately, strictly
//! left to right.
//!
//! Failures never unwind: every syntax or runtime problem becomes a
//! [`Value::Error`] travelling back through the same channel as any other
//! value.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::ast::{Node, branch, kw};
use crate::env::Env;
use crate::macros::Macro;
use crate::value::{Lambda, PairCell, Params, Promise, Step, Value};

fn err_step(msg: impl Into<String>) -> Step {
    Step::Done(Value::Error(msg.into()))
}

/// Evaluate one step. A `Done` result is final; a `Tail` result must be
/// fed back through the trampoline.
pub fn eval(node: &Node, env: &Env) -> Step {
    match node {
        Node::Keyword(_) => err_step("unexpected keyword"),
        Node::Identifier(name) => match env.lookup(name) {
            Some(value) => Step::Done(value),
            None => err_step(format!("unbound identifier: {name}")),
        },
        Node::Number(n) => Step::Done(Value::Number(*n)),
        Node::Boolean(b) => Step::Done(Value::Bool(*b)),
        Node::String(s) => Step::Done(Value::String(s.clone())),
        Node::Branch(children) => eval_branch(node, children, env),
    }
}

/// Run the trampoline to completion.
pub fn eval_loop(node: &Node, env: &Env) -> Value {
    let mut step = eval(node, env);
    loop {
        match step {
            Step::Done(value) => return value,
            Step::Tail(next, next_env) => step = eval(&next, &next_env),
        }
    }
}

/// Run the trampoline with an optional deadline checked between
/// iterations. Returns `None` when the deadline fires; the current form
/// is abandoned and any mutations already made persist.
pub fn eval_loop_until(node: &Node, env: &Env, deadline: Option<Instant>) -> Option<Value> {
    let Some(deadline) = deadline else {
        return Some(eval_loop(node, env));
    };
    let mut step = eval(node, env);
    loop {
        if Instant::now() >= deadline {
            return None;
        }
        match step {
            Step::Done(value) => return Some(value),
            Step::Tail(next, next_env) => step = eval(&next, &next_env),
        }
    }
}

/// Finish a step produced by a callable. Used where an eager result is
/// required (argument lists, `map`, the `read` builtin).
pub fn complete(step: Step) -> Value {
    match step {
        Step::Done(value) => value,
        Step::Tail(node, env) => eval_loop(&node, &env),
    }
}

fn eval_branch(node: &Node, children: &[Node], env: &Env) -> Step {
    if children.is_empty() {
        return err_step("bad syntax: empty sentence (\"()\") cannot be evaluated");
    }

    if let Some(word) = children[0].as_keyword() {
        match word {
            "and" => return eval_and(children, env),
            "or" => return eval_or(children, env),
            "if" => return eval_if(children, env),
            "let" => return eval_let(children, env),
            "let*" => return eval_let_seq(children, env),
            "cond" => return eval_cond(children, env),
            "set!" => return eval_set(children, env),
            "quote" => {
                if children.len() != 2 {
                    return err_step(format!(
                        "quote needs exactly 1 argument, but got {}",
                        children.len() - 1
                    ));
                }
                return Step::Done(quote_node(&children[1]));
            }
            "define" => return eval_define(children, env),
            "lambda" => return eval_lambda(children, env),
            "begin" => return eval_begin(children, env),
            "define-syntax" => return eval_define_syntax(node, env),
            "delay" => return eval_delay(children, env),
            // Other keywords (else, ., _, ...) are not special forms;
            // fall through to application, which reports them.
            _ => {}
        }
    }

    // Function application: evaluate every child left to right, then
    // apply the first value to the rest.
    let mut values = Vec::with_capacity(children.len());
    for child in children {
        values.push(eval_loop(child, env));
    }
    let func = values.remove(0);
    if !matches!(func, Value::Closure(_) | Value::Builtin(_)) {
        return err_step(format!("expected function in 0-th argument, but got {func}"));
    }
    apply_function(&func, values)
}

/// Invoke a callable with already-evaluated arguments. The result may be
/// a tail continuation; callers that need a value run it through
/// [`complete`].
pub fn apply_function(func: &Value, args: Vec<Value>) -> Step {
    match func {
        Value::Builtin(builtin) => (builtin.func)(args),
        Value::Closure(lambda) => invoke_lambda(lambda, args),
        other => err_step(format!("expected function, but got {other}")),
    }
}

fn invoke_lambda(lambda: &Rc<Lambda>, args: Vec<Value>) -> Step {
    let mut frame = HashMap::new();
    match &lambda.params {
        Params::Fixed(names) => {
            if args.len() != names.len() {
                return err_step(format!(
                    "expected length of arguments to be {}, but got {}",
                    names.len(),
                    args.len()
                ));
            }
            for (name, arg) in names.iter().zip(args) {
                frame.insert(name.clone(), arg);
            }
        }
        Params::Rest { fixed, rest } => {
            if args.len() < fixed.len() {
                return err_step(format!(
                    "expected length of arguments to be greater than or equal to {}, but got {}",
                    fixed.len(),
                    args.len()
                ));
            }
            let mut args = args;
            let tail = args.split_off(fixed.len());
            for (name, arg) in fixed.iter().zip(args) {
                frame.insert(name.clone(), arg);
            }
            frame.insert(rest.clone(), Value::list_from(tail));
        }
        Params::Collect(name) => {
            frame.insert(name.clone(), Value::list_from(args));
        }
    }

    let body_env = lambda.env.extend(frame);
    let (last, prefix) = lambda
        .body
        .split_last()
        .expect("lambda body is checked non-empty at creation");
    for sentence in prefix {
        eval_loop(sentence, &body_env);
    }
    Step::Tail(last.clone(), body_env)
}

fn eval_and(children: &[Node], env: &Env) -> Step {
    // Short-circuit; all truthy yields the last value, none yields #t.
    let mut result = Value::Bool(true);
    for child in &children[1..] {
        result = eval_loop(child, env);
        if !result.is_truthy() {
            return Step::Done(Value::Bool(false));
        }
    }
    Step::Done(result)
}

fn eval_or(children: &[Node], env: &Env) -> Step {
    for child in &children[1..] {
        let result = eval_loop(child, env);
        if result.is_truthy() {
            return Step::Done(result);
        }
    }
    Step::Done(Value::Bool(false))
}

fn eval_if(children: &[Node], env: &Env) -> Step {
    if children.len() != 3 && children.len() != 4 {
        return err_step(format!(
            "bad syntax: if needs 2 or 3 arguments, but got {}",
            children.len() - 1
        ));
    }
    let test = eval_loop(&children[1], env);
    if test.is_truthy() {
        Step::Tail(children[2].clone(), env.clone())
    } else if children.len() == 4 {
        Step::Tail(children[3].clone(), env.clone())
    } else {
        Step::Done(Value::Void)
    }
}

/// Split a `(let ...)` / `(let* ...)` style bind pair into its name and
/// value expression, or report why it cannot be.
fn bind_pair(form: &str, pair: &Node) -> Result<(String, Node), Step> {
    let Node::Branch(parts) = pair else {
        return Err(err_step(format!(
            "bad syntax: {form} bind pair needs a list of length 2, but got {pair}"
        )));
    };
    if parts.len() != 2 {
        return Err(err_step(format!(
            "bad syntax: {form} bind pair needs a list of length 2, but got length {}",
            parts.len()
        )));
    }
    let Some(name) = parts[0].as_identifier() else {
        return Err(err_step(format!(
            "bad syntax: {form} bind pair requires identifier, but got {}",
            parts[0]
        )));
    };
    Ok((name.to_owned(), parts[1].clone()))
}

fn eval_let(children: &[Node], env: &Env) -> Step {
    if children.len() <= 2 {
        return err_step(format!(
            "bad syntax: let needs at least 2 arguments, but got {}",
            children.len() - 1
        ));
    }
    let Node::Branch(pairs) = &children[1] else {
        return err_step(format!(
            "bad syntax: let requires a list of bind pairs, but got {}",
            children[1]
        ));
    };

    // All right-hand sides are evaluated in the *outer* environment, so
    // bindings are parallel and cannot see each other.
    let mut frame = HashMap::new();
    for pair in pairs {
        let (name, value_node) = match bind_pair("let", pair) {
            Ok(split) => split,
            Err(step) => return step,
        };
        frame.insert(name, eval_loop(&value_node, env));
    }

    let body_env = env.extend(frame);
    eval_body(&children[2..], body_env)
}

fn eval_let_seq(children: &[Node], env: &Env) -> Step {
    if children.len() <= 2 {
        return err_step(format!(
            "bad syntax: let* needs at least 2 arguments, but got {}",
            children.len() - 1
        ));
    }
    let Node::Branch(pairs) = &children[1] else {
        return err_step(format!(
            "bad syntax: let* requires a list of bind pairs, but got {}",
            children[1]
        ));
    };

    // Each right-hand side is evaluated in the new scope, so later
    // bindings see earlier ones.
    let body_env = env.extend(HashMap::new());
    for pair in pairs {
        let (name, value_node) = match bind_pair("let*", pair) {
            Ok(split) => split,
            Err(step) => return step,
        };
        let value = eval_loop(&value_node, &body_env);
        body_env.define(name, value);
    }

    eval_body(&children[2..], body_env)
}

/// Evaluate body forms left to right; the last becomes the tail.
fn eval_body(sentences: &[Node], env: Env) -> Step {
    let (last, prefix) = sentences
        .split_last()
        .expect("callers ensure at least one body form");
    for sentence in prefix {
        eval_loop(sentence, &env);
    }
    Step::Tail(last.clone(), env)
}

fn eval_cond(children: &[Node], env: &Env) -> Step {
    if children.len() == 1 {
        return err_step("bad syntax: cond needs at least 1 argument, but got 0");
    }

    for clause in &children[1..] {
        let Node::Branch(parts) = clause else {
            return err_step("bad syntax: cond bad branch");
        };
        let Some(test) = parts.first() else {
            return err_step("bad syntax: cond bad branch");
        };

        let test_value = if test.is_keyword_named("else") {
            None // matches unconditionally, produces no value itself
        } else {
            let value = eval_loop(test, env);
            if !value.is_truthy() {
                continue;
            }
            Some(value)
        };

        // A clause with no body yields the test's value.
        if parts.len() == 1 {
            return Step::Done(test_value.unwrap_or(Value::Void));
        }
        for body in &parts[1..parts.len() - 1] {
            eval_loop(body, env);
        }
        return Step::Tail(parts[parts.len() - 1].clone(), env.clone());
    }

    // No clause fired.
    Step::Done(Value::Void)
}

fn eval_set(children: &[Node], env: &Env) -> Step {
    if children.len() != 3 {
        return err_step(format!(
            "set! exactly needs 2 arguments, but got {}",
            children.len() - 1
        ));
    }
    let Some(name) = children[1].as_identifier() else {
        return err_step(format!(
            "1st argument of set! needs to be identifier, but got {}",
            children[1]
        ));
    };
    let value = eval_loop(&children[2], env);
    if !env.set(name, value) {
        return err_step(format!("set!: {name} is not defined yet"));
    }
    Step::Done(Value::Void)
}

/// Convert a syntax tree literally into a value: identifiers and
/// keywords become symbols, branches become pair chains, and a
/// three-element branch with a `.` in the middle becomes a dotted pair.
fn quote_node(node: &Node) -> Value {
    match node {
        Node::Number(n) => Value::Number(*n),
        Node::Boolean(b) => Value::Bool(*b),
        Node::String(s) => Value::String(s.clone()),
        Node::Identifier(s) | Node::Keyword(s) => Value::Symbol(s.clone()),
        Node::Branch(children) => {
            if children.is_empty() {
                return Value::Null;
            }
            if children.len() == 3 && children[1].is_keyword_named(".") {
                return Value::Pair(Rc::new(PairCell::new(
                    quote_node(&children[0]),
                    quote_node(&children[2]),
                )));
            }
            Value::Pair(Rc::new(PairCell::new(
                quote_node(&children[0]),
                quote_node(&Node::Branch(children[1..].to_vec())),
            )))
        }
    }
}

fn eval_define(children: &[Node], env: &Env) -> Step {
    if children.len() < 2 {
        return err_step(format!(
            "bad syntax: define takes exactly 2 arguments, but got {}",
            children.len() - 1
        ));
    }
    // Function definition sugar:
    //   (define (name a b) body...)   = (define name (lambda (a b) body...))
    //   (define (name . xs) body...)  = (define name (lambda xs body...))
    //   (define (name a . xs) body...) desugars through the lambda's own
    //   dotted-parameter handling.
    if let Node::Branch(header) = &children[1] {
        if header.is_empty() || header[0].as_identifier().is_none() {
            return err_step("bad syntax: function definition requires function name");
        }
        let func_name = header[0].clone();
        let arg_names = &header[1..];
        let sentences = &children[2..];

        let lambda_params = if arg_names.len() == 2
            && arg_names[0].is_keyword_named(".")
            && matches!(arg_names[1], Node::Identifier(_))
        {
            arg_names[1].clone()
        } else {
            branch(arg_names.to_vec())
        };

        let mut lambda_children = vec![kw("lambda"), lambda_params];
        lambda_children.extend(sentences.iter().cloned());
        let rewritten = vec![kw("define"), func_name, branch(lambda_children)];
        return eval_define(&rewritten, env);
    }

    if children.len() != 3 {
        return err_step(format!(
            "bad syntax: define takes exactly 2 arguments, but got {}",
            children.len() - 1
        ));
    }
    let Some(name) = children[1].as_identifier() else {
        return err_step(format!(
            "bad syntax: expected 1st argument of define to be identifier, but got {}",
            children[1]
        ));
    };
    let value = eval_loop(&children[2], env);
    env.define(name, value);
    Step::Done(Value::Void)
}

fn eval_lambda(children: &[Node], env: &Env) -> Step {
    if children.len() < 3 {
        return err_step(format!(
            "bad syntax: lambda takes 2 or more arguments, but got {}",
            children.len() - 1
        ));
    }

    let params = match &children[1] {
        // (lambda xs body...) - collect every argument.
        Node::Identifier(name) => Params::Collect(name.clone()),
        Node::Branch(args) => {
            // (lambda (a b . rest) body...) - dotted tail.
            if args.len() >= 3
                && args[args.len() - 2].is_keyword_named(".")
                && matches!(args[args.len() - 1], Node::Identifier(_))
            {
                let fixed = match identifier_names(&args[..args.len() - 2]) {
                    Ok(names) => names,
                    Err(step) => return step,
                };
                let Node::Identifier(rest) = &args[args.len() - 1] else {
                    unreachable!("matched as identifier above");
                };
                Params::Rest {
                    fixed,
                    rest: rest.clone(),
                }
            } else {
                match identifier_names(args) {
                    Ok(names) => Params::Fixed(names),
                    Err(step) => return step,
                }
            }
        }
        other => {
            return err_step(format!(
                "bad syntax: 1st argument of lambda needs to be a list of arguments, but got {other}"
            ));
        }
    };

    Step::Done(Value::Closure(Rc::new(Lambda {
        params,
        body: children[2..].to_vec(),
        env: env.clone(),
    })))
}

fn identifier_names(args: &[Node]) -> Result<Vec<String>, Step> {
    let mut names = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let Some(name) = arg.as_identifier() else {
            return Err(err_step(format!(
                "bad syntax: expected {i}-th argument of lambda function to be identifier, but got {arg}"
            )));
        };
        names.push(name.to_owned());
    }
    Ok(names)
}

fn eval_begin(children: &[Node], env: &Env) -> Step {
    if children.len() <= 1 {
        return err_step("begin needs at least 1 argument, but got 0");
    }
    eval_body(&children[1..], env.clone())
}

fn eval_define_syntax(node: &Node, env: &Env) -> Step {
    match Macro::parse(node) {
        Ok(m) => {
            env.register_macro(m);
            Step::Done(Value::Void)
        }
        Err(e) => err_step(format!("bad macro syntax: {e}")),
    }
}

fn eval_delay(children: &[Node], env: &Env) -> Step {
    if children.len() != 2 {
        return err_step(format!(
            "delay needs exactly 1 argument, but got {}",
            children.len() - 1
        ));
    }
    Step::Done(Value::Promise(Rc::new(Promise {
        node: children[1].clone(),
        env: env.clone(),
    })))
}
