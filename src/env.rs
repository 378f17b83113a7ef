//! Lexically scoped environments.
//!
//! An [`Env`] is a handle to a chain of frames running from the innermost
//! scope out to the global frame. Frames are shared: every closure
//! created inside a scope aliases that scope's frame, so a `set!` made
//! through one closure is visible through all of them. The chain is
//! reference-counted and frames use interior mutability; unreferenced
//! frames are reclaimed by `Rc`, except for the deliberate cycles formed
//! when a frame binds a closure that captured it (a top-level
//! `(define f (lambda ...))`), which live for the process.
//!
//! The outermost frame additionally owns the macro registry:
//! `define-syntax` always registers there, regardless of the scope it was
//! evaluated in.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::MAX_MACRO_APPLICATIONS;
use crate::ast::Node;
use crate::macros::Macro;
use crate::value::Value;

/// A single mapping from names to values.
pub type Frame = HashMap<String, Value>;

struct EnvInner {
    frame: RefCell<Frame>,
    macros: RefCell<Vec<Macro>>,
    upper: Option<Env>,
}

/// A shared handle to an environment chain. Cloning the handle aliases
/// the same frames; it never copies bindings.
#[derive(Clone)]
pub struct Env(Rc<EnvInner>);

impl Env {
    /// A new chain consisting of just the given global frame.
    pub fn global(frame: Frame) -> Env {
        Env(Rc::new(EnvInner {
            frame: RefCell::new(frame),
            macros: RefCell::new(Vec::new()),
            upper: None,
        }))
    }

    /// A new chain with `frame` prepended. The receiver is untouched and
    /// remains the parent of the new scope.
    pub fn extend(&self, frame: Frame) -> Env {
        Env(Rc::new(EnvInner {
            frame: RefCell::new(frame),
            macros: RefCell::new(Vec::new()),
            upper: Some(self.clone()),
        }))
    }

    /// Bind `name` in the innermost frame only. Never walks up, so a
    /// `define` inside a scope shadows instead of mutating outer frames.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.frame.borrow_mut().insert(name.into(), value);
    }

    /// Mutate the binding of `name` in the nearest frame that already has
    /// one. Returns `false` if no frame binds the name.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut cur = Some(self);
        while let Some(env) = cur {
            let mut frame = env.0.frame.borrow_mut();
            if frame.contains_key(name) {
                frame.insert(name.to_owned(), value);
                return true;
            }
            drop(frame);
            cur = env.0.upper.as_ref();
        }
        false
    }

    /// Look up `name`, innermost frame first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut cur = Some(self);
        while let Some(env) = cur {
            if let Some(value) = env.0.frame.borrow().get(name) {
                return Some(value.clone());
            }
            cur = env.0.upper.as_ref();
        }
        None
    }

    fn root(&self) -> &Env {
        let mut cur = self;
        while let Some(upper) = cur.0.upper.as_ref() {
            cur = upper;
        }
        cur
    }

    /// Attach a macro to the global registry, regardless of which scope
    /// performed the registration.
    pub fn register_macro(&self, m: Macro) {
        self.root().0.macros.borrow_mut().push(m);
    }

    /// Rewrite `node` through the registered macros until no macro
    /// applies anywhere in the tree. Each successful rewrite counts as
    /// one application; exceeding [`MAX_MACRO_APPLICATIONS`] is an error.
    pub fn expand(&self, node: Node) -> Result<Node, String> {
        let root = self.root();
        let macros = root.0.macros.borrow();
        let mut node = node;
        let mut applications = 0;
        'rewrite: loop {
            for m in macros.iter() {
                if let Some(rewritten) = m.replace(&node) {
                    node = rewritten;
                    applications += 1;
                    if applications > MAX_MACRO_APPLICATIONS {
                        return Err(format!(
                            "exceeded macro recursive application limit ({MAX_MACRO_APPLICATIONS})"
                        ));
                    }
                    continue 'rewrite;
                }
            }
            return Ok(node);
        }
    }

    /// All visible bindings, inner frames shadowing outer ones, sorted by
    /// name. Used by the REPL's `:env` command.
    pub fn bindings_snapshot(&self) -> Vec<(String, Value)> {
        let mut chain = Vec::new();
        let mut cur = Some(self);
        while let Some(env) = cur {
            chain.push(env);
            cur = env.0.upper.as_ref();
        }

        let mut merged: Frame = HashMap::new();
        for env in chain.into_iter().rev() {
            for (name, value) in env.0.frame.borrow().iter() {
                merged.insert(name.clone(), value.clone());
            }
        }

        let mut result: Vec<_> = merged.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::scheme::parse_one;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn test_define_binds_innermost_only() {
        let global = Env::global(Frame::new());
        global.define("x", n(1.0));

        let inner = global.extend(Frame::new());
        inner.define("x", n(2.0));

        assert_eq!(inner.lookup("x"), Some(n(2.0)));
        assert_eq!(global.lookup("x"), Some(n(1.0)));
    }

    #[test]
    fn test_lookup_walks_outward() {
        let global = Env::global(Frame::new());
        global.define("x", n(1.0));
        let inner = global.extend(Frame::new()).extend(Frame::new());
        assert_eq!(inner.lookup("x"), Some(n(1.0)));
        assert_eq!(inner.lookup("y"), None);
    }

    #[test]
    fn test_set_mutates_nearest_binding() {
        let global = Env::global(Frame::new());
        global.define("x", n(1.0));
        let inner = global.extend(Frame::new());

        // No local binding: the global one is mutated.
        assert!(inner.set("x", n(5.0)));
        assert_eq!(global.lookup("x"), Some(n(5.0)));

        // A local shadow takes the hit instead.
        inner.define("x", n(2.0));
        assert!(inner.set("x", n(7.0)));
        assert_eq!(inner.lookup("x"), Some(n(7.0)));
        assert_eq!(global.lookup("x"), Some(n(5.0)));

        assert!(!inner.set("missing", n(0.0)));
    }

    #[test]
    fn test_frames_are_aliased_not_copied() {
        let global = Env::global(Frame::new());
        let scope = global.extend(Frame::new());
        let alias = scope.clone();

        scope.define("shared", n(1.0));
        assert_eq!(alias.lookup("shared"), Some(n(1.0)));
        assert!(alias.set("shared", n(2.0)));
        assert_eq!(scope.lookup("shared"), Some(n(2.0)));
    }

    #[test]
    fn test_macros_register_at_root() {
        let global = Env::global(Frame::new());
        let inner = global.extend(Frame::new());

        let code = parse_one(
            "(define-syntax when (syntax-rules () ((_ pred b1 ...) (if pred (begin b1 ...)))))",
        )
        .unwrap();
        inner.register_macro(Macro::parse(&code).unwrap());

        // Expansion through any scope sees the globally registered macro.
        let input = parse_one("(when #t 1)").unwrap();
        let expanded = global.expand(input).unwrap();
        assert_eq!(format!("{expanded}"), "(if #t (begin 1))");
    }

    #[test]
    fn test_expansion_cap() {
        let global = Env::global(Frame::new());
        let code =
            parse_one("(define-syntax spin (syntax-rules () ((_ x) (spin x))))").unwrap();
        global.register_macro(Macro::parse(&code).unwrap());

        let input = parse_one("(spin 1)").unwrap();
        let err = global.expand(input).unwrap_err();
        assert!(err.contains("macro recursive application limit"), "{err}");
    }

    #[test]
    fn test_snapshot_shadows_and_sorts() {
        let global = Env::global(Frame::new());
        global.define("b", n(1.0));
        global.define("a", n(2.0));
        let inner = global.extend(Frame::new());
        inner.define("b", n(9.0));

        let snapshot = inner.bindings_snapshot();
        assert_eq!(
            snapshot,
            vec![("a".to_owned(), n(2.0)), ("b".to_owned(), n(9.0))]
        );
    }
}
