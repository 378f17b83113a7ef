//! Pattern-based macros (`define-syntax` / `syntax-rules`).
//!
//! A macro is a name plus an ordered list of branches; each branch pairs a
//! matcher pattern with a template. At expansion time the registry owner
//! ([`crate::env::Env::expand`]) walks the syntax tree looking for a
//! branch node whose head identifier names a registered macro, matches
//! the remaining children against each branch in declared order, and
//! materializes the first matching branch's template with the captured
//! sub-trees spliced in. Expansion then restarts from the root of the
//! rewritten tree, so macros may freely expand into uses of other macros.
//!
//! Matching is deliberately unhygienic: no alpha-renaming is performed
//! and registration is always global.
//!
//! Set `MACRO_DEBUG=1` in the environment to trace rewrites on stderr.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ast::Node;

static DEBUG: LazyLock<bool> = LazyLock::new(|| std::env::var("MACRO_DEBUG").is_ok());

macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if *DEBUG {
            eprintln!("[MACRO DEBUG] {}", format!($($arg)*));
        }
    };
}

/// One element of a matcher pattern or a template.
#[derive(Debug)]
enum Pattern {
    /// Must equal a specific reserved word (patterns: only words from the
    /// macro's declared keyword set; templates: any keyword).
    Keyword(String),
    /// In patterns: captures any sub-node under this name. In templates:
    /// emits the captured node, or a free identifier if nothing was
    /// captured under the name.
    Id(String),
    /// Literal number/boolean/string, emitted verbatim (templates only).
    Data(Node),
    /// `...` - captures the remaining siblings in a pattern (tail
    /// position only), splices the captured group in a template.
    Variadic,
    /// A sub-list.
    Nested(Vec<Pattern>),
}

#[derive(Debug)]
struct MacroBranch {
    pattern: Pattern,
    template: Pattern,
}

/// Capture state accumulated while a branch pattern is matched, consumed
/// while its template is built.
struct Builder {
    named: HashMap<String, Node>,
    variadic: Vec<Node>,
}

/// A user-defined rewrite rule set registered under a name.
#[derive(Debug)]
pub struct Macro {
    name: String,
    branches: Vec<MacroBranch>,
}

impl Macro {
    /// Parse a `(define-syntax name (syntax-rules (kw ...) branches...))`
    /// form. Returns a message describing the malformation on failure.
    pub fn parse(node: &Node) -> Result<Macro, String> {
        let Node::Branch(children) = node else {
            return Err("expected macro to be a list of length 3".to_owned());
        };
        if children.len() != 3 {
            return Err("expected macro to be a list of length 3".to_owned());
        }
        if !children[0].is_keyword_named("define-syntax") {
            return Err(format!("expected define-syntax, but got {}", children[0]));
        }
        let Some(name) = children[1].as_identifier() else {
            return Err(format!("expected macro identifier, but got {}", children[1]));
        };

        let Node::Branch(rules) = &children[2] else {
            return Err(format!("expected syntax rules, but got {}", children[2]));
        };
        if rules.is_empty() || !rules[0].is_keyword_named("syntax-rules") {
            return Err(format!("expected syntax rules, but got {}", children[2]));
        }
        if rules.len() <= 2 {
            return Err(format!(
                "expected length of syntax rule to be >= 3, but got {}",
                rules.len()
            ));
        }
        let Node::Branch(keyword_nodes) = &rules[1] else {
            return Err(format!(
                "expected 2nd element of syntax-rules to be a list of keywords, but got {}",
                rules[1]
            ));
        };
        let mut allowed = Vec::with_capacity(keyword_nodes.len());
        for keyword_node in keyword_nodes {
            let Some(word) = keyword_node.as_keyword() else {
                return Err(format!(
                    "expected keywords in syntax-rules allowed keywords, but got {keyword_node}"
                ));
            };
            allowed.push(word.to_owned());
        }

        let mut branches = Vec::with_capacity(rules.len() - 2);
        for branch_code in &rules[2..] {
            let branch = new_branch(branch_code, &allowed)
                .map_err(|e| format!("malformed branch: {e}"))?;
            branches.push(branch);
        }

        Ok(Macro {
            name: name.to_owned(),
            branches,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Search `node` recursively and apply this macro once if any
    /// sub-tree is a use of it. Returns the rewritten tree, or `None` if
    /// the macro applies nowhere.
    pub fn replace(&self, node: &Node) -> Option<Node> {
        let Node::Branch(children) = node else {
            return None;
        };
        // The whole node first, then each child left to right.
        if let Some(rewritten) = self.replace_one(children) {
            return Some(rewritten);
        }
        for (i, child) in children.iter().enumerate() {
            if let Some(rewritten) = self.replace(child) {
                let mut new_children = children.clone();
                new_children[i] = rewritten;
                return Some(Node::Branch(new_children));
            }
        }
        None
    }

    /// Apply this macro to `children` itself (non-recursively) if its
    /// head names the macro and some branch matches.
    fn replace_one(&self, children: &[Node]) -> Option<Node> {
        if children.first()?.as_identifier() != Some(self.name.as_str()) {
            return None;
        }
        // The head is the macro name; branches match against the rest.
        let candidate = Node::Branch(children[1..].to_vec());
        for branch in &self.branches {
            if matches(&branch.pattern, &candidate) {
                let mut builder = Builder {
                    named: HashMap::new(),
                    variadic: Vec::new(),
                };
                retrieve(&branch.pattern, &candidate, &mut builder);
                let result = build(&builder, &branch.template);
                debug_trace!("{}: {} => {}", self.name, Node::Branch(children.to_vec()), result);
                return Some(result);
            }
        }
        debug_trace!("{}: no branch matched {}", self.name, candidate);
        None
    }
}

fn new_branch(node: &Node, allowed: &[String]) -> Result<MacroBranch, String> {
    let Node::Branch(children) = node else {
        return Err("expected branch to be a list of length 2".to_owned());
    };
    if children.len() != 2 {
        return Err("expected branch to be a list of length 2".to_owned());
    }

    let Node::Branch(matcher_code) = &children[0] else {
        return Err("expected \"_\" in the first element of the branch matcher".to_owned());
    };
    if matcher_code.first().is_none_or(|head| !head.is_keyword_named("_")) {
        return Err("expected \"_\" in the first element of the branch matcher".to_owned());
    }

    // Drop the "_" placeholder; what remains matches the use-site
    // arguments with the macro name already stripped.
    let mut elements = Vec::with_capacity(matcher_code.len() - 1);
    for (i, element_code) in matcher_code[1..].iter().enumerate() {
        let element = new_pattern(element_code, allowed).map_err(|e| format!("malformed matcher: {e}"))?;
        if matches!(element, Pattern::Variadic) && i != matcher_code.len() - 2 {
            return Err(
                "malformed matcher: variadic capture only allowed at the end of a list".to_owned(),
            );
        }
        elements.push(element);
    }

    let template = new_template(&children[1]).map_err(|e| format!("malformed target: {e}"))?;

    Ok(MacroBranch {
        pattern: Pattern::Nested(elements),
        template,
    })
}

fn new_pattern(node: &Node, allowed: &[String]) -> Result<Pattern, String> {
    match node {
        Node::Keyword(word) if word == "..." => Ok(Pattern::Variadic),
        Node::Keyword(word) => {
            if allowed.iter().any(|k| k == word) {
                Ok(Pattern::Keyword(word.clone()))
            } else {
                Err(format!("unexpected keyword: {word}"))
            }
        }
        Node::Identifier(name) => Ok(Pattern::Id(name.clone())),
        Node::Branch(children) => {
            let mut elements = Vec::with_capacity(children.len());
            for (i, child_code) in children.iter().enumerate() {
                let child = new_pattern(child_code, allowed)?;
                if matches!(child, Pattern::Variadic) && i != children.len() - 1 {
                    return Err("variadic capture only allowed at the end of a list".to_owned());
                }
                elements.push(child);
            }
            Ok(Pattern::Nested(elements))
        }
        other => Err(format!("unexpected node in pattern: {other}")),
    }
}

fn new_template(node: &Node) -> Result<Pattern, String> {
    match node {
        Node::Keyword(word) if word == "..." => Ok(Pattern::Variadic),
        Node::Keyword(word) => Ok(Pattern::Keyword(word.clone())),
        Node::Identifier(name) => Ok(Pattern::Id(name.clone())),
        Node::Number(_) | Node::Boolean(_) | Node::String(_) => Ok(Pattern::Data(node.clone())),
        Node::Branch(children) => {
            let elements = children.iter().map(new_template).collect::<Result<_, _>>()?;
            Ok(Pattern::Nested(elements))
        }
    }
}

/// Does `pattern` match `node`? Captures happen separately in
/// [`retrieve`] once a whole branch is known to match.
fn matches(pattern: &Pattern, node: &Node) -> bool {
    match pattern {
        Pattern::Keyword(word) => node.is_keyword_named(word),
        Pattern::Id(_) => true,
        Pattern::Data(_) => false, // data literals never occur in patterns
        Pattern::Variadic => matches!(node, Node::Branch(_)),
        Pattern::Nested(elements) => {
            let Node::Branch(children) = node else {
                return false;
            };
            let variadic_tail = matches!(elements.last(), Some(Pattern::Variadic));
            if variadic_tail {
                // The variadic element absorbs the (possibly empty) rest.
                if children.len() + 1 < elements.len() {
                    return false;
                }
                elements[..elements.len() - 1]
                    .iter()
                    .zip(children)
                    .all(|(element, child)| matches(element, child))
            } else {
                elements.len() == children.len()
                    && elements
                        .iter()
                        .zip(children)
                        .all(|(element, child)| matches(element, child))
            }
        }
    }
}

/// Record the captures of an already-matched pattern into `builder`.
fn retrieve(pattern: &Pattern, node: &Node, builder: &mut Builder) {
    match pattern {
        Pattern::Keyword(_) | Pattern::Data(_) => {}
        Pattern::Id(name) => {
            builder.named.insert(name.clone(), node.clone());
        }
        Pattern::Variadic => {
            if let Node::Branch(children) = node {
                builder.variadic = children.clone();
            }
        }
        Pattern::Nested(elements) => {
            let Node::Branch(children) = node else {
                return;
            };
            let Some((last, prefix)) = elements.split_last() else {
                return;
            };
            for (element, child) in prefix.iter().zip(children) {
                retrieve(element, child, builder);
            }
            if matches!(last, Pattern::Variadic) {
                let rest = children.get(elements.len() - 1..).unwrap_or_default();
                retrieve(last, &Node::Branch(rest.to_vec()), builder);
            } else if let Some(child) = children.get(elements.len() - 1) {
                retrieve(last, child, builder);
            }
        }
    }
}

/// Materialize a template with the captures recorded in `builder`.
fn build(builder: &Builder, template: &Pattern) -> Node {
    match template {
        Pattern::Keyword(word) => Node::Keyword(word.clone()),
        Pattern::Id(name) => builder
            .named
            .get(name)
            .cloned()
            .unwrap_or_else(|| Node::Identifier(name.clone())),
        Pattern::Data(node) => node.clone(),
        Pattern::Variadic => Node::Branch(builder.variadic.clone()),
        Pattern::Nested(elements) => {
            let mut children = Vec::with_capacity(elements.len());
            for element in elements {
                if matches!(element, Pattern::Variadic) {
                    // Splice the captured group inline at this position.
                    children.extend(builder.variadic.iter().cloned());
                } else {
                    children.push(build(builder, element));
                }
            }
            Node::Branch(children)
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::env::{Env, Frame};
    use crate::scheme::parse_one;

    fn make_macro(source: &str) -> Macro {
        Macro::parse(&parse_one(source).unwrap()).unwrap()
    }

    /// Apply a set of macros to an input and return the fixed point,
    /// rendered back to source form.
    fn expand_with(macros: &[&str], input: &str) -> String {
        let env = Env::global(Frame::new());
        for source in macros {
            env.register_macro(make_macro(source));
        }
        let node = parse_one(input).unwrap();
        format!("{}", env.expand(node).unwrap())
    }

    const WHEN: &str =
        "(define-syntax when (syntax-rules () ((_ pred b1 ...) (if pred (begin b1 ...)))))";
    const WHILE: &str = "(define-syntax while (syntax-rules () ((_ pred b1 ...) \
         (begin (define (loop) (when pred b1 ... (loop))) (loop)))))";
    const INC: &str = "(define-syntax inc! (syntax-rules () \
         ((_ x) (begin (set! x (+ x 1)) x)) \
         ((_ x i) (begin (set! x (+ x i)) x))))";

    #[test]
    fn test_replace_table() {
        let cases = vec![
            (
                vec!["(define-syntax nil! (syntax-rules () ((_ x) (set! x '()))))"],
                "(nil! x)",
                "(set! x (quote ()))",
            ),
            (vec![WHEN], "(when #t b1 b2 b3)", "(if #t (begin b1 b2 b3))"),
            (vec![WHEN], "(when my-pred b1)", "(if my-pred (begin b1))"),
            // Applies inside a larger tree, not just at the root.
            (
                vec![WHEN],
                "(define (f x) (when (= x 0) (display \"zero\")) (- x 1))",
                "(define (f x) (if (= x 0) (begin (display \"zero\"))) (- x 1))",
            ),
            // while expands to when, which expands again.
            (
                vec![WHEN, WHILE],
                "(while (< i 10) (display i) (set! x (+ x 1)))",
                "(begin (define (loop) (if (< i 10) \
                 (begin (display i) (set! x (+ x 1)) (loop)))) (loop))",
            ),
            // First matching branch wins.
            (vec![INC], "(inc! i)", "(begin (set! i (+ i 1)) i)"),
            (vec![INC], "(inc! i 3)", "(begin (set! i (+ i 3)) i)"),
            // Data literals in templates are emitted verbatim.
            (
                vec!["(define-syntax answer (syntax-rules () ((_) 42)))"],
                "(answer)",
                "42",
            ),
            // Unbound template identifiers become free references.
            (
                vec!["(define-syntax call-g (syntax-rules () ((_ x) (g x))))"],
                "(call-g 1)",
                "(g 1)",
            ),
        ];

        for (macros, input, expected) in cases {
            assert_eq!(expand_with(&macros, input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_no_match_cases() {
        let when = make_macro(WHEN);
        // Not a use of the macro at all.
        assert!(when.replace(&parse_one("(+ 1 2)").unwrap()).is_none());
        assert!(when.replace(&parse_one("42").unwrap()).is_none());
        // Right name, but the pattern needs at least a predicate.
        assert!(when.replace(&parse_one("(when)").unwrap()).is_none());
    }

    #[test]
    fn test_declared_keywords_match_literally() {
        let m = make_macro(
            "(define-syntax my-else (syntax-rules (else) ((_ (else e1)) e1)))",
        );
        let rewritten = m.replace(&parse_one("(my-else (else 5))").unwrap()).unwrap();
        assert_eq!(format!("{rewritten}"), "5");
        // An identifier in that position is not the keyword.
        assert!(m.replace(&parse_one("(my-else (other 5))").unwrap()).is_none());
    }

    #[test]
    fn test_expansion_is_idempotent_at_fixed_point() {
        let env = Env::global(Frame::new());
        env.register_macro(make_macro(WHEN));
        env.register_macro(make_macro(WHILE));

        let input = parse_one("(while (< i 10) (display i))").unwrap();
        let expanded = env.expand(input).unwrap();
        let again = env.expand(expanded.clone()).unwrap();
        assert_eq!(expanded, again);
    }

    #[test]
    fn test_malformed_macros() {
        let cases = vec![
            ("(define-syntax 5 (syntax-rules () ((_ x) x)))", "macro identifier"),
            ("(define-syntax bad)", "list of length 3"),
            ("(define-syntax bad (bogus))", "expected syntax rules"),
            ("(define-syntax bad (syntax-rules ()))", "syntax rule to be >= 3"),
            (
                "(define-syntax bad (syntax-rules (x) ((_ y) y)))",
                "keywords in syntax-rules",
            ),
            (
                "(define-syntax bad (syntax-rules () ((_ x ... y) x)))",
                "variadic capture only allowed at the end",
            ),
            (
                "(define-syntax bad (syntax-rules () ((_ (a ... b)) a)))",
                "variadic capture only allowed at the end",
            ),
            (
                "(define-syntax bad (syntax-rules () ((_ else) 1)))",
                "unexpected keyword: else",
            ),
            (
                "(define-syntax bad (syntax-rules () ((_ 5) 1)))",
                "unexpected node in pattern",
            ),
            (
                "(define-syntax bad (syntax-rules () ((x y) y)))",
                "expected \"_\"",
            ),
            ("(define-syntax bad (syntax-rules () ((_ x))))", "list of length 2"),
        ];

        for (source, expected) in cases {
            let err = Macro::parse(&parse_one(source).unwrap()).unwrap_err();
            assert!(err.contains(expected), "source: {source}\n  got: {err}");
        }
    }
}
