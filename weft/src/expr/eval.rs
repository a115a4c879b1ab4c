//! Expression evaluation against a context term.

use std::collections::HashMap;
use std::sync::Arc;

use crate::term::Term;

use super::stream::{
    BoxStream, ChildStream, ChildrenStream, DescendantsStream, FilterStream, MemberStream,
    OnceStream, TermStream,
};
use super::{BinaryOp, Expr, FormatPart, UnaryOp};

/// A host function callable from expressions, e.g. `min(%.a, %.b)`.
pub trait TermFn: Send + Sync {
    fn invoke(&self, args: &[Term]) -> Term;
}

impl<F> TermFn for F
where
    F: Fn(&[Term]) -> Term + Send + Sync,
{
    fn invoke(&self, args: &[Term]) -> Term {
        self(args)
    }
}

/// Resolves invocation targets by name.
pub trait InvokeScope: Send + Sync {
    fn resolve(&self, name: &str) -> Option<&dyn TermFn>;
}

/// Evaluates expressions against a context term, with a global scope term
/// and a registry of named host functions. Missing selections and unknown
/// functions evaluate to [`Term::Extant`] rather than erroring.
pub struct Evaluator {
    global: Term,
    fns: HashMap<String, Arc<dyn TermFn>>,
}

impl Evaluator {
    pub fn new(global: Term) -> Self {
        Evaluator {
            global,
            fns: HashMap::new(),
        }
    }

    pub fn with_fn(mut self, name: impl Into<String>, func: impl TermFn + 'static) -> Self {
        self.fns.insert(name.into(), Arc::new(func));
        self
    }

    pub fn global(&self) -> &Term {
        &self.global
    }

    pub fn eval(&self, expr: &Expr, ctx: &Term) -> Term {
        match expr {
            Expr::Literal(term) => term.clone(),
            Expr::ContextScope => ctx.clone(),
            Expr::GlobalScope => self.global.clone(),
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand, ctx);
                match op {
                    UnaryOp::Neg => operand.negate(),
                    UnaryOp::Pos => Term::Int(0).add(&operand),
                    UnaryOp::Not => operand.not(),
                    UnaryOp::BitNot => operand.bit_not(),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, ctx),
            Expr::Cond(cond, then, other) => {
                if self.eval(cond, ctx).is_truthy() {
                    self.eval(then, ctx)
                } else {
                    self.eval(other, ctx)
                }
            }
            Expr::Invoke(func, args) => {
                let name = match &**func {
                    Expr::Literal(Term::Text(name)) => name.clone(),
                    other => match self.eval(other, ctx) {
                        Term::Text(name) => name,
                        _ => return Term::Extant,
                    },
                };
                match self.resolve(&name) {
                    Some(func) => {
                        let args: Vec<Term> =
                            args.iter().map(|arg| self.eval(arg, ctx)).collect();
                        func.invoke(&args)
                    }
                    None => Term::Extant,
                }
            }
            Expr::Format(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FormatPart::Text(part) => out.push_str(part),
                        FormatPart::Embed(embed) => {
                            let value = self.eval(embed, ctx);
                            if !value.is_extant() {
                                out.push_str(&value.to_string());
                            }
                        }
                    }
                }
                Term::Text(out)
            }
            selector => {
                let mut stream = self.select_stream(selector, ctx, Box::new(OnceStream::new(ctx.clone())));
                let first = match stream.next_term() {
                    Some(term) => term,
                    None => return Term::Extant,
                };
                let second = match stream.next_term() {
                    Some(term) => term,
                    None => return first,
                };
                let mut collected = vec![first, second];
                while let Some(term) = stream.next_term() {
                    collected.push(term);
                }
                Term::record(collected.into_iter().map(crate::term::Item::Value))
            }
        }
    }

    fn eval_binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &Term) -> Term {
        match op {
            // short-circuit: `and` yields its first falsey-or-last operand,
            // `or` its first non-falsey one
            BinaryOp::And => {
                let lhs = self.eval(lhs, ctx);
                if lhs.is_truthy() {
                    self.eval(rhs, ctx)
                } else {
                    lhs
                }
            }
            BinaryOp::Or => {
                let lhs = self.eval(lhs, ctx);
                if lhs.is_falsey() {
                    self.eval(rhs, ctx)
                } else {
                    lhs
                }
            }
            _ => {
                let lhs = self.eval(lhs, ctx);
                let rhs = self.eval(rhs, ctx);
                match op {
                    BinaryOp::Add => lhs.add(&rhs),
                    BinaryOp::Sub => lhs.sub(&rhs),
                    BinaryOp::Mul => lhs.mul(&rhs),
                    BinaryOp::Div => lhs.div(&rhs),
                    BinaryOp::Rem => lhs.rem(&rhs),
                    BinaryOp::BitOr => lhs.bit_or(&rhs),
                    BinaryOp::BitXor => lhs.bit_xor(&rhs),
                    BinaryOp::BitAnd => lhs.bit_and(&rhs),
                    BinaryOp::Eq => {
                        Term::Bool(lhs.cmp_terms(&rhs) == Some(std::cmp::Ordering::Equal))
                    }
                    BinaryOp::Ne => {
                        Term::Bool(lhs.cmp_terms(&rhs) != Some(std::cmp::Ordering::Equal))
                    }
                    BinaryOp::Lt => compare(&lhs, &rhs, std::cmp::Ordering::is_lt),
                    BinaryOp::Le => compare(&lhs, &rhs, std::cmp::Ordering::is_le),
                    BinaryOp::Ge => compare(&lhs, &rhs, std::cmp::Ordering::is_ge),
                    BinaryOp::Gt => compare(&lhs, &rhs, std::cmp::Ordering::is_gt),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                }
            }
        }
    }

    /// Builds the lazy stream for a selector expression. Non-selector
    /// expressions collapse to a single-term stream of their value. Child
    /// keys and filter scopes chain through `upstream`; child key
    /// expressions themselves evaluate against the outer context `ctx`.
    pub fn select_stream<'a>(
        &'a self,
        expr: &'a Expr,
        ctx: &Term,
        upstream: BoxStream<'a>,
    ) -> BoxStream<'a> {
        match expr {
            Expr::ContextScope => upstream,
            Expr::GlobalScope => Box::new(OnceStream::new(self.global.clone())),
            Expr::Child(scope, key) => {
                let key = self.eval(key, ctx);
                let scope = self.select_stream(scope, ctx, upstream);
                Box::new(ChildStream::new(scope, key))
            }
            Expr::Children(scope) => {
                let scope = self.select_stream(scope, ctx, upstream);
                Box::new(ChildrenStream::new(scope))
            }
            Expr::Descendants(scope) => {
                let scope = self.select_stream(scope, ctx, upstream);
                Box::new(DescendantsStream::new(scope))
            }
            Expr::Member(scope, name) => {
                let scope = self.select_stream(scope, ctx, upstream);
                Box::new(MemberStream::new(scope, name.clone()))
            }
            Expr::Filter(scope, predicate) => {
                let scope = self.select_stream(scope, ctx, upstream);
                Box::new(FilterStream::new(scope, predicate, self))
            }
            other => Box::new(OnceStream::new(self.eval(other, ctx))),
        }
    }
}

impl InvokeScope for Evaluator {
    fn resolve(&self, name: &str) -> Option<&dyn TermFn> {
        self.fns.get(name).map(|func| &**func)
    }
}

fn compare(lhs: &Term, rhs: &Term, test: fn(std::cmp::Ordering) -> bool) -> Term {
    match lhs.cmp_terms(rhs) {
        Some(ordering) => Term::Bool(test(ordering)),
        None => Term::Extant,
    }
}
