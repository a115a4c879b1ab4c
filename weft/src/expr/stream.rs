//! Lazy term generators backing selector evaluation.
//!
//! Selector expressions evaluate to streams rather than materialized
//! collections: a `.**` over a deep record only walks as far as the consumer
//! pulls. Streams are single-pass and pull-driven.

use crate::term::Term;

use super::eval::Evaluator;
use super::Expr;

/// A pull-driven sequence of terms. Returns `None` once exhausted and stays
/// exhausted afterwards.
pub trait TermStream {
    fn next_term(&mut self) -> Option<Term>;
}

pub type BoxStream<'a> = Box<dyn TermStream + 'a>;

impl<'a> TermStream for BoxStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        (**self).next_term()
    }
}

/// Yields a single term, then nothing.
pub struct OnceStream {
    term: Option<Term>,
}

impl OnceStream {
    pub fn new(term: Term) -> Self {
        OnceStream { term: Some(term) }
    }
}

impl TermStream for OnceStream {
    fn next_term(&mut self) -> Option<Term> {
        self.term.take()
    }
}

/// For each upstream scope, yields that scope's child under `key` if any.
pub struct ChildStream<'a> {
    upstream: BoxStream<'a>,
    key: Term,
}

impl<'a> ChildStream<'a> {
    pub fn new(upstream: BoxStream<'a>, key: Term) -> Self {
        ChildStream { upstream, key }
    }
}

impl<'a> TermStream for ChildStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        while let Some(scope) = self.upstream.next_term() {
            if let Some(child) = scope.child(&self.key) {
                return Some(child);
            }
        }
        None
    }
}

/// For each upstream scope, yields that scope's member named `name` if any.
pub struct MemberStream<'a> {
    upstream: BoxStream<'a>,
    name: String,
}

impl<'a> MemberStream<'a> {
    pub fn new(upstream: BoxStream<'a>, name: String) -> Self {
        MemberStream { upstream, name }
    }
}

impl<'a> TermStream for MemberStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        while let Some(scope) = self.upstream.next_term() {
            if let Some(member) = scope.member(&self.name) {
                return Some(member);
            }
        }
        None
    }
}

/// Flattens each upstream scope into its direct children. Upstream scopes
/// are pulled one at a time; a scope's children are only materialized when
/// the previous scope's run is exhausted.
pub struct ChildrenStream<'a> {
    upstream: BoxStream<'a>,
    pending: std::vec::IntoIter<Term>,
}

impl<'a> ChildrenStream<'a> {
    pub fn new(upstream: BoxStream<'a>) -> Self {
        ChildrenStream {
            upstream,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<'a> TermStream for ChildrenStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        loop {
            if let Some(child) = self.pending.next() {
                return Some(child);
            }
            let scope = self.upstream.next_term()?;
            self.pending = scope.children().into_iter();
        }
    }
}

/// Depth-first preorder walk of every descendant of each upstream scope.
/// The scopes themselves are not yielded.
pub struct DescendantsStream<'a> {
    upstream: BoxStream<'a>,
    stack: Vec<Term>,
}

impl<'a> DescendantsStream<'a> {
    pub fn new(upstream: BoxStream<'a>) -> Self {
        DescendantsStream {
            upstream,
            stack: Vec::new(),
        }
    }

    fn push_children(stack: &mut Vec<Term>, scope: &Term) {
        let mut children = scope.children();
        children.reverse();
        stack.extend(children);
    }
}

impl<'a> TermStream for DescendantsStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        loop {
            if let Some(term) = self.stack.pop() {
                Self::push_children(&mut self.stack, &term);
                return Some(term);
            }
            let scope = self.upstream.next_term()?;
            Self::push_children(&mut self.stack, &scope);
        }
    }
}

/// Keeps upstream scopes whose predicate evaluates truthy with the scope as
/// context.
pub struct FilterStream<'a> {
    upstream: BoxStream<'a>,
    predicate: &'a Expr,
    evaluator: &'a Evaluator,
}

impl<'a> FilterStream<'a> {
    pub fn new(upstream: BoxStream<'a>, predicate: &'a Expr, evaluator: &'a Evaluator) -> Self {
        FilterStream {
            upstream,
            predicate,
            evaluator,
        }
    }
}

impl<'a> TermStream for FilterStream<'a> {
    fn next_term(&mut self) -> Option<Term> {
        while let Some(scope) = self.upstream.next_term() {
            if self.evaluator.eval(self.predicate, &scope).is_truthy() {
                return Some(scope);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::term::Item;

    struct CountingStream {
        terms: std::vec::IntoIter<Term>,
        pulls: Rc<Cell<usize>>,
    }

    impl TermStream for CountingStream {
        fn next_term(&mut self) -> Option<Term> {
            self.pulls.set(self.pulls.get() + 1);
            self.terms.next()
        }
    }

    fn counting(terms: Vec<Term>) -> (BoxStream<'static>, Rc<Cell<usize>>) {
        let pulls = Rc::new(Cell::new(0));
        let stream = CountingStream {
            terms: terms.into_iter(),
            pulls: pulls.clone(),
        };
        (Box::new(stream), pulls)
    }

    fn record(items: Vec<Term>) -> Term {
        Term::Record(items.into_iter().map(Item::Value).collect())
    }

    #[test]
    fn children_pulls_upstream_lazily() {
        let (upstream, pulls) = counting(vec![
            record(vec![Term::Int(1), Term::Int(2)]),
            record(vec![Term::Int(3)]),
        ]);
        let mut stream = ChildrenStream::new(upstream);
        assert_eq!(stream.next_term(), Some(Term::Int(1)));
        assert_eq!(pulls.get(), 1);
        assert_eq!(stream.next_term(), Some(Term::Int(2)));
        assert_eq!(pulls.get(), 1);
        assert_eq!(stream.next_term(), Some(Term::Int(3)));
        assert_eq!(pulls.get(), 2);
        assert_eq!(stream.next_term(), None);
    }

    #[test]
    fn descendants_walk_preorder_without_scope() {
        let tree = record(vec![
            record(vec![Term::Int(1), Term::Int(2)]),
            Term::Int(3),
        ]);
        let mut stream = DescendantsStream::new(Box::new(OnceStream::new(tree.clone())));
        assert_eq!(
            stream.next_term(),
            Some(record(vec![Term::Int(1), Term::Int(2)]))
        );
        assert_eq!(stream.next_term(), Some(Term::Int(1)));
        assert_eq!(stream.next_term(), Some(Term::Int(2)));
        assert_eq!(stream.next_term(), Some(Term::Int(3)));
        assert_eq!(stream.next_term(), None);
    }

    #[test]
    fn descendants_stop_early() {
        let deep = record(vec![record(vec![record(vec![Term::Int(9)])])]);
        let (upstream, pulls) = counting(vec![deep, Term::Int(0)]);
        let mut stream = DescendantsStream::new(upstream);
        assert!(stream.next_term().is_some());
        // only the first upstream scope has been touched
        assert_eq!(pulls.get(), 1);
    }

    fn slots(fields: Vec<(&str, Term)>) -> Term {
        Term::Record(
            fields
                .into_iter()
                .map(|(key, value)| Item::Slot(Term::Text(key.to_string()), value))
                .collect(),
        )
    }

    #[test]
    fn child_skips_scopes_without_key() {
        let (upstream, _) = counting(vec![
            slots(vec![("a", Term::Int(1))]),
            slots(vec![("b", Term::Int(2))]),
            slots(vec![("a", Term::Int(3))]),
        ]);
        let mut stream = ChildStream::new(upstream, Term::Text("a".to_string()));
        assert_eq!(stream.next_term(), Some(Term::Int(1)));
        assert_eq!(stream.next_term(), Some(Term::Int(3)));
        assert_eq!(stream.next_term(), None);
    }
}
