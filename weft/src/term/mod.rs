//! The minimal structured-value algebra selector expressions traverse.
//!
//! A [`Term`] is either a scalar, `Extant` (defined-but-absent, the unit of
//! the algebra) or a [`Record`](Term::Record) of items. Records hold a mix of
//! plain values and keyed slots, in insertion order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A structured value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Term {
    Extant,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Record(Vec<Item>),
}

/// One entry of a record: a bare value or a `key: value` slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Item {
    Value(Term),
    Slot(Term, Term),
}

impl Term {
    pub fn text(text: impl Into<String>) -> Self {
        Term::Text(text.into())
    }

    pub fn record(items: impl IntoIterator<Item = Item>) -> Self {
        Term::Record(items.into_iter().collect())
    }

    /// A single-slot record, the shape used for marker values such as the
    /// `noMesh` reason carried by uplink error stubs.
    pub fn slot(key: impl Into<String>, value: Term) -> Self {
        Term::Record(vec![Item::Slot(Term::Text(key.into()), value)])
    }

    pub fn is_extant(&self) -> bool {
        matches!(self, Term::Extant)
    }

    /// Truthiness for logical operators. Not the complement of
    /// [`is_falsey`](Term::is_falsey): zero, empty text and empty records are
    /// neither truthy nor falsey.
    pub fn is_truthy(&self) -> bool {
        match self {
            Term::Extant => false,
            Term::Bool(value) => *value,
            Term::Int(value) => *value != 0,
            Term::Float(value) => *value != 0.0,
            Term::Text(text) => !text.is_empty(),
            Term::Record(items) => !items.is_empty(),
        }
    }

    pub fn is_falsey(&self) -> bool {
        matches!(self, Term::Extant | Term::Bool(false))
    }

    /// The record items of this term, or the empty slice for scalars.
    pub fn items(&self) -> &[Item] {
        match self {
            Term::Record(items) => items.as_slice(),
            _ => &[],
        }
    }

    /// Child lookup: a non-negative `Int` key indexes into the record items,
    /// any other key selects the matching slot's value.
    pub fn child(&self, key: &Term) -> Option<Term> {
        let items = match self {
            Term::Record(items) => items,
            _ => return None,
        };
        if let Term::Int(index) = key {
            if *index >= 0 {
                return items.get(*index as usize).map(Item::value);
            }
        }
        items.iter().find_map(|item| match item {
            Item::Slot(slot_key, value) if slot_key == key => Some(value.clone()),
            _ => None,
        })
    }

    /// Member lookup: slots keyed by exactly this text.
    pub fn member(&self, name: &str) -> Option<Term> {
        self.items().iter().find_map(|item| match item {
            Item::Slot(Term::Text(key), value) if key == name => Some(value.clone()),
            _ => None,
        })
    }

    /// Immediate child values, in record order.
    pub fn children(&self) -> Vec<Term> {
        self.items().iter().map(Item::value).collect()
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Term::Int(value) => Some(*value as f64),
            Term::Float(value) => Some(*value),
            _ => None,
        }
    }

    fn arithmetic(
        &self,
        rhs: &Term,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Term {
        match (self, rhs) {
            (Term::Int(lhs), Term::Int(rhs)) => match int_op(*lhs, *rhs) {
                Some(value) => Term::Int(value),
                None => Term::Float(float_op(*lhs as f64, *rhs as f64)),
            },
            _ => match (self.as_f64(), rhs.as_f64()) {
                (Some(lhs), Some(rhs)) => Term::Float(float_op(lhs, rhs)),
                _ => Term::Extant,
            },
        }
    }

    pub fn add(&self, rhs: &Term) -> Term {
        if let (Term::Text(lhs), Term::Text(rhs)) = (self, rhs) {
            let mut out = lhs.clone();
            out.push_str(rhs);
            return Term::Text(out);
        }
        self.arithmetic(rhs, i64::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Term) -> Term {
        self.arithmetic(rhs, i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Term) -> Term {
        self.arithmetic(rhs, i64::checked_mul, |a, b| a * b)
    }

    pub fn div(&self, rhs: &Term) -> Term {
        // Division is float-valued throughout; integer division surprises
        // selector authors more than it helps them.
        match (self.as_f64(), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) if rhs != 0.0 => Term::Float(lhs / rhs),
            _ => Term::Extant,
        }
    }

    pub fn rem(&self, rhs: &Term) -> Term {
        self.arithmetic(rhs, i64::checked_rem, |a, b| a % b)
    }

    pub fn negate(&self) -> Term {
        match self {
            Term::Int(value) => Term::Int(value.wrapping_neg()),
            Term::Float(value) => Term::Float(-value),
            _ => Term::Extant,
        }
    }

    pub fn not(&self) -> Term {
        if self.is_truthy() {
            Term::Bool(false)
        } else if self.is_falsey() {
            Term::Bool(true)
        } else {
            Term::Extant
        }
    }

    fn bitwise(&self, rhs: &Term, op: impl Fn(i64, i64) -> i64) -> Term {
        match (self, rhs) {
            (Term::Int(lhs), Term::Int(rhs)) => Term::Int(op(*lhs, *rhs)),
            _ => Term::Extant,
        }
    }

    pub fn bit_or(&self, rhs: &Term) -> Term {
        self.bitwise(rhs, |a, b| a | b)
    }

    pub fn bit_xor(&self, rhs: &Term) -> Term {
        self.bitwise(rhs, |a, b| a ^ b)
    }

    pub fn bit_and(&self, rhs: &Term) -> Term {
        self.bitwise(rhs, |a, b| a & b)
    }

    pub fn bit_not(&self) -> Term {
        match self {
            Term::Int(value) => Term::Int(!value),
            _ => Term::Extant,
        }
    }

    /// Ordering used by the comparison operators. Numbers compare
    /// numerically across `Int`/`Float`; text and booleans compare within
    /// their own kind; everything else is incomparable.
    pub fn cmp_terms(&self, rhs: &Term) -> Option<Ordering> {
        match (self, rhs) {
            (Term::Text(lhs), Term::Text(rhs)) => Some(lhs.cmp(rhs)),
            (Term::Bool(lhs), Term::Bool(rhs)) => Some(lhs.cmp(rhs)),
            _ => match (self.as_f64(), rhs.as_f64()) {
                (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
                _ => None,
            },
        }
    }
}

impl Item {
    pub fn value(&self) -> Term {
        match self {
            Item::Value(value) => value.clone(),
            Item::Slot(_, value) => value.clone(),
        }
    }

    pub fn key(&self) -> Option<&Term> {
        match self {
            Item::Value(_) => None,
            Item::Slot(key, _) => Some(key),
        }
    }
}

// Equality and hashing are total so a Term can key a partition map; floats
// compare by bit pattern here, not by IEEE equality.
impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Extant, Term::Extant) => true,
            (Term::Bool(lhs), Term::Bool(rhs)) => lhs == rhs,
            (Term::Int(lhs), Term::Int(rhs)) => lhs == rhs,
            (Term::Float(lhs), Term::Float(rhs)) => lhs.to_bits() == rhs.to_bits(),
            (Term::Text(lhs), Term::Text(rhs)) => lhs == rhs,
            (Term::Record(lhs), Term::Record(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Term::Extant => {}
            Term::Bool(value) => value.hash(state),
            Term::Int(value) => value.hash(state),
            Term::Float(value) => value.to_bits().hash(state),
            Term::Text(text) => text.hash(state),
            Term::Record(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Extant => Ok(()),
            Term::Bool(value) => write!(f, "{}", value),
            Term::Int(value) => write!(f, "{}", value),
            Term::Float(value) => write!(f, "{}", value),
            Term::Text(text) => write!(f, "{}", text),
            Term::Record(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match item {
                        Item::Value(value) => write!(f, "{}", value)?,
                        Item::Slot(key, value) => write!(f, "{}:{}", key, value)?,
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Term {
    fn from(value: bool) -> Self {
        Term::Bool(value)
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Int(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Term::Float(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::Text(value.to_string())
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Term::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Term {
        Term::record([
            Item::Slot(Term::from("name"), Term::from("gauge")),
            Item::Value(Term::Int(7)),
            Item::Slot(Term::Int(-1), Term::from("negative-key")),
        ])
    }

    #[test]
    fn child_by_index_and_key() {
        let record = sample();
        assert_eq!(record.child(&Term::Int(1)), Some(Term::Int(7)));
        assert_eq!(record.child(&Term::from("name")), Some(Term::from("gauge")));
        // negative ints are slot keys, not indexes
        assert_eq!(
            record.child(&Term::Int(-1)),
            Some(Term::from("negative-key"))
        );
        assert_eq!(record.child(&Term::Int(9)), None);
    }

    #[test]
    fn member_selects_text_slots_only() {
        let record = sample();
        assert_eq!(record.member("name"), Some(Term::from("gauge")));
        assert_eq!(record.member("missing"), None);
        assert_eq!(Term::Int(3).member("name"), None);
    }

    #[test]
    fn truthiness_is_three_valued() {
        assert!(Term::Bool(true).is_truthy());
        assert!(Term::Bool(false).is_falsey());
        assert!(Term::Extant.is_falsey());
        // zero is neither
        assert!(!Term::Int(0).is_truthy());
        assert!(!Term::Int(0).is_falsey());
        assert!(!Term::text("").is_truthy());
        assert!(!Term::text("").is_falsey());
    }

    #[test]
    fn arithmetic_promotes_on_overflow() {
        let sum = Term::Int(i64::MAX).add(&Term::Int(1));
        assert!(matches!(sum, Term::Float(_)));
        assert_eq!(Term::Int(2).mul(&Term::Int(3)), Term::Int(6));
        assert_eq!(Term::from("a").add(&Term::from("b")), Term::from("ab"));
        assert_eq!(Term::from("a").sub(&Term::Int(1)), Term::Extant);
    }

    #[test]
    fn comparisons_cross_numeric_kinds() {
        use std::cmp::Ordering;
        assert_eq!(
            Term::Int(2).cmp_terms(&Term::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Term::from("a").cmp_terms(&Term::Int(1)), None);
    }
}
