//! XDM values: atomic values, nodes, function items, maps, arrays and lazy sequences.

mod atomic;
mod function;
mod sequence;
pub mod temporal;

pub use atomic::{AtomicPayload, AtomicValue, MapKey};
pub use function::{ArrayItem, FunctionBody, FunctionItem, MapItem};
pub(crate) use sequence::{pull_or_pending, pull_or_suspend, ready_or_pending, ready_or_suspend};
pub use sequence::{
    Fetch, Pull, SequenceCollector, SequenceCursor, SharedSequence, Suspension, XdmSequenceStream,
};
pub use temporal::{Components, DateTime, Duration};

use std::fmt;

/// Namespace URI plus local name; prefixes are not part of identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<&str>, local: &str) -> Self {
        Self { ns_uri: ns_uri.filter(|u| !u.is_empty()).map(str::to_string), local: local.to_string() }
    }

    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// A QName value: namespace, local part and the prefix it was written with.
#[derive(Debug, Clone, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub ns_uri: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(prefix: Option<&str>, ns_uri: Option<&str>, local: &str) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            ns_uri: ns_uri.filter(|u| !u.is_empty()).map(str::to_string),
            local: local.to_string(),
        }
    }

    pub fn local(local: &str) -> Self {
        Self::new(None, None, local)
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName { ns_uri: self.ns_uri.clone(), local: self.local.clone() }
    }

    /// `prefix:local` or just `local`.
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.ns_uri == other.ns_uri && self.local == other.local
    }
}

impl std::hash::Hash for QName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ns_uri.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical())
    }
}

/// A single XDM item.
#[derive(Debug, Clone)]
pub enum XdmItem<N> {
    Atomic(AtomicValue),
    Node(N),
    Function(std::rc::Rc<FunctionItem<N>>),
    Map(MapItem<N>),
    Array(ArrayItem<N>),
}

impl<N> XdmItem<N> {
    pub fn as_node(&self) -> Option<&N> {
        match self {
            XdmItem::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_atomic(&self) -> Option<&AtomicValue> {
        match self {
            XdmItem::Atomic(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, XdmItem::Node(_))
    }

    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            XdmItem::Atomic(a) => format!("a value of type {}", a.ty()),
            XdmItem::Node(_) => "a node".to_string(),
            XdmItem::Map(_) => "a map".to_string(),
            XdmItem::Array(_) => "an array".to_string(),
            XdmItem::Function(_) => "a function".to_string(),
        }
    }

    /// Maps and arrays are function items too.
    pub fn is_function(&self) -> bool {
        matches!(self, XdmItem::Function(_) | XdmItem::Map(_) | XdmItem::Array(_))
    }
}

impl<N: PartialEq> PartialEq for XdmItem<N> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (XdmItem::Atomic(a), XdmItem::Atomic(b)) => a == b,
            (XdmItem::Node(a), XdmItem::Node(b)) => a == b,
            (XdmItem::Function(a), XdmItem::Function(b)) => std::rc::Rc::ptr_eq(a, b),
            (XdmItem::Map(a), XdmItem::Map(b)) => a == b,
            (XdmItem::Array(a), XdmItem::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl<N> From<AtomicValue> for XdmItem<N> {
    fn from(v: AtomicValue) -> Self {
        XdmItem::Atomic(v)
    }
}

/// A fully materialized sequence.
pub type XdmSequence<N> = Vec<XdmItem<N>>;
