use super::{AtomicValue, ExpandedName, MapKey, XdmItem, XdmSequence};
use crate::compiler::Expression;
use crate::engine::context::DynamicContext;
use crate::engine::functions::FunctionImpl;
use crate::types::SequenceType;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/// What calling a function item runs.
pub enum FunctionBody<N> {
    /// A built-in or custom function from the registry.
    Native(FunctionImpl<N>),
    /// An inline function expression or a declared XQuery function, with its captured scope.
    Inline {
        params: Vec<(ExpandedName, Option<SequenceType>)>,
        return_type: Option<SequenceType>,
        body: Rc<Expression>,
        closure: DynamicContext<N>,
    },
    /// Partial application: `Some` slots are fixed, `None` slots are the remaining parameters.
    Partial { base: Rc<FunctionItem<N>>, bound: Vec<Option<XdmSequence<N>>> },
}

pub struct FunctionItem<N> {
    pub name: Option<ExpandedName>,
    pub arity: usize,
    pub updating: bool,
    pub body: FunctionBody<N>,
}

impl<N> fmt::Debug for FunctionItem<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.arity),
            None => write!(f, "(anonymous)#{}", self.arity),
        }
    }
}

/// Immutable map item. Updates copy on write.
pub struct MapItem<N>(Rc<IndexMap<MapKey, (AtomicValue, XdmSequence<N>)>>);

impl<N> Clone for MapItem<N> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<N: fmt::Debug> fmt::Debug for MapItem<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.values().map(|(k, v)| (k.lexical(), v))).finish()
    }
}

impl<N: PartialEq> PartialEq for MapItem<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|(k, (_, v))| other.0.get(k).is_some_and(|(_, w)| v == w))
    }
}

impl<N: Clone> Default for MapItem<N> {
    fn default() -> Self {
        Self(Rc::new(IndexMap::new()))
    }
}

impl<N: Clone> MapItem<N> {
    pub fn from_entries(entries: impl IntoIterator<Item = (AtomicValue, XdmSequence<N>)>) -> Self {
        let mut map = IndexMap::new();
        for (k, v) in entries {
            map.insert(MapKey::from_atomic(&k), (k, v));
        }
        Self(Rc::new(map))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &AtomicValue) -> Option<&XdmSequence<N>> {
        self.0.get(&MapKey::from_atomic(key)).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &AtomicValue) -> bool {
        self.0.contains_key(&MapKey::from_atomic(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &AtomicValue> {
        self.0.values().map(|(k, _)| k)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&AtomicValue, &XdmSequence<N>)> {
        self.0.values().map(|(k, v)| (k, v))
    }

    /// A new map with `key` bound to `value`; an existing entry keeps its position.
    pub fn put(&self, key: AtomicValue, value: XdmSequence<N>) -> Self {
        let mut map = (*self.0).clone();
        map.insert(MapKey::from_atomic(&key), (key, value));
        Self(Rc::new(map))
    }

    pub fn remove(&self, key: &AtomicValue) -> Self {
        let mut map = (*self.0).clone();
        map.shift_remove(&MapKey::from_atomic(key));
        Self(Rc::new(map))
    }
}

/// Immutable array item; members are whole sequences.
pub struct ArrayItem<N>(Rc<Vec<XdmSequence<N>>>);

impl<N> Clone for ArrayItem<N> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<N: fmt::Debug> fmt::Debug for ArrayItem<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<N: PartialEq> PartialEq for ArrayItem<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<N: Clone> ArrayItem<N> {
    pub fn new(members: Vec<XdmSequence<N>>) -> Self {
        Self(Rc::new(members))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn members(&self) -> &[XdmSequence<N>] {
        &self.0
    }

    /// 1-based member access.
    pub fn get(&self, position: usize) -> Option<&XdmSequence<N>> {
        position.checked_sub(1).and_then(|i| self.0.get(i))
    }

    pub fn with_members(&self, f: impl FnOnce(&mut Vec<XdmSequence<N>>)) -> Self {
        let mut members = (*self.0).clone();
        f(&mut members);
        Self(Rc::new(members))
    }

    /// All members concatenated, one level deep.
    pub fn flatten_items(&self) -> XdmSequence<N> {
        self.0.iter().flatten().cloned().collect()
    }
}

impl<N: Clone> From<Vec<XdmSequence<N>>> for ArrayItem<N> {
    fn from(members: Vec<XdmSequence<N>>) -> Self {
        Self::new(members)
    }
}

impl<N> XdmItem<N> {
    /// Arity when the item is callable (maps and arrays are arity-one functions).
    pub fn function_arity(&self) -> Option<usize> {
        match self {
            XdmItem::Function(f) => Some(f.arity),
            XdmItem::Map(_) | XdmItem::Array(_) => Some(1),
            _ => None,
        }
    }
}
