//! Dynamic evaluation state: the focus, variable bindings and per-call parameters.

use crate::compiler::StaticContext;
use crate::engine::functions::FunctionRegistry;
use crate::model::{DocumentOrder, DocumentWriter, DomFacade, NodesFactory, XdmNode};
use crate::update::PendingUpdate;
use crate::xdm::{DateTime, ExpandedName, SharedSequence, XdmItem, XdmSequence};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

struct Binding<N> {
    name: ExpandedName,
    value: SharedSequence<N>,
    parent: Option<Rc<Binding<N>>>,
}

/// An immutable, persistent list of variable bindings. Binding returns a new scope and
/// leaves the receiver untouched, so closures may keep a scope alive cheaply.
pub struct VariableScope<N>(Option<Rc<Binding<N>>>);

impl<N> Clone for VariableScope<N> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<N> Default for VariableScope<N> {
    fn default() -> Self {
        Self(None)
    }
}

impl<N> fmt::Debug for VariableScope<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        let mut cur = self.0.as_ref();
        while let Some(b) = cur {
            names.push(b.name.to_string());
            cur = b.parent.as_ref();
        }
        f.debug_list().entries(names).finish()
    }
}

impl<N: Clone + 'static> VariableScope<N> {
    pub fn bind(&self, name: ExpandedName, value: SharedSequence<N>) -> Self {
        Self(Some(Rc::new(Binding { name, value, parent: self.0.clone() })))
    }

    /// Innermost binding for `name`.
    pub fn lookup(&self, name: &ExpandedName) -> Option<&SharedSequence<N>> {
        let mut cur = self.0.as_ref();
        while let Some(b) = cur {
            if b.name == *name {
                return Some(&b.value);
            }
            cur = b.parent.as_ref();
        }
        None
    }
}

/// Focus plus variables. Narrowed by cloning, never mutated in place.
pub struct DynamicContext<N> {
    pub item: Option<XdmItem<N>>,
    /// 1-based context position.
    pub position: usize,
    /// Context size; only meaningful where `fn:last()` can observe it.
    pub size: usize,
    pub variables: VariableScope<N>,
}

impl<N: Clone> Clone for DynamicContext<N> {
    fn clone(&self) -> Self {
        Self { item: self.item.clone(), position: self.position, size: self.size, variables: self.variables.clone() }
    }
}

impl<N: fmt::Debug> fmt::Debug for DynamicContext<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicContext")
            .field("item", &self.item)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("variables", &self.variables)
            .finish()
    }
}

impl<N: Clone + 'static> Default for DynamicContext<N> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<N: Clone + 'static> DynamicContext<N> {
    pub fn new(item: Option<XdmItem<N>>) -> Self {
        let position = usize::from(item.is_some());
        Self { item, position, size: position, variables: VariableScope::default() }
    }

    pub fn with_focus(&self, item: XdmItem<N>, position: usize, size: usize) -> Self {
        Self { item: Some(item), position, size, variables: self.variables.clone() }
    }

    /// Same variables, absent focus.
    pub fn without_focus(&self) -> Self {
        Self { item: None, position: 0, size: 0, variables: self.variables.clone() }
    }

    pub fn bind(&self, name: ExpandedName, value: SharedSequence<N>) -> Self {
        Self { item: self.item.clone(), position: self.position, size: self.size, variables: self.variables.bind(name, value) }
    }

    pub fn bind_items(&self, name: ExpandedName, items: XdmSequence<N>) -> Self {
        self.bind(name, SharedSequence::from_items(items))
    }
}

/// Everything an evaluation needs besides the focus. Created once per API call and cloned
/// cheaply into every cursor.
pub struct ExecutionParameters<N> {
    pub facade: Rc<dyn DomFacade<N>>,
    pub factory: Option<Rc<dyn NodesFactory<N>>>,
    pub writer: Option<Rc<dyn DocumentWriter<N>>>,
    pub order: Rc<DocumentOrder<N>>,
    pub functions: Rc<FunctionRegistry<N>>,
    pub static_ctx: Rc<StaticContext>,
    /// Variables supplied by the caller; visible inside declared function bodies too.
    pub initial: Rc<DynamicContext<N>>,
    /// Fixed `fn:current-dateTime()` for this evaluation.
    pub now: DateTime,
    /// Implicit timezone in minutes.
    pub implicit_timezone: i16,
    /// Sink for pending updates produced by updating expressions.
    pub updates: Rc<RefCell<Vec<PendingUpdate<N>>>>,
    /// Prolog variables, evaluated once per evaluation and keyed by declaration address.
    pub globals: Rc<RefCell<HashMap<usize, SharedSequence<N>>>>,
    pub debug: bool,
}

impl<N: XdmNode> Clone for ExecutionParameters<N> {
    fn clone(&self) -> Self {
        Self {
            facade: Rc::clone(&self.facade),
            factory: self.factory.clone(),
            writer: self.writer.clone(),
            order: Rc::clone(&self.order),
            functions: Rc::clone(&self.functions),
            static_ctx: Rc::clone(&self.static_ctx),
            initial: Rc::clone(&self.initial),
            now: self.now.clone(),
            implicit_timezone: self.implicit_timezone,
            updates: Rc::clone(&self.updates),
            globals: Rc::clone(&self.globals),
            debug: self.debug,
        }
    }
}

impl<N: XdmNode> fmt::Debug for ExecutionParameters<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionParameters")
            .field("has_factory", &self.factory.is_some())
            .field("has_writer", &self.writer.is_some())
            .field("now", &self.now)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl<N: XdmNode> ExecutionParameters<N> {
    /// A copy collecting updates into a fresh sink, as `copy … modify` needs.
    pub fn with_fresh_updates(&self) -> Self {
        Self { updates: Rc::new(RefCell::new(Vec::new())), ..self.clone() }
    }

    pub fn push_update(&self, update: PendingUpdate<N>) {
        self.updates.borrow_mut().push(update);
    }

    pub fn take_updates(&self) -> Vec<PendingUpdate<N>> {
        std::mem::take(&mut *self.updates.borrow_mut())
    }

    /// Resolves a prefix against the query's static namespaces.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        self.static_ctx.resolve_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::AtomicValue;

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let ctx: DynamicContext<()> = DynamicContext::default();
        let x = ExpandedName::local("x");
        let outer = ctx.bind_items(x.clone(), vec![XdmItem::Atomic(AtomicValue::integer(1))]);
        let inner = outer.bind_items(x.clone(), vec![XdmItem::Atomic(AtomicValue::integer(2))]);
        assert_eq!(inner.variables.lookup(&x).and_then(SharedSequence::known_items).map(|v| v.len()), Some(1));
        assert_eq!(
            inner.variables.lookup(&x).and_then(SharedSequence::known_items),
            Some(vec![XdmItem::Atomic(AtomicValue::integer(2))])
        );
        assert_eq!(
            outer.variables.lookup(&x).and_then(SharedSequence::known_items),
            Some(vec![XdmItem::Atomic(AtomicValue::integer(1))])
        );
        assert!(ctx.variables.lookup(&x).is_none());
    }

    #[test]
    fn focus_starts_at_position_one() {
        let ctx: DynamicContext<()> = DynamicContext::new(Some(XdmItem::Atomic(AtomicValue::integer(1))));
        assert_eq!((ctx.position, ctx.size), (1, 1));
        assert_eq!(ctx.without_focus().item, None);
    }
}
