//! Document order: order keys for attached nodes, plus registration-order ranks that
//! keep detached trees in a stable total order.

use super::traverse::{self, fetch};
use super::{DomFacade, NodeKind, XdmNode};
use crate::util::merge_sort;
use crate::xdm::Fetch;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Registration-order ranks for tree roots.
///
/// Nodes without a common ancestor cannot be compared structurally; their roots are ranked
/// in the order the engine first saw them. The registry is append-only and is owned by an
/// [`Engine`](crate::Engine), so the relative order of two detached trees stays the same across
/// every evaluation that engine performs.
#[derive(Debug)]
pub struct DetachedNodeOrder<N> {
    ranks: RefCell<HashMap<N, usize>>,
}

impl<N> Default for DetachedNodeOrder<N> {
    fn default() -> Self {
        Self { ranks: RefCell::new(HashMap::new()) }
    }
}

impl<N: XdmNode> DetachedNodeOrder<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank of a root, assigning the next one on first sight.
    pub fn rank(&self, root: &N) -> usize {
        let mut ranks = self.ranks.borrow_mut();
        let next = ranks.len();
        *ranks.entry(root.clone()).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.ranks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position of a node in the global order: root rank, then `(group, index)` per level
/// where attributes (group 0) precede children (group 1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    root_rank: usize,
    path: SmallVec<[(u8, usize); 12]>,
}

/// Document-order comparisons for one evaluation, with a per-evaluation key cache.
pub struct DocumentOrder<N> {
    registry: Rc<DetachedNodeOrder<N>>,
    cache: RefCell<HashMap<N, Rc<OrderKey>>>,
}

impl<N: XdmNode> DocumentOrder<N> {
    pub fn new(registry: Rc<DetachedNodeOrder<N>>) -> Self {
        Self { registry, cache: RefCell::new(HashMap::new()) }
    }

    pub fn key(&self, facade: &dyn DomFacade<N>, node: &N) -> Fetch<Rc<OrderKey>> {
        if let Some(k) = self.cache.borrow().get(node) {
            return Fetch::Ready(Rc::clone(k));
        }
        let mut path: SmallVec<[(u8, usize); 12]> = SmallVec::new();
        let mut current = node.clone();
        loop {
            let Some(parent) = fetch!(facade.parent_node(&current)) else { break };
            let index = fetch!(traverse::sibling_index(facade, &current, &parent));
            let group = u8::from(current.kind() != NodeKind::Attribute);
            path.push((group, index));
            current = parent;
        }
        path.reverse();
        let key = Rc::new(OrderKey { root_rank: self.registry.rank(&current), path });
        self.cache.borrow_mut().insert(node.clone(), Rc::clone(&key));
        Fetch::Ready(key)
    }

    pub fn compare(&self, facade: &dyn DomFacade<N>, a: &N, b: &N) -> Fetch<Ordering> {
        if a == b {
            return Fetch::Ready(Ordering::Equal);
        }
        let ka = fetch!(self.key(facade, a));
        let kb = fetch!(self.key(facade, b));
        Fetch::Ready(ka.cmp(&kb))
    }

    /// Sorts into document order and removes duplicate nodes.
    pub fn sort_unique(&self, facade: &dyn DomFacade<N>, nodes: Vec<N>) -> Fetch<Vec<N>> {
        let mut keyed = Vec::with_capacity(nodes.len());
        for n in nodes {
            let k = fetch!(self.key(facade, &n));
            keyed.push((k, n));
        }
        let mut sorted = merge_sort(keyed, |a, b| a.0.cmp(&b.0));
        sorted.dedup_by(|a, b| a.1 == b.1);
        Fetch::Ready(sorted.into_iter().map(|(_, n)| n).collect())
    }

    /// Forgets cached keys; used after the tree was modified.
    pub fn invalidate(&self) {
        self.cache.borrow_mut().clear();
    }
}
