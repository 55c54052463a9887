//! Axis traversal over a [`DomFacade`].
//!
//! An [`AxisCursor`] yields the nodes of one axis in axis order: document order for the
//! forward axes, reverse document order (proximity) for the reverse ones. A step that
//! needs several facade calls replays all of them after a suspension; the cursor state
//! only moves once a node has been produced.

use crate::compiler::NodeTest;
use crate::model::{DomFacade, NodeKind, XdmNode, traverse};
use crate::parser::ast::Axis;
use crate::xdm::Fetch;
use std::collections::VecDeque;

macro_rules! fetch {
    ($e:expr) => {
        match $e {
            Fetch::Ready(v) => v,
            Fetch::Pending(s) => return Fetch::Pending(s),
        }
    };
}

pub(crate) fn is_reverse(axis: Axis) -> bool {
    matches!(
        axis,
        Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding
    )
}

/// Whether the axis yields each node at most once and in document order for a single origin.
pub(crate) fn is_forward(axis: Axis) -> bool {
    !is_reverse(axis)
}

fn principal_kind(axis: Axis) -> NodeKind {
    if axis == Axis::Attribute { NodeKind::Attribute } else { NodeKind::Element }
}

pub(crate) fn matches_test<N: XdmNode>(test: &NodeTest, axis: Axis, node: &N) -> bool {
    match test {
        NodeTest::Name(name) => node.kind() == principal_kind(axis) && name.matches(node.name().as_ref()),
        NodeTest::Kind(kind) => kind.matches(node),
    }
}

enum State<N> {
    Start,
    /// The node produced last; the next one is computed from it.
    At(N),
    Queue(VecDeque<N>),
    Done,
}

pub(crate) struct AxisCursor<N> {
    axis: Axis,
    origin: N,
    state: State<N>,
    /// Ancestors of the origin, skipped on the preceding axis.
    excluded: Option<Vec<N>>,
}

impl<N: XdmNode> AxisCursor<N> {
    pub(crate) fn new(axis: Axis, origin: N) -> Self {
        Self { axis, origin, state: State::Start, excluded: None }
    }

    pub(crate) fn next(&mut self, facade: &dyn DomFacade<N>) -> Fetch<Option<N>> {
        let current = match &mut self.state {
            State::Done => return Fetch::Ready(None),
            State::Queue(queue) => {
                let next = queue.pop_front();
                if next.is_none() {
                    self.state = State::Done;
                }
                return Fetch::Ready(next);
            }
            State::Start => None,
            State::At(n) => Some(n.clone()),
        };
        let next = match current {
            None => fetch!(self.first(facade)),
            Some(c) => fetch!(self.after(facade, &c)),
        };
        if matches!(self.state, State::Queue(_)) {
            return Fetch::Ready(next);
        }
        self.state = match &next {
            Some(n) => State::At(n.clone()),
            None => State::Done,
        };
        Fetch::Ready(next)
    }

    fn first(&mut self, facade: &dyn DomFacade<N>) -> Fetch<Option<N>> {
        let origin = self.origin.clone();
        let is_attr = origin.kind() == NodeKind::Attribute;
        match self.axis {
            Axis::SelfAxis | Axis::DescendantOrSelf | Axis::AncestorOrSelf => Fetch::Ready(Some(origin)),
            Axis::Child | Axis::Descendant => {
                if is_attr {
                    Fetch::Ready(None)
                } else {
                    facade.first_child(&origin)
                }
            }
            Axis::Attribute => {
                if origin.kind() != NodeKind::Element {
                    return Fetch::Ready(None);
                }
                let mut attrs: VecDeque<N> = fetch!(facade.all_attributes(&origin))
                    .into_iter()
                    .filter(|a| !traverse::is_namespace_declaration(a))
                    .collect();
                let first = attrs.pop_front();
                if first.is_some() {
                    self.state = State::Queue(attrs);
                }
                Fetch::Ready(first)
            }
            Axis::Parent | Axis::Ancestor => facade.parent_node(&origin),
            Axis::FollowingSibling => {
                if is_attr {
                    Fetch::Ready(None)
                } else {
                    facade.next_sibling(&origin)
                }
            }
            Axis::PrecedingSibling => {
                if is_attr {
                    Fetch::Ready(None)
                } else {
                    facade.previous_sibling(&origin)
                }
            }
            Axis::Following => {
                if is_attr {
                    match fetch!(facade.parent_node(&origin)) {
                        Some(owner) => preorder_next(facade, &owner, None),
                        None => Fetch::Ready(None),
                    }
                } else {
                    skip_subtree(facade, &origin)
                }
            }
            Axis::Preceding => {
                if self.excluded.is_none() {
                    self.excluded = Some(fetch!(traverse::ancestors(facade, &origin)));
                }
                let start = if is_attr {
                    match fetch!(facade.parent_node(&origin)) {
                        Some(owner) => owner,
                        None => return Fetch::Ready(None),
                    }
                } else {
                    origin
                };
                self.preceding_from(facade, &start)
            }
            Axis::Namespace => Fetch::Ready(None),
        }
    }

    fn after(&mut self, facade: &dyn DomFacade<N>, current: &N) -> Fetch<Option<N>> {
        match self.axis {
            Axis::SelfAxis | Axis::Parent | Axis::Attribute | Axis::Namespace => Fetch::Ready(None),
            Axis::Child | Axis::FollowingSibling => facade.next_sibling(current),
            Axis::PrecedingSibling => facade.previous_sibling(current),
            Axis::Ancestor | Axis::AncestorOrSelf => facade.parent_node(current),
            Axis::Descendant | Axis::DescendantOrSelf => {
                if self.origin.kind() == NodeKind::Attribute {
                    return Fetch::Ready(None);
                }
                preorder_next(facade, current, Some(&self.origin))
            }
            Axis::Following => preorder_next(facade, current, None),
            Axis::Preceding => self.preceding_from(facade, current),
        }
    }

    fn preceding_from(&self, facade: &dyn DomFacade<N>, from: &N) -> Fetch<Option<N>> {
        let excluded = self.excluded.as_deref().unwrap_or(&[]);
        let mut cur = from.clone();
        loop {
            match fetch!(preorder_prev(facade, &cur)) {
                Some(p) if excluded.contains(&p) => cur = p,
                other => return Fetch::Ready(other),
            }
        }
    }
}

/// Next node in document order, staying inside `bound` when given.
fn preorder_next<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N, bound: Option<&N>) -> Fetch<Option<N>> {
    if let Some(child) = fetch!(facade.first_child(node)) {
        return Fetch::Ready(Some(child));
    }
    if bound == Some(node) {
        return Fetch::Ready(None);
    }
    let mut cur = node.clone();
    loop {
        if let Some(sibling) = fetch!(facade.next_sibling(&cur)) {
            return Fetch::Ready(Some(sibling));
        }
        match fetch!(facade.parent_node(&cur)) {
            Some(p) if bound != Some(&p) => cur = p,
            _ => return Fetch::Ready(None),
        }
    }
}

/// First node after the subtree rooted at `node`.
fn skip_subtree<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Option<N>> {
    let mut cur = node.clone();
    loop {
        if let Some(sibling) = fetch!(facade.next_sibling(&cur)) {
            return Fetch::Ready(Some(sibling));
        }
        match fetch!(facade.parent_node(&cur)) {
            Some(p) => cur = p,
            None => return Fetch::Ready(None),
        }
    }
}

/// Previous node in document order (the deepest last descendant of the previous sibling,
/// or else the parent).
fn preorder_prev<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Option<N>> {
    match fetch!(facade.previous_sibling(node)) {
        Some(mut p) => {
            while let Some(last) = fetch!(facade.last_child(&p)) {
                p = last;
            }
            Fetch::Ready(Some(p))
        }
        None => facade.parent_node(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, attr, doc, elem, text};
    use rstest::rstest;

    fn sample() -> SimpleNode {
        // <r><a><a1/><a2/></a><b/><c><c1/></c></r>
        doc()
            .child(
                elem("r")
                    .child(elem("a").child(elem("a1")).child(elem("a2")))
                    .child(elem("b").attr(attr("id", "x")))
                    .child(elem("c").child(elem("c1")).child(text("t"))),
            )
            .build()
    }

    fn find(root: &SimpleNode, name: &str) -> SimpleNode {
        root.descendants_or_self()
            .into_iter()
            .find(|n| n.name().is_some_and(|q| q.local == name))
            .expect("node exists")
    }

    fn walk(axis: Axis, origin: SimpleNode) -> Vec<String> {
        let facade = SimpleNode::facade();
        let mut cursor = AxisCursor::new(axis, origin);
        let mut out = Vec::new();
        while let Some(n) = cursor.next(&facade).block(|| Fetch::Ready(None)) {
            out.push(n.name().map_or_else(|| format!("{:?}", n.kind()), |q| q.local));
        }
        out
    }

    #[rstest]
    #[case(Axis::Child, "r", vec!["a", "b", "c"])]
    #[case(Axis::Descendant, "a", vec!["a1", "a2"])]
    #[case(Axis::DescendantOrSelf, "c", vec!["c", "c1", "Text"])]
    #[case(Axis::Following, "a1", vec!["a2", "b", "c", "c1", "Text"])]
    #[case(Axis::Preceding, "c1", vec!["b", "a2", "a1", "a"])]
    #[case(Axis::FollowingSibling, "a", vec!["b", "c"])]
    #[case(Axis::PrecedingSibling, "c", vec!["b", "a"])]
    #[case(Axis::Ancestor, "a2", vec!["a", "r", "Document"])]
    #[case(Axis::Attribute, "b", vec!["id"])]
    fn axes_yield_in_axis_order(#[case] axis: Axis, #[case] origin: &str, #[case] expected: Vec<&str>) {
        let root = sample();
        assert_eq!(walk(axis, find(&root, origin)), expected);
    }

    #[test]
    fn following_of_an_attribute_includes_the_owner_content() {
        let root = doc().child(elem("r").child(elem("e").attr(attr("k", "v")).child(elem("inner"))).child(elem("z"))).build();
        let e = find(&root, "e");
        let attr = e.attributes()[0].clone();
        assert_eq!(walk(Axis::Following, attr.clone()), vec!["inner", "z"]);
        assert_eq!(walk(Axis::Parent, attr), vec!["e"]);
    }
}
