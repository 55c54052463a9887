//! In-memory tree implementing every capability the engine consumes.
//!
//! Used by the tests and handy for prototypes:
//!
//! ```
//! use arbor_xpath::simple_node::{attr, doc, elem, text};
//!
//! // <root id="r"><child>Hello</child><child world="yes"/></root>
//! let document = doc()
//!     .child(
//!         elem("root")
//!             .attr(attr("id", "r"))
//!             .child(elem("child").child(text("Hello")))
//!             .child(elem("child").attr(attr("world", "yes"))),
//!     )
//!     .build();
//! let root = document.children()[0].clone();
//! assert_eq!(root.children().len(), 2);
//! assert_eq!(root.string_value(), "Hello");
//! assert_eq!(document.to_xml(), r#"<root id="r"><child>Hello</child><child world="yes"/></root>"#);
//! ```
//!
//! [`SimpleTree`] answers every facade call immediately. [`SuspendingTree`] answers each
//! distinct call with a suspension first, which exercises the asynchronous paths.

use crate::consts::XMLNS_URI;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{DocumentWriter, DomFacade, NodeKind, NodesFactory, XdmNode};
use crate::xdm::{ExpandedName, Fetch, QName, Suspension};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

struct Inner {
    kind: NodeKind,
    name: Option<QName>,
    value: RefCell<String>,
    parent: RefCell<Weak<Inner>>,
    attributes: RefCell<Vec<SimpleNode>>,
    children: RefCell<Vec<SimpleNode>>,
}

/// A reference-counted node; clones share identity.
#[derive(Clone)]
pub struct SimpleNode(Rc<Inner>);

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SimpleNode {}

impl std::hash::Hash for SimpleNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state)
    }
}

impl fmt::Debug for SimpleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleNode")
            .field("kind", &self.0.kind)
            .field("name", &self.0.name.as_ref().map(QName::lexical))
            .field("value", &self.0.value.borrow())
            .finish()
    }
}

impl XdmNode for SimpleNode {
    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }
}

fn split_name(ns_uri: Option<&str>, qualified: &str) -> QName {
    match qualified.split_once(':') {
        Some((prefix, local)) => QName::new(Some(prefix), ns_uri, local),
        None => QName::new(None, ns_uri, qualified),
    }
}

impl SimpleNode {
    fn new(kind: NodeKind, name: Option<QName>, value: &str) -> Self {
        SimpleNode(Rc::new(Inner {
            kind,
            name,
            value: RefCell::new(value.to_string()),
            parent: RefCell::new(Weak::new()),
            attributes: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
        }))
    }

    pub fn document() -> SimpleNodeBuilder {
        SimpleNodeBuilder::new(SimpleNode::new(NodeKind::Document, None, ""))
    }

    /// An element without a namespace; a `p:` prefix is kept as written.
    pub fn element(name: &str) -> SimpleNodeBuilder {
        Self::element_ns(None, name)
    }

    pub fn element_ns(ns_uri: Option<&str>, qualified: &str) -> SimpleNodeBuilder {
        SimpleNodeBuilder::new(SimpleNode::new(NodeKind::Element, Some(split_name(ns_uri, qualified)), ""))
    }

    pub fn attribute(name: &str, value: &str) -> SimpleNode {
        Self::attribute_ns(None, name, value)
    }

    pub fn attribute_ns(ns_uri: Option<&str>, qualified: &str, value: &str) -> SimpleNode {
        SimpleNode::new(NodeKind::Attribute, Some(split_name(ns_uri, qualified)), value)
    }

    pub fn text(value: &str) -> SimpleNode {
        SimpleNode::new(NodeKind::Text, None, value)
    }

    pub fn comment(value: &str) -> SimpleNode {
        SimpleNode::new(NodeKind::Comment, None, value)
    }

    pub fn pi(target: &str, data: &str) -> SimpleNode {
        SimpleNode::new(NodeKind::ProcessingInstruction, Some(QName::local(target)), data)
    }

    /// An `xmlns` / `xmlns:prefix` declaration, stored as an attribute the way DOM does.
    pub fn namespace(prefix: &str, uri: &str) -> SimpleNode {
        let qualified = if prefix.is_empty() { "xmlns".to_string() } else { format!("xmlns:{prefix}") };
        Self::attribute_ns(Some(XMLNS_URI), &qualified, uri)
    }

    /// The facade, writer and factory over simple nodes.
    pub fn facade() -> SimpleTree {
        SimpleTree
    }

    pub fn parent(&self) -> Option<SimpleNode> {
        self.0.parent.borrow().upgrade().map(SimpleNode)
    }

    pub fn children(&self) -> Vec<SimpleNode> {
        self.0.children.borrow().clone()
    }

    pub fn attributes(&self) -> Vec<SimpleNode> {
        self.0.attributes.borrow().clone()
    }

    pub fn attribute_value(&self, local: &str) -> Option<String> {
        self.0
            .attributes
            .borrow()
            .iter()
            .find(|a| a.0.name.as_ref().is_some_and(|n| n.local == local && n.prefix.is_none()))
            .map(SimpleNode::value)
    }

    /// Own content of leaf kinds; empty for elements and documents.
    pub fn value(&self) -> String {
        self.0.value.borrow().clone()
    }

    pub fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Element | NodeKind::Document => self
                .descendants_or_self()
                .iter()
                .filter(|n| n.0.kind == NodeKind::Text)
                .map(SimpleNode::value)
                .collect(),
            _ => self.value(),
        }
    }

    /// This node and its descendants in document order, attributes excluded.
    pub fn descendants_or_self(&self) -> Vec<SimpleNode> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            out.push(node);
        }
        out
    }

    /// Compact XML serialization without declarations or indentation.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        match self.0.kind {
            NodeKind::Document => self.children().iter().for_each(|c| c.write_xml(out)),
            NodeKind::Element => {
                let name = self.0.name.as_ref().map(QName::lexical).unwrap_or_default();
                out.push('<');
                out.push_str(&name);
                for attr in self.attributes() {
                    let attr_name = attr.0.name.as_ref().map(QName::lexical).unwrap_or_default();
                    out.push_str(&format!(" {attr_name}=\"{}\"", escape(&attr.value(), true)));
                }
                let children = self.children();
                if children.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    children.iter().for_each(|c| c.write_xml(out));
                    out.push_str(&format!("</{name}>"));
                }
            }
            NodeKind::Attribute => {
                let name = self.0.name.as_ref().map(QName::lexical).unwrap_or_default();
                out.push_str(&format!("{name}=\"{}\"", escape(&self.value(), true)));
            }
            NodeKind::Text | NodeKind::Namespace => out.push_str(&escape(&self.value(), false)),
            NodeKind::Comment => out.push_str(&format!("<!--{}-->", self.value())),
            NodeKind::ProcessingInstruction => {
                let target = self.0.name.as_ref().map(|n| n.local.clone()).unwrap_or_default();
                out.push_str(&format!("<?{target} {}?>", self.value()));
            }
        }
    }

    fn set_parent(&self, parent: Option<&SimpleNode>) {
        *self.0.parent.borrow_mut() = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.0));
    }

    fn detach(&self) {
        let Some(parent) = self.parent() else { return };
        let list = if self.0.kind == NodeKind::Attribute { &parent.0.attributes } else { &parent.0.children };
        list.borrow_mut().retain(|n| n != self);
        self.set_parent(None);
    }

    fn find_attribute(&self, name: &ExpandedName) -> Option<SimpleNode> {
        self.0.attributes.borrow().iter().find(|a| a.0.name.as_ref().is_some_and(|n| n.expanded() == *name)).cloned()
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

pub struct SimpleNodeBuilder {
    node: SimpleNode,
    children: Vec<SimpleNode>,
    attributes: Vec<SimpleNode>,
}

pub enum SimpleNodeOrBuilder {
    Built(SimpleNode),
    Builder(SimpleNodeBuilder),
}

impl From<SimpleNode> for SimpleNodeOrBuilder {
    fn from(n: SimpleNode) -> Self {
        SimpleNodeOrBuilder::Built(n)
    }
}

impl From<SimpleNodeBuilder> for SimpleNodeOrBuilder {
    fn from(b: SimpleNodeBuilder) -> Self {
        SimpleNodeOrBuilder::Builder(b)
    }
}

impl SimpleNodeBuilder {
    fn new(node: SimpleNode) -> Self {
        Self { node, children: Vec::new(), attributes: Vec::new() }
    }

    pub fn child(mut self, child: impl Into<SimpleNodeOrBuilder>) -> Self {
        self.children.push(match child.into() {
            SimpleNodeOrBuilder::Built(n) => n,
            SimpleNodeOrBuilder::Builder(b) => b.build(),
        });
        self
    }

    pub fn children<I: IntoIterator<Item = SimpleNodeOrBuilder>>(self, children: I) -> Self {
        children.into_iter().fold(self, |builder, child| builder.child(child))
    }

    pub fn attr(mut self, attr: SimpleNode) -> Self {
        debug_assert_eq!(attr.kind(), NodeKind::Attribute);
        self.attributes.push(attr);
        self
    }

    pub fn namespace(self, declaration: SimpleNode) -> Self {
        self.attr(declaration)
    }

    pub fn build(self) -> SimpleNode {
        for attr in &self.attributes {
            attr.set_parent(Some(&self.node));
        }
        for child in &self.children {
            child.set_parent(Some(&self.node));
        }
        self.node.0.attributes.borrow_mut().extend(self.attributes);
        self.node.0.children.borrow_mut().extend(self.children);
        self.node
    }
}

pub fn doc() -> SimpleNodeBuilder {
    SimpleNode::document()
}

pub fn elem(name: &str) -> SimpleNodeBuilder {
    SimpleNode::element(name)
}

pub fn elem_ns(ns_uri: &str, qualified: &str) -> SimpleNodeBuilder {
    SimpleNode::element_ns(Some(ns_uri), qualified)
}

pub fn attr(name: &str, value: &str) -> SimpleNode {
    SimpleNode::attribute(name, value)
}

pub fn attr_ns(ns_uri: &str, qualified: &str, value: &str) -> SimpleNode {
    SimpleNode::attribute_ns(Some(ns_uri), qualified, value)
}

pub fn text(value: &str) -> SimpleNode {
    SimpleNode::text(value)
}

pub fn comment(value: &str) -> SimpleNode {
    SimpleNode::comment(value)
}

pub fn pi(target: &str, data: &str) -> SimpleNode {
    SimpleNode::pi(target, data)
}

pub fn ns(prefix: &str, uri: &str) -> SimpleNode {
    SimpleNode::namespace(prefix, uri)
}

/// Synchronous access to simple nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTree;

fn sibling(node: &SimpleNode, offset: isize) -> Option<SimpleNode> {
    if node.0.kind == NodeKind::Attribute {
        return None;
    }
    let parent = node.parent()?;
    let children = parent.0.children.borrow();
    let index = children.iter().position(|c| c == node)?;
    children.get(index.checked_add_signed(offset)?).cloned()
}

impl DomFacade<SimpleNode> for SimpleTree {
    fn parent_node(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(node.parent())
    }

    fn first_child(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(node.0.children.borrow().first().cloned())
    }

    fn last_child(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(node.0.children.borrow().last().cloned())
    }

    fn next_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(sibling(node, 1))
    }

    fn previous_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        Fetch::Ready(sibling(node, -1))
    }

    fn attribute(&self, element: &SimpleNode, name: &ExpandedName) -> Fetch<Option<String>> {
        Fetch::Ready(element.find_attribute(name).map(|a| a.value()))
    }

    fn all_attributes(&self, element: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        Fetch::Ready(element.attributes())
    }

    fn data(&self, node: &SimpleNode) -> Fetch<String> {
        Fetch::Ready(node.value())
    }
}

impl DocumentWriter<SimpleNode> for SimpleTree {
    fn insert_before(&self, parent: &SimpleNode, node: &SimpleNode, reference: Option<&SimpleNode>) -> Result<(), Error> {
        if node.0.kind == NodeKind::Attribute {
            node.detach();
            node.set_parent(Some(parent));
            parent.0.attributes.borrow_mut().push(node.clone());
            return Ok(());
        }
        if reference == Some(node) {
            return Ok(());
        }
        node.detach();
        let mut children = parent.0.children.borrow_mut();
        let index = match reference {
            Some(r) => children.iter().position(|c| c == r).ok_or_else(|| {
                Error::from_code(ErrorCode::FOER0000, "the reference node is not a child of the parent")
            })?,
            None => children.len(),
        };
        children.insert(index, node.clone());
        drop(children);
        node.set_parent(Some(parent));
        Ok(())
    }

    fn remove_child(&self, parent: &SimpleNode, node: &SimpleNode) -> Result<(), Error> {
        if node.parent().as_ref() != Some(parent) {
            return Err(Error::from_code(ErrorCode::FOER0000, "the node is not a child of the parent"));
        }
        node.detach();
        Ok(())
    }

    fn set_attribute_ns(
        &self,
        element: &SimpleNode,
        ns_uri: Option<&str>,
        qualified_name: &str,
        value: &str,
    ) -> Result<(), Error> {
        let name = split_name(ns_uri, qualified_name);
        match element.find_attribute(&name.expanded()) {
            Some(existing) => *existing.0.value.borrow_mut() = value.to_string(),
            None => {
                let attr = SimpleNode::new(NodeKind::Attribute, Some(name), value);
                attr.set_parent(Some(element));
                element.0.attributes.borrow_mut().push(attr);
            }
        }
        Ok(())
    }

    fn remove_attribute_ns(&self, element: &SimpleNode, ns_uri: Option<&str>, local_name: &str) -> Result<(), Error> {
        if let Some(attr) = element.find_attribute(&ExpandedName::new(ns_uri, local_name)) {
            attr.detach();
        }
        Ok(())
    }

    fn set_data(&self, node: &SimpleNode, value: &str) -> Result<(), Error> {
        *node.0.value.borrow_mut() = value.to_string();
        Ok(())
    }
}

impl NodesFactory<SimpleNode> for SimpleTree {
    fn create_element_ns(&self, ns_uri: Option<&str>, qualified_name: &str) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::element_ns(ns_uri, qualified_name).build())
    }

    fn create_attribute_ns(&self, ns_uri: Option<&str>, qualified_name: &str, value: &str) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::attribute_ns(ns_uri, qualified_name, value))
    }

    fn create_text_node(&self, data: &str) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::text(data))
    }

    fn create_comment(&self, data: &str) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::comment(data))
    }

    fn create_processing_instruction(&self, target: &str, data: &str) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::pi(target, data))
    }

    fn create_document(&self) -> Result<SimpleNode, Error> {
        Ok(SimpleNode::document().build())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Read {
    Parent,
    FirstChild,
    LastChild,
    Next,
    Previous,
    Attribute,
    Attributes,
    Data,
}

/// A facade that suspends once on every distinct call before answering it, like a tree
/// behind an asynchronous backend would.
#[derive(Debug, Default)]
pub struct SuspendingTree {
    answered: RefCell<HashSet<(Read, SimpleNode)>>,
    suspensions: Cell<usize>,
}

impl SuspendingTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often a call had to be suspended so far.
    pub fn suspensions(&self) -> usize {
        self.suspensions.get()
    }

    fn gate<T>(&self, read: Read, node: &SimpleNode, answer: impl FnOnce() -> Fetch<T>) -> Fetch<T> {
        if self.answered.borrow_mut().insert((read, node.clone())) {
            self.suspensions.set(self.suspensions.get() + 1);
            return Fetch::Pending(Suspension::new(futures_lite::future::yield_now()));
        }
        answer()
    }
}

impl DomFacade<SimpleNode> for SuspendingTree {
    fn parent_node(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.gate(Read::Parent, node, || SimpleTree.parent_node(node))
    }

    fn first_child(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.gate(Read::FirstChild, node, || SimpleTree.first_child(node))
    }

    fn last_child(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.gate(Read::LastChild, node, || SimpleTree.last_child(node))
    }

    fn next_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.gate(Read::Next, node, || SimpleTree.next_sibling(node))
    }

    fn previous_sibling(&self, node: &SimpleNode) -> Fetch<Option<SimpleNode>> {
        self.gate(Read::Previous, node, || SimpleTree.previous_sibling(node))
    }

    fn attribute(&self, element: &SimpleNode, name: &ExpandedName) -> Fetch<Option<String>> {
        self.gate(Read::Attribute, element, || SimpleTree.attribute(element, name))
    }

    fn all_attributes(&self, element: &SimpleNode) -> Fetch<Vec<SimpleNode>> {
        self.gate(Read::Attributes, element, || SimpleTree.all_attributes(element))
    }

    fn data(&self, node: &SimpleNode) -> Fetch<String> {
        self.gate(Read::Data, node, || SimpleTree.data(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_moves_nodes_between_parents() {
        let root = elem("r").child(elem("a").child(text("x"))).child(elem("b")).build();
        let (a, b) = (root.children()[0].clone(), root.children()[1].clone());
        let x = a.children()[0].clone();
        SimpleTree.insert_before(&b, &x, None).unwrap();
        assert!(a.children().is_empty());
        assert_eq!(x.parent(), Some(b.clone()));
        SimpleTree.insert_before(&root, &b, Some(&a)).unwrap();
        assert_eq!(root.to_xml(), "<r><b>x</b><a/></r>");
    }

    #[test]
    fn attributes_replace_by_expanded_name() {
        let e = elem("e").attr(attr_ns("urn:x", "p:k", "1")).build();
        SimpleTree.set_attribute_ns(&e, Some("urn:x"), "q:k", "2").unwrap();
        assert_eq!(e.attributes().len(), 1);
        assert_eq!(e.attributes()[0].value(), "2");
        SimpleTree.remove_attribute_ns(&e, Some("urn:x"), "k").unwrap();
        assert!(e.attributes().is_empty());
    }

    #[test]
    fn siblings_follow_child_order() {
        let root = elem("r").child(elem("a")).child(elem("b")).build();
        let a = root.children()[0].clone();
        let b = SimpleTree.next_sibling(&a).block(|| Fetch::Ready(None));
        assert_eq!(b.as_ref(), Some(&root.children()[1]));
        assert_eq!(SimpleTree.previous_sibling(&a).block(|| Fetch::Ready(None)), None);
    }

    #[test]
    fn suspending_tree_answers_after_one_suspension() {
        let tree = SuspendingTree::new();
        let root = elem("r").child(elem("a")).build();
        assert!(!tree.first_child(&root).is_ready());
        let child = tree.first_child(&root).block(|| tree.first_child(&root));
        assert_eq!(child, Some(root.children()[0].clone()));
        assert_eq!(tree.suspensions(), 1);
    }
}
