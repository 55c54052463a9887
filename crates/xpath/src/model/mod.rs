//! The capability interfaces the engine consumes to read, build and modify trees.
//!
//! Nodes themselves are opaque handles implementing [`XdmNode`]: identity, kind and
//! name are intrinsic to the handle. Every structural relation is reached through a
//! [`DomFacade`], whose calls may answer [`Fetch::Pending`] when the tree lives behind an
//! asynchronous backend. Writes go through [`DocumentWriter`] and new nodes come from a
//! [`NodesFactory`].

mod order;
pub mod traverse;

pub use order::{DetachedNodeOrder, DocumentOrder, OrderKey};

use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{ExpandedName, Fetch, QName};
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

impl NodeKind {
    /// DOM `nodeType` number.
    pub fn dom_type(self) -> u8 {
        match self {
            NodeKind::Element => 1,
            NodeKind::Attribute => 2,
            NodeKind::Text => 3,
            NodeKind::ProcessingInstruction => 7,
            NodeKind::Comment => 8,
            NodeKind::Document => 9,
            NodeKind::Namespace => 13,
        }
    }
}

/// A node handle. Equality and hashing must follow node identity.
pub trait XdmNode: Clone + Eq + Hash + Debug + 'static {
    fn kind(&self) -> NodeKind;

    /// Element and attribute names; processing instructions report their target as local name.
    fn name(&self) -> Option<QName>;
}

/// Read access to a tree.
///
/// Any call may answer [`Fetch::Pending`]. After the returned suspension resolves,
/// repeating the identical call must answer [`Fetch::Ready`]; the evaluator relies on
/// this to resume cursors by replaying their last step.
pub trait DomFacade<N> {
    /// Parent of a node; for attributes, the owning element.
    fn parent_node(&self, node: &N) -> Fetch<Option<N>>;
    fn first_child(&self, node: &N) -> Fetch<Option<N>>;
    fn last_child(&self, node: &N) -> Fetch<Option<N>>;
    fn next_sibling(&self, node: &N) -> Fetch<Option<N>>;
    fn previous_sibling(&self, node: &N) -> Fetch<Option<N>>;
    /// Value of the named attribute on an element.
    fn attribute(&self, element: &N, name: &ExpandedName) -> Fetch<Option<String>>;
    fn all_attributes(&self, element: &N) -> Fetch<Vec<N>>;
    /// Content of text, comment, processing-instruction and attribute nodes.
    fn data(&self, node: &N) -> Fetch<String>;
}

/// Structural writes used when applying pending updates and assembling constructed nodes.
pub trait DocumentWriter<N> {
    /// Inserts `node` as a child of `parent` before `reference`, or last when `reference` is `None`.
    /// A node that already has a parent is moved.
    fn insert_before(&self, parent: &N, node: &N, reference: Option<&N>) -> Result<(), Error>;
    fn remove_child(&self, parent: &N, node: &N) -> Result<(), Error>;
    fn set_attribute_ns(&self, element: &N, ns_uri: Option<&str>, qualified_name: &str, value: &str) -> Result<(), Error>;
    fn remove_attribute_ns(&self, element: &N, ns_uri: Option<&str>, local_name: &str) -> Result<(), Error>;
    /// Replaces the content of a text, comment, processing-instruction or attribute node.
    fn set_data(&self, node: &N, value: &str) -> Result<(), Error>;

    /// Target of `fn:put`. Writers that cannot store documents keep the default.
    fn put(&self, node: &N, uri: &str) -> Result<(), Error> {
        let _ = node;
        Err(Error::from_code(ErrorCode::FOUP0002, format!("cannot store a document at '{uri}'")))
    }
}

/// Creates detached nodes.
pub trait NodesFactory<N> {
    fn create_element_ns(&self, ns_uri: Option<&str>, qualified_name: &str) -> Result<N, Error>;
    fn create_attribute_ns(&self, ns_uri: Option<&str>, qualified_name: &str, value: &str) -> Result<N, Error>;
    fn create_text_node(&self, data: &str) -> Result<N, Error>;
    fn create_comment(&self, data: &str) -> Result<N, Error>;
    fn create_processing_instruction(&self, target: &str, data: &str) -> Result<N, Error>;

    fn create_document(&self) -> Result<N, Error> {
        Err(Error::from_code(ErrorCode::FOER0000, "this nodes factory cannot create document nodes"))
    }
}
