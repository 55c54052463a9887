//! Composite reads built from facade primitives.
//!
//! Each helper restarts from scratch when a facade call is pending; facades answer
//! repeated calls immediately once resolved, so a retry walks quickly to where it stopped.

use super::{DomFacade, NodeKind, XdmNode};
use crate::xdm::Fetch;

macro_rules! fetch {
    ($e:expr) => {
        match $e {
            Fetch::Ready(v) => v,
            Fetch::Pending(s) => return Fetch::Pending(s),
        }
    };
}

pub(crate) use fetch;

/// String value: own data for leaf kinds, concatenated descendant text for elements and documents.
pub fn string_value<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<String> {
    match node.kind() {
        NodeKind::Element | NodeKind::Document => {}
        _ => return facade.data(node),
    }
    let mut out = String::new();
    let mut next = fetch!(facade.first_child(node));
    let mut stack: Vec<N> = Vec::new();
    loop {
        match next {
            Some(n) => {
                match n.kind() {
                    NodeKind::Text => out.push_str(&fetch!(facade.data(&n))),
                    NodeKind::Element => {
                        let child = fetch!(facade.first_child(&n));
                        if child.is_some() {
                            stack.push(n);
                            next = child;
                            continue;
                        }
                    }
                    _ => {}
                }
                next = fetch!(facade.next_sibling(&n));
            }
            None => match stack.pop() {
                Some(parent) => next = fetch!(facade.next_sibling(&parent)),
                None => return Fetch::Ready(out),
            },
        }
    }
}

pub fn children<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Vec<N>> {
    let mut out = Vec::new();
    let mut cur = fetch!(facade.first_child(node));
    while let Some(c) = cur {
        cur = fetch!(facade.next_sibling(&c));
        out.push(c);
    }
    Fetch::Ready(out)
}

/// Ancestors from the parent upwards.
pub fn ancestors<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Vec<N>> {
    let mut out = Vec::new();
    let mut cur = fetch!(facade.parent_node(node));
    while let Some(p) = cur {
        cur = fetch!(facade.parent_node(&p));
        out.push(p);
    }
    Fetch::Ready(out)
}

pub fn root<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<N> {
    let mut cur = node.clone();
    while let Some(p) = fetch!(facade.parent_node(&cur)) {
        cur = p;
    }
    Fetch::Ready(cur)
}

/// Zero-based position among the parent's children (or attributes, for attribute nodes).
pub fn sibling_index<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N, parent: &N) -> Fetch<usize> {
    if node.kind() == NodeKind::Attribute {
        let attrs = fetch!(facade.all_attributes(parent));
        return Fetch::Ready(attrs.iter().position(|a| a == node).unwrap_or(0));
    }
    let mut index = 0;
    let mut cur = fetch!(facade.previous_sibling(node));
    while let Some(p) = cur {
        index += 1;
        cur = fetch!(facade.previous_sibling(&p));
    }
    Fetch::Ready(index)
}

/// Whether an attribute is an `xmlns` declaration rather than a real attribute. Trees
/// that carry declarations as attributes hide them from the attribute axis this way.
pub fn is_namespace_declaration<N: XdmNode>(attr: &N) -> bool {
    attr.name().is_some_and(|name| {
        name.ns_uri.as_deref() == Some(crate::consts::XMLNS_URI)
            || name.prefix.as_deref() == Some("xmlns")
            || (name.prefix.is_none() && name.local == "xmlns")
    })
}

/// Namespace bound to `prefix` (`None` for the default namespace) on `element` or its
/// ancestors. Bindings come from `xmlns` attributes and from the prefixes of element and
/// attribute names. `Some(None)` means the prefix is explicitly undeclared.
pub fn in_scope_namespace<N: XdmNode>(
    facade: &dyn DomFacade<N>,
    element: &N,
    prefix: Option<&str>,
) -> Fetch<Option<Option<String>>> {
    if prefix == Some("xml") {
        return Fetch::Ready(Some(Some(crate::consts::XML_URI.to_string())));
    }
    let mut cur = Some(element.clone());
    while let Some(node) = cur {
        if node.kind() == NodeKind::Element {
            for attr in fetch!(facade.all_attributes(&node)) {
                let Some(name) = attr.name() else { continue };
                let declares = match (name.prefix.as_deref(), prefix) {
                    (Some("xmlns"), Some(p)) => name.local == p,
                    (None, None) => name.local == "xmlns",
                    _ => false,
                };
                if declares {
                    let uri = fetch!(facade.data(&attr));
                    return Fetch::Ready(Some((!uri.is_empty()).then_some(uri)));
                }
                if prefix.is_some() && name.prefix.as_deref() == prefix && name.ns_uri.is_some() {
                    return Fetch::Ready(Some(name.ns_uri));
                }
            }
            if let Some(name) = node.name()
                && name.prefix.as_deref() == prefix
            {
                return Fetch::Ready(Some(name.ns_uri));
            }
        }
        cur = fetch!(facade.parent_node(&node));
    }
    Fetch::Ready(None)
}

/// All descendants in document order (attributes excluded).
pub fn descendants<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Vec<N>> {
    let mut out = Vec::new();
    let mut stack: Vec<N> = Vec::new();
    let mut next = fetch!(facade.first_child(node));
    loop {
        match next {
            Some(n) => {
                out.push(n.clone());
                let child = fetch!(facade.first_child(&n));
                if child.is_some() {
                    stack.push(n);
                    next = child;
                } else {
                    next = fetch!(facade.next_sibling(&n));
                }
            }
            None => match stack.pop() {
                Some(parent) => next = fetch!(facade.next_sibling(&parent)),
                None => return Fetch::Ready(out),
            },
        }
    }
}
