//! Evaluation of `insert`, `delete`, `replace` and `rename`.
//!
//! Each expression checks its target, copies its content and records the resulting
//! primitive in the evaluation's pending update list. The value of an updating
//! expression is always the empty sequence.

use super::PendingUpdate;
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::evaluator::constructors::{NameOperand, NameRole, Snapshot, build, snapshot};
use crate::engine::evaluator::{EResult, Operand, missing_factory};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode, traverse};
use crate::parser::ast::InsertPosition;
use crate::types::atomize;
use crate::xdm::{Fetch, QName, XdmItem, XdmSequenceStream, ready_or_pending};
use itertools::Itertools;
use std::rc::Rc;

/// Insertion content after reading, before any node is created.
enum Piece<N> {
    Text(String),
    Original(N),
    Copy(Snapshot),
}

impl<N: XdmNode> Piece<N> {
    fn attribute_name(&self) -> Option<QName> {
        match self {
            Piece::Original(n) if n.kind() == NodeKind::Attribute => n.name(),
            Piece::Copy(Snapshot::Attribute(name, _)) => Some(name.clone()),
            _ => None,
        }
    }
}

/// Content split into attributes and everything else.
struct Content<N> {
    attributes: Vec<N>,
    nodes: Vec<N>,
}

/// Reads content items. Adjacent atomic values become one space-separated text, documents
/// contribute their children and arrays their members. Nodes are copied whenever the
/// parameters can build trees; otherwise the originals are inserted.
fn read_content<N: XdmNode>(items: &[XdmItem<N>], params: &ExecutionParameters<N>) -> EResult<Fetch<Vec<Piece<N>>>> {
    let facade = &*params.facade;
    let copying = params.factory.is_some() && params.writer.is_some();
    let mut flat = Vec::with_capacity(items.len());
    flatten(items, &mut flat);

    let mut pieces = Vec::new();
    let mut atoms: Vec<String> = Vec::new();
    let mut seen_content = false;
    for item in flat {
        let node = match item {
            XdmItem::Atomic(a) => {
                atoms.push(a.lexical());
                continue;
            }
            XdmItem::Node(n) => n,
            other => {
                return Err(Error::from_code(
                    ErrorCode::XQTY0105,
                    format!("{other:?} cannot be inserted into a tree"),
                ));
            }
        };
        if !atoms.is_empty() {
            pieces.push(Piece::Text(atoms.drain(..).join(" ")));
            seen_content = true;
        }
        let nodes = match node.kind() {
            NodeKind::Document => ready_or_pending!(traverse::children(facade, &node)),
            _ => vec![node],
        };
        for node in nodes {
            let is_attribute = node.kind() == NodeKind::Attribute;
            if is_attribute && seen_content {
                return Err(Error::from_code(
                    ErrorCode::XUTY0004,
                    "attribute nodes must come before any other inserted content",
                ));
            }
            seen_content |= !is_attribute;
            pieces.push(if copying { Piece::Copy(ready_or_pending!(snapshot(facade, &node))) } else { Piece::Original(node) });
        }
    }
    if !atoms.is_empty() {
        pieces.push(Piece::Text(atoms.join(" ")));
    }
    Ok(Fetch::Ready(pieces))
}

fn flatten<N: Clone>(items: &[XdmItem<N>], out: &mut Vec<XdmItem<N>>) {
    for item in items {
        match item {
            XdmItem::Array(array) => array.members().iter().for_each(|m| flatten(m, out)),
            other => out.push(other.clone()),
        }
    }
}

/// Creates the content nodes. Runs once all reads are done.
fn materialize<N: XdmNode>(pieces: Vec<Piece<N>>, params: &ExecutionParameters<N>) -> EResult<Content<N>> {
    let mut content = Content { attributes: Vec::new(), nodes: Vec::new() };
    for piece in pieces {
        let node = match piece {
            Piece::Text(t) if t.is_empty() => continue,
            Piece::Text(t) => params.factory.as_ref().ok_or_else(missing_factory)?.create_text_node(&t)?,
            Piece::Original(n) => n,
            Piece::Copy(snap) => match (&params.factory, &params.writer) {
                (Some(factory), Some(writer)) => build(&snap, &**factory, &**writer)?,
                _ => return Err(missing_factory()),
            },
        };
        if node.kind() == NodeKind::Attribute {
            content.attributes.push(node);
        } else {
            content.nodes.push(node);
        }
    }
    Ok(content)
}

/// The single node an updating expression targets.
fn single_target<N: XdmNode>(items: &[XdmItem<N>], code: ErrorCode, what: &str) -> EResult<N> {
    match items {
        [XdmItem::Node(n)] => Ok(n.clone()),
        _ => Err(Error::from_code(code, format!("the target of {what} must be a single node"))),
    }
}

/// Prefixes of new attributes must not clash with the element's in-scope namespaces.
fn check_namespaces<N: XdmNode>(
    params: &ExecutionParameters<N>,
    element: &N,
    names: &[QName],
) -> EResult<Fetch<()>> {
    for name in names {
        let (Some(prefix), Some(uri)) = (&name.prefix, &name.ns_uri) else { continue };
        let bound = ready_or_pending!(traverse::in_scope_namespace(&*params.facade, element, Some(prefix)));
        if let Some(Some(existing)) = bound
            && existing != *uri
        {
            return Err(Error::from_code(
                ErrorCode::XUDY0023,
                format!("prefix '{prefix}' is already bound to '{existing}'"),
            ));
        }
    }
    Ok(Fetch::Ready(()))
}

pub(crate) fn insert<N: XdmNode>(
    source: &Rc<Expression>,
    position: InsertPosition,
    target: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut source = Operand::new(source, ctx, params)?;
    let mut target = Operand::new(target, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(source.poll()?);
        ready_or_pending!(target.poll()?);
        let into = matches!(position, InsertPosition::Into | InsertPosition::AsFirst | InsertPosition::AsLast);
        let node = if into {
            let node = single_target(target.items(), ErrorCode::XUTY0005, "insert into")?;
            if !matches!(node.kind(), NodeKind::Element | NodeKind::Document) {
                return Err(Error::from_code(ErrorCode::XUTY0005, "insert into needs an element or document target"));
            }
            node
        } else {
            let node = single_target(target.items(), ErrorCode::XUTY0006, "insert before/after")?;
            if matches!(node.kind(), NodeKind::Attribute | NodeKind::Document | NodeKind::Namespace) {
                return Err(Error::from_code(
                    ErrorCode::XUTY0006,
                    "insert before/after needs an element, text, comment or processing-instruction target",
                ));
            }
            node
        };
        let parent = if into {
            None
        } else {
            let parent = ready_or_pending!(params.facade.parent_node(&node));
            Some(parent.ok_or_else(|| {
                Error::from_code(ErrorCode::XUDY0029, "the target of insert before/after has no parent")
            })?)
        };
        let pieces = ready_or_pending!(read_content(source.items(), &params)?);
        let attribute_names: Vec<QName> = pieces.iter().filter_map(Piece::attribute_name).collect();
        let owner = parent.clone().unwrap_or_else(|| node.clone());
        if !attribute_names.is_empty() {
            match owner.kind() {
                NodeKind::Element => ready_or_pending!(check_namespaces(&params, &owner, &attribute_names)?),
                _ if into => {
                    return Err(Error::from_code(ErrorCode::XUTY0022, "attributes cannot be inserted into a document"));
                }
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0030,
                        "attributes cannot be inserted next to a child of a document",
                    ));
                }
            }
        }

        let Content { attributes, nodes } = materialize(pieces, &params)?;
        if !attributes.is_empty() {
            params.push_update(PendingUpdate::InsertAttributes { target: owner, attributes });
        }
        if !nodes.is_empty() {
            let update = match position {
                InsertPosition::Into => PendingUpdate::InsertInto { target: node, content: nodes },
                InsertPosition::AsFirst => PendingUpdate::InsertIntoAsFirst { target: node, content: nodes },
                InsertPosition::AsLast => PendingUpdate::InsertIntoAsLast { target: node, content: nodes },
                InsertPosition::Before => PendingUpdate::InsertBefore { target: node, content: nodes },
                InsertPosition::After => PendingUpdate::InsertAfter { target: node, content: nodes },
            };
            params.push_update(update);
        }
        Ok(Fetch::Ready(Vec::new()))
    }))
}

/// Nodes without a parent are skipped.
pub(crate) fn delete<N: XdmNode>(
    target: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = Operand::new(target, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(target.poll()?);
        let mut doomed = Vec::with_capacity(target.items().len());
        for item in target.items() {
            let XdmItem::Node(node) = item else {
                return Err(Error::from_code(ErrorCode::XUTY0007, "delete expects a sequence of nodes"));
            };
            if ready_or_pending!(params.facade.parent_node(node)).is_some() {
                doomed.push(node.clone());
            }
        }
        for node in doomed {
            params.push_update(PendingUpdate::Delete { target: node });
        }
        Ok(Fetch::Ready(Vec::new()))
    }))
}

fn replace_target<N: XdmNode>(items: &[XdmItem<N>]) -> EResult<N> {
    let node = single_target(items, ErrorCode::XUTY0008, "replace")?;
    if matches!(node.kind(), NodeKind::Document | NodeKind::Namespace) {
        return Err(Error::from_code(ErrorCode::XUTY0008, "a document node cannot be replaced"));
    }
    Ok(node)
}

pub(crate) fn replace_node<N: XdmNode>(
    target: &Rc<Expression>,
    replacement: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = Operand::new(target, ctx, params)?;
    let mut replacement = Operand::new(replacement, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(target.poll()?);
        ready_or_pending!(replacement.poll()?);
        let node = replace_target(target.items())?;
        let parent = ready_or_pending!(params.facade.parent_node(&node))
            .ok_or_else(|| Error::from_code(ErrorCode::XUDY0009, "the target of replace has no parent"))?;
        let pieces = ready_or_pending!(read_content(replacement.items(), &params)?);
        let attribute_names: Vec<QName> = pieces.iter().filter_map(Piece::attribute_name).collect();
        let as_attribute = node.kind() == NodeKind::Attribute;
        if as_attribute {
            if attribute_names.len() != pieces.len() {
                return Err(Error::from_code(
                    ErrorCode::XUTY0011,
                    "an attribute can only be replaced by attributes",
                ));
            }
            ready_or_pending!(check_namespaces(&params, &parent, &attribute_names)?);
        } else if !attribute_names.is_empty() {
            return Err(Error::from_code(ErrorCode::XUTY0010, "only an attribute can be replaced by attributes"));
        }
        let Content { attributes, nodes } = materialize(pieces, &params)?;
        let replacement = if as_attribute { attributes } else { nodes };
        params.push_update(PendingUpdate::ReplaceNode { target: node, replacement });
        Ok(Fetch::Ready(Vec::new()))
    }))
}

pub(crate) fn replace_value<N: XdmNode>(
    target: &Rc<Expression>,
    value: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = Operand::new(target, ctx, params)?;
    let mut value = Operand::new(value, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(target.poll()?);
        ready_or_pending!(value.poll()?);
        let node = replace_target(target.items())?;
        let text = ready_or_pending!(atomize(&*params.facade, value.items())?).iter().map(|v| v.lexical()).join(" ");
        let update = match node.kind() {
            NodeKind::Element => {
                let text = if text.is_empty() {
                    None
                } else {
                    Some(params.factory.as_ref().ok_or_else(missing_factory)?.create_text_node(&text)?)
                };
                PendingUpdate::ReplaceElementContent { target: node, text }
            }
            NodeKind::Comment if text.contains("--") || text.ends_with('-') => {
                return Err(Error::from_code(ErrorCode::XQDY0072, "a comment cannot contain '--' or end with '-'"));
            }
            NodeKind::ProcessingInstruction if text.contains("?>") => {
                return Err(Error::from_code(
                    ErrorCode::XQDY0026,
                    "processing instruction content cannot contain '?>'",
                ));
            }
            _ => PendingUpdate::ReplaceValue { target: node, value: text },
        };
        params.push_update(update);
        Ok(Fetch::Ready(Vec::new()))
    }))
}

pub(crate) fn rename<N: XdmNode>(
    target: &Rc<Expression>,
    name: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = Operand::new(target, ctx, params)?;
    let mut name = NameOperand::Computed(Operand::new(name, ctx, params)?);
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(target.poll()?);
        let node = single_target(target.items(), ErrorCode::XUTY0012, "rename")?;
        let role = match node.kind() {
            NodeKind::Element => NameRole::Element,
            NodeKind::Attribute => NameRole::Attribute,
            NodeKind::ProcessingInstruction => NameRole::Target,
            _ => {
                return Err(Error::from_code(
                    ErrorCode::XUTY0012,
                    "only elements, attributes and processing instructions can be renamed",
                ));
            }
        };
        let new_name = ready_or_pending!(name.resolve(&params, role)?);
        match role {
            NameRole::Element => ready_or_pending!(check_namespaces(&params, &node, std::slice::from_ref(&new_name))?),
            NameRole::Attribute => {
                if let Some(owner) = ready_or_pending!(params.facade.parent_node(&node)) {
                    ready_or_pending!(check_namespaces(&params, &owner, std::slice::from_ref(&new_name))?);
                }
            }
            NameRole::Target => {}
        }
        params.push_update(PendingUpdate::Rename { target: node, name: new_name });
        Ok(Fetch::Ready(Vec::new()))
    }))
}
