//! Element, attribute, text, comment, processing-instruction and document constructors.
//!
//! Content is read into a [`Snapshot`] first, which only needs the facade and can be
//! retried freely. New nodes are built from the snapshot in one go, so a suspension
//! never leaves half-built nodes behind.

use super::{EResult, Operand, missing_factory};
use crate::compiler::{Expression, NameSource};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::traverse::{self, fetch};
use crate::model::{DocumentWriter, DomFacade, NodeKind, NodesFactory, XdmNode};
use crate::types::lexical::{is_ncname, is_qname};
use crate::types::{AtomicType, atomize};
use crate::xdm::{AtomicPayload, Fetch, QName, XdmItem, XdmSequenceStream, ready_or_pending};
use itertools::Itertools;
use std::collections::HashSet;
use std::rc::Rc;

/// A detached copy of a subtree, read through the facade.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Snapshot {
    Element { name: QName, attributes: Vec<(QName, String)>, children: Vec<Snapshot> },
    Attribute(QName, String),
    Text(String),
    Comment(String),
    Pi { target: String, data: String },
    Document(Vec<Snapshot>),
}

fn node_name<N: XdmNode>(node: &N) -> QName {
    node.name().unwrap_or_else(|| QName::local(""))
}

pub(crate) fn snapshot<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Snapshot> {
    match node.kind() {
        NodeKind::Element => {
            let mut attributes = Vec::new();
            for attr in fetch!(facade.all_attributes(node)) {
                attributes.push((node_name(&attr), fetch!(facade.data(&attr))));
            }
            let mut children = Vec::new();
            for child in fetch!(traverse::children(facade, node)) {
                children.push(fetch!(snapshot(facade, &child)));
            }
            Fetch::Ready(Snapshot::Element { name: node_name(node), attributes, children })
        }
        NodeKind::Document => {
            let mut children = Vec::new();
            for child in fetch!(traverse::children(facade, node)) {
                children.push(fetch!(snapshot(facade, &child)));
            }
            Fetch::Ready(Snapshot::Document(children))
        }
        NodeKind::Attribute => Fetch::Ready(Snapshot::Attribute(node_name(node), fetch!(facade.data(node)))),
        NodeKind::Comment => Fetch::Ready(Snapshot::Comment(fetch!(facade.data(node)))),
        NodeKind::ProcessingInstruction => {
            Fetch::Ready(Snapshot::Pi { target: node_name(node).local, data: fetch!(facade.data(node)) })
        }
        NodeKind::Text | NodeKind::Namespace => Fetch::Ready(Snapshot::Text(fetch!(facade.data(node)))),
    }
}

/// Creates the nodes described by a snapshot.
pub(crate) fn build<N: XdmNode>(
    snapshot: &Snapshot,
    factory: &dyn NodesFactory<N>,
    writer: &dyn DocumentWriter<N>,
) -> EResult<N> {
    match snapshot {
        Snapshot::Element { name, attributes, children } => {
            let element = factory.create_element_ns(name.ns_uri.as_deref(), &name.lexical())?;
            for (attr, value) in attributes {
                writer.set_attribute_ns(&element, attr.ns_uri.as_deref(), &attr.lexical(), value)?;
            }
            append_children(&element, children, factory, writer)?;
            Ok(element)
        }
        Snapshot::Document(children) => {
            let document = factory.create_document()?;
            append_children(&document, children, factory, writer)?;
            Ok(document)
        }
        Snapshot::Attribute(name, value) => factory.create_attribute_ns(name.ns_uri.as_deref(), &name.lexical(), value),
        Snapshot::Text(text) => factory.create_text_node(text),
        Snapshot::Comment(text) => factory.create_comment(text),
        Snapshot::Pi { target, data } => factory.create_processing_instruction(target, data),
    }
}

fn append_children<N: XdmNode>(
    parent: &N,
    children: &[Snapshot],
    factory: &dyn NodesFactory<N>,
    writer: &dyn DocumentWriter<N>,
) -> EResult<()> {
    for child in children {
        if matches!(child, Snapshot::Text(t) if t.is_empty()) {
            continue;
        }
        let node = build(child, factory, writer)?;
        writer.insert_before(parent, &node, None)?;
    }
    Ok(())
}

/// Joins adjacent text pieces and drops empty ones.
fn merge_texts(pieces: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut out: Vec<Snapshot> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let Snapshot::Text(t) = &piece {
            if t.is_empty() {
                continue;
            }
            if let Some(Snapshot::Text(prev)) = out.last_mut() {
                prev.push_str(t);
                continue;
            }
        }
        out.push(piece);
    }
    out
}

fn flatten_arrays<N: Clone>(item: &XdmItem<N>, out: &mut Vec<XdmItem<N>>) {
    match item {
        XdmItem::Array(array) => array.members().iter().flatten().for_each(|m| flatten_arrays(m, out)),
        other => out.push(other.clone()),
    }
}

/// Turns evaluated content into snapshot pieces: adjacent atomics of one enclosed
/// expression become a single space-separated text, documents contribute their children.
fn gather<N: XdmNode>(parts: &[Operand<N>], facade: &dyn DomFacade<N>) -> EResult<Fetch<Vec<Snapshot>>> {
    let mut out = Vec::new();
    let mut seen_content = false;
    for part in parts {
        let mut items = Vec::new();
        part.items().iter().for_each(|i| flatten_arrays(i, &mut items));
        let mut atoms: Vec<String> = Vec::new();
        for item in &items {
            let node = match item {
                XdmItem::Atomic(a) => {
                    atoms.push(a.lexical());
                    continue;
                }
                XdmItem::Node(n) => n,
                other => {
                    return Err(Error::from_code(
                        ErrorCode::XQTY0105,
                        format!("{other:?} cannot be used as node content"),
                    ));
                }
            };
            if !atoms.is_empty() {
                out.push(Snapshot::Text(atoms.drain(..).join(" ")));
                seen_content = true;
            }
            match node.kind() {
                NodeKind::Attribute if seen_content => {
                    return Err(Error::from_code(
                        ErrorCode::XQTY0024,
                        "attribute nodes must come before any other element content",
                    ));
                }
                NodeKind::Document => {
                    if let Snapshot::Document(children) = ready_or_pending!(snapshot(facade, node)) {
                        out.extend(children);
                    }
                    seen_content = true;
                }
                kind => {
                    out.push(ready_or_pending!(snapshot(facade, node)));
                    seen_content |= kind != NodeKind::Attribute;
                }
            }
        }
        if !atoms.is_empty() {
            out.push(Snapshot::Text(atoms.join(" ")));
            seen_content = true;
        }
    }
    Ok(Fetch::Ready(merge_texts(out)))
}

fn tools<N: XdmNode>(
    params: &ExecutionParameters<N>,
) -> EResult<(Rc<dyn NodesFactory<N>>, Rc<dyn DocumentWriter<N>>)> {
    match (&params.factory, &params.writer) {
        (Some(f), Some(w)) => Ok((Rc::clone(f), Rc::clone(w))),
        _ => Err(missing_factory()),
    }
}

fn factory<N: XdmNode>(params: &ExecutionParameters<N>) -> EResult<Rc<dyn NodesFactory<N>>> {
    params.factory.clone().ok_or_else(missing_factory)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameRole {
    Element,
    Attribute,
    Target,
}

fn check_name(name: QName, role: NameRole) -> EResult<QName> {
    match role {
        NameRole::Target if name.local.eq_ignore_ascii_case("xml") => Err(Error::from_code(
            ErrorCode::XQDY0064,
            "a processing instruction cannot be named 'xml'",
        )),
        NameRole::Attribute
            if name.lexical() == "xmlns"
                || name.prefix.as_deref() == Some("xmlns")
                || name.ns_uri.as_deref() == Some(crate::consts::XMLNS_URI) =>
        {
            Err(Error::from_code(ErrorCode::XQDY0044, format!("'{name}' is not a valid attribute name")))
        }
        _ => Ok(name),
    }
}

/// A constructor name, fixed or still to be computed.
pub(crate) enum NameOperand<N> {
    Static(QName),
    Computed(Operand<N>),
}

impl<N: XdmNode> NameOperand<N> {
    fn new(source: &NameSource, ctx: &DynamicContext<N>, params: &ExecutionParameters<N>) -> EResult<Self> {
        Ok(match source {
            NameSource::Static(q) => NameOperand::Static(q.clone()),
            NameSource::Computed(e) => NameOperand::Computed(Operand::new(e, ctx, params)?),
        })
    }

    pub(crate) fn resolve(&mut self, params: &ExecutionParameters<N>, role: NameRole) -> EResult<Fetch<QName>> {
        let op = match self {
            NameOperand::Static(q) => return check_name(q.clone(), role).map(Fetch::Ready),
            NameOperand::Computed(op) => op,
        };
        ready_or_pending!(op.poll()?);
        let mut values = ready_or_pending!(atomize(&*params.facade, op.items())?);
        if values.len() != 1 {
            return Err(Error::from_code(ErrorCode::XPTY0004, "a computed name must be a single atomic value"));
        }
        let value = values.remove(0);
        let ty = value.ty();
        let lexical = match value.payload() {
            AtomicPayload::QName(q) if role != NameRole::Target => return check_name(q.clone(), role).map(Fetch::Ready),
            AtomicPayload::String(s) if ty.is_subtype_of(AtomicType::String) || ty == AtomicType::UntypedAtomic => {
                s.trim().to_string()
            }
            _ => {
                return Err(Error::from_code(ErrorCode::XPTY0004, format!("a computed name cannot be of type {ty}")));
            }
        };
        let name = if role == NameRole::Target {
            if !is_ncname(&lexical) {
                return Err(Error::from_code(ErrorCode::XQDY0041, format!("'{lexical}' is not a valid target name")));
            }
            QName::local(&lexical)
        } else {
            parse_computed_name(&lexical, role, params)?
        };
        check_name(name, role).map(Fetch::Ready)
    }
}

fn parse_computed_name<N: XdmNode>(lexical: &str, role: NameRole, params: &ExecutionParameters<N>) -> EResult<QName> {
    if !is_qname(lexical) {
        return Err(Error::from_code(ErrorCode::XQDY0074, format!("'{lexical}' is not a valid QName")));
    }
    match lexical.split_once(':') {
        Some((prefix, local)) => match params.resolve_prefix(prefix) {
            Some(uri) => Ok(QName::new(Some(prefix), Some(&uri), local)),
            None => Err(Error::from_code(ErrorCode::XQDY0074, format!("prefix '{prefix}' is not bound"))),
        },
        None if role == NameRole::Element => {
            Ok(QName::new(None, params.static_ctx.default_element_namespace.as_deref(), lexical))
        }
        None => Ok(QName::local(lexical)),
    }
}

/// Atomized content joined with single spaces; `None` for an empty sequence.
fn content_text<N: XdmNode>(op: &Operand<N>, params: &ExecutionParameters<N>) -> EResult<Fetch<Option<String>>> {
    let values = ready_or_pending!(atomize(&*params.facade, op.items())?);
    if values.is_empty() {
        return Ok(Fetch::Ready(None));
    }
    Ok(Fetch::Ready(Some(values.iter().map(|v| v.lexical()).join(" "))))
}

pub(crate) fn element<N: XdmNode>(
    name: &NameSource,
    attributes: &[Rc<Expression>],
    content: &[Rc<Expression>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut name = NameOperand::new(name, ctx, params)?;
    let mut parts =
        attributes.iter().chain(content).map(|e| Operand::new(e, ctx, params)).collect::<EResult<Vec<_>>>()?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let (factory, writer) = tools(&params)?;
        let qname = ready_or_pending!(name.resolve(&params, NameRole::Element)?);
        for part in parts.iter_mut() {
            ready_or_pending!(part.poll()?);
        }
        let pieces = ready_or_pending!(gather(&parts, &*params.facade)?);
        let element = factory.create_element_ns(qname.ns_uri.as_deref(), &qname.lexical())?;
        let mut seen = HashSet::new();
        for piece in &pieces {
            match piece {
                Snapshot::Attribute(attr, value) => {
                    if !seen.insert(attr.expanded()) {
                        return Err(Error::from_code(
                            ErrorCode::XQDY0025,
                            format!("attribute {attr} appears twice on element {qname}"),
                        ));
                    }
                    writer.set_attribute_ns(&element, attr.ns_uri.as_deref(), &attr.lexical(), value)?;
                }
                other => {
                    let child = build(other, &*factory, &*writer)?;
                    writer.insert_before(&element, &child, None)?;
                }
            }
        }
        Ok(Fetch::Ready(vec![XdmItem::Node(element)]))
    }))
}

/// Direct attribute values concatenate their parts; a computed attribute has one part.
pub(crate) fn attribute<N: XdmNode>(
    name: &NameSource,
    value: &[Rc<Expression>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut name = NameOperand::new(name, ctx, params)?;
    let mut parts = value.iter().map(|e| Operand::new(e, ctx, params)).collect::<EResult<Vec<_>>>()?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let factory = factory(&params)?;
        let qname = ready_or_pending!(name.resolve(&params, NameRole::Attribute)?);
        let mut text = String::new();
        for part in parts.iter_mut() {
            ready_or_pending!(part.poll()?);
            text.push_str(&ready_or_pending!(content_text(part, &params)?).unwrap_or_default());
        }
        let attr = factory.create_attribute_ns(qname.ns_uri.as_deref(), &qname.lexical(), &text)?;
        Ok(Fetch::Ready(vec![XdmItem::Node(attr)]))
    }))
}

pub(crate) fn text<N: XdmNode>(
    content: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(content, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let factory = factory(&params)?;
        ready_or_pending!(op.poll()?);
        match ready_or_pending!(content_text(&op, &params)?) {
            Some(text) => Ok(Fetch::Ready(vec![XdmItem::Node(factory.create_text_node(&text)?)])),
            None => Ok(Fetch::Ready(Vec::new())),
        }
    }))
}

fn check_comment(text: &str) -> EResult<()> {
    if text.contains("--") || text.ends_with('-') {
        return Err(Error::from_code(
            ErrorCode::XQDY0072,
            "a comment cannot contain '--' or end with '-'",
        ));
    }
    Ok(())
}

pub(crate) fn comment<N: XdmNode>(
    content: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(content, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let factory = factory(&params)?;
        ready_or_pending!(op.poll()?);
        let text = ready_or_pending!(content_text(&op, &params)?).unwrap_or_default();
        check_comment(&text)?;
        Ok(Fetch::Ready(vec![XdmItem::Node(factory.create_comment(&text)?)]))
    }))
}

fn pi_data(text: &str) -> EResult<&str> {
    if text.contains("?>") {
        return Err(Error::from_code(
            ErrorCode::XQDY0026,
            "processing instruction content cannot contain '?>'",
        ));
    }
    Ok(text.trim_start())
}

pub(crate) fn processing_instruction<N: XdmNode>(
    target: &NameSource,
    content: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = NameOperand::new(target, ctx, params)?;
    let mut op = Operand::new(content, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let factory = factory(&params)?;
        let target = ready_or_pending!(target.resolve(&params, NameRole::Target)?);
        ready_or_pending!(op.poll()?);
        let text = ready_or_pending!(content_text(&op, &params)?).unwrap_or_default();
        let pi = factory.create_processing_instruction(&target.local, pi_data(&text)?)?;
        Ok(Fetch::Ready(vec![XdmItem::Node(pi)]))
    }))
}

pub(crate) fn document<N: XdmNode>(
    content: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut parts = vec![Operand::new(content, ctx, params)?];
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let (factory, writer) = tools(&params)?;
        for part in parts.iter_mut() {
            ready_or_pending!(part.poll()?);
        }
        let pieces = ready_or_pending!(gather(&parts, &*params.facade)?);
        if pieces.iter().any(|p| matches!(p, Snapshot::Attribute(..))) {
            return Err(Error::from_code(ErrorCode::XPTY0004, "a document node cannot contain attributes"));
        }
        let document = build(&Snapshot::Document(pieces), &*factory, &*writer)?;
        Ok(Fetch::Ready(vec![XdmItem::Node(document)]))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_texts_merge_and_empty_texts_vanish() {
        let merged = merge_texts(vec![
            Snapshot::Text("a".into()),
            Snapshot::Text(String::new()),
            Snapshot::Text("b".into()),
            Snapshot::Comment("c".into()),
            Snapshot::Text("d".into()),
        ]);
        assert_eq!(
            merged,
            vec![Snapshot::Text("ab".into()), Snapshot::Comment("c".into()), Snapshot::Text("d".into())]
        );
    }

    #[test]
    fn comment_and_pi_content_rules() {
        assert!(check_comment("fine - text").is_ok());
        assert!(check_comment("a--b").unwrap_err().is(ErrorCode::XQDY0072));
        assert!(check_comment("trailing-").unwrap_err().is(ErrorCode::XQDY0072));
        assert_eq!(pi_data("   data").unwrap(), "data");
        assert!(pi_data("a?>b").unwrap_err().is(ErrorCode::XQDY0026));
    }

    #[test]
    fn reserved_names_are_rejected() {
        assert!(check_name(QName::local("XML"), NameRole::Target).unwrap_err().is(ErrorCode::XQDY0064));
        assert!(check_name(QName::local("xmlns"), NameRole::Attribute).unwrap_err().is(ErrorCode::XQDY0044));
        assert!(check_name(QName::local("xmlns"), NameRole::Element).is_ok());
    }
}
