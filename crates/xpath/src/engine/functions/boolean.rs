use super::common::{arg_or_context, atomized, boolean, context_item, empty, item_string, node_arg, ready, string};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode, traverse};
use crate::types::effective_boolean_value;
use crate::xdm::{AtomicValue, QName, XdmItem, XdmSequence, ready_or_pending};

pub(super) fn fn_true<N: XdmNode>(_cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(true)
}

pub(super) fn fn_false<N: XdmNode>(_cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(false)
}

pub(super) fn fn_boolean<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(effective_boolean_value(&args[0])?)
}

pub(super) fn fn_not<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(!effective_boolean_value(&args[0])?)
}

pub(super) fn data_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let items = arg_or_context(cc, args)?;
    let values = ready_or_pending!(atomized(cc, &items)?);
    ready(values.into_iter().map(XdmItem::Atomic).collect())
}

pub(super) fn string_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let items = arg_or_context(cc, args)?;
    if items.len() > 1 {
        return Err(Error::from_code(ErrorCode::XPTY0004, "fn:string expects at most one item"));
    }
    string(ready_or_pending!(item_string(cc, &items)?))
}

pub(super) fn position_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    context_item(cc)?;
    super::common::integer(cc.dyn_ctx.position as i128)
}

pub(super) fn last_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    context_item(cc)?;
    super::common::integer(cc.dyn_ctx.size as i128)
}

/// The node argument, defaulting to the context item, which must then be a node.
fn subject_node<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>], function: &str) -> Result<Option<N>, Error> {
    match args.first() {
        Some(arg) => node_arg(arg, function),
        None => match context_item(cc)? {
            XdmItem::Node(n) => Ok(Some(n.clone())),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("fn:{function}: the context item is not a node"))),
        },
    }
}

fn node_qname<N: XdmNode>(node: &N) -> Option<QName> {
    match node.kind() {
        NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction | NodeKind::Namespace => node.name(),
        _ => None,
    }
}

pub(super) fn node_name_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = subject_node(cc, args, "node-name")?.as_ref().and_then(node_qname);
    super::common::optional(name.map(AtomicValue::qname))
}

pub(super) fn name_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = subject_node(cc, args, "name")?.as_ref().and_then(node_qname);
    string(name.map(|q| q.lexical()).unwrap_or_default())
}

pub(super) fn local_name_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = subject_node(cc, args, "local-name")?.as_ref().and_then(node_qname);
    string(name.map(|q| q.local).unwrap_or_default())
}

pub(super) fn namespace_uri_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let ns = subject_node(cc, args, "namespace-uri")?
        .filter(|n| matches!(n.kind(), NodeKind::Element | NodeKind::Attribute))
        .and_then(|n| n.name())
        .and_then(|q| q.ns_uri);
    super::common::atomic(AtomicValue::any_uri(ns.unwrap_or_default()))
}

pub(super) fn root_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(node) = subject_node(cc, args, "root")? else { return empty() };
    let root = ready_or_pending!(traverse::root(&*cc.params.facade, &node));
    ready(vec![XdmItem::Node(root)])
}

pub(super) fn has_children_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(node) = subject_node(cc, args, "has-children")? else { return boolean(false) };
    let child = ready_or_pending!(cc.params.facade.first_child(&node));
    boolean(child.is_some())
}
