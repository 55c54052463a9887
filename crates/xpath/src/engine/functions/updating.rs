use super::common::{empty, node_arg, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use crate::update::PendingUpdate;
use crate::xdm::XdmSequence;

/// `fn:put($node, $uri)`: records a request to store the node; the document writer does the storing.
pub(super) fn put_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(node) = node_arg(&args[0], "put")? else { return empty() };
    if !matches!(node.kind(), NodeKind::Document | NodeKind::Element) {
        return Err(Error::from_code(ErrorCode::FOUP0001, "fn:put can only store document and element nodes"));
    }
    let uri = string_arg(&args[1]);
    if uri.is_empty() || uri.contains(char::is_whitespace) {
        return Err(Error::from_code(ErrorCode::FOUP0002, format!("'{uri}' is not a valid URI")));
    }
    cc.params.push_update(PendingUpdate::Put { node, uri });
    empty()
}
