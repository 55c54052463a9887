use super::common::{opt_atomic, ready, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{AtomicPayload, XdmSequence};

pub(super) fn error_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let code = match args.first().and_then(|a| opt_atomic(a)).map(|v| v.payload()) {
        Some(AtomicPayload::QName(q)) => q.expanded(),
        _ => ErrorCode::FOER0000.qname(),
    };
    let message = match args.get(1) {
        Some(desc) => string_arg(desc),
        None if args.is_empty() => "fn:error() was called".to_string(),
        None => format!("error raised by fn:error: {code}"),
    };
    Err(Error::new_qname(code, message))
}

pub(super) fn trace_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let label = args.get(1).map(|l| string_arg(l)).unwrap_or_default();
    let shown: Vec<String> = args[0]
        .iter()
        .map(|item| match item.as_atomic() {
            Some(a) => a.lexical(),
            None => format!("{item:?}"),
        })
        .collect();
    tracing::debug!(target: "arbor_xpath::trace", label = %label, debug = cc.params.debug, "{}", shown.join(" "));
    ready(args[0].clone())
}
