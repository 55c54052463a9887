use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::atomize;
use crate::xdm::{AtomicValue, Fetch, XdmItem, XdmSequence, ready_or_pending};

pub(super) const CODEPOINT_COLLATION: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";

pub(super) fn ready<N>(items: XdmSequence<N>) -> FnResult<N> {
    Ok(Fetch::Ready(items))
}

pub(super) fn empty<N>() -> FnResult<N> {
    ready(Vec::new())
}

pub(super) fn atomic<N>(value: AtomicValue) -> FnResult<N> {
    ready(vec![XdmItem::Atomic(value)])
}

pub(super) fn optional<N>(value: Option<AtomicValue>) -> FnResult<N> {
    ready(value.map(XdmItem::Atomic).into_iter().collect())
}

pub(super) fn boolean<N>(b: bool) -> FnResult<N> {
    atomic(AtomicValue::boolean(b))
}

pub(super) fn string<N>(s: impl Into<compact_str::CompactString>) -> FnResult<N> {
    atomic(AtomicValue::string(s))
}

pub(super) fn integer<N>(i: i128) -> FnResult<N> {
    atomic(AtomicValue::big_integer(i))
}

/// First atomic value of an already coerced argument.
pub(super) fn opt_atomic<N>(arg: &[XdmItem<N>]) -> Option<&AtomicValue> {
    arg.first().and_then(XdmItem::as_atomic)
}

/// `xs:string?` argument; the empty sequence reads as the zero-length string.
pub(super) fn string_arg<N>(arg: &[XdmItem<N>]) -> String {
    opt_atomic(arg).map(AtomicValue::lexical).unwrap_or_default()
}

pub(super) fn integer_arg<N>(arg: &[XdmItem<N>]) -> Option<i128> {
    opt_atomic(arg).and_then(AtomicValue::to_i128)
}

pub(super) fn double_arg<N>(arg: &[XdmItem<N>]) -> f64 {
    opt_atomic(arg).and_then(AtomicValue::to_f64).unwrap_or(f64::NAN)
}

pub(super) fn context_item<'a, N: XdmNode>(cc: &'a CallCtx<'_, N>) -> Result<&'a XdmItem<N>, Error> {
    cc.dyn_ctx.item.as_ref().ok_or_else(crate::engine::evaluator::no_context)
}

/// The argument, or the context item when the function was called without it.
pub(super) fn arg_or_context<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error> {
    match args.first() {
        Some(arg) => Ok(arg.clone()),
        None => Ok(vec![context_item(cc)?.clone()]),
    }
}

/// A single optional node argument; non-nodes raise `XPTY0004`.
pub(super) fn node_arg<N: XdmNode>(arg: &[XdmItem<N>], function: &str) -> Result<Option<N>, Error> {
    match arg {
        [] => Ok(None),
        [XdmItem::Node(n)] => Ok(Some(n.clone())),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("fn:{function} expects a single node"))),
    }
}

/// Atomized values of an argument declared as `item()*`.
pub(super) fn atomized<N: XdmNode>(cc: &CallCtx<'_, N>, arg: &[XdmItem<N>]) -> Result<Fetch<Vec<AtomicValue>>, Error> {
    atomize(&*cc.params.facade, arg)
}

/// `fn:string` of an optional item.
pub(super) fn item_string<N: XdmNode>(cc: &CallCtx<'_, N>, arg: &[XdmItem<N>]) -> Result<Fetch<String>, Error> {
    match arg.first() {
        None => Ok(Fetch::Ready(String::new())),
        Some(item) => crate::types::string_value(&*cc.params.facade, item),
    }
}

/// Only the Unicode codepoint collation is supported.
pub(super) fn check_collation<N>(arg: Option<&XdmSequence<N>>) -> Result<(), Error> {
    let Some(uri) = arg.filter(|a| !a.is_empty()).map(|a| string_arg(a)) else { return Ok(()) };
    if uri == CODEPOINT_COLLATION {
        Ok(())
    } else {
        Err(Error::from_code(ErrorCode::FOCH0002, format!("unsupported collation '{uri}'")))
    }
}

/// Atomizes and casts untyped values to `xs:double`, as the aggregate functions do.
pub(super) fn numeric_values<N: XdmNode>(
    cc: &CallCtx<'_, N>,
    arg: &[XdmItem<N>],
) -> Result<Fetch<Vec<AtomicValue>>, Error> {
    let values = ready_or_pending!(atomized(cc, arg)?);
    let values = values
        .into_iter()
        .map(|v| {
            if v.ty() == crate::types::AtomicType::UntypedAtomic {
                crate::types::cast_atomic(&v, crate::types::AtomicType::Double)
            } else {
                Ok(v)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Fetch::Ready(values))
}
