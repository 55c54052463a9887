use super::common::{empty, integer, ready};
use super::{CallCtx, FnResult};
use crate::engine::evaluator::invoke_function;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{AtomicPayload, AtomicValue, XdmItem, XdmSequence, ready_or_pending};

fn function_arg<'a, N: XdmNode>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a XdmItem<N>, Error> {
    match arg {
        [f] if f.is_function() => Ok(f),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("fn:{function} expects a function item"))),
    }
}

pub(super) fn for_each_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1], "for-each")?;
    let mut out = Vec::new();
    for item in &args[0] {
        out.extend(ready_or_pending!(invoke_function(f, vec![vec![item.clone()]], cc.params)?));
    }
    ready(out)
}

/// Calls a predicate that must answer a single `xs:boolean`.
pub(crate) fn predicate_holds<N: XdmNode>(result: &[XdmItem<N>], function: &str) -> Result<bool, Error> {
    match result {
        [XdmItem::Atomic(a)] => match a.payload() {
            AtomicPayload::Boolean(b) => Ok(*b),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("{function}: the predicate must return xs:boolean"))),
        },
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("{function}: the predicate must return one boolean"))),
    }
}

pub(super) fn filter_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1], "filter")?;
    let mut out = Vec::new();
    for item in &args[0] {
        let verdict = ready_or_pending!(invoke_function(f, vec![vec![item.clone()]], cc.params)?);
        if predicate_holds(&verdict, "fn:filter")? {
            out.push(item.clone());
        }
    }
    ready(out)
}

pub(super) fn fold_left_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2], "fold-left")?;
    let mut acc = args[1].clone();
    for item in &args[0] {
        acc = ready_or_pending!(invoke_function(f, vec![acc, vec![item.clone()]], cc.params)?);
    }
    ready(acc)
}

pub(super) fn fold_right_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2], "fold-right")?;
    let mut acc = args[1].clone();
    for item in args[0].iter().rev() {
        acc = ready_or_pending!(invoke_function(f, vec![vec![item.clone()], acc], cc.params)?);
    }
    ready(acc)
}

pub(super) fn for_each_pair_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2], "for-each-pair")?;
    let mut out = Vec::new();
    for (a, b) in args[0].iter().zip(&args[1]) {
        out.extend(ready_or_pending!(invoke_function(f, vec![vec![a.clone()], vec![b.clone()]], cc.params)?));
    }
    ready(out)
}

pub(super) fn apply_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[0], "apply")?;
    let Some(XdmItem::Array(array)) = args[1].first() else {
        return Err(Error::from_code(ErrorCode::XPTY0004, "fn:apply expects an array of arguments"));
    };
    if f.function_arity() != Some(array.len()) {
        return Err(Error::from_code(
            ErrorCode::FOAP0001,
            format!("fn:apply: the function does not take {} arguments", array.len()),
        ));
    }
    ready(ready_or_pending!(invoke_function(f, array.members().to_vec(), cc.params)?))
}

pub(super) fn function_arity_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[0], "function-arity")?;
    integer(f.function_arity().unwrap_or(0) as i128)
}

pub(super) fn function_name_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    match function_arg(&args[0], "function-name")? {
        XdmItem::Function(f) => match &f.name {
            Some(name) => {
                let q = crate::xdm::QName::new(None, name.ns_uri.as_deref(), &name.local);
                ready(vec![XdmItem::Atomic(AtomicValue::qname(q))])
            }
            None => empty(),
        },
        _ => empty(),
    }
}
