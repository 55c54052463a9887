//! Static and dynamic function calls, function items and partial application.

use super::type_check::{coerce, coerce_stream};
use super::{EResult, Operand, lazy_stream};
use crate::compiler::{DeclaredFunction, Expression};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::functions::{CallCtx, FunctionImpl};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::{SequenceType, atomize};
use crate::xdm::{
    ExpandedName, Fetch, FunctionBody, FunctionItem, SequenceCollector, SharedSequence, XdmItem, XdmSequence,
    XdmSequenceStream, ready_or_pending,
};
use std::rc::Rc;

fn unknown_function(name: &ExpandedName, arity: usize) -> Error {
    Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}#{arity}"))
}

/// Operands for the non-placeholder arguments, in order.
fn argument_operands<N: XdmNode>(
    args: &[Option<Rc<Expression>>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<Vec<Option<Operand<N>>>> {
    args.iter().map(|a| a.as_ref().map(|e| Operand::new(e, ctx, params)).transpose()).collect()
}

fn poll_all<N: XdmNode>(operands: &mut [Option<Operand<N>>]) -> EResult<Fetch<()>> {
    for op in operands.iter_mut().flatten() {
        ready_or_pending!(op.poll()?);
    }
    Ok(Fetch::Ready(()))
}

fn collected<N: XdmNode>(operands: &[Option<Operand<N>>]) -> Vec<Option<XdmSequence<N>>> {
    operands.iter().map(|o| o.as_ref().map(|op| op.items().to_vec())).collect()
}

/// Applies declared parameter types, when there are any.
fn coerce_args<N: XdmNode>(
    args: Vec<XdmSequence<N>>,
    types: Option<&[SequenceType]>,
    params: &ExecutionParameters<N>,
    name: &dyn std::fmt::Display,
) -> EResult<Fetch<Vec<XdmSequence<N>>>> {
    let Some(types) = types else { return Ok(Fetch::Ready(args)) };
    let mut out = Vec::with_capacity(args.len());
    for (i, arg) in args.into_iter().enumerate() {
        match types.get(i) {
            Some(ty) => out.push(ready_or_pending!(coerce(arg, ty, params, &format!("argument {} of {name}", i + 1))?)),
            None => out.push(arg),
        }
    }
    Ok(Fetch::Ready(out))
}

fn native_item<N: XdmNode>(name: ExpandedName, arity: usize, f: FunctionImpl<N>) -> Rc<FunctionItem<N>> {
    Rc::new(FunctionItem { name: Some(name), arity, updating: false, body: FunctionBody::Native(f) })
}

/// Wraps a registry function so that it sees the focus of the place it was referenced from.
fn with_captured_focus<N: XdmNode>(f: FunctionImpl<N>, ctx: &DynamicContext<N>) -> FunctionImpl<N> {
    let captured = ctx.clone();
    Rc::new(move |cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| {
        f(&CallCtx { dyn_ctx: &captured, params: cc.params }, args)
    })
}

fn partial<N: XdmNode>(base: Rc<FunctionItem<N>>, bound: Vec<Option<XdmSequence<N>>>) -> XdmItem<N> {
    let arity = bound.iter().filter(|b| b.is_none()).count();
    XdmItem::Function(Rc::new(FunctionItem {
        name: None,
        arity,
        updating: base.updating,
        body: FunctionBody::Partial { base, bound },
    }))
}

pub(super) fn static_call<N: XdmNode>(
    name: &ExpandedName,
    types: Option<Rc<[SequenceType]>>,
    args: &[Option<Rc<Expression>>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let arity = args.len();
    let f = match params.functions.resolve(name, arity) {
        Ok(f) => Rc::clone(f),
        Err(_) => return Ok(XdmSequenceStream::error(unknown_function(name, arity))),
    };
    let mut operands = argument_operands(args, ctx, params)?;
    let is_partial = args.iter().any(Option::is_none);
    let (name, ctx, params) = (name.clone(), ctx.clone(), params.clone());
    if params.debug {
        tracing::trace!(function = %name, arity, "function call");
    }
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(poll_all(&mut operands)?);
        let values = collected(&operands);
        if is_partial {
            let base = native_item(name.clone(), arity, with_captured_focus(Rc::clone(&f), &ctx));
            return Ok(Fetch::Ready(vec![partial(base, values)]));
        }
        let values = values.into_iter().map(Option::unwrap_or_default).collect();
        let values = ready_or_pending!(coerce_args(values, types.as_deref(), &params, &name)?);
        f(&CallCtx { dyn_ctx: &ctx, params: &params }, &values)
    }))
}

/// Binds the arguments of a declared function or inline function body and evaluates it.
fn evaluate_body<N: XdmNode>(
    scope: DynamicContext<N>,
    fparams: &[(ExpandedName, Option<SequenceType>)],
    args: Vec<XdmSequenceStream<N>>,
    body: &Expression,
    result: Option<&SequenceType>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut scope = scope;
    for ((name, ty), arg) in fparams.iter().zip(args) {
        let arg = match ty {
            Some(ty) => coerce_stream(arg, ty.clone(), params.clone()),
            None => arg,
        };
        scope = scope.bind(name.clone(), SharedSequence::new(arg));
    }
    let out = body.evaluate(&scope, params)?;
    Ok(match result {
        Some(ty) => coerce_stream(out, ty.clone(), params.clone()),
        None => out,
    })
}

pub(super) fn declared_call<N: XdmNode>(
    function: &Rc<DeclaredFunction>,
    args: &[Option<Rc<Expression>>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    if args.iter().any(Option::is_none) {
        let base = match declared_item(function) {
            Ok(item) => item,
            Err(e) => return Ok(XdmSequenceStream::error(e)),
        };
        let mut operands = argument_operands(args, ctx, params)?;
        return Ok(XdmSequenceStream::deferred(move || {
            ready_or_pending!(poll_all(&mut operands)?);
            Ok(Fetch::Ready(vec![partial(Rc::clone(&base), collected(&operands))]))
        }));
    }
    let Some(body) = function.body.get() else {
        return Ok(XdmSequenceStream::error(unknown_function(&function.name, function.params.len())));
    };
    if params.debug {
        tracing::trace!(function = %function.name, "declared function call");
    }
    let streams = args.iter().flatten().map(|a| a.evaluate(ctx, params)).collect::<EResult<Vec<_>>>()?;
    evaluate_body(DynamicContext::default(), &function.params, streams, body, function.result.as_ref(), params)
}

fn declared_item<N: XdmNode>(function: &Rc<DeclaredFunction>) -> EResult<Rc<FunctionItem<N>>> {
    let body = function.body.get().ok_or_else(|| unknown_function(&function.name, function.params.len()))?;
    Ok(Rc::new(FunctionItem {
        name: Some(function.name.clone()),
        arity: function.params.len(),
        updating: function.updating,
        body: FunctionBody::Inline {
            params: function.params.clone(),
            return_type: function.result.clone(),
            body: Rc::clone(body),
            closure: DynamicContext::default(),
        },
    }))
}

pub(super) fn declared_function_ref<N: XdmNode>(function: &Rc<DeclaredFunction>) -> XdmSequenceStream<N> {
    match declared_item(function) {
        Ok(item) => XdmSequenceStream::once(XdmItem::Function(item)),
        Err(e) => XdmSequenceStream::error(e),
    }
}

pub(super) fn named_function_ref<N: XdmNode>(
    name: &ExpandedName,
    arity: usize,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    Ok(match params.functions.resolve(name, arity) {
        Ok(f) => {
            let f = with_captured_focus(Rc::clone(f), ctx);
            XdmSequenceStream::once(XdmItem::Function(native_item(name.clone(), arity, f)))
        }
        Err(_) => XdmSequenceStream::error(unknown_function(name, arity)),
    })
}

pub(super) fn inline_function<N: XdmNode>(
    fparams: &[(ExpandedName, Option<SequenceType>)],
    result: &Option<SequenceType>,
    body: &Rc<Expression>,
    ctx: &DynamicContext<N>,
) -> XdmSequenceStream<N> {
    XdmSequenceStream::once(XdmItem::Function(Rc::new(FunctionItem {
        name: None,
        arity: fparams.len(),
        updating: body.is_updating(),
        body: FunctionBody::Inline {
            params: fparams.to_vec(),
            return_type: result.clone(),
            body: Rc::clone(body),
            closure: ctx.without_focus(),
        },
    })))
}

pub(super) fn dynamic_call<N: XdmNode>(
    function: &Rc<Expression>,
    args: &[Option<Rc<Expression>>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut target = Operand::new(function, ctx, params)?;
    let mut operands = argument_operands(args, ctx, params)?;
    let arity = args.len();
    let is_partial = args.iter().any(Option::is_none);
    let params = params.clone();
    Ok(lazy_stream(move || {
        ready_or_pending!(target.poll()?);
        let item = match target.items() {
            [item] if item.function_arity() == Some(arity) => item.clone(),
            [item] if item.is_function() => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("function {item:?} called with {arity} arguments"),
                ));
            }
            _ => return Err(Error::from_code(ErrorCode::XPTY0004, "a dynamic call needs exactly one function item")),
        };
        ready_or_pending!(poll_all(&mut operands)?);
        let values = collected(&operands);
        if is_partial {
            let base = match item {
                XdmItem::Function(f) => f,
                other => as_function_item(other),
            };
            return Ok(Fetch::Ready(XdmSequenceStream::once(partial(base, values))));
        }
        let values = values.into_iter().map(Option::unwrap_or_default).collect();
        invoke_function_item(&item, values, &params).map(Fetch::Ready)
    }))
}

/// Maps and arrays as explicit function items, for partial application.
fn as_function_item<N: XdmNode>(item: XdmItem<N>) -> Rc<FunctionItem<N>> {
    let f: FunctionImpl<N> = Rc::new(move |cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| {
        SequenceCollector::new(invoke_function_item(&item, args.to_vec(), cc.params)?).poll_collect()
    });
    Rc::new(FunctionItem { name: None, arity: 1, updating: false, body: FunctionBody::Native(f) })
}

/// Calls any function item, map or array with materialized arguments.
pub(crate) fn invoke_function_item<N: XdmNode>(
    item: &XdmItem<N>,
    args: Vec<XdmSequence<N>>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    match item {
        XdmItem::Function(f) => call_function_item(f, args, params),
        XdmItem::Map(map) => {
            let map = map.clone();
            let params = params.clone();
            Ok(XdmSequenceStream::deferred(move || {
                let key = ready_or_pending!(single_key(&args, &params, "map lookup")?);
                Ok(Fetch::Ready(map.get(&key).cloned().unwrap_or_default()))
            }))
        }
        XdmItem::Array(array) => {
            let array = array.clone();
            let params = params.clone();
            Ok(XdmSequenceStream::deferred(move || {
                let key = ready_or_pending!(single_key(&args, &params, "array lookup")?);
                let index = super::structures::array_index(&key, array.len())?;
                Ok(Fetch::Ready(array.get(index).cloned().unwrap_or_default()))
            }))
        }
        other => Err(Error::from_code(ErrorCode::XPTY0004, format!("{other:?} is not a function"))),
    }
}

fn single_key<N: XdmNode>(
    args: &[XdmSequence<N>],
    params: &ExecutionParameters<N>,
    what: &str,
) -> EResult<Fetch<crate::xdm::AtomicValue>> {
    let arg = args.first().map(Vec::as_slice).unwrap_or(&[]);
    let mut values = ready_or_pending!(atomize(&*params.facade, arg)?);
    if values.len() != 1 {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what} expects a single atomic key")));
    }
    Ok(Fetch::Ready(values.remove(0)))
}

pub(crate) fn call_function_item<N: XdmNode>(
    function: &Rc<FunctionItem<N>>,
    args: Vec<XdmSequence<N>>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    if args.len() != function.arity {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{function:?} called with {} arguments", args.len()),
        ));
    }
    match &function.body {
        FunctionBody::Native(f) => {
            let f = Rc::clone(f);
            let types = function
                .name
                .as_ref()
                .and_then(|n| params.static_ctx.signatures.param_types(n, function.arity));
            let label = format!("{function:?}");
            let params = params.clone();
            Ok(XdmSequenceStream::deferred(move || {
                let values = ready_or_pending!(coerce_args(args.clone(), types.as_deref(), &params, &label)?);
                f(&CallCtx { dyn_ctx: &DynamicContext::default(), params: &params }, &values)
            }))
        }
        FunctionBody::Inline { params: fparams, return_type, body, closure } => {
            let streams = args.into_iter().map(XdmSequenceStream::from_vec).collect();
            evaluate_body(closure.without_focus(), fparams, streams, body, return_type.as_ref(), params)
        }
        FunctionBody::Partial { base, bound } => {
            let mut supplied = args.into_iter();
            let full = bound.iter().map(|b| b.clone().or_else(|| supplied.next()).unwrap_or_default()).collect();
            call_function_item(base, full, params)
        }
    }
}

/// Calls a function item from inside a built-in function. A suspension is reported as
/// pending; the caller retries the whole built-in, which recomputes the call.
pub(crate) fn invoke_function<N: XdmNode>(
    item: &XdmItem<N>,
    args: Vec<XdmSequence<N>>,
    params: &ExecutionParameters<N>,
) -> EResult<Fetch<XdmSequence<N>>> {
    let stream = invoke_function_item(item, args, params)?;
    SequenceCollector::new(stream).poll_collect()
}
