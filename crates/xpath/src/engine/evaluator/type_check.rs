//! `instance of`, `treat as`, `cast`, `castable` and the function conversion rules.

use super::{EResult, Operand, boolean};
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::casting::{cast_atomic_with, promote_numeric};
use crate::types::{AtomicType, ItemType, SequenceType, atomize};
use crate::xdm::{AtomicValue, Fetch, SequenceCollector, XdmItem, XdmSequence, XdmSequenceStream, ready_or_pending};
use std::rc::Rc;

/// Converts one atomic value to the expected type: untyped values are cast, numerics
/// promoted and `xs:anyURI` promoted to `xs:string`.
pub(crate) fn convert_atomic(value: AtomicValue, target: AtomicType, what: &str) -> EResult<AtomicValue> {
    let ty = value.ty();
    if ty.is_subtype_of(target) {
        return Ok(value);
    }
    if ty == AtomicType::UntypedAtomic {
        return if target.is_abstract() { Ok(value) } else { cast_atomic_with(&value, target, &|_| None) };
    }
    if value.is_numeric()
        && let Some(p) = promote_numeric(&value, target)
    {
        return Ok(p);
    }
    if ty == AtomicType::AnyURI && target == AtomicType::String {
        return Ok(value.relabel(AtomicType::String));
    }
    Err(Error::from_code(ErrorCode::XPTY0004, format!("{what}: expected {target}, got {ty}")))
}

/// Applies the function conversion rules for `ty` to a materialized sequence.
pub(crate) fn coerce<N: XdmNode>(
    items: XdmSequence<N>,
    ty: &SequenceType,
    params: &ExecutionParameters<N>,
    what: &str,
) -> EResult<Fetch<XdmSequence<N>>> {
    let SequenceType::Typed(item_type, occurrence) = ty else {
        if items.is_empty() {
            return Ok(Fetch::Ready(items));
        }
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("{what}: expected an empty sequence")));
    };
    let items = match item_type {
        ItemType::Atomic(target) => {
            let values = ready_or_pending!(atomize(&*params.facade, &items)?);
            values
                .into_iter()
                .map(|v| convert_atomic(v, *target, what).map(XdmItem::Atomic))
                .collect::<EResult<Vec<_>>>()?
        }
        _ => {
            if let Some(bad) = items.iter().find(|i| !item_type.matches(i)) {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("{what}: {bad:?} does not match {item_type}"),
                ));
            }
            items
        }
    };
    if !occurrence.allows(items.len()) {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what}: expected {ty}, got a sequence of {} items", items.len()),
        ));
    }
    Ok(Fetch::Ready(items))
}

/// [`coerce`] applied to a stream once it is complete.
pub(crate) fn coerce_stream<N: XdmNode>(
    stream: XdmSequenceStream<N>,
    ty: SequenceType,
    params: ExecutionParameters<N>,
) -> XdmSequenceStream<N> {
    let mut collector = SequenceCollector::new(stream);
    let mut collected: Option<XdmSequence<N>> = None;
    XdmSequenceStream::deferred(move || {
        if collected.is_none() {
            collected = Some(ready_or_pending!(collector.poll_collect()?));
        }
        let items = collected.clone().unwrap_or_default();
        coerce(items, &ty, &params, "value")
    })
}

pub(super) fn instance_of<N: XdmNode>(
    operand: &Rc<Expression>,
    ty: &SequenceType,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(operand, ctx, params)?;
    let ty = ty.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        Ok(Fetch::Ready(vec![boolean(ty.matches(op.items()))]))
    }))
}

pub(super) fn treat_as<N: XdmNode>(
    operand: &Rc<Expression>,
    ty: &SequenceType,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(operand, ctx, params)?;
    let ty = ty.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        if !ty.matches(op.items()) {
            return Err(Error::from_code(ErrorCode::XPDY0050, format!("the value does not match the treat type {ty}")));
        }
        Ok(Fetch::Ready(op.items().to_vec()))
    }))
}

pub(super) fn cast<N: XdmNode>(
    operand: &Rc<Expression>,
    target: AtomicType,
    optional: bool,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(operand, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        let values = ready_or_pending!(atomize(&*params.facade, op.items())?);
        match values.as_slice() {
            [] if optional => Ok(Fetch::Ready(Vec::new())),
            [] => Err(Error::from_code(ErrorCode::XPTY0004, format!("cannot cast an empty sequence to {target}"))),
            [v] => {
                let cast = cast_atomic_with(v, target, &|p| params.resolve_prefix(p))?;
                Ok(Fetch::Ready(vec![XdmItem::Atomic(cast)]))
            }
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "cast expects a single atomic value")),
        }
    }))
}

pub(super) fn castable<N: XdmNode>(
    operand: &Rc<Expression>,
    target: AtomicType,
    optional: bool,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(operand, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        let values = ready_or_pending!(atomize(&*params.facade, op.items())?);
        let ok = match values.as_slice() {
            [] => optional,
            [v] => cast_atomic_with(v, target, &|p| params.resolve_prefix(p)).is_ok(),
            _ => false,
        };
        Ok(Fetch::Ready(vec![boolean(ok)]))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_is_cast_to_the_expected_type() {
        let v = convert_atomic(AtomicValue::untyped("12"), AtomicType::Integer, "arg").unwrap();
        assert_eq!(v, AtomicValue::integer(12));
    }

    #[test]
    fn untyped_stays_untyped_for_any_atomic() {
        let v = convert_atomic(AtomicValue::untyped("x"), AtomicType::AnyAtomicType, "arg").unwrap();
        assert_eq!(v.ty(), AtomicType::UntypedAtomic);
    }

    #[test]
    fn numerics_and_uris_are_promoted() {
        assert_eq!(convert_atomic(AtomicValue::integer(2), AtomicType::Double, "arg").unwrap(), AtomicValue::double(2.0));
        assert_eq!(convert_atomic(AtomicValue::any_uri("urn:x"), AtomicType::String, "arg").unwrap().ty(), AtomicType::String);
    }

    #[test]
    fn strings_are_not_numbers() {
        let err = convert_atomic(AtomicValue::string("1"), AtomicType::Double, "arg").unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }
}
