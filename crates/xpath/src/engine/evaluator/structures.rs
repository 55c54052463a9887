//! Map and array constructors and the `?` lookup operator.

use super::{EResult, Operand, no_context};
use crate::compiler::{Expression, LookupKey};
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::atomize;
use crate::xdm::{
    ArrayItem, AtomicValue, Fetch, MapItem, MapKey, XdmItem, XdmSequence, XdmSequenceStream, ready_or_pending,
};
use std::collections::HashSet;
use std::rc::Rc;

/// Validates a 1-based array position.
pub(crate) fn array_index(key: &AtomicValue, len: usize) -> EResult<usize> {
    if !key.ty().is_integer() {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("array positions must be integers, got {}", key.ty()),
        ));
    }
    match key.to_i128() {
        Some(i) if i >= 1 && (i as usize) <= len => Ok(i as usize),
        _ => Err(Error::from_code(
            ErrorCode::FOAY0001,
            format!("array index {} is out of bounds for an array of size {len}", key.lexical()),
        )),
    }
}

pub(super) fn map_constructor<N: XdmNode>(
    entries: &[(Rc<Expression>, Rc<Expression>)],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut operands = entries
        .iter()
        .map(|(k, v)| Ok((Operand::new(k, ctx, params)?, Operand::new(v, ctx, params)?)))
        .collect::<EResult<Vec<_>>>()?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(operands.len());
        for (k, v) in operands.iter_mut() {
            ready_or_pending!(k.poll()?);
            ready_or_pending!(v.poll()?);
            let mut keys = ready_or_pending!(atomize(&*params.facade, k.items())?);
            if keys.len() != 1 {
                return Err(Error::from_code(ErrorCode::XPTY0004, "a map key must be a single atomic value"));
            }
            let key = keys.remove(0);
            if !seen.insert(MapKey::from_atomic(&key)) {
                return Err(Error::from_code(
                    ErrorCode::XQDY0137,
                    format!("duplicate key '{}' in map constructor", key.lexical()),
                ));
            }
            pairs.push((key, v.items().to_vec()));
        }
        Ok(Fetch::Ready(vec![XdmItem::Map(MapItem::from_entries(pairs))]))
    }))
}

pub(super) fn square_array<N: XdmNode>(
    members: &[Rc<Expression>],
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut operands = members.iter().map(|m| Operand::new(m, ctx, params)).collect::<EResult<Vec<_>>>()?;
    Ok(XdmSequenceStream::deferred(move || {
        for op in operands.iter_mut() {
            ready_or_pending!(op.poll()?);
        }
        let members = operands.iter().map(|op| op.items().to_vec()).collect();
        Ok(Fetch::Ready(vec![XdmItem::Array(ArrayItem::new(members))]))
    }))
}

pub(super) fn curly_array<N: XdmNode>(
    content: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(content, ctx, params)?;
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        let members = op.items().iter().map(|item| vec![item.clone()]).collect();
        Ok(Fetch::Ready(vec![XdmItem::Array(ArrayItem::new(members))]))
    }))
}

/// Keys of one lookup; `None` is the wildcard.
enum Keys<N> {
    Fixed(Option<Vec<AtomicValue>>),
    Computed(Operand<N>),
}

impl<N: XdmNode> Keys<N> {
    fn new(key: &LookupKey, ctx: &DynamicContext<N>, params: &ExecutionParameters<N>) -> EResult<Self> {
        Ok(match key {
            LookupKey::Name(n) => Keys::Fixed(Some(vec![AtomicValue::string(n)])),
            LookupKey::Integer(i) => Keys::Fixed(Some(vec![AtomicValue::big_integer(*i)])),
            LookupKey::Wildcard => Keys::Fixed(None),
            LookupKey::Expr(e) => Keys::Computed(Operand::new(e, ctx, params)?),
        })
    }

    fn poll(&mut self, params: &ExecutionParameters<N>) -> EResult<Fetch<Option<Vec<AtomicValue>>>> {
        match self {
            Keys::Fixed(keys) => Ok(Fetch::Ready(keys.clone())),
            Keys::Computed(op) => {
                ready_or_pending!(op.poll()?);
                Ok(Fetch::Ready(Some(ready_or_pending!(atomize(&*params.facade, op.items())?))))
            }
        }
    }
}

fn lookup_item<N: Clone + std::fmt::Debug>(item: &XdmItem<N>, keys: Option<&[AtomicValue]>, out: &mut XdmSequence<N>) -> EResult<()> {
    match item {
        XdmItem::Map(map) => match keys {
            None => map.entries().for_each(|(_, v)| out.extend(v.iter().cloned())),
            Some(keys) => {
                for key in keys {
                    if let Some(v) = map.get(key) {
                        out.extend(v.iter().cloned());
                    }
                }
            }
        },
        XdmItem::Array(array) => match keys {
            None => out.extend(array.flatten_items()),
            Some(keys) => {
                for key in keys {
                    let index = array_index(key, array.len())?;
                    out.extend(array.get(index).into_iter().flatten().cloned());
                }
            }
        },
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("the lookup operator requires a map or an array, got {other:?}"),
            ));
        }
    }
    Ok(())
}

pub(super) fn lookup<N: XdmNode>(
    base: &Rc<Expression>,
    key: &LookupKey,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut base = Operand::new(base, ctx, params)?;
    let mut keys = Keys::new(key, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(base.poll()?);
        let keys = ready_or_pending!(keys.poll(&params)?);
        let mut out = Vec::new();
        for item in base.items() {
            lookup_item(item, keys.as_deref(), &mut out)?;
        }
        Ok(Fetch::Ready(out))
    }))
}

pub(super) fn unary_lookup<N: XdmNode>(
    key: &LookupKey,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let Some(item) = ctx.item.clone() else { return Ok(XdmSequenceStream::error(no_context())) };
    let mut keys = Keys::new(key, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        let keys = ready_or_pending!(keys.poll(&params)?);
        let mut out = Vec::new();
        lookup_item(&item, keys.as_deref(), &mut out)?;
        Ok(Fetch::Ready(out))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_positions_are_one_based() {
        assert_eq!(array_index(&AtomicValue::integer(1), 3).unwrap(), 1);
        assert!(array_index(&AtomicValue::integer(0), 3).unwrap_err().is(ErrorCode::FOAY0001));
        assert!(array_index(&AtomicValue::integer(4), 3).unwrap_err().is(ErrorCode::FOAY0001));
    }

    #[test]
    fn array_positions_must_be_integers() {
        assert!(array_index(&AtomicValue::string("1"), 3).unwrap_err().is(ErrorCode::XPTY0004));
        assert!(array_index(&AtomicValue::double(1.0), 3).unwrap_err().is(ErrorCode::XPTY0004));
    }

    #[test]
    fn wildcard_on_arrays_flattens_members() {
        let array: ArrayItem<()> = ArrayItem::new(vec![
            vec![XdmItem::Atomic(AtomicValue::integer(1))],
            vec![],
            vec![XdmItem::Atomic(AtomicValue::integer(2)), XdmItem::Atomic(AtomicValue::integer(3))],
        ]);
        let mut out = Vec::new();
        lookup_item(&XdmItem::Array(array), None, &mut out).unwrap();
        assert_eq!(out.len(), 3);
    }
}
