use super::common::{integer, opt_atomic, ready};
use super::higher_order::predicate_holds;
use super::{CallCtx, FnResult};
use crate::engine::evaluator::invoke_function;
use crate::engine::evaluator::structures::array_index;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{ArrayItem, AtomicValue, XdmItem, XdmSequence, ready_or_pending};

fn array_arg<'a, N>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a ArrayItem<N>, Error> {
    match arg {
        [XdmItem::Array(a)] => Ok(a),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("array:{function} expects a single array"))),
    }
}

fn position_arg<'a, N>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a AtomicValue, Error> {
    opt_atomic(arg)
        .filter(|_| arg.len() == 1)
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, format!("array:{function} expects an integer position")))
}

fn integer_arg<N>(arg: &[XdmItem<N>], function: &str) -> Result<i128, Error> {
    let value = position_arg(arg, function)?;
    value.to_i128().ok_or_else(|| {
        Error::from_code(ErrorCode::XPTY0004, format!("array:{function} expects an integer, got {}", value.ty()))
    })
}

fn array_item<N>(array: ArrayItem<N>) -> FnResult<N> {
    ready(vec![XdmItem::Array(array)])
}

fn function_arg<'a, N>(arg: &'a [XdmItem<N>], function: &str) -> Result<&'a XdmItem<N>, Error> {
    match arg {
        [f] if f.function_arity().is_some() => Ok(f),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("array:{function} expects a function item"))),
    }
}

pub(super) fn size_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    integer(array_arg(&args[0], "size")?.len() as i128)
}

pub(super) fn get_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "get")?;
    let index = array_index(position_arg(&args[1], "get")?, array.len())?;
    ready(array.get(index).cloned().unwrap_or_default())
}

pub(super) fn put_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "put")?;
    let index = array_index(position_arg(&args[1], "put")?, array.len())?;
    let value = args[2].clone();
    array_item(array.with_members(|m| m[index - 1] = value))
}

pub(super) fn append_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "append")?;
    let value = args[1].clone();
    array_item(array.with_members(|m| m.push(value)))
}

fn length_error(start: i128, length: i128) -> Error {
    Error::from_code(ErrorCode::FOAY0002, format!("negative length {length} at position {start}"))
}

pub(super) fn subarray_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "subarray")?;
    let len = array.len() as i128;
    let start = integer_arg(&args[1], "subarray")?;
    let length = match args.get(2) {
        Some(l) => integer_arg(l, "subarray")?,
        None => len - start + 1,
    };
    if length < 0 {
        return Err(length_error(start, length));
    }
    if start < 1 || start > len + 1 || start.saturating_add(length) > len + 1 {
        return Err(Error::from_code(
            ErrorCode::FOAY0001,
            format!("subarray({start}, {length}) is out of bounds for an array of size {len}"),
        ));
    }
    let from = (start - 1) as usize;
    let to = from + length as usize;
    array_item(ArrayItem::new(array.members()[from..to].to_vec()))
}

pub(super) fn head_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "head")?;
    match array.members().first() {
        Some(first) => ready(first.clone()),
        None => Err(Error::from_code(ErrorCode::FOAY0001, "array:head of an empty array")),
    }
}

pub(super) fn tail_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "tail")?;
    match array.members().split_first() {
        Some((_, rest)) => array_item(ArrayItem::new(rest.to_vec())),
        None => Err(Error::from_code(ErrorCode::FOAY0001, "array:tail of an empty array")),
    }
}

pub(super) fn reverse_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "reverse")?;
    array_item(array.with_members(|m| m.reverse()))
}

pub(super) fn join_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut members = Vec::new();
    for item in &args[0] {
        let XdmItem::Array(array) = item else {
            return Err(Error::from_code(ErrorCode::XPTY0004, "array:join expects a sequence of arrays"));
        };
        members.extend(array.members().iter().cloned());
    }
    array_item(ArrayItem::new(members))
}

/// Recursively replaces arrays by their members.
pub(super) fn flatten_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    fn walk<N: XdmNode>(items: &[XdmItem<N>], out: &mut XdmSequence<N>) {
        for item in items {
            match item {
                XdmItem::Array(array) => {
                    for member in array.members() {
                        walk(member, out);
                    }
                }
                other => out.push(other.clone()),
            }
        }
    }
    let mut out = Vec::new();
    walk(&args[0], &mut out);
    ready(out)
}

pub(super) fn insert_before_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "insert-before")?;
    let position = integer_arg(&args[1], "insert-before")?;
    if position < 1 || position > array.len() as i128 + 1 {
        return Err(Error::from_code(
            ErrorCode::FOAY0001,
            format!("insert position {position} is out of bounds for an array of size {}", array.len()),
        ));
    }
    let value = args[2].clone();
    array_item(array.with_members(|m| m.insert(position as usize - 1, value)))
}

/// `array:remove` takes a sequence of positions.
pub(super) fn remove_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "remove")?;
    let mut drop = Vec::with_capacity(args[1].len());
    for position in args[1].iter().filter_map(XdmItem::as_atomic) {
        drop.push(array_index(position, array.len())?);
    }
    let kept = array
        .members()
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(&(i + 1)))
        .map(|(_, m)| m.clone())
        .collect();
    array_item(ArrayItem::new(kept))
}

pub(super) fn for_each_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "for-each")?;
    let f = function_arg(&args[1], "for-each")?;
    let mut members = Vec::with_capacity(array.len());
    for member in array.members() {
        members.push(ready_or_pending!(invoke_function(f, vec![member.clone()], cc.params)?));
    }
    array_item(ArrayItem::new(members))
}

pub(super) fn filter_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "filter")?;
    let f = function_arg(&args[1], "filter")?;
    let mut members = Vec::new();
    for member in array.members() {
        let verdict = ready_or_pending!(invoke_function(f, vec![member.clone()], cc.params)?);
        if predicate_holds(&verdict, "array:filter")? {
            members.push(member.clone());
        }
    }
    array_item(ArrayItem::new(members))
}

pub(super) fn fold_left_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "fold-left")?;
    let f = function_arg(&args[2], "fold-left")?;
    let mut acc = args[1].clone();
    for member in array.members() {
        acc = ready_or_pending!(invoke_function(f, vec![acc, member.clone()], cc.params)?);
    }
    ready(acc)
}

pub(super) fn fold_right_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let array = array_arg(&args[0], "fold-right")?;
    let f = function_arg(&args[2], "fold-right")?;
    let mut acc = args[1].clone();
    for member in array.members().iter().rev() {
        acc = ready_or_pending!(invoke_function(f, vec![member.clone(), acc], cc.params)?);
    }
    ready(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_subarray_length_is_its_own_error() {
        assert!(length_error(1, -1).is(ErrorCode::FOAY0002));
    }

    #[test]
    fn non_integer_positions_are_type_errors() {
        let arg: Vec<XdmItem<crate::SimpleNode>> = vec![XdmItem::Atomic(AtomicValue::string("1"))];
        assert!(integer_arg(&arg, "subarray").unwrap_err().is(ErrorCode::XPTY0004));
    }
}
