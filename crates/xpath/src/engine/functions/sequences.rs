use super::common::{atomized, boolean, check_collation, double_arg, empty, integer_arg, ready};
use super::{CallCtx, FnResult};
use crate::engine::evaluator::comparison::{atomic_equal, sort_compare};
use crate::engine::evaluator::invoke_function;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::traverse::{self, fetch};
use crate::model::{DomFacade, NodeKind, XdmNode};
use crate::util::try_merge_sort;
use crate::xdm::{AtomicValue, Fetch, MapKey, XdmItem, XdmSequence, ready_or_pending};
use std::cmp::Ordering;
use std::collections::HashSet;

pub(super) fn empty_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(args[0].is_empty())
}

pub(super) fn exists_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    boolean(!args[0].is_empty())
}

pub(super) fn head_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    ready(args[0].first().cloned().into_iter().collect())
}

pub(super) fn tail_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    ready(args[0].iter().skip(1).cloned().collect())
}

pub(super) fn reverse_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    ready(args[0].iter().rev().cloned().collect())
}

pub(super) fn unordered_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    ready(args[0].clone())
}

pub(super) fn subsequence_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let first = (double_arg(&args[1]) + 0.5).floor();
    let end = match args.get(2) {
        Some(len) => first + (double_arg(len) + 0.5).floor(),
        None => f64::INFINITY,
    };
    if first.is_nan() || end.is_nan() {
        return empty();
    }
    let picked = args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= first && p < end
        })
        .map(|(_, item)| item.clone())
        .collect();
    ready(picked)
}

pub(super) fn insert_before_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let target = &args[0];
    let position = integer_arg(&args[1]).unwrap_or(1).clamp(1, target.len() as i128 + 1) as usize;
    let mut out = Vec::with_capacity(target.len() + args[2].len());
    out.extend_from_slice(&target[..position - 1]);
    out.extend_from_slice(&args[2]);
    out.extend_from_slice(&target[position - 1..]);
    ready(out)
}

pub(super) fn remove_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let position = integer_arg(&args[1]).unwrap_or(0);
    let out = args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| (*i as i128) + 1 != position)
        .map(|(_, item)| item.clone())
        .collect();
    ready(out)
}

pub(super) fn distinct_values_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(1))?;
    let mut seen = HashSet::new();
    let out = args[0]
        .iter()
        .filter(|item| item.as_atomic().is_some_and(|a| seen.insert(MapKey::from_atomic(a))))
        .cloned()
        .collect();
    ready(out)
}

pub(super) fn index_of_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    let Some(search) = args[1].first().and_then(XdmItem::as_atomic) else { return empty() };
    let tz = cc.params.implicit_timezone;
    let positions = args[0]
        .iter()
        .enumerate()
        .filter(|(_, item)| item.as_atomic().is_some_and(|a| atomic_equal(a, search, tz)))
        .map(|(i, _)| XdmItem::Atomic(AtomicValue::integer(i as i64 + 1)))
        .collect();
    ready(positions)
}

fn cardinality<N: XdmNode>(args: &[XdmSequence<N>], ok: bool, code: ErrorCode, msg: &str) -> FnResult<N> {
    if ok { ready(args[0].clone()) } else { Err(Error::from_code(code, msg)) }
}

pub(super) fn zero_or_one_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    cardinality(args, args[0].len() <= 1, ErrorCode::FORG0003, "fn:zero-or-one called with a sequence of more than one item")
}

pub(super) fn one_or_more_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    cardinality(args, !args[0].is_empty(), ErrorCode::FORG0004, "fn:one-or-more called with an empty sequence")
}

pub(super) fn exactly_one_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    cardinality(args, args[0].len() == 1, ErrorCode::FORG0005, "fn:exactly-one called with a sequence that is not a single item")
}

/// Children that take part in deep equality: comments and processing instructions are ignored.
fn significant_children<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<Vec<N>> {
    let children = fetch!(traverse::children(facade, node));
    Fetch::Ready(children.into_iter().filter(|c| matches!(c.kind(), NodeKind::Element | NodeKind::Text)).collect())
}

fn same_name<N: XdmNode>(a: &N, b: &N) -> bool {
    a.name().map(|q| q.expanded()) == b.name().map(|q| q.expanded())
}

pub(crate) fn deep_equal_nodes<N: XdmNode>(facade: &dyn DomFacade<N>, a: &N, b: &N) -> Fetch<bool> {
    if a.kind() != b.kind() {
        return Fetch::Ready(false);
    }
    match a.kind() {
        NodeKind::Document | NodeKind::Element => {
            if a.kind() == NodeKind::Element {
                if !same_name(a, b) {
                    return Fetch::Ready(false);
                }
                let real = |attrs: Vec<N>| -> Vec<N> {
                    attrs.into_iter().filter(|x| !traverse::is_namespace_declaration(x)).collect()
                };
                let (left, right) = (real(fetch!(facade.all_attributes(a))), real(fetch!(facade.all_attributes(b))));
                if left.len() != right.len() {
                    return Fetch::Ready(false);
                }
                for attr in &left {
                    let Some(other) = right.iter().find(|r| same_name(attr, r)) else { return Fetch::Ready(false) };
                    if fetch!(facade.data(attr)) != fetch!(facade.data(other)) {
                        return Fetch::Ready(false);
                    }
                }
            }
            let (left, right) = (fetch!(significant_children(facade, a)), fetch!(significant_children(facade, b)));
            if left.len() != right.len() {
                return Fetch::Ready(false);
            }
            for (x, y) in left.iter().zip(&right) {
                if !fetch!(deep_equal_nodes(facade, x, y)) {
                    return Fetch::Ready(false);
                }
            }
            Fetch::Ready(true)
        }
        NodeKind::Attribute | NodeKind::ProcessingInstruction | NodeKind::Namespace => {
            Fetch::Ready(same_name(a, b) && fetch!(facade.data(a)) == fetch!(facade.data(b)))
        }
        NodeKind::Text | NodeKind::Comment => Fetch::Ready(fetch!(facade.data(a)) == fetch!(facade.data(b))),
    }
}

fn items_equal<N: XdmNode>(facade: &dyn DomFacade<N>, a: &XdmItem<N>, b: &XdmItem<N>, tz: i16) -> Result<Fetch<bool>, Error> {
    Ok(match (a, b) {
        (XdmItem::Atomic(x), XdmItem::Atomic(y)) => Fetch::Ready(atomic_equal(x, y, tz)),
        (XdmItem::Node(x), XdmItem::Node(y)) => deep_equal_nodes(facade, x, y),
        (XdmItem::Map(x), XdmItem::Map(y)) => {
            if x.len() != y.len() {
                return Ok(Fetch::Ready(false));
            }
            for (key, value) in x.entries() {
                let Some(other) = y.get(key) else { return Ok(Fetch::Ready(false)) };
                if !ready_or_pending!(sequences_equal(facade, value, other, tz)?) {
                    return Ok(Fetch::Ready(false));
                }
            }
            Fetch::Ready(true)
        }
        (XdmItem::Array(x), XdmItem::Array(y)) => {
            if x.len() != y.len() {
                return Ok(Fetch::Ready(false));
            }
            for (m, n) in x.members().iter().zip(y.members()) {
                if !ready_or_pending!(sequences_equal(facade, m, n, tz)?) {
                    return Ok(Fetch::Ready(false));
                }
            }
            Fetch::Ready(true)
        }
        (XdmItem::Function(_), _) | (_, XdmItem::Function(_)) => {
            return Err(Error::from_code(ErrorCode::FOTY0015, "fn:deep-equal is not defined for function items"));
        }
        _ => Fetch::Ready(false),
    })
}

pub(crate) fn sequences_equal<N: XdmNode>(
    facade: &dyn DomFacade<N>,
    a: &[XdmItem<N>],
    b: &[XdmItem<N>],
    tz: i16,
) -> Result<Fetch<bool>, Error> {
    if a.len() != b.len() {
        return Ok(Fetch::Ready(false));
    }
    for (x, y) in a.iter().zip(b) {
        if !ready_or_pending!(items_equal(facade, x, y, tz)?) {
            return Ok(Fetch::Ready(false));
        }
    }
    Ok(Fetch::Ready(true))
}

pub(super) fn deep_equal_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    let equal = ready_or_pending!(sequences_equal(&*cc.params.facade, &args[0], &args[1], cc.params.implicit_timezone)?);
    boolean(equal)
}

fn compare_keys(a: &[AtomicValue], b: &[AtomicValue], tz: i16) -> Result<Ordering, Error> {
    for i in 0..a.len().max(b.len()) {
        let ord = match (a.get(i), b.get(i)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (x, y) => sort_compare(x, y, false, tz)?,
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

pub(super) fn sort_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(1))?;
    let key_fn = args.get(2).and_then(|k| k.first());
    let mut keyed = Vec::with_capacity(args[0].len());
    for item in &args[0] {
        let key_items = match key_fn {
            Some(f) => ready_or_pending!(invoke_function(f, vec![vec![item.clone()]], cc.params)?),
            None => vec![item.clone()],
        };
        let keys = ready_or_pending!(atomized(cc, &key_items)?);
        keyed.push((keys, item.clone()));
    }
    let tz = cc.params.implicit_timezone;
    let sorted = try_merge_sort(keyed, |a, b| compare_keys(&a.0, &b.0, tz))?;
    ready(sorted.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Vec<AtomicValue> {
        v.iter().map(|i| AtomicValue::integer(*i)).collect()
    }

    #[test]
    fn shorter_key_sequences_sort_first() {
        assert_eq!(compare_keys(&ints(&[1]), &ints(&[1, 2]), 0).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&ints(&[2]), &ints(&[1, 2]), 0).unwrap(), Ordering::Greater);
        assert_eq!(compare_keys(&[], &[], 0).unwrap(), Ordering::Equal);
    }

    #[test]
    fn mixed_key_types_are_an_error() {
        let err = compare_keys(&ints(&[1]), &[AtomicValue::string("a")], 0).unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }
}
