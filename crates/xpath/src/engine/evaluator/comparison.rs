//! Value, general and node comparisons, plus the atomic ordering shared with the
//! built-in functions (`fn:compare`, `fn:min`, `fn:distinct-values`, sorting).

use super::{EResult, Operand, boolean};
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::parser::ast::{CompOp, NodeCompOp};
use crate::types::{AtomicType, TypeFamily, atomize, atomize_item, cast_atomic};
use crate::xdm::{AtomicPayload, AtomicValue, Fetch, XdmItem, XdmSequenceStream, pull_or_pending, ready_or_pending};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

fn incomparable(a: &AtomicValue, b: &AtomicValue) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("cannot compare {} with {}", a.ty(), b.ty()))
}

/// Orders two atomic values.
///
/// `Ok(None)` means the pair is comparable but unordered: a `NaN` operand, or a pair of
/// types that only supports equality and differs. With `ordered` set, equality-only types
/// (QName, Gregorian fragments) raise `XPTY0004`.
pub(crate) fn compare_atomic(
    a: &AtomicValue,
    b: &AtomicValue,
    implicit_tz: i16,
    ordered: bool,
) -> EResult<Option<Ordering>> {
    use AtomicPayload as P;
    let (ta, tb) = (a.ty(), b.ty());
    match (a.payload(), b.payload()) {
        (P::String(x), P::String(y)) if ta.is_string_like() && tb.is_string_like() => Ok(Some(x.cmp(y))),
        (P::Boolean(x), P::Boolean(y)) => Ok(Some(x.cmp(y))),
        _ if a.is_numeric() && b.is_numeric() => Ok(compare_numeric(a, b)),
        (P::Duration(x), P::Duration(y)) => {
            let same_subtype = (ta == AtomicType::YearMonthDuration && tb == AtomicType::YearMonthDuration)
                || (ta == AtomicType::DayTimeDuration && tb == AtomicType::DayTimeDuration);
            if same_subtype {
                let ord = if ta == AtomicType::YearMonthDuration { x.months.cmp(&y.months) } else { x.seconds.cmp(&y.seconds) };
                Ok(Some(ord))
            } else if ordered {
                Err(incomparable(a, b))
            } else {
                Ok((x == y).then_some(Ordering::Equal))
            }
        }
        (P::DateTime(x), P::DateTime(y)) if ta.primitive() == tb.primitive() => {
            let fragment = !matches!(ta.primitive(), AtomicType::DateTime | AtomicType::Date | AtomicType::Time);
            if fragment && ordered {
                return Err(incomparable(a, b));
            }
            let ord = x.compare(y, implicit_tz);
            if fragment && ord.is_ne() { Ok(None) } else { Ok(Some(ord)) }
        }
        (P::Binary(x), P::Binary(y)) if ta.primitive() == tb.primitive() => Ok(Some(x.cmp(y))),
        (P::QName(x), P::QName(y)) => {
            if ordered {
                Err(incomparable(a, b))
            } else if x == y {
                Ok(Some(Ordering::Equal))
            } else {
                Ok(None)
            }
        }
        (P::String(x), P::String(y)) if ta == AtomicType::NOTATION && tb == AtomicType::NOTATION && !ordered => {
            Ok((x == y).then_some(Ordering::Equal))
        }
        _ => Err(incomparable(a, b)),
    }
}

fn compare_numeric(a: &AtomicValue, b: &AtomicValue) -> Option<Ordering> {
    use AtomicPayload as P;
    match (a.payload(), b.payload()) {
        (P::Integer(x), P::Integer(y)) => Some(x.cmp(y)),
        (P::Integer(_) | P::Decimal(_), P::Integer(_) | P::Decimal(_)) => {
            Some(a.to_decimal()?.cmp(&b.to_decimal()?))
        }
        _ => a.to_f64()?.partial_cmp(&b.to_f64()?),
    }
}

/// Applies a comparison operator to an ordering result.
pub(crate) fn apply_op(op: CompOp, ord: Option<Ordering>) -> bool {
    match ord {
        None => op == CompOp::Ne,
        Some(o) => match op {
            CompOp::Eq => o.is_eq(),
            CompOp::Ne => o.is_ne(),
            CompOp::Lt => o.is_lt(),
            CompOp::Le => o.is_le(),
            CompOp::Gt => o.is_gt(),
            CompOp::Ge => o.is_ge(),
        },
    }
}

fn is_ordering(op: CompOp) -> bool {
    !matches!(op, CompOp::Eq | CompOp::Ne)
}

/// `eq`, `lt`, ... on two atomic values after untyped operands became strings.
pub(crate) fn value_compare(op: CompOp, a: &AtomicValue, b: &AtomicValue, implicit_tz: i16) -> EResult<bool> {
    let a = untyped_as(a, AtomicType::String)?;
    let b = untyped_as(b, AtomicType::String)?;
    compare_atomic(&a, &b, implicit_tz, is_ordering(op)).map(|o| apply_op(op, o))
}

fn untyped_as(v: &AtomicValue, target: AtomicType) -> EResult<AtomicValue> {
    if v.ty() == AtomicType::UntypedAtomic { cast_atomic(v, target) } else { Ok(v.clone()) }
}

/// One pair of a general comparison, converting untyped operands against the other side.
pub(crate) fn general_pair(op: CompOp, a: &AtomicValue, b: &AtomicValue, implicit_tz: i16) -> EResult<bool> {
    let untyped = AtomicType::UntypedAtomic;
    let (a, b) = match (a.ty() == untyped, b.ty() == untyped) {
        (true, true) => (a.clone().relabel(AtomicType::String), b.clone().relabel(AtomicType::String)),
        (true, false) => (convert_against(a, b.ty())?, b.clone()),
        (false, true) => (a.clone(), convert_against(b, a.ty())?),
        (false, false) => (a.clone(), b.clone()),
    };
    compare_atomic(&a, &b, implicit_tz, is_ordering(op)).map(|o| apply_op(op, o))
}

fn convert_against(untyped: &AtomicValue, other: AtomicType) -> EResult<AtomicValue> {
    match other.family() {
        TypeFamily::Numeric => cast_atomic(untyped, AtomicType::Double),
        TypeFamily::String | TypeFamily::AnyURI => Ok(untyped.clone().relabel(AtomicType::String)),
        _ => cast_atomic(untyped, other.primitive()),
    }
}

/// Ordering used by `order by` and `fn:sort`. Untyped values compare as strings and `NaN`
/// sorts below every other non-empty value.
pub(crate) fn sort_compare(
    a: Option<&AtomicValue>,
    b: Option<&AtomicValue>,
    empty_greatest: bool,
    implicit_tz: i16,
) -> EResult<Ordering> {
    let rank = |v: Option<&AtomicValue>| match v {
        None => if empty_greatest { 2 } else { 0 },
        Some(x) if x.is_numeric() && x.to_f64().is_some_and(f64::is_nan) => u8::from(!empty_greatest),
        Some(_) => if empty_greatest { 1 } else { 2 },
    };
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return Ok(ra.cmp(&rb));
    }
    match (a, b) {
        (Some(x), Some(y)) => {
            let x = untyped_as(x, AtomicType::String)?;
            let y = untyped_as(y, AtomicType::String)?;
            Ok(compare_atomic(&x, &y, implicit_tz, true)?.unwrap_or(Ordering::Equal))
        }
        _ => Ok(Ordering::Equal),
    }
}

/// Equality used by `fn:distinct-values`, `fn:index-of` and `fn:deep-equal`:
/// incomparable pairs are simply unequal and `NaN` equals `NaN`.
pub(crate) fn atomic_equal(a: &AtomicValue, b: &AtomicValue, implicit_tz: i16) -> bool {
    let nan = |v: &AtomicValue| v.to_f64().is_some_and(f64::is_nan);
    if a.is_numeric() && b.is_numeric() && nan(a) && nan(b) {
        return true;
    }
    matches!(compare_atomic(a, b, implicit_tz, false), Ok(Some(Ordering::Equal)))
}

pub(super) fn value<N: XdmNode>(
    op: CompOp,
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut l = Operand::new(left, ctx, params)?;
    let mut r = Operand::new(right, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(l.poll()?);
        ready_or_pending!(r.poll()?);
        let a = ready_or_pending!(atomize(&*params.facade, l.items())?);
        let b = ready_or_pending!(atomize(&*params.facade, r.items())?);
        match (a.as_slice(), b.as_slice()) {
            ([], _) | (_, []) => Ok(Fetch::Ready(Vec::new())),
            ([x], [y]) => Ok(Fetch::Ready(vec![boolean(value_compare(op, x, y, params.implicit_timezone)?)])),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "value comparison operands must be single atomic values")),
        }
    }))
}

pub(super) fn general<N: XdmNode>(
    op: CompOp,
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut comparison = GeneralComparison {
        op,
        left: left.evaluate(ctx, params)?,
        right: right.evaluate(ctx, params)?,
        left_item: None,
        right_item: None,
        left_values: VecDeque::new(),
        current: None,
        right_values: Vec::new(),
        right_done: false,
        next_right: 0,
    };
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || Ok(comparison.poll(&params)?.map(|b| vec![boolean(b)]))))
}

/// Existential comparison that pulls its operands only until a matching pair turns up.
///
/// Every left value meets every right value, so the atomized right operand is buffered as
/// it is pulled. Items whose atomization suspended are kept until it completes.
struct GeneralComparison<N> {
    op: CompOp,
    left: XdmSequenceStream<N>,
    right: XdmSequenceStream<N>,
    left_item: Option<XdmItem<N>>,
    right_item: Option<XdmItem<N>>,
    left_values: VecDeque<AtomicValue>,
    current: Option<AtomicValue>,
    right_values: Vec<AtomicValue>,
    right_done: bool,
    next_right: usize,
}

impl<N: XdmNode> GeneralComparison<N> {
    fn poll(&mut self, params: &ExecutionParameters<N>) -> EResult<Fetch<bool>> {
        let facade = &*params.facade;
        loop {
            let Some(x) = &self.current else {
                if let Some(v) = self.left_values.pop_front() {
                    self.current = Some(v);
                    self.next_right = 0;
                    continue;
                }
                if self.left_item.is_none() {
                    match pull_or_pending!(self.left) {
                        Some(item) => self.left_item = Some(item),
                        None => return Ok(Fetch::Ready(false)),
                    }
                }
                if let Some(item) = &self.left_item {
                    let mut values = Vec::new();
                    ready_or_pending!(atomize_item(facade, item, &mut values)?);
                    self.left_values.extend(values);
                    self.left_item = None;
                }
                continue;
            };
            if let Some(y) = self.right_values.get(self.next_right) {
                self.next_right += 1;
                if general_pair(self.op, x, y, params.implicit_timezone)? {
                    return Ok(Fetch::Ready(true));
                }
                continue;
            }
            if self.right_done {
                self.current = None;
                continue;
            }
            if self.right_item.is_none() {
                match pull_or_pending!(self.right) {
                    Some(item) => self.right_item = Some(item),
                    None => {
                        self.right_done = true;
                        continue;
                    }
                }
            }
            if let Some(item) = &self.right_item {
                ready_or_pending!(atomize_item(facade, item, &mut self.right_values)?);
                self.right_item = None;
            }
        }
    }
}

fn single_node<N: XdmNode>(items: &[XdmItem<N>]) -> EResult<Option<N>> {
    match items {
        [] => Ok(None),
        [XdmItem::Node(n)] => Ok(Some(n.clone())),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "node comparison operands must be single nodes")),
    }
}

pub(super) fn node<N: XdmNode>(
    op: NodeCompOp,
    left: &Rc<Expression>,
    right: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut l = Operand::new(left, ctx, params)?;
    let mut r = Operand::new(right, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(l.poll()?);
        ready_or_pending!(r.poll()?);
        let (Some(a), Some(b)) = (single_node(l.items())?, single_node(r.items())?) else {
            return Ok(Fetch::Ready(Vec::new()));
        };
        let result = match op {
            NodeCompOp::Is => a == b,
            NodeCompOp::Precedes => ready_or_pending!(params.order.compare(&*params.facade, &a, &b)).is_lt(),
            NodeCompOp::Follows => ready_or_pending!(params.order.compare(&*params.facade, &a, &b)).is_gt(),
        };
        Ok(Fetch::Ready(vec![boolean(result)]))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::{Components, DateTime, Duration};
    use rstest::rstest;
    use rust_decimal::Decimal;

    fn int(i: i64) -> AtomicValue {
        AtomicValue::integer(i)
    }

    #[rstest]
    #[case(CompOp::Eq, int(1), AtomicValue::double(1.0), true)]
    #[case(CompOp::Lt, int(1), AtomicValue::decimal(Decimal::new(15, 1)), true)]
    #[case(CompOp::Ne, AtomicValue::double(f64::NAN), AtomicValue::double(f64::NAN), true)]
    #[case(CompOp::Eq, AtomicValue::double(f64::NAN), AtomicValue::double(f64::NAN), false)]
    #[case(CompOp::Gt, AtomicValue::string("b"), AtomicValue::string("a"), true)]
    #[case(CompOp::Eq, AtomicValue::untyped("x"), AtomicValue::string("x"), true)]
    fn value_comparisons(#[case] op: CompOp, #[case] a: AtomicValue, #[case] b: AtomicValue, #[case] expected: bool) {
        assert_eq!(value_compare(op, &a, &b, 0).unwrap(), expected);
    }

    #[rstest]
    #[case(false, None, Some(AtomicValue::double(f64::NAN)), Ordering::Less)]
    #[case(true, None, Some(AtomicValue::double(f64::NAN)), Ordering::Greater)]
    #[case(false, Some(AtomicValue::double(f64::NAN)), Some(int(-5)), Ordering::Less)]
    #[case(true, Some(AtomicValue::double(f64::NAN)), Some(int(-5)), Ordering::Less)]
    #[case(false, Some(AtomicValue::untyped("b")), Some(AtomicValue::string("a")), Ordering::Greater)]
    fn sort_order_places_empty_and_nan(
        #[case] empty_greatest: bool,
        #[case] a: Option<AtomicValue>,
        #[case] b: Option<AtomicValue>,
        #[case] expected: Ordering,
    ) {
        assert_eq!(sort_compare(a.as_ref(), b.as_ref(), empty_greatest, 0).unwrap(), expected);
    }

    #[test]
    fn string_and_integer_are_incomparable() {
        let err = value_compare(CompOp::Eq, &AtomicValue::string("1"), &int(1), 0).unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }

    #[test]
    fn general_comparison_casts_untyped_to_the_other_side() {
        assert!(general_pair(CompOp::Eq, &AtomicValue::untyped("2"), &int(2), 0).unwrap());
        assert!(general_pair(CompOp::Lt, &AtomicValue::untyped("10"), &AtomicValue::double(9.5), 0).is_ok_and(|b| !b));
        let err = general_pair(CompOp::Eq, &AtomicValue::untyped("abc"), &int(2), 0).unwrap_err();
        assert!(err.is(ErrorCode::FORG0001));
    }

    #[test]
    fn durations_of_mixed_subtypes_only_support_equality() {
        let ym = AtomicValue::duration(AtomicType::YearMonthDuration, Duration::from_months(12));
        let dt = AtomicValue::duration(AtomicType::DayTimeDuration, Duration::from_seconds(Decimal::ZERO));
        assert!(value_compare(CompOp::Lt, &ym, &dt, 0).is_err());
        assert!(value_compare(CompOp::Ne, &ym, &dt, 0).unwrap());
    }

    #[test]
    fn dates_compare_on_the_timeline() {
        let a = DateTime::parse(Components::DATE_TIME, "2020-01-01T10:00:00+01:00").unwrap();
        let b = DateTime::parse(Components::DATE_TIME, "2020-01-01T09:00:00Z").unwrap();
        let a = AtomicValue::date_time(AtomicType::DateTime, a);
        let b = AtomicValue::date_time(AtomicType::DateTime, b);
        assert!(value_compare(CompOp::Eq, &a, &b, 0).unwrap());
    }

    #[test]
    fn nan_is_equal_to_itself_for_distinctness() {
        assert!(atomic_equal(&AtomicValue::double(f64::NAN), &AtomicValue::float(f32::NAN), 0));
        assert!(!atomic_equal(&AtomicValue::string("1"), &int(1), 0));
    }
}
