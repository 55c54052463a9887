//! Arithmetic on numbers, durations and date/time values; unary signs, `||` and `to`.

use super::{EResult, Operand, atomize_optional};
use crate::compiler::Expression;
use crate::engine::context::{DynamicContext, ExecutionParameters};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::parser::ast::ArithOp;
use crate::types::{AtomicType, atomize, cast_atomic};
use crate::xdm::{
    AtomicPayload, AtomicValue, Components, DateTime, Duration, Fetch, Pull, XdmItem, XdmSequenceStream,
    ready_or_pending,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::rc::Rc;

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "numeric overflow")
}

fn division_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

fn unsupported(op: ArithOp, a: &AtomicValue, b: &AtomicValue) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("{op:?} is not defined for {} and {}", a.ty(), b.ty()))
}

fn untyped_to_double(v: AtomicValue) -> EResult<AtomicValue> {
    if v.ty() == AtomicType::UntypedAtomic { cast_atomic(&v, AtomicType::Double) } else { Ok(v) }
}

/// Numeric tower rank: integer < decimal < float < double.
fn numeric_rank(v: &AtomicValue) -> u8 {
    match v.payload() {
        AtomicPayload::Integer(_) => 0,
        AtomicPayload::Decimal(_) => 1,
        AtomicPayload::Float(_) => 2,
        _ => 3,
    }
}

/// Applies a binary arithmetic operator to two atomic values.
pub(crate) fn arithmetic(op: ArithOp, a: AtomicValue, b: AtomicValue, implicit_tz: i16) -> EResult<AtomicValue> {
    let a = untyped_to_double(a)?;
    let b = untyped_to_double(b)?;
    if a.is_numeric() && b.is_numeric() {
        return numeric(op, &a, &b);
    }
    use AtomicPayload as P;
    match (a.payload(), b.payload()) {
        (P::Duration(x), P::Duration(y)) => durations(op, &a, x, &b, y),
        (P::Duration(d), _) if b.is_numeric() => scale_duration(op, &a, d, &b),
        (_, P::Duration(d)) if a.is_numeric() && op == ArithOp::Mul => scale_duration(op, &b, d, &a),
        (P::DateTime(x), P::Duration(d)) => shift_date_time(op, &a, x, &b, d),
        (P::Duration(d), P::DateTime(x)) if op == ArithOp::Add => shift_date_time(op, &b, x, &a, d),
        (P::DateTime(x), P::DateTime(y)) if op == ArithOp::Sub && a.ty().primitive() == b.ty().primitive() => {
            if !matches!(a.ty().primitive(), AtomicType::DateTime | AtomicType::Date | AtomicType::Time) {
                return Err(unsupported(op, &a, &b));
            }
            let secs = x.to_timeline(implicit_tz) - y.to_timeline(implicit_tz);
            Ok(AtomicValue::duration(AtomicType::DayTimeDuration, Duration::from_seconds(secs)))
        }
        _ => Err(unsupported(op, &a, &b)),
    }
}

fn numeric(op: ArithOp, a: &AtomicValue, b: &AtomicValue) -> EResult<AtomicValue> {
    let rank = numeric_rank(a).max(numeric_rank(b));
    match rank {
        0 => {
            let (x, y) = (a.to_i128().ok_or_else(overflow)?, b.to_i128().ok_or_else(overflow)?);
            match op {
                ArithOp::Add => x.checked_add(y).map(AtomicValue::big_integer).ok_or_else(overflow),
                ArithOp::Sub => x.checked_sub(y).map(AtomicValue::big_integer).ok_or_else(overflow),
                ArithOp::Mul => x.checked_mul(y).map(AtomicValue::big_integer).ok_or_else(overflow),
                ArithOp::IDiv => {
                    if y == 0 {
                        return Err(division_by_zero());
                    }
                    x.checked_div(y).map(AtomicValue::big_integer).ok_or_else(overflow)
                }
                ArithOp::Mod => {
                    if y == 0 {
                        return Err(division_by_zero());
                    }
                    x.checked_rem(y).map(AtomicValue::big_integer).ok_or_else(overflow)
                }
                ArithOp::Div => {
                    if y == 0 {
                        return Err(division_by_zero());
                    }
                    let (dx, dy) = (Decimal::from_i128(x).ok_or_else(overflow)?, Decimal::from_i128(y).ok_or_else(overflow)?);
                    dx.checked_div(dy).map(AtomicValue::decimal).ok_or_else(overflow)
                }
            }
        }
        1 => {
            let (x, y) = (a.to_decimal().ok_or_else(overflow)?, b.to_decimal().ok_or_else(overflow)?);
            if matches!(op, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod) && y.is_zero() {
                return Err(division_by_zero());
            }
            let result = match op {
                ArithOp::Add => x.checked_add(y),
                ArithOp::Sub => x.checked_sub(y),
                ArithOp::Mul => x.checked_mul(y),
                ArithOp::Div => x.checked_div(y),
                ArithOp::Mod => x.checked_rem(y),
                ArithOp::IDiv => {
                    let q = x.checked_div(y).ok_or_else(overflow)?.trunc();
                    return q.to_i128().map(AtomicValue::big_integer).ok_or_else(overflow);
                }
            };
            result.map(AtomicValue::decimal).ok_or_else(overflow)
        }
        _ => {
            let (x, y) = (a.to_f64().unwrap_or(f64::NAN), b.to_f64().unwrap_or(f64::NAN));
            let value = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
                ArithOp::IDiv => {
                    if y == 0.0 {
                        return Err(division_by_zero());
                    }
                    let q = (x / y).trunc();
                    if !q.is_finite() {
                        return Err(Error::from_code(ErrorCode::FOAR0002, "integer division of NaN or infinity"));
                    }
                    return Decimal::from_f64(q)
                        .and_then(|d| d.to_i128())
                        .map(AtomicValue::big_integer)
                        .ok_or_else(overflow);
                }
            };
            #[allow(clippy::cast_possible_truncation)]
            Ok(if rank == 2 { AtomicValue::float(value as f32) } else { AtomicValue::double(value) })
        }
    }
}

fn duration_kind(v: &AtomicValue) -> Option<AtomicType> {
    matches!(v.ty(), AtomicType::YearMonthDuration | AtomicType::DayTimeDuration).then_some(v.ty())
}

fn durations(op: ArithOp, a: &AtomicValue, x: &Duration, b: &AtomicValue, y: &Duration) -> EResult<AtomicValue> {
    let kind = duration_kind(a).filter(|k| Some(*k) == duration_kind(b)).ok_or_else(|| unsupported(op, a, b))?;
    let fail = || Error::from_code(ErrorCode::FODT0002, "duration overflow");
    match op {
        ArithOp::Add => x.checked_add(y).map(|d| AtomicValue::duration(kind, d)).ok_or_else(fail),
        ArithOp::Sub => x.checked_add(&y.negate()).map(|d| AtomicValue::duration(kind, d)).ok_or_else(fail),
        ArithOp::Div => {
            let (num, den) = if kind == AtomicType::YearMonthDuration {
                (Decimal::from(x.months), Decimal::from(y.months))
            } else {
                (x.seconds, y.seconds)
            };
            if den.is_zero() {
                return Err(division_by_zero());
            }
            num.checked_div(den).map(AtomicValue::decimal).ok_or_else(overflow)
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn scale_duration(op: ArithOp, dur: &AtomicValue, d: &Duration, factor: &AtomicValue) -> EResult<AtomicValue> {
    let kind = duration_kind(dur).ok_or_else(|| unsupported(op, dur, factor))?;
    let f = factor.to_f64().unwrap_or(f64::NAN);
    if f.is_nan() {
        return Err(Error::from_code(ErrorCode::FOCA0005, "cannot scale a duration by NaN"));
    }
    let by = match op {
        ArithOp::Mul => factor.to_decimal(),
        ArithOp::Div => {
            if f == 0.0 {
                return Err(Error::from_code(ErrorCode::FODT0002, "duration divided by zero"));
            }
            factor.to_decimal().and_then(|x| Decimal::ONE.checked_div(x))
        }
        _ => return Err(unsupported(op, dur, factor)),
    };
    let by = by.ok_or_else(|| Error::from_code(ErrorCode::FODT0002, "duration overflow"))?;
    let scaled = if kind == AtomicType::YearMonthDuration {
        let months = (Decimal::from(d.months) * by).round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        Duration::from_months(months.to_i64().ok_or_else(|| Error::from_code(ErrorCode::FODT0002, "duration overflow"))?)
    } else {
        Duration::from_seconds(d.seconds.checked_mul(by).ok_or_else(|| Error::from_code(ErrorCode::FODT0002, "duration overflow"))?)
    };
    Ok(AtomicValue::duration(kind, scaled))
}

fn shift_date_time(op: ArithOp, when: &AtomicValue, v: &DateTime, dur: &AtomicValue, d: &Duration) -> EResult<AtomicValue> {
    let kind = duration_kind(dur).ok_or_else(|| unsupported(op, when, dur))?;
    let primitive = when.ty().primitive();
    let allowed = match primitive {
        AtomicType::DateTime | AtomicType::Date => true,
        AtomicType::Time => kind == AtomicType::DayTimeDuration,
        _ => false,
    };
    if !allowed || !matches!(op, ArithOp::Add | ArithOp::Sub) {
        return Err(unsupported(op, when, dur));
    }
    let delta = if op == ArithOp::Sub { d.negate() } else { *d };
    let shifted = v.add_duration(&delta).ok_or_else(|| Error::from_code(ErrorCode::FODT0001, "date/time overflow"))?;
    let shifted = match primitive {
        AtomicType::Date => shifted.restrict(Components::DATE),
        AtomicType::Time => shifted.restrict(Components::TIME),
        _ => shifted,
    };
    Ok(AtomicValue::date_time(primitive, shifted))
}

pub(super) fn binary<N: XdmNode>(
    op: ArithOp,
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
        let Some(a) = ready_or_pending!(atomize_optional(&params, l.items(), "arithmetic")?) else {
            return Ok(Fetch::Ready(Vec::new()));
        };
        let Some(b) = ready_or_pending!(atomize_optional(&params, r.items(), "arithmetic")?) else {
            return Ok(Fetch::Ready(Vec::new()));
        };
        Ok(Fetch::Ready(vec![XdmItem::Atomic(arithmetic(op, a, b, params.implicit_timezone)?)]))
    }))
}

pub(crate) fn negate(v: AtomicValue) -> EResult<AtomicValue> {
    let v = untyped_to_double(v)?;
    match v.payload() {
        AtomicPayload::Integer(i) => i.checked_neg().map(AtomicValue::big_integer).ok_or_else(overflow),
        AtomicPayload::Decimal(d) => Ok(AtomicValue::decimal(-*d)),
        AtomicPayload::Float(f) => Ok(AtomicValue::float(-*f)),
        AtomicPayload::Double(d) => Ok(AtomicValue::double(-*d)),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("unary minus is not defined for {}", v.ty()))),
    }
}

pub(super) fn unary<N: XdmNode>(
    negative: bool,
    operand: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut op = Operand::new(operand, ctx, params)?;
    let params = params.clone();
    Ok(XdmSequenceStream::deferred(move || {
        ready_or_pending!(op.poll()?);
        let Some(v) = ready_or_pending!(atomize_optional(&params, op.items(), "unary arithmetic")?) else {
            return Ok(Fetch::Ready(Vec::new()));
        };
        let v = if negative {
            negate(v)?
        } else {
            let v = untyped_to_double(v)?;
            if !v.is_numeric() {
                return Err(Error::from_code(ErrorCode::XPTY0004, format!("unary plus is not defined for {}", v.ty())));
            }
            v
        };
        Ok(Fetch::Ready(vec![XdmItem::Atomic(v)]))
    }))
}

pub(super) fn concat<N: XdmNode>(
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
        let a = ready_or_pending!(atomize_optional(&params, l.items(), "'||'")?);
        let b = ready_or_pending!(atomize_optional(&params, r.items(), "'||'")?);
        let mut s = a.map(|v| v.lexical()).unwrap_or_default();
        s.push_str(&b.map(|v| v.lexical()).unwrap_or_default());
        Ok(Fetch::Ready(vec![XdmItem::Atomic(AtomicValue::string(s))]))
    }))
}

fn range_bound(v: Option<AtomicValue>) -> EResult<Option<i128>> {
    let Some(v) = v else { return Ok(None) };
    let v = if v.ty() == AtomicType::UntypedAtomic { cast_atomic(&v, AtomicType::Integer)? } else { v };
    if !v.ty().is_integer() {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("range bounds must be integers, got {}", v.ty())));
    }
    Ok(v.to_i128())
}

/// `a to b`, produced lazily.
pub(super) fn range<N: XdmNode>(
    from: &Rc<Expression>,
    to: &Rc<Expression>,
    ctx: &DynamicContext<N>,
    params: &ExecutionParameters<N>,
) -> EResult<XdmSequenceStream<N>> {
    let mut l = Operand::new(from, ctx, params)?;
    let mut r = Operand::new(to, ctx, params)?;
    let params = params.clone();
    let mut bounds: Option<(i128, i128)> = None;
    Ok(XdmSequenceStream::new(move || {
        if bounds.is_none() {
            for op in [&mut l, &mut r] {
                if let Fetch::Pending(s) = op.poll()? {
                    return Ok(Pull::Suspended(s));
                }
            }
            let a = match atomize(&*params.facade, l.items())? {
                Fetch::Ready(v) => v,
                Fetch::Pending(s) => return Ok(Pull::Suspended(s)),
            };
            let b = match atomize(&*params.facade, r.items())? {
                Fetch::Ready(v) => v,
                Fetch::Pending(s) => return Ok(Pull::Suspended(s)),
            };
            if a.len() > 1 || b.len() > 1 {
                return Err(Error::from_code(ErrorCode::XPTY0004, "range bounds must be single values"));
            }
            match (range_bound(a.into_iter().next())?, range_bound(b.into_iter().next())?) {
                (Some(lo), Some(hi)) => bounds = Some((lo, hi)),
                _ => bounds = Some((1, 0)),
            }
        }
        let Some((next, hi)) = bounds.as_mut() else { return Ok(Pull::Done) };
        if *next > *hi {
            return Ok(Pull::Done);
        }
        let item = XdmItem::Atomic(AtomicValue::big_integer(*next));
        *next += 1;
        Ok(Pull::Ready(item))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArithOp::Add, AtomicValue::integer(2), AtomicValue::integer(3), AtomicValue::integer(5))]
    #[case(ArithOp::Div, AtomicValue::integer(1), AtomicValue::integer(4), AtomicValue::decimal(Decimal::new(25, 2)))]
    #[case(ArithOp::IDiv, AtomicValue::integer(-7), AtomicValue::integer(2), AtomicValue::integer(-3))]
    #[case(ArithOp::Mod, AtomicValue::integer(-7), AtomicValue::integer(2), AtomicValue::integer(-1))]
    #[case(ArithOp::Mul, AtomicValue::untyped("1.5"), AtomicValue::integer(2), AtomicValue::double(3.0))]
    #[case(ArithOp::Add, AtomicValue::float(1.5), AtomicValue::integer(1), AtomicValue::float(2.5))]
    fn numeric_promotion(#[case] op: ArithOp, #[case] a: AtomicValue, #[case] b: AtomicValue, #[case] expected: AtomicValue) {
        assert_eq!(arithmetic(op, a, b, 0).unwrap(), expected);
    }

    #[test]
    fn integer_division_by_zero_fails() {
        let err = arithmetic(ArithOp::Div, AtomicValue::integer(1), AtomicValue::integer(0), 0).unwrap_err();
        assert!(err.is(ErrorCode::FOAR0001));
        let inf = arithmetic(ArithOp::Div, AtomicValue::double(1.0), AtomicValue::integer(0), 0).unwrap();
        assert_eq!(inf.to_f64(), Some(f64::INFINITY));
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = arithmetic(ArithOp::Mul, AtomicValue::big_integer(i128::MAX), AtomicValue::integer(2), 0).unwrap_err();
        assert!(err.is(ErrorCode::FOAR0002));
    }

    #[test]
    fn date_minus_date_is_a_day_time_duration() {
        let a = DateTime::parse(Components::DATE, "2024-03-01").unwrap();
        let b = DateTime::parse(Components::DATE, "2024-02-28").unwrap();
        let d = arithmetic(
            ArithOp::Sub,
            AtomicValue::date_time(AtomicType::Date, a),
            AtomicValue::date_time(AtomicType::Date, b),
            0,
        )
        .unwrap();
        assert_eq!(d.lexical(), "P2D");
    }

    #[test]
    fn date_plus_months_clamps_the_day() {
        let a = DateTime::parse(Components::DATE, "2023-01-31").unwrap();
        let one_month = AtomicValue::duration(AtomicType::YearMonthDuration, Duration::from_months(1));
        let r = arithmetic(ArithOp::Add, AtomicValue::date_time(AtomicType::Date, a), one_month, 0).unwrap();
        assert_eq!(r.lexical(), "2023-02-28");
    }

    #[test]
    fn strings_do_not_add() {
        let err = arithmetic(ArithOp::Add, AtomicValue::string("1"), AtomicValue::integer(1), 0).unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }
}
