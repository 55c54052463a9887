use super::common::{
    arg_or_context, atomic, atomized, check_collation, double_arg, empty, integer, integer_arg, numeric_values,
    opt_atomic,
};
use super::{CallCtx, FnResult};
use crate::engine::evaluator::arithmetic::arithmetic;
use crate::engine::evaluator::comparison::compare_atomic;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::parser::ast::ArithOp;
use crate::types::casting::promote_numeric;
use crate::types::{AtomicType, cast_atomic};
use crate::xdm::{AtomicPayload, AtomicValue, XdmSequence, ready_or_pending};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;

fn not_numeric(function: &str, v: &AtomicValue) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("fn:{function} expects a numeric value, got {}", v.ty()))
}

/// The single numeric argument of the rounding family; untyped input is read as `xs:double`.
fn numeric_arg<N>(arg: &[crate::xdm::XdmItem<N>], function: &str) -> Result<Option<AtomicValue>, Error> {
    let Some(v) = opt_atomic(arg) else { return Ok(None) };
    if v.ty() == AtomicType::UntypedAtomic {
        return cast_atomic(v, AtomicType::Double).map(Some);
    }
    if !v.is_numeric() {
        return Err(not_numeric(function, v));
    }
    Ok(Some(v.clone()))
}

/// Keeps the numeric type family of `like` for a computed value.
fn same_kind(like: &AtomicValue, i: Option<i128>, d: Option<Decimal>, f: f64) -> Result<AtomicValue, Error> {
    let overflow = || Error::from_code(ErrorCode::FOAR0002, "numeric overflow");
    Ok(match like.payload() {
        AtomicPayload::Integer(_) => AtomicValue::big_integer(i.ok_or_else(overflow)?),
        AtomicPayload::Decimal(_) => AtomicValue::decimal(d.ok_or_else(overflow)?),
        #[allow(clippy::cast_possible_truncation)]
        AtomicPayload::Float(_) => AtomicValue::float(f as f32),
        _ => AtomicValue::double(f),
    })
}

fn unary_numeric<N: XdmNode>(
    args: &[XdmSequence<N>],
    function: &str,
    on_int: impl Fn(i128) -> Option<i128>,
    on_dec: impl Fn(Decimal) -> Decimal,
    on_f64: impl Fn(f64) -> f64,
) -> FnResult<N> {
    let Some(v) = numeric_arg(&args[0], function)? else { return empty() };
    let out = match v.payload() {
        AtomicPayload::Integer(i) => same_kind(&v, on_int(*i), None, 0.0)?,
        AtomicPayload::Decimal(d) => same_kind(&v, None, Some(on_dec(*d)), 0.0)?,
        _ => same_kind(&v, None, None, on_f64(v.to_f64().unwrap_or(f64::NAN)))?,
    };
    atomic(out)
}

pub(super) fn abs_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    unary_numeric(args, "abs", i128::checked_abs, |d| d.abs(), f64::abs)
}

pub(super) fn ceiling_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    unary_numeric(args, "ceiling", Some, |d| d.ceil(), f64::ceil)
}

pub(super) fn floor_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    unary_numeric(args, "floor", Some, |d| d.floor(), f64::floor)
}

/// Rounds a decimal to `precision` digits; negative precisions round to tens, hundreds, ...
fn round_decimal(d: Decimal, precision: i128, half_even: bool) -> Option<Decimal> {
    let strategy = if half_even {
        RoundingStrategy::MidpointNearestEven
    } else if d.is_sign_negative() {
        RoundingStrategy::MidpointTowardZero
    } else {
        RoundingStrategy::MidpointAwayFromZero
    };
    if precision >= 0 {
        let dp = u32::try_from(precision.min(28)).ok()?;
        return Some(d.round_dp_with_strategy(dp, strategy));
    }
    let scale = Decimal::from_i128(10i128.checked_pow(u32::try_from(-precision).ok()?)?)?;
    let scaled = d.checked_div(scale)?.round_dp_with_strategy(0, strategy);
    scaled.checked_mul(scale)
}

fn round_double(f: f64, precision: i128, half_even: bool) -> f64 {
    if !f.is_finite() || f == 0.0 {
        return f;
    }
    let rounded = match Decimal::from_f64(f).and_then(|d| round_decimal(d, precision, half_even)) {
        Some(d) => d.to_f64().unwrap_or(f),
        None if half_even => f,
        None => (f + 0.5).floor(),
    };
    if rounded == 0.0 && f.is_sign_negative() { -0.0 } else { rounded }
}

fn rounding<N: XdmNode>(args: &[XdmSequence<N>], function: &str, half_even: bool) -> FnResult<N> {
    let Some(v) = numeric_arg(&args[0], function)? else { return empty() };
    let precision = args.get(1).and_then(|p| integer_arg(p)).unwrap_or(0);
    let out = match v.payload() {
        AtomicPayload::Integer(i) if precision >= 0 => AtomicValue::big_integer(*i),
        AtomicPayload::Integer(_) | AtomicPayload::Decimal(_) => {
            let d = v.to_decimal().ok_or_else(|| Error::from_code(ErrorCode::FOAR0002, "numeric overflow"))?;
            let r = round_decimal(d, precision, half_even);
            match v.payload() {
                AtomicPayload::Integer(_) => same_kind(&v, r.and_then(|r| r.to_i128()), None, 0.0)?,
                _ => same_kind(&v, None, r, 0.0)?,
            }
        }
        _ => same_kind(&v, None, None, round_double(v.to_f64().unwrap_or(f64::NAN), precision, half_even))?,
    };
    atomic(out)
}

pub(super) fn round_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    rounding(args, "round", false)
}

pub(super) fn round_half_to_even_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    rounding(args, "round-half-to-even", true)
}

pub(super) fn number_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let items = arg_or_context(cc, args)?;
    let values = ready_or_pending!(atomized(cc, &items)?);
    let value = match values.as_slice() {
        [v] => cast_atomic(v, AtomicType::Double).ok().and_then(|d| d.to_f64()).unwrap_or(f64::NAN),
        [] => f64::NAN,
        _ => return Err(Error::from_code(ErrorCode::XPTY0004, "fn:number expects at most one item")),
    };
    atomic(AtomicValue::double(value))
}

pub(super) fn count_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    integer(args[0].len() as i128)
}

fn summable(v: &AtomicValue) -> bool {
    v.is_numeric() || matches!(v.ty(), AtomicType::YearMonthDuration | AtomicType::DayTimeDuration)
}

fn total(values: Vec<AtomicValue>, implicit_tz: i16, function: &str) -> Result<Option<AtomicValue>, Error> {
    let mut acc: Option<AtomicValue> = None;
    for v in values {
        if !summable(&v) {
            return Err(Error::from_code(ErrorCode::FORG0006, format!("fn:{function} cannot add values of type {}", v.ty())));
        }
        acc = Some(match acc {
            None => v,
            Some(a) => arithmetic(ArithOp::Add, a, v, implicit_tz).map_err(|e| {
                if e.is(ErrorCode::XPTY0004) { Error::from_code(ErrorCode::FORG0006, e.message) } else { e }
            })?,
        });
    }
    Ok(acc)
}

pub(super) fn sum_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let values = ready_or_pending!(numeric_values(cc, &args[0])?);
    match total(values, cc.params.implicit_timezone, "sum")? {
        Some(sum) => atomic(sum),
        None => match args.get(1) {
            Some(zero) => super::common::optional(opt_atomic(zero).cloned()),
            None => integer(0),
        },
    }
}

pub(super) fn avg_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let values = ready_or_pending!(numeric_values(cc, &args[0])?);
    let count = values.len();
    let Some(sum) = total(values, cc.params.implicit_timezone, "avg")? else { return empty() };
    atomic(arithmetic(ArithOp::Div, sum, AtomicValue::big_integer(count as i128), cc.params.implicit_timezone)?)
}

fn extreme<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>], want: Ordering, function: &str) -> FnResult<N> {
    check_collation(args.get(1))?;
    let values = ready_or_pending!(numeric_values(cc, &args[0])?);
    let values: Vec<AtomicValue> = values
        .into_iter()
        .map(|v| if v.ty() == AtomicType::AnyURI { v.relabel(AtomicType::String) } else { v })
        .collect();
    let Some(first) = values.first() else { return empty() };
    let widest = values.iter().filter(|v| v.is_numeric()).map(|v| v.ty().primitive()).max_by_key(|t| match t {
        AtomicType::Integer => 0,
        AtomicType::Decimal => 1,
        AtomicType::Float => 2,
        _ => 3,
    });
    let mut best = first.clone();
    for v in &values {
        if v.to_f64().is_some_and(f64::is_nan) && v.is_numeric() {
            best = v.clone();
            break;
        }
        let ord = compare_atomic(v, &best, cc.params.implicit_timezone, true)
            .map_err(|_| Error::from_code(ErrorCode::FORG0006, format!("fn:{function}: values are not comparable")))?;
        if ord == Some(want) {
            best = v.clone();
        }
    }
    if let Some(target) = widest.filter(|t| *t != best.ty().primitive() && *t != AtomicType::Integer) {
        best = promote_numeric(&best, target).unwrap_or(best);
    }
    atomic(best)
}

pub(super) fn min_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    extreme(cc, args, Ordering::Less, "min")
}

pub(super) fn max_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    extreme(cc, args, Ordering::Greater, "max")
}

pub(super) fn math_pi<N: XdmNode>(_cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::double(std::f64::consts::PI))
}

fn math_unary<N: XdmNode>(args: &[XdmSequence<N>], f: impl Fn(f64) -> f64) -> FnResult<N> {
    if args[0].is_empty() {
        return empty();
    }
    atomic(AtomicValue::double(f(double_arg(&args[0]))))
}

pub(super) fn math_sqrt<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::sqrt)
}

pub(super) fn math_exp<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::exp)
}

pub(super) fn math_exp10<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, |x| 10f64.powf(x))
}

pub(super) fn math_log<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::ln)
}

pub(super) fn math_log10<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::log10)
}

pub(super) fn math_sin<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::sin)
}

pub(super) fn math_cos<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::cos)
}

pub(super) fn math_tan<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::tan)
}

pub(super) fn math_asin<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::asin)
}

pub(super) fn math_acos<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::acos)
}

pub(super) fn math_atan<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    math_unary(args, f64::atan)
}

pub(super) fn math_atan2<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::double(double_arg(&args[0]).atan2(double_arg(&args[1]))))
}

pub(super) fn math_pow<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    if args[0].is_empty() {
        return empty();
    }
    let (x, y) = (double_arg(&args[0]), double_arg(&args[1]));
    // pow(1, y) is 1 even for NaN and infinite y; -1 to an infinite power is 1 as well
    let value = if x == 1.0 || (x == -1.0 && y.is_infinite()) { 1.0 } else { x.powf(y) };
    atomic(AtomicValue::double(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2.5", 0, false, "3")]
    #[case("-2.5", 0, false, "-2")]
    #[case("2.5", 0, true, "2")]
    #[case("3.5", 0, true, "4")]
    #[case("1234.567", -2, false, "1200")]
    #[case("3.14159", 2, false, "3.14")]
    fn decimal_rounding(#[case] input: &str, #[case] precision: i128, #[case] even: bool, #[case] expected: &str) {
        let d: Decimal = input.parse().unwrap();
        assert_eq!(round_decimal(d, precision, even).unwrap().normalize().to_string(), expected);
    }

    #[test]
    fn double_rounding_keeps_negative_zero() {
        let r = round_double(-0.4, 0, false);
        assert_eq!(r, 0.0);
        assert!(r.is_sign_negative());
    }

    #[test]
    fn sum_rejects_strings() {
        let err = total(vec![AtomicValue::integer(1), AtomicValue::string("x")], 0, "sum").unwrap_err();
        assert!(err.is(ErrorCode::FORG0006));
    }

    #[test]
    fn sum_promotes_mixed_numerics() {
        let sum = total(vec![AtomicValue::integer(1), AtomicValue::double(0.5)], 0, "sum").unwrap().unwrap();
        assert_eq!(sum, AtomicValue::double(1.5));
    }
}
