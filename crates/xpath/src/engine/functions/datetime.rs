use super::common::{atomic, empty, integer, opt_atomic, optional};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::AtomicType;
use crate::xdm::{AtomicPayload, AtomicValue, Components, DateTime, Duration, XdmItem, XdmSequence};
use chrono::{Datelike, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Converts a chrono timestamp into an `xs:dateTime` with the same offset.
pub(crate) fn from_chrono(now: &chrono::DateTime<chrono::FixedOffset>) -> DateTime {
    let nanos = Decimal::new(i64::from(now.nanosecond() % 1_000_000_000), 9).normalize();
    DateTime::new(
        Components::DATE_TIME,
        now.year(),
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        Decimal::from(now.second()) + nanos,
        Some((now.offset().local_minus_utc() / 60) as i16),
    )
}

fn date_time_of<N>(arg: &[XdmItem<N>]) -> Option<&DateTime> {
    match opt_atomic(arg).map(AtomicValue::payload) {
        Some(AtomicPayload::DateTime(dt)) => Some(dt),
        _ => None,
    }
}

fn duration_of<N>(arg: &[XdmItem<N>]) -> Option<&Duration> {
    match opt_atomic(arg).map(AtomicValue::payload) {
        Some(AtomicPayload::Duration(d)) => Some(d),
        _ => None,
    }
}

fn day_time_duration(seconds: Decimal) -> AtomicValue {
    AtomicValue::duration(AtomicType::DayTimeDuration, Duration::from_seconds(seconds))
}

fn timezone_duration(minutes: i16) -> AtomicValue {
    day_time_duration(Decimal::from(i64::from(minutes) * 60))
}

pub(super) fn current_date_time_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::date_time(AtomicType::DateTimeStamp, cc.params.now.clone()))
}

pub(super) fn current_date_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::date_time(AtomicType::Date, cc.params.now.restrict(Components::DATE)))
}

pub(super) fn current_time_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::date_time(AtomicType::Time, cc.params.now.restrict(Components::TIME)))
}

pub(super) fn implicit_timezone_fn<N: XdmNode>(cc: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(timezone_duration(cc.params.implicit_timezone))
}

/// Which component a `*-from-*` accessor reads.
#[derive(Debug, Clone, Copy)]
pub(super) enum Part {
    Year,
    Month,
    Day,
    Hours,
    Minutes,
    Seconds,
    Timezone,
}

pub(super) fn component_fn<N: XdmNode>(part: Part) -> impl Fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> FnResult<N> {
    move |_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| {
        let Some(dt) = date_time_of(&args[0]) else { return empty() };
        match part {
            Part::Year => integer(i128::from(dt.year())),
            Part::Month => integer(i128::from(dt.month())),
            Part::Day => integer(i128::from(dt.day())),
            Part::Hours => integer(i128::from(dt.hour())),
            Part::Minutes => integer(i128::from(dt.minute())),
            Part::Seconds => atomic(AtomicValue::decimal(dt.second().normalize())),
            Part::Timezone => optional(dt.timezone().map(timezone_duration)),
        }
    }
}

/// Components of a duration, each carrying the duration's sign.
pub(super) fn duration_component_fn<N: XdmNode>(
    part: Part,
) -> impl Fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> FnResult<N> {
    move |_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| {
        let Some(d) = duration_of(&args[0]) else { return empty() };
        let whole = d.seconds.trunc().to_i128().unwrap_or(0);
        match part {
            Part::Year => integer(i128::from(d.months / 12)),
            Part::Month => integer(i128::from(d.months % 12)),
            Part::Day => integer(whole / 86_400),
            Part::Hours => integer(whole % 86_400 / 3600),
            Part::Minutes => integer(whole % 3600 / 60),
            Part::Seconds => {
                let fraction = d.seconds - d.seconds.trunc();
                atomic(AtomicValue::decimal((Decimal::from(whole % 60) + fraction).normalize()))
            }
            Part::Timezone => empty(),
        }
    }
}

/// `fn:dateTime($date, $time)`.
pub(super) fn date_time_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (Some(date), Some(time)) = (date_time_of(&args[0]), date_time_of(&args[1])) else { return empty() };
    let timezone = match (date.timezone(), time.timezone()) {
        (Some(a), Some(b)) if a != b => {
            return Err(Error::from_code(ErrorCode::FORG0008, "date and time have different timezones"));
        }
        (a, b) => a.or(b),
    };
    let combined = DateTime::new(
        Components::DATE_TIME,
        date.year(),
        date.month(),
        date.day(),
        time.hour(),
        time.minute(),
        time.second(),
        timezone,
    );
    atomic(AtomicValue::date_time(AtomicType::DateTime, combined))
}

fn timezone_arg<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> Result<Option<i16>, Error> {
    let Some(arg) = args.get(1) else { return Ok(Some(cc.params.implicit_timezone)) };
    let Some(value) = opt_atomic(arg) else { return Ok(None) };
    let AtomicPayload::Duration(d) = value.payload() else {
        return Err(Error::from_code(ErrorCode::XPTY0004, "a timezone must be an xs:dayTimeDuration"));
    };
    let minutes = d.seconds / Decimal::from(60);
    if !minutes.fract().is_zero() || minutes.abs() > Decimal::from(14 * 60) {
        return Err(Error::from_code(ErrorCode::FODT0003, format!("invalid timezone {}", value.lexical())));
    }
    Ok(minutes.to_i16())
}

/// `fn:adjust-dateTime-to-timezone` and its date and time siblings.
pub(super) fn adjust_fn<N: XdmNode>(ty: AtomicType) -> impl Fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> FnResult<N> {
    move |cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]| {
        let Some(dt) = date_time_of(&args[0]) else { return empty() };
        let timezone = timezone_arg(cc, args)?;
        let adjusted = dt
            .adjust_timezone(timezone)
            .ok_or_else(|| Error::from_code(ErrorCode::FODT0001, "date/time overflow while adjusting timezone"))?;
        atomic(AtomicValue::date_time(ty, adjusted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chrono_timestamps_keep_their_offset() {
        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2024, 2, 29, 23, 5, 7).unwrap();
        let dt = from_chrono(&now);
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 2, 29));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (23, 5, Decimal::from(7)));
        assert_eq!(dt.timezone(), Some(120));
    }
}
