//! Date, time and duration payloads.
//!
//! Every date/time type (`xs:dateTime`, `xs:date`, `xs:time` and the five Gregorian
//! fragments) shares [`DateTime`]; which fields are meaningful is recorded in
//! [`Components`]. Durations keep months and seconds apart, as the XSD value space does.

use bitflags::bitflags;
use rust_decimal::Decimal;
use rust_decimal::prelude::{Signed, ToPrimitive};
use std::cmp::Ordering;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Components: u8 {
        const YEAR = 0b0001;
        const MONTH = 0b0010;
        const DAY = 0b0100;
        const TIME = 0b1000;
        const DATE = Self::YEAR.bits() | Self::MONTH.bits() | Self::DAY.bits();
        const DATE_TIME = Self::DATE.bits() | Self::TIME.bits();
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateTime {
    components: Components,
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    /// Seconds including the fractional part, `0 <= second < 60`.
    second: Decimal,
    /// Offset from UTC in minutes.
    timezone: Option<i16>,
}

pub(crate) fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub(crate) fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i32, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + i64::from(m <= 2);
    (i32::try_from(year).unwrap_or(i32::MAX), u8::try_from(m).unwrap_or(1), u8::try_from(d).unwrap_or(1))
}

struct Scanner<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(s: &'a str) -> Self {
        Self { s: s.as_bytes(), pos: 0 }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.s.get(self.pos) == Some(&b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn digits(&mut self, exact: Option<usize>) -> Option<(u64, usize)> {
        let start = self.pos;
        while self.s.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        let len = self.pos - start;
        if len == 0 || exact.is_some_and(|n| n != len) {
            return None;
        }
        let text = std::str::from_utf8(&self.s[start..self.pos]).ok()?;
        Some((text.parse().ok()?, len))
    }

    fn fixed(&mut self, n: usize) -> Option<u8> {
        self.digits(Some(n)).and_then(|(v, _)| u8::try_from(v).ok())
    }

    fn at_end(&self) -> bool {
        self.pos == self.s.len()
    }

    fn rest(&self) -> &'a str {
        std::str::from_utf8(&self.s[self.pos..]).unwrap_or("")
    }
}

fn parse_year(sc: &mut Scanner<'_>) -> Option<i32> {
    let negative = sc.eat(b'-');
    let start = sc.pos;
    let (v, len) = sc.digits(None)?;
    if len < 4 || (len > 4 && sc.s[start] == b'0') {
        return None;
    }
    let y = i32::try_from(v).ok()?;
    Some(if negative { -y } else { y })
}

fn parse_timezone(sc: &mut Scanner<'_>) -> Option<Option<i16>> {
    if sc.at_end() {
        return Some(None);
    }
    if sc.eat(b'Z') {
        return sc.at_end().then_some(Some(0));
    }
    let sign: i16 = if sc.eat(b'+') {
        1
    } else if sc.eat(b'-') {
        -1
    } else {
        return None;
    };
    let h = i16::from(sc.fixed(2)?);
    if !sc.eat(b':') {
        return None;
    }
    let m = i16::from(sc.fixed(2)?);
    if m > 59 || h > 14 || (h == 14 && m != 0) || !sc.at_end() {
        return None;
    }
    Some(Some(sign * (h * 60 + m)))
}

fn parse_time_part(sc: &mut Scanner<'_>) -> Option<(u8, u8, Decimal)> {
    let h = sc.fixed(2)?;
    if !sc.eat(b':') {
        return None;
    }
    let m = sc.fixed(2)?;
    if !sc.eat(b':') {
        return None;
    }
    let whole = sc.fixed(2)?;
    let mut second = Decimal::from(whole);
    if sc.eat(b'.') {
        let start = sc.pos;
        sc.digits(None)?;
        let frac = std::str::from_utf8(&sc.s[start..sc.pos]).ok()?;
        let frac = if frac.len() > 20 { &frac[..20] } else { frac };
        let text = format!("{whole}.{frac}");
        second = text.parse().ok()?;
    }
    if m > 59 || second >= Decimal::from(60) {
        return None;
    }
    if h == 24 {
        return (m == 0 && second.is_zero()).then_some((24, 0, Decimal::ZERO));
    }
    (h < 24).then_some((h, m, second))
}

impl DateTime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        components: Components,
        year: i32,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: Decimal,
        timezone: Option<i16>,
    ) -> Self {
        Self { components, year, month, day, hour, minute, second, timezone }
    }

    fn blank(components: Components) -> Self {
        Self::new(components, 1972, 12, 31, 0, 0, Decimal::ZERO, None)
    }

    pub fn components(&self) -> Components {
        self.components
    }
    pub fn year(&self) -> i32 {
        self.year
    }
    pub fn month(&self) -> u8 {
        self.month
    }
    pub fn day(&self) -> u8 {
        self.day
    }
    pub fn hour(&self) -> u8 {
        self.hour
    }
    pub fn minute(&self) -> u8 {
        self.minute
    }
    pub fn second(&self) -> Decimal {
        self.second
    }
    pub fn timezone(&self) -> Option<i16> {
        self.timezone
    }

    /// Parses the lexical form for the given component set.
    ///
    /// `DATE_TIME` reads `xs:dateTime`, `DATE` reads `xs:date`, `TIME` reads `xs:time`,
    /// and the partial date sets read the Gregorian fragments (`--MM-DD`, `---DD`, ...).
    pub fn parse(components: Components, text: &str) -> Option<Self> {
        let mut sc = Scanner::new(text.trim());
        let mut v = Self::blank(components);
        if components.contains(Components::YEAR) {
            v.year = parse_year(&mut sc)?;
        } else if components.intersects(Components::MONTH | Components::DAY) {
            if !(sc.eat(b'-') && sc.eat(b'-')) {
                return None;
            }
            if !components.contains(Components::MONTH) && !sc.eat(b'-') {
                return None;
            }
        }
        if components.contains(Components::MONTH) {
            if components.contains(Components::YEAR) && !sc.eat(b'-') {
                return None;
            }
            v.month = sc.fixed(2)?;
            if !(1..=12).contains(&v.month) {
                return None;
            }
        }
        if components.contains(Components::DAY) {
            if components.contains(Components::MONTH) && !sc.eat(b'-') {
                return None;
            }
            v.day = sc.fixed(2)?;
            let leap_ref = if components.contains(Components::YEAR) { v.year } else { 2000 };
            let max = if components.contains(Components::MONTH) { days_in_month(leap_ref, v.month) } else { 31 };
            if v.day == 0 || v.day > max {
                return None;
            }
        }
        let mut roll_day = false;
        if components.contains(Components::TIME) {
            if components.contains(Components::DAY) && !sc.eat(b'T') {
                return None;
            }
            let (h, m, s) = parse_time_part(&mut sc)?;
            roll_day = h == 24;
            v.hour = if roll_day { 0 } else { h };
            v.minute = m;
            v.second = s;
        }
        v.timezone = parse_timezone(&mut sc)?;
        if !sc.rest().is_empty() {
            return None;
        }
        if roll_day && components.contains(Components::DAY) {
            let days = v.day_number() + 1;
            let (y, mo, d) = civil_from_days(days);
            v.year = y;
            v.month = mo;
            v.day = d;
        }
        Some(v)
    }

    fn day_number(&self) -> i64 {
        days_from_civil(self.year, self.month, self.day)
    }

    fn local_seconds(&self) -> Decimal {
        let days = days_from_civil(self.year, self.month, self.day);
        Decimal::from(days * SECONDS_PER_DAY + i64::from(self.hour) * 3600 + i64::from(self.minute) * 60) + self.second
    }

    /// Seconds since the epoch in UTC; a missing timezone is read as `implicit_tz` minutes.
    pub fn to_timeline(&self, implicit_tz: i16) -> Decimal {
        let days = days_from_civil(self.year, self.month, self.day);
        let secs = days * SECONDS_PER_DAY + i64::from(self.hour) * 3600 + i64::from(self.minute) * 60;
        let tz = i64::from(self.timezone.unwrap_or(implicit_tz)) * 60;
        Decimal::from(secs - tz) + self.second
    }

    /// Builds a full date/time from a timeline position in the given timezone.
    pub fn from_timeline(components: Components, secs: Decimal, timezone: Option<i16>) -> Option<Self> {
        let local = secs + Decimal::from(i64::from(timezone.unwrap_or(0)) * 60);
        let whole = local.floor();
        let frac = local - whole;
        let whole = whole.to_i64()?;
        let days = whole.div_euclid(SECONDS_PER_DAY);
        let rem = whole.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        let hour = u8::try_from(rem / 3600).ok()?;
        let minute = u8::try_from((rem % 3600) / 60).ok()?;
        let second = Decimal::from(rem % 60) + frac;
        Some(Self::new(components, year, month, day, hour, minute, second, timezone))
    }

    /// Keeps only the given components; date parts are never invented.
    pub fn restrict(&self, components: Components) -> Self {
        let mut v = self.clone();
        v.components = components;
        if !components.contains(Components::TIME) {
            v.hour = 0;
            v.minute = 0;
            v.second = Decimal::ZERO;
        }
        if !components.contains(Components::YEAR) {
            v.year = 1972;
        }
        if !components.contains(Components::MONTH) {
            v.month = 12;
        }
        if !components.contains(Components::DAY) {
            v.day = if components.contains(Components::MONTH) { 1 } else { 31 };
        }
        v
    }

    /// `xs:date` promoted to `xs:dateTime` at midnight.
    pub fn at_midnight(&self) -> Self {
        let mut v = self.clone();
        v.components = Components::DATE_TIME;
        v.hour = 0;
        v.minute = 0;
        v.second = Decimal::ZERO;
        v
    }

    pub fn with_timezone(&self, timezone: Option<i16>) -> Self {
        let mut v = self.clone();
        v.timezone = timezone;
        v
    }

    /// Shifts to another timezone keeping the same instant (timezone-less values just gain one).
    pub fn adjust_timezone(&self, timezone: Option<i16>) -> Option<Self> {
        match (self.timezone, timezone) {
            (_, None) => Some(self.with_timezone(None)),
            (None, Some(tz)) => Some(self.with_timezone(Some(tz))),
            (Some(_), Some(tz)) => {
                let secs = self.to_timeline(0);
                Self::from_timeline(self.components, secs, Some(tz))
            }
        }
    }

    /// Ordering for the XPath comparison operators.
    pub fn compare(&self, other: &Self, implicit_tz: i16) -> Ordering {
        self.to_timeline(implicit_tz).cmp(&other.to_timeline(implicit_tz))
    }

    /// Adds a duration: months first (clamping the day), then seconds.
    pub fn add_duration(&self, d: &Duration) -> Option<Self> {
        let mut v = self.clone();
        if d.months != 0 {
            let total = i64::from(v.year) * 12 + i64::from(v.month) - 1 + d.months;
            v.year = i32::try_from(total.div_euclid(12)).ok()?;
            v.month = u8::try_from(total.rem_euclid(12) + 1).ok()?;
            v.day = v.day.min(days_in_month(v.year, v.month));
        }
        if !d.seconds.is_zero() {
            let secs = v.local_seconds() + d.seconds;
            let mut shifted = Self::from_timeline(v.components, secs, None)?;
            shifted.timezone = v.timezone;
            v = shifted;
        }
        Some(v)
    }

    fn fmt_year(&self) -> String {
        if self.year < 0 {
            format!("-{:04}", -i64::from(self.year))
        } else {
            format!("{:04}", self.year)
        }
    }

    fn fmt_time(&self) -> String {
        let whole = self.second.trunc().to_u8().unwrap_or(0);
        let frac = (self.second - self.second.trunc()).normalize();
        let mut s = format!("{:02}:{:02}:{:02}", self.hour, self.minute, whole);
        if !frac.is_zero() {
            let f = frac.to_string();
            if let Some(digits) = f.strip_prefix("0.") {
                s.push('.');
                s.push_str(digits);
            }
        }
        s
    }

    fn fmt_tz(&self) -> String {
        match self.timezone {
            None => String::new(),
            Some(0) => "Z".to_string(),
            Some(tz) => {
                let sign = if tz < 0 { '-' } else { '+' };
                let a = tz.unsigned_abs();
                format!("{sign}{:02}:{:02}", a / 60, a % 60)
            }
        }
    }

    /// Canonical lexical form for the value's component set.
    pub fn format(&self) -> String {
        let c = self.components;
        let mut s = String::new();
        if c.contains(Components::YEAR) {
            s.push_str(&self.fmt_year());
            if c.contains(Components::MONTH) {
                s.push_str(&format!("-{:02}", self.month));
                if c.contains(Components::DAY) {
                    s.push_str(&format!("-{:02}", self.day));
                }
            }
        } else if c.contains(Components::MONTH) {
            s.push_str(&format!("--{:02}", self.month));
            if c.contains(Components::DAY) {
                s.push_str(&format!("-{:02}", self.day));
            }
        } else if c.contains(Components::DAY) {
            s.push_str(&format!("---{:02}", self.day));
        }
        if c.contains(Components::TIME) {
            if c.contains(Components::DAY) {
                s.push('T');
            }
            s.push_str(&self.fmt_time());
        }
        s.push_str(&self.fmt_tz());
        s
    }
}

/// Duration value: signed months plus signed seconds, never of opposite sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Duration {
    pub months: i64,
    pub seconds: Decimal,
}

impl Duration {
    pub const ZERO: Duration = Duration { months: 0, seconds: Decimal::ZERO };

    pub fn new(months: i64, seconds: Decimal) -> Self {
        Self { months, seconds }
    }

    pub fn from_months(months: i64) -> Self {
        Self::new(months, Decimal::ZERO)
    }

    pub fn from_seconds(seconds: Decimal) -> Self {
        Self::new(0, seconds)
    }

    pub fn year_month_part(&self) -> Self {
        Self::from_months(self.months)
    }

    pub fn day_time_part(&self) -> Self {
        Self::from_seconds(self.seconds)
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.seconds.is_zero()
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.months, -self.seconds)
    }

    /// Parses `-?PnYnMnDTnHnMnS`. `allow_ym` / `allow_dt` restrict the permitted fields.
    pub fn parse(text: &str, allow_ym: bool, allow_dt: bool) -> Option<Self> {
        let text = text.trim();
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let body = body.strip_prefix('P')?;
        let (date_part, time_part) = match body.split_once('T') {
            Some((d, t)) => {
                if t.is_empty() {
                    return None;
                }
                (d, Some(t))
            }
            None => (body, None),
        };
        let mut months: i64 = 0;
        let mut seconds = Decimal::ZERO;
        let mut seen_any = false;
        let mut rest = date_part;
        for (designator, factor) in [('Y', 12i64), ('M', 1)] {
            if let Some(idx) = rest.find(designator) {
                if !allow_ym {
                    return None;
                }
                let n: i64 = parse_unsigned(&rest[..idx])?;
                months = months.checked_add(n.checked_mul(factor)?)?;
                rest = &rest[idx + 1..];
                seen_any = true;
            }
        }
        if let Some(idx) = rest.find('D') {
            if !allow_dt {
                return None;
            }
            let n: i64 = parse_unsigned(&rest[..idx])?;
            seconds += Decimal::from(n) * Decimal::from(SECONDS_PER_DAY);
            rest = &rest[idx + 1..];
            seen_any = true;
        }
        if !rest.is_empty() {
            return None;
        }
        if let Some(mut t) = time_part {
            if !allow_dt {
                return None;
            }
            let mut seen_time = false;
            for (designator, factor) in [('H', 3600i64), ('M', 60)] {
                if let Some(idx) = t.find(designator) {
                    let n: i64 = parse_unsigned(&t[..idx])?;
                    seconds += Decimal::from(n) * Decimal::from(factor);
                    t = &t[idx + 1..];
                    seen_time = true;
                }
            }
            if let Some(num) = t.strip_suffix('S') {
                if num.is_empty() || num.starts_with('.') || num.ends_with('.') {
                    return None;
                }
                if !num.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                    return None;
                }
                seconds += num.parse::<Decimal>().ok()?;
                t = "";
                seen_time = true;
            }
            if !t.is_empty() || !seen_time {
                return None;
            }
            seen_any = true;
        }
        if !seen_any {
            return None;
        }
        Some(if negative { Self::new(-months, -seconds) } else { Self::new(months, seconds) })
    }

    /// Canonical lexical form. `zero` is what the type prints for a zero length
    /// (`PT0S` for durations and day-time durations, `P0M` for year-month durations).
    pub fn format(&self, zero: &str) -> String {
        if self.is_zero() {
            return zero.to_string();
        }
        let negative = self.months < 0 || (self.seconds.is_sign_negative() && !self.seconds.is_zero());
        let months = self.months.unsigned_abs();
        let secs = self.seconds.abs();
        let mut s = String::new();
        if negative {
            s.push('-');
        }
        s.push('P');
        let (y, m) = (months / 12, months % 12);
        if y > 0 {
            s.push_str(&format!("{y}Y"));
        }
        if m > 0 {
            s.push_str(&format!("{m}M"));
        }
        let whole = secs.trunc().to_i64().unwrap_or(0);
        let frac = (secs - secs.trunc()).normalize();
        let days = whole / SECONDS_PER_DAY;
        let hours = (whole % SECONDS_PER_DAY) / 3600;
        let minutes = (whole % 3600) / 60;
        let rem = whole % 60;
        if days > 0 {
            s.push_str(&format!("{days}D"));
        }
        if hours > 0 || minutes > 0 || rem > 0 || !frac.is_zero() {
            s.push('T');
            if hours > 0 {
                s.push_str(&format!("{hours}H"));
            }
            if minutes > 0 {
                s.push_str(&format!("{minutes}M"));
            }
            if rem > 0 || !frac.is_zero() {
                let sec = (Decimal::from(rem) + frac).normalize();
                s.push_str(&format!("{sec}S"));
            }
        }
        s
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self::new(self.months.checked_add(other.months)?, self.seconds.checked_add(other.seconds)?))
    }

    pub fn signum(&self) -> i32 {
        if self.months > 0 || (self.seconds.is_sign_positive() && !self.seconds.is_zero()) {
            1
        } else if self.is_zero() {
            0
        } else {
            -1
        }
    }

    pub fn seconds_signum(&self) -> Decimal {
        self.seconds.signum()
    }
}

fn parse_unsigned(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Components::DATE_TIME, "2024-02-29T13:05:09.250Z", "2024-02-29T13:05:09.25Z")]
    #[case(Components::DATE, "-0044-03-15+01:00", "-0044-03-15+01:00")]
    #[case(Components::TIME, "23:59:59", "23:59:59")]
    #[case(Components::YEAR | Components::MONTH, "1999-12", "1999-12")]
    #[case(Components::MONTH | Components::DAY, "--02-29", "--02-29")]
    #[case(Components::DAY, "---07", "---07")]
    #[case(Components::MONTH, "--11Z", "--11Z")]
    #[case(Components::DATE_TIME, "2020-12-31T24:00:00", "2021-01-01T00:00:00")]
    fn parses_and_formats(#[case] c: Components, #[case] input: &str, #[case] expected: &str) {
        let v = DateTime::parse(c, input).expect("valid lexical form");
        assert_eq!(v.format(), expected);
    }

    #[rstest]
    #[case(Components::DATE, "2023-02-29")]
    #[case(Components::DATE_TIME, "2023-01-01T25:00:00")]
    #[case(Components::TIME, "12:00:00+15:00")]
    #[case(Components::DATE, "02023-01-01")]
    #[case(Components::MONTH | Components::DAY, "--13-01")]
    fn rejects_invalid(#[case] c: Components, #[case] input: &str) {
        assert!(DateTime::parse(c, input).is_none());
    }

    #[test]
    fn timeline_respects_timezones() {
        let a = DateTime::parse(Components::DATE_TIME, "2000-01-01T12:00:00+02:00").unwrap();
        let b = DateTime::parse(Components::DATE_TIME, "2000-01-01T10:00:00Z").unwrap();
        assert_eq!(a.compare(&b, 0), Ordering::Equal);
    }

    #[test]
    fn adding_months_clamps_day() {
        let d = DateTime::parse(Components::DATE, "2001-01-31").unwrap();
        let r = d.add_duration(&Duration::from_months(1)).unwrap();
        assert_eq!(r.format(), "2001-02-28");
    }

    #[rstest]
    #[case("P1Y2M3DT4H5M6.5S", "P1Y2M3DT4H5M6.5S")]
    #[case("-PT90M", "-PT1H30M")]
    #[case("P0D", "PT0S")]
    #[case("PT36H", "P1DT12H")]
    fn durations_round_trip(#[case] input: &str, #[case] expected: &str) {
        let d = Duration::parse(input, true, true).unwrap();
        assert_eq!(d.format("PT0S"), expected);
    }

    #[rstest]
    #[case("P")]
    #[case("PT")]
    #[case("P1S")]
    #[case("1Y")]
    #[case("P-1Y")]
    fn rejects_bad_durations(#[case] input: &str) {
        assert!(Duration::parse(input, true, true).is_none());
    }
}
