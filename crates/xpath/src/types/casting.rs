//! The atomic cast matrix.
//!
//! Casting first consults the family-level compatibility table ([`cast_rule`]); pairs marked
//! [`CastRule::Never`] fail with `XPTY0004` before the value is looked at. Casting from
//! `xs:string`/`xs:untypedAtomic` re-parses the lexical form under the target grammar; every
//! other pair converts in the value space and then applies the target's facets.

use super::lexical;
use super::{AtomicType, TypeFamily};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{AtomicPayload, AtomicValue, Components, DateTime, Duration, QName};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Entry of the source×target cast table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastRule {
    /// Always succeeds for any value of the source type.
    Always,
    /// Succeeds or fails depending on the value.
    Depends,
    /// Always a type error.
    Never,
}

/// Family-level cast table, refined for the date/time family where member types differ.
pub fn cast_rule(source: AtomicType, target: AtomicType) -> CastRule {
    use TypeFamily as F;
    if target.is_abstract() || target == AtomicType::NOTATION {
        return CastRule::Never;
    }
    if source == target {
        return CastRule::Always;
    }
    let (sf, tf) = (source.family(), target.family());
    match (sf, tf) {
        (_, F::String | F::Untyped) => {
            if target.primitive() == AtomicType::String && target != AtomicType::String {
                CastRule::Depends
            } else {
                CastRule::Always
            }
        }
        (F::String | F::Untyped, _) => CastRule::Depends,
        (F::Boolean, F::Boolean | F::Numeric) => {
            if target.is_integer() && target != AtomicType::Integer { CastRule::Depends } else { CastRule::Always }
        }
        (F::Numeric, F::Boolean) => CastRule::Always,
        (F::Numeric, F::Numeric) => {
            let widening = matches!(target, AtomicType::Double | AtomicType::Float)
                || (target == AtomicType::Decimal && source.is_integer());
            if widening { CastRule::Always } else { CastRule::Depends }
        }
        (F::Duration, F::Duration) => CastRule::Always,
        (F::DateTime, F::DateTime) => date_time_rule(source.primitive(), target.primitive(), target),
        (F::Binary, F::Binary) => CastRule::Always,
        (F::AnyURI, F::AnyURI) | (F::QName, F::QName) => CastRule::Always,
        _ => CastRule::Never,
    }
}

fn date_time_rule(source: AtomicType, target_primitive: AtomicType, target: AtomicType) -> CastRule {
    use AtomicType as T;
    let ok = match source {
        T::DateTime => true,
        T::Date => target_primitive != T::Time,
        _ => source == target_primitive,
    };
    match (ok, target) {
        (false, _) => CastRule::Never,
        (true, T::DateTimeStamp) => CastRule::Depends,
        (true, _) => CastRule::Always,
    }
}

/// Casts without a static namespace context; `xs:QName` targets accept only unprefixed names.
pub fn cast_atomic(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue, Error> {
    cast_atomic_with(value, target, &|_| None)
}

/// Whether [`cast_atomic_with`] would succeed.
pub fn castable(value: &AtomicValue, target: AtomicType, resolve_prefix: &dyn Fn(&str) -> Option<String>) -> bool {
    cast_atomic_with(value, target, resolve_prefix).is_ok()
}

/// Casts `value` to `target`. `resolve_prefix` is consulted for `xs:string` → `xs:QName`.
pub fn cast_atomic_with(
    value: &AtomicValue,
    target: AtomicType,
    resolve_prefix: &dyn Fn(&str) -> Option<String>,
) -> Result<AtomicValue, Error> {
    if target == AtomicType::NOTATION || target.is_abstract() {
        return Err(Error::from_code(ErrorCode::XPST0080, format!("cannot cast to abstract or NOTATION type {target}")));
    }
    let source = value.ty();
    if source == target {
        return Ok(value.clone());
    }
    if cast_rule(source, target) == CastRule::Never {
        return Err(Error::from_code(ErrorCode::XPTY0004, format!("cannot cast {source} to {target}")));
    }
    let sf = source.family();
    if matches!(sf, TypeFamily::String | TypeFamily::Untyped) {
        let text = value.as_str().unwrap_or_default();
        return from_lexical(text, target, resolve_prefix);
    }
    match target.family() {
        TypeFamily::String | TypeFamily::Untyped => from_lexical(&value.lexical(), target, resolve_prefix),
        TypeFamily::Boolean => to_boolean(value),
        TypeFamily::Numeric => to_numeric(value, target),
        TypeFamily::Duration => to_duration(value, target),
        TypeFamily::DateTime => to_date_time(value, target),
        TypeFamily::Binary | TypeFamily::AnyURI | TypeFamily::QName => Ok(value.clone().relabel(target)),
        TypeFamily::Abstract | TypeFamily::Notation => {
            Err(Error::from_code(ErrorCode::XPST0080, format!("cannot cast to {target}")))
        }
    }
}

fn invalid(target: AtomicType, text: &str) -> Error {
    Error::from_code(ErrorCode::FORG0001, format!("'{text}' is not a valid {target}"))
}

fn date_time_components(t: AtomicType) -> Components {
    use AtomicType as T;
    match t {
        T::Date => Components::DATE,
        T::Time => Components::TIME,
        T::GYearMonth => Components::YEAR | Components::MONTH,
        T::GYear => Components::YEAR,
        T::GMonthDay => Components::MONTH | Components::DAY,
        T::GDay => Components::DAY,
        T::GMonth => Components::MONTH,
        _ => Components::DATE_TIME,
    }
}

/// Builds a value of `target` from its lexical form.
pub fn from_lexical(
    text: &str,
    target: AtomicType,
    resolve_prefix: &dyn Fn(&str) -> Option<String>,
) -> Result<AtomicValue, Error> {
    use AtomicType as T;
    let bad = || invalid(target, text);
    Ok(match target.family() {
        TypeFamily::Untyped => AtomicValue::untyped(text),
        TypeFamily::String => {
            let normalized = lexical::normalize_string_for(target, text).ok_or_else(bad)?;
            AtomicValue::new(target, AtomicPayload::String(normalized.into()))
        }
        TypeFamily::Boolean => AtomicValue::boolean(lexical::parse_boolean(text).ok_or_else(bad)?),
        TypeFamily::Numeric => match target {
            T::Decimal => AtomicValue::decimal(lexical::parse_decimal(text).ok_or_else(bad)?),
            T::Float => AtomicValue::float(lexical::parse_float(text).ok_or_else(bad)?),
            T::Double => AtomicValue::double(lexical::parse_double(text).ok_or_else(bad)?),
            _ => {
                let v = lexical::parse_integer(text).ok_or_else(bad)?;
                integer_of(target, v)?
            }
        },
        TypeFamily::Duration => {
            let (ym, dt) = match target {
                T::YearMonthDuration => (true, false),
                T::DayTimeDuration => (false, true),
                _ => (true, true),
            };
            AtomicValue::duration(target, Duration::parse(text, ym, dt).ok_or_else(bad)?)
        }
        TypeFamily::DateTime => {
            let v = DateTime::parse(date_time_components(target.primitive()), text).ok_or_else(bad)?;
            if target == T::DateTimeStamp && v.timezone().is_none() {
                return Err(bad());
            }
            AtomicValue::date_time(target, v)
        }
        TypeFamily::Binary => {
            let bytes = if target == T::HexBinary {
                lexical::parse_hex_binary(text)
            } else {
                lexical::parse_base64_binary(text)
            };
            AtomicValue::binary(target, bytes.ok_or_else(bad)?)
        }
        TypeFamily::AnyURI => AtomicValue::any_uri(lexical::collapse_whitespace(text)),
        TypeFamily::QName => {
            let t = lexical::trim_xml(text);
            if !lexical::is_qname(t) {
                return Err(bad());
            }
            let q = match t.split_once(':') {
                Some((prefix, local)) => {
                    let ns = resolve_prefix(prefix).ok_or_else(|| {
                        Error::from_code(ErrorCode::FONS0004, format!("no namespace bound to prefix '{prefix}'"))
                    })?;
                    QName::new(Some(prefix), Some(&ns), local)
                }
                None => QName::new(None, resolve_prefix("").as_deref(), t),
            };
            AtomicValue::qname(q)
        }
        TypeFamily::Abstract | TypeFamily::Notation => {
            return Err(Error::from_code(ErrorCode::XPST0080, format!("cannot construct {target}")));
        }
    })
}

fn integer_of(target: AtomicType, v: i128) -> Result<AtomicValue, Error> {
    if !lexical::integer_in_range(target, v) {
        return Err(Error::from_code(ErrorCode::FORG0001, format!("{v} is out of range for {target}")));
    }
    Ok(AtomicValue::new(target, AtomicPayload::Integer(v)))
}

fn to_boolean(value: &AtomicValue) -> Result<AtomicValue, Error> {
    let b = match value.payload() {
        AtomicPayload::Boolean(b) => *b,
        AtomicPayload::Integer(i) => *i != 0,
        AtomicPayload::Decimal(d) => !d.is_zero(),
        AtomicPayload::Float(f) => *f != 0.0 && !f.is_nan(),
        AtomicPayload::Double(d) => *d != 0.0 && !d.is_nan(),
        _ => return Err(Error::type_error(format!("cannot cast {} to xs:boolean", value.ty()))),
    };
    Ok(AtomicValue::boolean(b))
}

#[allow(clippy::cast_possible_truncation)]
fn to_numeric(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue, Error> {
    use AtomicType as T;
    let p = value.payload();
    if let AtomicPayload::Boolean(b) = p {
        let n = i128::from(*b);
        return Ok(match target {
            T::Decimal => AtomicValue::decimal(Decimal::from(n)),
            T::Float => AtomicValue::float(n as f32),
            T::Double => AtomicValue::double(n as f64),
            _ => integer_of(target, n)?,
        });
    }
    match target {
        T::Double => Ok(AtomicValue::double(value.to_f64().unwrap_or(f64::NAN))),
        T::Float => Ok(AtomicValue::float(match p {
            AtomicPayload::Float(f) => *f,
            _ => value.to_f64().unwrap_or(f64::NAN) as f32,
        })),
        T::Decimal => {
            let d = match p {
                AtomicPayload::Float(f) if !f.is_finite() => None,
                AtomicPayload::Double(d) if !d.is_finite() => None,
                _ => Some(value.to_decimal()),
            };
            match d {
                None => Err(Error::from_code(ErrorCode::FOCA0002, format!("cannot cast {value} to xs:decimal"))),
                Some(None) => Err(Error::from_code(ErrorCode::FOCA0001, format!("{value} is too large for xs:decimal"))),
                Some(Some(d)) => Ok(AtomicValue::decimal(d)),
            }
        }
        _ => {
            let i = match p {
                AtomicPayload::Integer(i) => *i,
                AtomicPayload::Decimal(d) => d.trunc().to_i128().ok_or_else(|| too_large(value))?,
                AtomicPayload::Float(_) | AtomicPayload::Double(_) => {
                    let f = value.to_f64().unwrap_or(f64::NAN);
                    if !f.is_finite() {
                        return Err(Error::from_code(ErrorCode::FOCA0002, format!("cannot cast {value} to {target}")));
                    }
                    let t = f.trunc();
                    if t.abs() >= 1.7e38 {
                        return Err(too_large(value));
                    }
                    t as i128
                }
                _ => return Err(Error::type_error(format!("cannot cast {} to {target}", value.ty()))),
            };
            integer_of(target, i)
        }
    }
}

fn too_large(value: &AtomicValue) -> Error {
    Error::from_code(ErrorCode::FOCA0003, format!("{value} is too large for xs:integer"))
}

fn to_duration(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue, Error> {
    let AtomicPayload::Duration(d) = value.payload() else {
        return Err(Error::type_error(format!("cannot cast {} to {target}", value.ty())));
    };
    let converted = match target {
        AtomicType::YearMonthDuration => d.year_month_part(),
        AtomicType::DayTimeDuration => d.day_time_part(),
        _ => *d,
    };
    Ok(AtomicValue::duration(target, converted))
}

fn to_date_time(value: &AtomicValue, target: AtomicType) -> Result<AtomicValue, Error> {
    let AtomicPayload::DateTime(v) = value.payload() else {
        return Err(Error::type_error(format!("cannot cast {} to {target}", value.ty())));
    };
    let components = date_time_components(target.primitive());
    let converted = if components == Components::DATE_TIME && !v.components().contains(Components::TIME) {
        v.at_midnight()
    } else {
        v.restrict(components)
    };
    if target == AtomicType::DateTimeStamp && converted.timezone().is_none() {
        return Err(invalid(target, &value.lexical()));
    }
    Ok(AtomicValue::date_time(target, converted))
}

/// Promotes a numeric value to `xs:double` or `xs:float` for function conversion.
pub fn promote_numeric(value: &AtomicValue, target: AtomicType) -> Option<AtomicValue> {
    match target {
        AtomicType::Double => value.to_f64().map(AtomicValue::double),
        #[allow(clippy::cast_possible_truncation)]
        AtomicType::Float if !matches!(value.ty(), AtomicType::Double) => {
            value.to_f64().map(|f| AtomicValue::float(f as f32))
        }
        AtomicType::Decimal if value.ty().is_integer() => value.to_decimal().map(AtomicValue::decimal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lex(v: &str, t: AtomicType) -> AtomicValue {
        from_lexical(v, t, &|_| None).unwrap()
    }

    #[test]
    fn float_to_untyped_uses_canonical_form() {
        let out = cast_atomic(&AtomicValue::float(10.123), AtomicType::UntypedAtomic).unwrap();
        assert_eq!(out, AtomicValue::untyped("10.123"));
    }

    #[rstest]
    #[case(AtomicValue::double(3.7), "3")]
    #[case(AtomicValue::double(-3.7), "-3")]
    #[case(AtomicValue::decimal(Decimal::new(-99, 1)), "-9")]
    fn numeric_to_integer_truncates(#[case] v: AtomicValue, #[case] expected: &str) {
        assert_eq!(cast_atomic(&v, AtomicType::Integer).unwrap().lexical(), expected);
    }

    #[test]
    fn notation_is_never_castable() {
        let n = AtomicValue::new(AtomicType::NOTATION, AtomicPayload::String("x".into()));
        for src in [AtomicValue::string("x"), n] {
            let err = cast_atomic(&src, AtomicType::NOTATION).unwrap_err();
            assert!(err.is(ErrorCode::XPST0080));
        }
    }

    #[test]
    fn abstract_targets_are_rejected() {
        let err = cast_atomic(&AtomicValue::integer(1), AtomicType::AnyAtomicType).unwrap_err();
        assert!(err.is(ErrorCode::XPST0080));
        let err = cast_atomic(&AtomicValue::integer(1), AtomicType::AnySimpleType).unwrap_err();
        assert!(err.is(ErrorCode::XPST0080));
    }

    #[rstest]
    #[case(AtomicValue::boolean(true), AtomicType::Date)]
    #[case(AtomicValue::integer(1), AtomicType::DayTimeDuration)]
    #[case(AtomicValue::any_uri("http://x"), AtomicType::Integer)]
    fn never_pairs_are_type_errors(#[case] v: AtomicValue, #[case] t: AtomicType) {
        assert!(cast_atomic(&v, t).unwrap_err().is(ErrorCode::XPTY0004));
    }

    #[test]
    fn duration_family_drops_components() {
        let d = lex("P1Y2M3DT4H", AtomicType::Duration);
        assert_eq!(cast_atomic(&d, AtomicType::YearMonthDuration).unwrap().lexical(), "P1Y2M");
        assert_eq!(cast_atomic(&d, AtomicType::DayTimeDuration).unwrap().lexical(), "P3DT4H");
    }

    #[test]
    fn date_time_narrowing() {
        let dt = lex("2021-06-15T10:20:30Z", AtomicType::DateTime);
        assert_eq!(cast_atomic(&dt, AtomicType::Date).unwrap().lexical(), "2021-06-15Z");
        assert_eq!(cast_atomic(&dt, AtomicType::GYear).unwrap().lexical(), "2021Z");
        assert_eq!(cast_atomic(&dt, AtomicType::GMonthDay).unwrap().lexical(), "--06-15Z");
        assert_eq!(cast_atomic(&dt, AtomicType::Time).unwrap().lexical(), "10:20:30Z");
        let g = lex("2021", AtomicType::GYear);
        assert!(cast_atomic(&g, AtomicType::Date).unwrap_err().is(ErrorCode::XPTY0004));
    }

    #[test]
    fn binary_round_trip() {
        let hex = lex("68690A", AtomicType::HexBinary);
        let b64 = cast_atomic(&hex, AtomicType::Base64Binary).unwrap();
        assert_eq!(b64.lexical(), "aGkK");
        assert_eq!(cast_atomic(&b64, AtomicType::HexBinary).unwrap(), hex);
    }

    #[test]
    fn integer_facets() {
        assert!(cast_atomic(&AtomicValue::integer(300), AtomicType::Byte).unwrap_err().is(ErrorCode::FORG0001));
        assert!(cast_atomic(&AtomicValue::integer(200), AtomicType::UnsignedByte).is_ok());
    }

    #[test]
    fn qname_from_string_uses_resolver() {
        let resolve = |p: &str| (p == "p").then(|| "urn:p".to_string());
        let q = cast_atomic_with(&AtomicValue::string("p:x"), AtomicType::QName, &resolve).unwrap();
        assert_eq!(q, AtomicValue::qname(QName::new(Some("p"), Some("urn:p"), "x")));
        let err = cast_atomic_with(&AtomicValue::string("z:x"), AtomicType::QName, &resolve).unwrap_err();
        assert!(err.is(ErrorCode::FONS0004));
    }
}
