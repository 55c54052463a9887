//! Lexical spaces: parsing XSD literals and producing canonical forms.

use super::AtomicType;
use base64::Engine as _;
use rust_decimal::Decimal;
use std::str::FromStr;

/// XML whitespace per XSD: space, tab, CR, LF.
pub(crate) fn is_xml_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

pub(crate) fn trim_xml(s: &str) -> &str {
    s.trim_matches(is_xml_ws)
}

pub(crate) fn replace_whitespace(s: &str) -> String {
    s.chars().map(|c| if is_xml_ws(c) { ' ' } else { c }).collect()
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split(is_xml_ws).filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}

pub fn parse_integer(s: &str) -> Option<i128> {
    let t = trim_xml(s);
    let digits = t.strip_prefix(['+', '-']).unwrap_or(t);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    t.strip_prefix('+').unwrap_or(t).parse().ok()
}

pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let t = trim_xml(s);
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    if body.is_empty() || body == "." {
        return None;
    }
    let mut dots = 0;
    for b in body.bytes() {
        match b {
            b'0'..=b'9' => {}
            b'.' => dots += 1,
            _ => return None,
        }
    }
    if dots > 1 {
        return None;
    }
    let normalized = t.strip_prefix('+').unwrap_or(t);
    let normalized = if normalized.starts_with('.') {
        format!("0{normalized}")
    } else if let Some(rest) = normalized.strip_prefix("-.") {
        format!("-0.{rest}")
    } else {
        normalized.to_string()
    };
    Decimal::from_str(&normalized).ok().or_else(|| Decimal::from_scientific(&normalized).ok())
}

/// `xs:double` lexical space: decimal or exponent notation, `INF`, `-INF`, `+INF`, `NaN`.
pub fn parse_double(s: &str) -> Option<f64> {
    let t = trim_xml(s);
    match t {
        "INF" | "+INF" => return Some(f64::INFINITY),
        "-INF" => return Some(f64::NEG_INFINITY),
        "NaN" => return Some(f64::NAN),
        _ => {}
    }
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let mantissa_ok = !mantissa.is_empty()
        && mantissa != "."
        && mantissa.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && mantissa.bytes().filter(|b| *b == b'.').count() <= 1;
    let exponent_ok = exponent.is_none_or(|e| {
        let d = e.strip_prefix(['+', '-']).unwrap_or(e);
        !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit())
    });
    if !(mantissa_ok && exponent_ok) {
        return None;
    }
    t.parse().ok()
}

pub fn parse_float(s: &str) -> Option<f32> {
    #[allow(clippy::cast_possible_truncation)]
    parse_double(s).map(|d| d as f32)
}

pub fn parse_boolean(s: &str) -> Option<bool> {
    match trim_xml(s) {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Canonical `xs:decimal`: no exponent, no trailing zeros, integral values without a point.
pub fn format_decimal(d: Decimal) -> String {
    let n = d.normalize();
    if n.is_zero() { "0".to_string() } else { n.to_string() }
}

fn format_exponent(repr: String) -> String {
    // Rust prints `1E21` / `1.5E-7`; XPath wants a mantissa with a fractional digit.
    match repr.split_once('E') {
        Some((m, e)) if !m.contains('.') => format!("{m}.0E{e}"),
        _ => repr,
    }
}

/// Canonical `xs:double` per XPath 3.1 casting rules.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let a = d.abs();
    if (1e-6..1e6).contains(&a) {
        let s = format!("{d}");
        return s.strip_suffix(".0").map(str::to_string).unwrap_or(s);
    }
    format_exponent(format!("{d:E}"))
}

/// Canonical `xs:float`; uses the shortest `f32` representation.
pub fn format_float(f: f32) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let a = f.abs();
    if (1e-6..1e6).contains(&a) {
        let s = format!("{f}");
        return s.strip_suffix(".0").map(str::to_string).unwrap_or(s);
    }
    format_exponent(format!("{f:E}"))
}

pub fn format_binary(ty: AtomicType, bytes: &[u8]) -> String {
    if ty == AtomicType::HexBinary {
        bytes.iter().map(|b| format!("{b:02X}")).collect()
    } else {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }
}

pub fn parse_hex_binary(s: &str) -> Option<Vec<u8>> {
    let t = trim_xml(s);
    if t.len() % 2 != 0 {
        return None;
    }
    (0..t.len())
        .step_by(2)
        .map(|i| t.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

pub fn parse_base64_binary(s: &str) -> Option<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !is_xml_ws(*c)).collect();
    base64::engine::general_purpose::STANDARD.decode(compact).ok()
}

fn is_name_start(c: char) -> bool {
    c == '_'
        || c.is_ascii_alphabetic()
        || matches!(c,
            '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' | '\u{370}'..='\u{37D}'
            | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}'
            | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' | '\u{F900}'..='\u{FDCF}'
            | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start(c)
        || c.is_ascii_digit()
        || matches!(c, '-' | '.' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

pub fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c == ':' || is_name_start(c)) && chars.all(|c| c == ':' || is_name_char(c))
}

pub fn is_nmtoken(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c == ':' || is_name_char(c))
}

/// `prefix:local` or `local`, both parts NCNames.
pub fn is_qname(s: &str) -> bool {
    match s.split_once(':') {
        Some((p, l)) => is_ncname(p) && is_ncname(l),
        None => is_ncname(s),
    }
}

pub fn is_language(s: &str) -> bool {
    let mut parts = s.split('-');
    let first_ok = parts.next().is_some_and(|p| (1..=8).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_alphabetic()));
    first_ok && parts.all(|p| (1..=8).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_alphanumeric()))
}

/// Applies the whitespace facet and pattern of a string-derived type.
pub fn normalize_string_for(ty: AtomicType, s: &str) -> Option<String> {
    use AtomicType as T;
    let value = match ty {
        T::String => return Some(s.to_string()),
        T::NormalizedString => return Some(replace_whitespace(s)),
        _ => collapse_whitespace(s),
    };
    let ok = match ty {
        T::Token => true,
        T::Language => is_language(&value),
        T::NMTOKEN => is_nmtoken(&value),
        T::Name => is_name(&value),
        T::NCName | T::ID | T::IDREF | T::ENTITY => is_ncname(&value),
        _ => false,
    };
    ok.then_some(value)
}

/// Range facet of the integer-derived types.
pub fn integer_in_range(ty: AtomicType, v: i128) -> bool {
    use AtomicType as T;
    match ty {
        T::Integer => true,
        T::NonPositiveInteger => v <= 0,
        T::NegativeInteger => v < 0,
        T::Long => i64::try_from(v).is_ok(),
        T::Int => i32::try_from(v).is_ok(),
        T::Short => i16::try_from(v).is_ok(),
        T::Byte => i8::try_from(v).is_ok(),
        T::NonNegativeInteger => v >= 0,
        T::UnsignedLong => u64::try_from(v).is_ok(),
        T::UnsignedInt => u32::try_from(v).is_ok(),
        T::UnsignedShort => u16::try_from(v).is_ok(),
        T::UnsignedByte => u8::try_from(v).is_ok(),
        T::PositiveInteger => v > 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10.123f32, "10.123")]
    #[case(1.0e7f32, "1.0E7")]
    #[case(0.5f32, "0.5")]
    #[case(100.0f32, "100")]
    fn float_canonical(#[case] f: f32, #[case] expected: &str) {
        assert_eq!(format_float(f), expected);
    }

    #[rstest]
    #[case(1.0e21, "1.0E21")]
    #[case(1.2345e-7, "1.2345E-7")]
    #[case(-0.0, "-0")]
    #[case(123_456.5, "123456.5")]
    #[case(f64::NEG_INFINITY, "-INF")]
    fn double_canonical(#[case] d: f64, #[case] expected: &str) {
        assert_eq!(format_double(d), expected);
    }

    #[rstest]
    #[case("1.50", "1.5")]
    #[case("-.5", "-0.5")]
    #[case("+3", "3")]
    #[case("0.000", "0")]
    fn decimal_canonical(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(format_decimal(parse_decimal(input).unwrap()), expected);
    }

    #[rstest]
    #[case("1e")]
    #[case("e5")]
    #[case("1.2.3")]
    #[case("inf")]
    fn rejects_bad_doubles(#[case] input: &str) {
        assert!(parse_double(input).is_none());
    }

    #[test]
    fn binary_forms() {
        assert_eq!(parse_hex_binary("0fA0"), Some(vec![0x0f, 0xa0]));
        assert_eq!(format_binary(AtomicType::HexBinary, &[0x0f, 0xa0]), "0FA0");
        assert_eq!(format_binary(AtomicType::Base64Binary, b"hi"), "aGk=");
        assert_eq!(parse_base64_binary("aG k="), Some(b"hi".to_vec()));
    }

    #[test]
    fn names() {
        assert!(is_ncname("a-b.c"));
        assert!(!is_ncname("a:b"));
        assert!(is_qname("p:local"));
        assert!(!is_qname(":x"));
        assert!(is_language("en-US"));
        assert!(!is_language("toolongtag"));
    }
}
