use super::QName;
use super::temporal::{DateTime, Duration};
use crate::types::AtomicType;
use crate::types::lexical;
use compact_str::CompactString;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::sync::Arc;

/// The value space payload behind an atomic value. One payload kind serves a whole
/// family of types; the [`AtomicType`] tag on [`AtomicValue`] says which member.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicPayload {
    /// `xs:string` and its derivations, `xs:untypedAtomic`, `xs:anyURI`, `xs:NOTATION`.
    String(CompactString),
    Boolean(bool),
    /// `xs:integer` and its derivations.
    Integer(i128),
    Decimal(Decimal),
    Float(f32),
    Double(f64),
    Duration(Duration),
    DateTime(DateTime),
    /// Decoded bytes of `xs:hexBinary` / `xs:base64Binary`.
    Binary(Arc<[u8]>),
    QName(QName),
}

/// An atomic value: type tag plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicValue {
    ty: AtomicType,
    payload: AtomicPayload,
}

impl AtomicValue {
    /// Pairs a payload with a type. Callers are responsible for the payload matching the type family.
    pub fn new(ty: AtomicType, payload: AtomicPayload) -> Self {
        Self { ty, payload }
    }

    pub fn ty(&self) -> AtomicType {
        self.ty
    }

    pub fn payload(&self) -> &AtomicPayload {
        &self.payload
    }

    pub fn into_payload(self) -> AtomicPayload {
        self.payload
    }

    /// Same payload under another (compatible) type.
    pub fn relabel(self, ty: AtomicType) -> Self {
        Self { ty, payload: self.payload }
    }

    pub fn string(s: impl Into<CompactString>) -> Self {
        Self::new(AtomicType::String, AtomicPayload::String(s.into()))
    }

    pub fn untyped(s: impl Into<CompactString>) -> Self {
        Self::new(AtomicType::UntypedAtomic, AtomicPayload::String(s.into()))
    }

    pub fn any_uri(s: impl Into<CompactString>) -> Self {
        Self::new(AtomicType::AnyURI, AtomicPayload::String(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(AtomicType::Boolean, AtomicPayload::Boolean(b))
    }

    pub fn integer(i: i64) -> Self {
        Self::new(AtomicType::Integer, AtomicPayload::Integer(i128::from(i)))
    }

    pub fn big_integer(i: i128) -> Self {
        Self::new(AtomicType::Integer, AtomicPayload::Integer(i))
    }

    pub fn decimal(d: Decimal) -> Self {
        Self::new(AtomicType::Decimal, AtomicPayload::Decimal(d))
    }

    pub fn float(f: f32) -> Self {
        Self::new(AtomicType::Float, AtomicPayload::Float(f))
    }

    pub fn double(d: f64) -> Self {
        Self::new(AtomicType::Double, AtomicPayload::Double(d))
    }

    pub fn qname(q: QName) -> Self {
        Self::new(AtomicType::QName, AtomicPayload::QName(q))
    }

    pub fn date_time(ty: AtomicType, v: DateTime) -> Self {
        Self::new(ty, AtomicPayload::DateTime(v))
    }

    pub fn duration(ty: AtomicType, v: Duration) -> Self {
        Self::new(ty, AtomicPayload::Duration(v))
    }

    pub fn binary(ty: AtomicType, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(ty, AtomicPayload::Binary(bytes.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            AtomicPayload::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            AtomicPayload::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.ty.is_numeric()
    }

    /// Numeric payload widened to `f64`.
    pub fn to_f64(&self) -> Option<f64> {
        match &self.payload {
            AtomicPayload::Integer(i) => i.to_f64(),
            AtomicPayload::Decimal(d) => d.to_f64(),
            AtomicPayload::Float(f) => Some(f64::from(*f)),
            AtomicPayload::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Numeric payload as an exact decimal, when representable.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match &self.payload {
            AtomicPayload::Integer(i) => Decimal::from_i128(*i),
            AtomicPayload::Decimal(d) => Some(*d),
            AtomicPayload::Float(f) if f.is_finite() => Decimal::from_f32(*f),
            AtomicPayload::Double(d) if d.is_finite() => Decimal::from_f64(*d),
            _ => None,
        }
    }

    pub fn to_i128(&self) -> Option<i128> {
        match &self.payload {
            AtomicPayload::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The canonical lexical representation (the result of `fn:string`).
    pub fn lexical(&self) -> String {
        match &self.payload {
            AtomicPayload::String(s) => s.to_string(),
            AtomicPayload::Boolean(b) => b.to_string(),
            AtomicPayload::Integer(i) => i.to_string(),
            AtomicPayload::Decimal(d) => lexical::format_decimal(*d),
            AtomicPayload::Float(f) => lexical::format_float(*f),
            AtomicPayload::Double(d) => lexical::format_double(*d),
            AtomicPayload::Duration(d) => {
                d.format(if self.ty == AtomicType::YearMonthDuration { "P0M" } else { "PT0S" })
            }
            AtomicPayload::DateTime(v) => v.format(),
            AtomicPayload::Binary(bytes) => lexical::format_binary(self.ty, bytes),
            AtomicPayload::QName(q) => q.lexical(),
        }
    }
}

impl fmt::Display for AtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical())
    }
}

/// Hashable key implementing `op:same-key` for map entries.
///
/// Strings, untyped values and URIs share one key space; all numeric types compare by
/// mathematical value; `NaN` equals itself; date/time keys distinguish values with and
/// without a timezone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Str(CompactString),
    Bool(bool),
    Number(CompactString),
    NaN,
    Duration(i64, Decimal),
    Temporal { family: u8, timezoned: bool, instant: Decimal },
    Binary { hex: bool, bytes: Arc<[u8]> },
    QName(Option<String>, String),
}

impl MapKey {
    pub fn from_atomic(value: &AtomicValue) -> Self {
        match value.payload() {
            AtomicPayload::String(s) => MapKey::Str(s.clone()),
            AtomicPayload::Boolean(b) => MapKey::Bool(*b),
            AtomicPayload::Integer(i) => MapKey::Number(i.to_string().into()),
            AtomicPayload::Decimal(d) => MapKey::Number(d.normalize().to_string().into()),
            AtomicPayload::Float(_) | AtomicPayload::Double(_) => {
                let f = value.to_f64().unwrap_or(f64::NAN);
                if f.is_nan() {
                    MapKey::NaN
                } else if let Some(d) = Decimal::from_f64(f).filter(|_| f.is_finite()) {
                    MapKey::Number(d.normalize().to_string().into())
                } else {
                    MapKey::Number(format!("{f:e}").into())
                }
            }
            AtomicPayload::Duration(d) => MapKey::Duration(d.months, d.seconds.normalize()),
            AtomicPayload::DateTime(v) => MapKey::Temporal {
                family: v.components().bits(),
                timezoned: v.timezone().is_some(),
                instant: v.to_timeline(0).normalize(),
            },
            AtomicPayload::Binary(bytes) => {
                MapKey::Binary { hex: value.ty() == AtomicType::HexBinary, bytes: Arc::clone(bytes) }
            }
            AtomicPayload::QName(q) => MapKey::QName(q.ns_uri.clone(), q.local.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_compare_by_value() {
        let a = MapKey::from_atomic(&AtomicValue::integer(1));
        let b = MapKey::from_atomic(&AtomicValue::double(1.0));
        let c = MapKey::from_atomic(&AtomicValue::decimal(Decimal::new(100, 2)));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn string_and_untyped_share_keys() {
        assert_eq!(MapKey::from_atomic(&AtomicValue::string("a")), MapKey::from_atomic(&AtomicValue::untyped("a")));
    }

    #[test]
    fn nan_is_its_own_key() {
        assert_eq!(MapKey::from_atomic(&AtomicValue::double(f64::NAN)), MapKey::from_atomic(&AtomicValue::float(f32::NAN)));
    }
}
