//! The atomic type lattice, sequence types, casting and atomization.

pub mod atomize;
pub mod casting;
pub mod lexical;
mod sequence_type;

pub use atomize::{atomize, atomize_item, effective_boolean_value, string_value};
pub use casting::{cast_atomic, castable};
pub use sequence_type::{ItemType, KindTest, Occurrence, SequenceType};

use crate::consts::XS;
use std::fmt;

macro_rules! atomic_types {
    ($( $variant:ident => $local:literal, parent: $parent:ident ;)+) => {
        /// Every built-in atomic type plus the two abstract roots.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum AtomicType {
            AnySimpleType,
            $( $variant, )+
        }

        impl AtomicType {
            pub const ALL: &'static [AtomicType] = &[AtomicType::AnySimpleType, $( AtomicType::$variant, )+];

            /// Local name in the `xs:` namespace.
            pub fn local_name(self) -> &'static str {
                match self {
                    AtomicType::AnySimpleType => "anySimpleType",
                    $( AtomicType::$variant => $local, )+
                }
            }

            /// The immediate supertype; `None` only for `xs:anySimpleType`.
            pub fn parent(self) -> Option<AtomicType> {
                match self {
                    AtomicType::AnySimpleType => None,
                    $( AtomicType::$variant => Some(AtomicType::$parent), )+
                }
            }

            pub fn from_local_name(local: &str) -> Option<AtomicType> {
                match local {
                    "anySimpleType" => Some(AtomicType::AnySimpleType),
                    $( $local => Some(AtomicType::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

atomic_types! {
    AnyAtomicType => "anyAtomicType", parent: AnySimpleType;
    UntypedAtomic => "untypedAtomic", parent: AnyAtomicType;
    String => "string", parent: AnyAtomicType;
    NormalizedString => "normalizedString", parent: String;
    Token => "token", parent: NormalizedString;
    Language => "language", parent: Token;
    NMTOKEN => "NMTOKEN", parent: Token;
    Name => "Name", parent: Token;
    NCName => "NCName", parent: Name;
    ID => "ID", parent: NCName;
    IDREF => "IDREF", parent: NCName;
    ENTITY => "ENTITY", parent: NCName;
    Boolean => "boolean", parent: AnyAtomicType;
    Decimal => "decimal", parent: AnyAtomicType;
    Integer => "integer", parent: Decimal;
    NonPositiveInteger => "nonPositiveInteger", parent: Integer;
    NegativeInteger => "negativeInteger", parent: NonPositiveInteger;
    Long => "long", parent: Integer;
    Int => "int", parent: Long;
    Short => "short", parent: Int;
    Byte => "byte", parent: Short;
    NonNegativeInteger => "nonNegativeInteger", parent: Integer;
    UnsignedLong => "unsignedLong", parent: NonNegativeInteger;
    UnsignedInt => "unsignedInt", parent: UnsignedLong;
    UnsignedShort => "unsignedShort", parent: UnsignedInt;
    UnsignedByte => "unsignedByte", parent: UnsignedShort;
    PositiveInteger => "positiveInteger", parent: NonNegativeInteger;
    Float => "float", parent: AnyAtomicType;
    Double => "double", parent: AnyAtomicType;
    Duration => "duration", parent: AnyAtomicType;
    YearMonthDuration => "yearMonthDuration", parent: Duration;
    DayTimeDuration => "dayTimeDuration", parent: Duration;
    DateTime => "dateTime", parent: AnyAtomicType;
    DateTimeStamp => "dateTimeStamp", parent: DateTime;
    Date => "date", parent: AnyAtomicType;
    Time => "time", parent: AnyAtomicType;
    GYearMonth => "gYearMonth", parent: AnyAtomicType;
    GYear => "gYear", parent: AnyAtomicType;
    GMonthDay => "gMonthDay", parent: AnyAtomicType;
    GDay => "gDay", parent: AnyAtomicType;
    GMonth => "gMonth", parent: AnyAtomicType;
    HexBinary => "hexBinary", parent: AnyAtomicType;
    Base64Binary => "base64Binary", parent: AnyAtomicType;
    AnyURI => "anyURI", parent: AnyAtomicType;
    QName => "QName", parent: AnyAtomicType;
    NOTATION => "NOTATION", parent: AnyAtomicType;
}

/// Coarse grouping used by the cast table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Abstract,
    Untyped,
    String,
    Boolean,
    Numeric,
    Duration,
    DateTime,
    Binary,
    AnyURI,
    QName,
    Notation,
}

impl AtomicType {
    /// Whether `self` is `other` or derives from it.
    pub fn is_subtype_of(self, other: AtomicType) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t == other {
                return true;
            }
            current = t.parent();
        }
        false
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, AtomicType::AnySimpleType | AtomicType::AnyAtomicType)
    }

    /// The primitive type this type derives from (`xs:integer` counts as primitive here).
    pub fn primitive(self) -> AtomicType {
        let mut t = self;
        while let Some(p) = t.parent() {
            if matches!(p, AtomicType::AnyAtomicType | AtomicType::AnySimpleType) || t == AtomicType::Integer {
                return t;
            }
            t = p;
        }
        t
    }

    pub fn family(self) -> TypeFamily {
        use AtomicType as T;
        match self.primitive() {
            T::AnySimpleType | T::AnyAtomicType => TypeFamily::Abstract,
            T::UntypedAtomic => TypeFamily::Untyped,
            T::String => TypeFamily::String,
            T::Boolean => TypeFamily::Boolean,
            T::Decimal | T::Integer | T::Float | T::Double => TypeFamily::Numeric,
            T::Duration => TypeFamily::Duration,
            T::DateTime | T::Date | T::Time | T::GYearMonth | T::GYear | T::GMonthDay | T::GDay | T::GMonth => {
                TypeFamily::DateTime
            }
            T::HexBinary | T::Base64Binary => TypeFamily::Binary,
            T::AnyURI => TypeFamily::AnyURI,
            T::QName => TypeFamily::QName,
            _ => TypeFamily::Notation,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.family() == TypeFamily::Numeric
    }

    pub fn is_integer(self) -> bool {
        self.is_subtype_of(AtomicType::Integer)
    }

    /// String-like types that compare and promote as strings.
    pub fn is_string_like(self) -> bool {
        matches!(self.family(), TypeFamily::String | TypeFamily::Untyped | TypeFamily::AnyURI)
    }

    /// Resolves `xs:LOCAL` given the namespace URI of a type name.
    pub fn from_name(ns_uri: Option<&str>, local: &str) -> Option<AtomicType> {
        if ns_uri == Some(XS) { Self::from_local_name(local) } else { None }
    }

    /// `xs:LOCAL` display name.
    pub fn qualified_name(self) -> String {
        format!("xs:{}", self.local_name())
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xs:{}", self.local_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AtomicType::Byte, AtomicType::Integer, true)]
    #[case(AtomicType::Byte, AtomicType::Decimal, true)]
    #[case(AtomicType::ID, AtomicType::String, true)]
    #[case(AtomicType::DayTimeDuration, AtomicType::Duration, true)]
    #[case(AtomicType::Integer, AtomicType::Byte, false)]
    #[case(AtomicType::Float, AtomicType::Double, false)]
    #[case(AtomicType::UntypedAtomic, AtomicType::AnyAtomicType, true)]
    fn subtype_relation(#[case] sub: AtomicType, #[case] sup: AtomicType, #[case] expected: bool) {
        assert_eq!(sub.is_subtype_of(sup), expected);
    }

    #[test]
    fn every_concrete_type_reaches_the_root() {
        for t in AtomicType::ALL {
            assert!(t.is_subtype_of(AtomicType::AnySimpleType));
            assert_eq!(AtomicType::from_local_name(t.local_name()), Some(*t));
        }
    }

    #[test]
    fn primitives() {
        assert_eq!(AtomicType::UnsignedByte.primitive(), AtomicType::Integer);
        assert_eq!(AtomicType::NCName.primitive(), AtomicType::String);
        assert_eq!(AtomicType::DateTimeStamp.primitive(), AtomicType::DateTime);
        assert_eq!(AtomicType::YearMonthDuration.primitive(), AtomicType::Duration);
    }
}
