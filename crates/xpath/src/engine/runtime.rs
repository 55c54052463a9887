//! Error taxonomy shared by the compiler, the evaluator and the update facility.

use crate::consts::ERR_NS;
use crate::xdm::ExpandedName;
use std::fmt;
use std::sync::Arc;

macro_rules! error_codes {
    ($( $(#[$doc:meta])* $code:ident ),+ $(,)?) => {
        /// W3C error codes emitted by the engine.
        ///
        /// Codes outside the `err:` namespace (user errors raised through `fn:error`)
        /// map to [`ErrorCode::Unknown`] and keep their full name on [`Error::code`].
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $( $(#[$doc])* $code, )+
            Unknown,
        }

        impl ErrorCode {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( ErrorCode::$code => stringify!($code), )+
                    ErrorCode::Unknown => "UNKNOWN",
                }
            }

            /// Parses `err:LOCAL` or a bare `LOCAL`.
            pub fn from_code(s: &str) -> Self {
                let local = s.strip_prefix("err:").unwrap_or(s);
                match local {
                    $( stringify!($code) => ErrorCode::$code, )+
                    _ => ErrorCode::Unknown,
                }
            }
        }
    };
}

error_codes! {
    /// Wrong number of arguments for `fn:apply`.
    FOAP0001,
    /// Division by zero.
    FOAR0001,
    /// Numeric overflow or underflow.
    FOAR0002,
    /// Input value too large for decimal.
    FOCA0001,
    /// Invalid lexical value or NaN/INF to decimal.
    FOCA0002,
    /// Input value too large for integer.
    FOCA0003,
    /// NaN supplied as a duration multiplier.
    FOCA0005,
    /// Codepoint not valid in XML.
    FOCH0001,
    /// Unsupported collation.
    FOCH0002,
    /// Unsupported normalization form.
    FOCH0003,
    /// Inconsistent timezone, overflow in date/time arithmetic.
    FODT0001,
    FODT0002,
    FODT0003,
    /// Generic error, also raised by `fn:error()`.
    FOER0000,
    FONS0004,
    /// No base URI to resolve against.
    FONS0005,
    FORG0001,
    FORG0002,
    FORG0003,
    FORG0004,
    FORG0005,
    FORG0006,
    FORG0008,
    FORG0009,
    FORX0001,
    FORX0002,
    FORX0003,
    FORX0004,
    FOAY0001,
    FOAY0002,
    FOJS0003,
    /// Invalid `map:merge` option.
    FOJS0005,
    FOTY0012,
    FOTY0013,
    FOTY0014,
    /// `fn:deep-equal` applied to function items.
    FOTY0015,
    /// `fn:put` on a node that is not a document or element.
    FOUP0001,
    FOUP0002,
    XPDY0002,
    XPDY0050,
    XPST0003,
    XPST0008,
    XPST0017,
    XPST0051,
    XPST0080,
    XPST0081,
    XPTY0004,
    XPTY0018,
    XPTY0019,
    XPTY0020,
    XQDY0025,
    XQDY0026,
    XQDY0041,
    XQDY0044,
    XQDY0064,
    XQDY0072,
    XQDY0074,
    XQDY0096,
    /// Duplicate key in a map constructor.
    XQDY0137,
    XQST0022,
    XQST0034,
    XQST0039,
    XQST0040,
    XQST0045,
    XQST0047,
    XQST0048,
    XQST0049,
    XQST0059,
    XQST0060,
    XQST0070,
    XQST0088,
    XQST0089,
    XQST0118,
    XQTY0024,
    XQTY0105,
    XUDY0009,
    XUDY0014,
    XUDY0015,
    XUDY0016,
    XUDY0017,
    XUDY0021,
    XUDY0023,
    XUDY0024,
    XUDY0027,
    XUDY0029,
    XUDY0030,
    XUDY0031,
    XUST0001,
    XUST0002,
    XUTY0004,
    XUTY0005,
    XUTY0006,
    XUTY0007,
    XUTY0008,
    XUTY0010,
    XUTY0011,
    XUTY0012,
    XUTY0013,
    XUTY0022,
}

impl ErrorCode {
    /// The error's QName in the `err:` namespace.
    pub fn qname(self) -> ExpandedName {
        ExpandedName::new(Some(ERR_NS), self.as_str())
    }

    /// Static errors are raised while compiling, before any evaluation starts.
    pub fn is_static(self) -> bool {
        let s = self.as_str();
        s.starts_with("XPST") || s.starts_with("XQST") || s.starts_with("XUST")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "err:{}", self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), source: None }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), msg)
    }

    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    pub fn code_enum(&self) -> ErrorCode {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            ErrorCode::from_code(&self.code.local)
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code_enum() == code
    }

    /// `err:LOCAL` for W3C codes, `Q{ns}local` otherwise.
    pub fn format_code(&self) -> String {
        match self.code.ns_uri.as_deref() {
            Some(ERR_NS) => format!("err:{}", self.code.local),
            Some(ns) => format!("Q{{{ns}}}{}", self.code.local),
            None => self.code.local.clone(),
        }
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg)
    }

    pub(crate) fn static_error(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPST0003, msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.format_code(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_strings() {
        assert_eq!(ErrorCode::from_code("err:XPTY0004"), ErrorCode::XPTY0004);
        assert_eq!(ErrorCode::from_code("XUDY0016"), ErrorCode::XUDY0016);
        assert_eq!(ErrorCode::from_code("err:NOPE0000"), ErrorCode::Unknown);
    }

    #[test]
    fn display_uses_err_prefix() {
        let e = Error::from_code(ErrorCode::XPDY0002, "context item is absent");
        assert_eq!(e.to_string(), "err:XPDY0002: context item is absent");
        assert!(e.is(ErrorCode::XPDY0002));
    }

    #[test]
    fn foreign_codes_keep_their_namespace() {
        let e = Error::new_qname(ExpandedName::new(Some("urn:x"), "oops"), "m");
        assert_eq!(e.format_code(), "Q{urn:x}oops");
        assert_eq!(e.code_enum(), ErrorCode::Unknown);
    }

    #[test]
    fn static_classification() {
        assert!(ErrorCode::XQST0048.is_static());
        assert!(ErrorCode::XUST0001.is_static());
        assert!(!ErrorCode::XUDY0015.is_static());
    }
}
