//! Well-known namespace URIs.

pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
pub const MATH_NS: &str = "http://www.w3.org/2005/xpath-functions/math";
pub const MAP_NS: &str = "http://www.w3.org/2005/xpath-functions/map";
pub const ARRAY_NS: &str = "http://www.w3.org/2005/xpath-functions/array";
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";
pub const LOCAL_NS: &str = "http://www.w3.org/2005/xquery-local-functions";

/// Namespaces in which neither modules nor custom functions may declare functions.
pub const RESERVED_FUNCTION_NAMESPACES: &[&str] = &[FNS, XS, MATH_NS, MAP_NS, ARRAY_NS, XML_URI];

/// Prefixes bound in every static context.
pub const PREDECLARED_NAMESPACES: &[(&str, &str)] = &[
    ("xs", XS),
    ("fn", FNS),
    ("math", MATH_NS),
    ("map", MAP_NS),
    ("array", ARRAY_NS),
    ("err", ERR_NS),
    ("xml", XML_URI),
    ("local", LOCAL_NS),
];
