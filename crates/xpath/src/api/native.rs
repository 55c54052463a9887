//! Host values crossing the engine boundary: variables going in, custom function
//! arguments and results, and `ReturnType::Any` results coming out.

use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use crate::types::{ItemType, Occurrence, SequenceType, cast_atomic};
use crate::xdm::{AtomicPayload, AtomicValue, ArrayItem, MapItem, XdmItem, XdmSequence};

/// A value as the host sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue<N> {
    /// The empty sequence.
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Node(N),
    Map(MapItem<N>),
    Array(ArrayItem<N>),
    /// An atomic value without a closer host counterpart, e.g. a date or a QName.
    Atomic(AtomicValue),
    List(Vec<NativeValue<N>>),
}

impl<N> From<bool> for NativeValue<N> {
    fn from(v: bool) -> Self {
        NativeValue::Boolean(v)
    }
}

impl<N> From<f64> for NativeValue<N> {
    fn from(v: f64) -> Self {
        NativeValue::Number(v)
    }
}

impl<N> From<i32> for NativeValue<N> {
    fn from(v: i32) -> Self {
        NativeValue::Number(f64::from(v))
    }
}

impl<N> From<&str> for NativeValue<N> {
    fn from(v: &str) -> Self {
        NativeValue::String(v.to_string())
    }
}

impl<N> From<String> for NativeValue<N> {
    fn from(v: String) -> Self {
        NativeValue::String(v)
    }
}

impl<N> From<AtomicValue> for NativeValue<N> {
    fn from(v: AtomicValue) -> Self {
        NativeValue::Atomic(v)
    }
}

impl<N, T: Into<NativeValue<N>>> From<Vec<T>> for NativeValue<N> {
    fn from(v: Vec<T>) -> Self {
        NativeValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<N, T: Into<NativeValue<N>>> From<Option<T>> for NativeValue<N> {
    fn from(v: Option<T>) -> Self {
        v.map_or(NativeValue::Null, Into::into)
    }
}

impl<N: XdmNode> NativeValue<N> {
    /// Wraps a node. Not a `From` impl, which would overlap the blanket conversions.
    pub fn node(node: N) -> Self {
        NativeValue::Node(node)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&N> {
        match self {
            NativeValue::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Numbers become `xs:double`, strings `xs:string`, lists flatten.
    pub fn into_sequence(self) -> XdmSequence<N> {
        let mut out = Vec::new();
        self.append_to(&mut out);
        out
    }

    fn append_to(self, out: &mut XdmSequence<N>) {
        match self {
            NativeValue::Null => {}
            NativeValue::Boolean(b) => out.push(XdmItem::Atomic(AtomicValue::boolean(b))),
            NativeValue::Number(n) => out.push(XdmItem::Atomic(AtomicValue::double(n))),
            NativeValue::String(s) => out.push(XdmItem::Atomic(AtomicValue::string(s))),
            NativeValue::Node(n) => out.push(XdmItem::Node(n)),
            NativeValue::Map(m) => out.push(XdmItem::Map(m)),
            NativeValue::Array(a) => out.push(XdmItem::Array(a)),
            NativeValue::Atomic(a) => out.push(XdmItem::Atomic(a)),
            NativeValue::List(values) => values.into_iter().for_each(|v| v.append_to(out)),
        }
    }

    /// One item as a host value. Function items have no host counterpart.
    pub fn from_item(item: &XdmItem<N>) -> Result<Self, Error> {
        Ok(match item {
            XdmItem::Node(n) => NativeValue::Node(n.clone()),
            XdmItem::Map(m) => NativeValue::Map(m.clone()),
            XdmItem::Array(a) => NativeValue::Array(a.clone()),
            XdmItem::Atomic(a) => Self::from_atomic(a),
            XdmItem::Function(_) => {
                return Err(Error::from_code(ErrorCode::XPTY0004, "function items cannot be passed to the host"));
            }
        })
    }

    pub fn from_atomic(value: &AtomicValue) -> Self {
        match value.payload() {
            AtomicPayload::Boolean(b) => NativeValue::Boolean(*b),
            _ if value.is_numeric() => NativeValue::Number(value.to_f64().unwrap_or(f64::NAN)),
            AtomicPayload::String(s) => NativeValue::String(s.to_string()),
            _ => NativeValue::Atomic(value.clone()),
        }
    }
}

/// Adapts one argument of a custom function to its declared type.
///
/// `T?` yields [`NativeValue::Null`] for the empty sequence, `T*` and `T+` a list, and an
/// exactly-one type the single value. Attribute nodes are refused.
pub(crate) fn adapt_argument<N: XdmNode>(items: &[XdmItem<N>], ty: &SequenceType) -> Result<NativeValue<N>, Error> {
    if items.iter().any(|i| i.as_node().is_some_and(|n| n.kind() == NodeKind::Attribute)) {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "attribute nodes cannot be passed to custom functions; pass their value instead",
        ));
    }
    match ty.occurrence() {
        Occurrence::ZeroOrMore | Occurrence::OneOrMore => {
            Ok(NativeValue::List(items.iter().map(NativeValue::from_item).collect::<Result<_, _>>()?))
        }
        Occurrence::ZeroOrOne | Occurrence::One => match items.first() {
            Some(item) => NativeValue::from_item(item),
            None => Ok(NativeValue::Null),
        },
    }
}

/// Converts a custom function's result to its declared return type.
pub(crate) fn adapt_result<N: XdmNode>(value: NativeValue<N>, ty: &SequenceType) -> Result<XdmSequence<N>, Error> {
    let items = value.into_sequence();
    let items = match ty {
        SequenceType::Typed(ItemType::Atomic(target), _) => items
            .into_iter()
            .map(|item| match item {
                XdmItem::Atomic(a) if a.ty() != *target => Ok(XdmItem::Atomic(cast_atomic(&a, *target)?)),
                other => Ok(other),
            })
            .collect::<Result<Vec<_>, Error>>()?,
        _ => items,
    };
    if !ty.matches(&items) {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("custom function returned a value that does not match {ty}"),
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, attr, elem};
    use rstest::rstest;

    fn ty(text: &str) -> SequenceType {
        SequenceType::parse_signature(text).unwrap()
    }

    fn strings(values: &[&str]) -> XdmSequence<SimpleNode> {
        values.iter().map(|s| XdmItem::Atomic(AtomicValue::string(*s))).collect()
    }

    #[rstest]
    #[case::optional_empty("xs:string?", &[], NativeValue::Null)]
    #[case::optional_one("xs:string?", &["a"], NativeValue::String("a".into()))]
    #[case::exact_takes_first("xs:string", &["a", "b"], NativeValue::String("a".into()))]
    #[case::star_is_a_list("xs:string*", &["a", "b"], NativeValue::from(vec!["a", "b"]))]
    #[case::plus_is_a_list("xs:string+", &["a"], NativeValue::from(vec!["a"]))]
    fn arguments_follow_their_occurrence(
        #[case] declared: &str,
        #[case] values: &[&str],
        #[case] expected: NativeValue<SimpleNode>,
    ) {
        assert_eq!(adapt_argument(&strings(values), &ty(declared)).unwrap(), expected);
    }

    #[test]
    fn attribute_arguments_are_refused() {
        let owner = elem("e").attr(attr("a", "1")).build();
        let attribute = owner.attributes()[0].clone();
        let err = adapt_argument(&[XdmItem::Node(attribute)], &ty("node()")).unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }

    #[test]
    fn results_are_cast_to_the_declared_atomic_type() {
        let out = adapt_result::<SimpleNode>(NativeValue::Number(3.0), &ty("xs:integer")).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(AtomicValue::integer(3))]);
        let err = adapt_result::<SimpleNode>(NativeValue::Null, &ty("xs:integer")).unwrap_err();
        assert!(err.is(ErrorCode::XPTY0004));
    }

    #[test]
    fn numbers_leave_as_doubles_and_come_back_as_numbers() {
        let seq = NativeValue::<SimpleNode>::from(vec![1.5, 2.0]).into_sequence();
        assert_eq!(seq.len(), 2);
        assert_eq!(NativeValue::from_item(&seq[0]).unwrap(), NativeValue::Number(1.5));
    }
}
