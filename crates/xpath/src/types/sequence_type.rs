use super::AtomicType;
use crate::model::{NodeKind, XdmNode};
use crate::xdm::{ExpandedName, XdmItem};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    pub fn allows(self, count: usize) -> bool {
        match self {
            Occurrence::One => count == 1,
            Occurrence::ZeroOrOne => count <= 1,
            Occurrence::ZeroOrMore => true,
            Occurrence::OneOrMore => count >= 1,
        }
    }

    pub fn indicator(self) -> &'static str {
        match self {
            Occurrence::One => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        }
    }

    pub fn from_indicator(s: &str) -> Self {
        match s {
            "?" => Occurrence::ZeroOrOne,
            "*" => Occurrence::ZeroOrMore,
            "+" => Occurrence::OneOrMore,
            _ => Occurrence::One,
        }
    }
}

/// Node kind tests. A `None` name is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    Element(Option<ExpandedName>),
    Attribute(Option<ExpandedName>),
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    Namespace,
}

impl KindTest {
    /// Checks kind and name; the document-node element constraint is not inspected.
    pub fn matches<N: XdmNode>(&self, node: &N) -> bool {
        let kind = node.kind();
        let name_matches = |want: &Option<ExpandedName>| {
            want.as_ref().is_none_or(|w| node.name().is_some_and(|q| q.ns_uri == w.ns_uri && q.local == w.local))
        };
        match self {
            KindTest::AnyKind => true,
            KindTest::Document(_) => kind == NodeKind::Document,
            KindTest::Element(name) => kind == NodeKind::Element && name_matches(name),
            KindTest::Attribute(name) => kind == NodeKind::Attribute && name_matches(name),
            KindTest::Text => kind == NodeKind::Text,
            KindTest::Comment => kind == NodeKind::Comment,
            KindTest::ProcessingInstruction(target) => {
                kind == NodeKind::ProcessingInstruction
                    && target.as_ref().is_none_or(|t| node.name().is_some_and(|q| &q.local == t))
            }
            KindTest::Namespace => kind == NodeKind::Namespace,
        }
    }
}

impl fmt::Display for KindTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |n: &Option<ExpandedName>| n.as_ref().map_or_else(String::new, ToString::to_string);
        match self {
            KindTest::AnyKind => f.write_str("node()"),
            KindTest::Document(None) => f.write_str("document-node()"),
            KindTest::Document(Some(inner)) => write!(f, "document-node({inner})"),
            KindTest::Element(n) => write!(f, "element({})", name(n)),
            KindTest::Attribute(n) => write!(f, "attribute({})", name(n)),
            KindTest::Text => f.write_str("text()"),
            KindTest::Comment => f.write_str("comment()"),
            KindTest::ProcessingInstruction(t) => write!(f, "processing-instruction({})", t.as_deref().unwrap_or("")),
            KindTest::Namespace => f.write_str("namespace-node()"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemType {
    AnyItem,
    Atomic(AtomicType),
    Kind(KindTest),
    /// `function(*)`, or a typed test reduced to its arity.
    Function(Option<usize>),
    /// `map(*)` or `map(K, V)`.
    Map(Option<(AtomicType, Box<SequenceType>)>),
    /// `array(*)` or `array(T)`.
    Array(Option<Box<SequenceType>>),
}

impl ItemType {
    pub fn matches<N: XdmNode>(&self, item: &XdmItem<N>) -> bool {
        match (self, item) {
            (ItemType::AnyItem, _) => true,
            (ItemType::Atomic(t), XdmItem::Atomic(a)) => a.ty().is_subtype_of(*t),
            (ItemType::Kind(k), XdmItem::Node(n)) => k.matches(n),
            (ItemType::Function(arity), it) => {
                it.function_arity().is_some_and(|a| arity.is_none_or(|want| want == a))
            }
            (ItemType::Map(None), XdmItem::Map(_)) => true,
            (ItemType::Map(Some((key, value))), XdmItem::Map(m)) => {
                m.entries().all(|(k, v)| k.ty().is_subtype_of(*key) && value.matches(v))
            }
            (ItemType::Array(None), XdmItem::Array(_)) => true,
            (ItemType::Array(Some(member)), XdmItem::Array(a)) => a.members().iter().all(|m| member.matches(m)),
            _ => false,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::AnyItem => f.write_str("item()"),
            ItemType::Atomic(t) => write!(f, "{t}"),
            ItemType::Kind(k) => write!(f, "{k}"),
            ItemType::Function(_) => f.write_str("function(*)"),
            ItemType::Map(None) => f.write_str("map(*)"),
            ItemType::Map(Some((k, v))) => write!(f, "map({k}, {v})"),
            ItemType::Array(None) => f.write_str("array(*)"),
            ItemType::Array(Some(m)) => write!(f, "array({m})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceType {
    Empty,
    Typed(ItemType, Occurrence),
}

impl SequenceType {
    pub fn item_star() -> Self {
        SequenceType::Typed(ItemType::AnyItem, Occurrence::ZeroOrMore)
    }

    pub fn atomic(t: AtomicType, occ: Occurrence) -> Self {
        SequenceType::Typed(ItemType::Atomic(t), occ)
    }

    pub fn occurrence(&self) -> Occurrence {
        match self {
            SequenceType::Empty => Occurrence::ZeroOrOne,
            SequenceType::Typed(_, o) => *o,
        }
    }

    pub fn matches<N: XdmNode>(&self, items: &[XdmItem<N>]) -> bool {
        match self {
            SequenceType::Empty => items.is_empty(),
            SequenceType::Typed(t, occ) => occ.allows(items.len()) && items.iter().all(|i| t.matches(i)),
        }
    }

    /// Parses the compact sequence type notation used for custom function signatures,
    /// e.g. `xs:string?`, `item()*`, `node()+`, `map(*)`, `element()`.
    pub fn parse_signature(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == "empty-sequence()" {
            return Some(SequenceType::Empty);
        }
        let (body, occ) = match text.chars().last() {
            Some(c @ ('?' | '*' | '+')) if !text.ends_with("(*)") => {
                (&text[..text.len() - 1], Occurrence::from_indicator(&c.to_string()))
            }
            _ => (text, Occurrence::One),
        };
        let item = match body {
            "item()" => ItemType::AnyItem,
            "node()" => ItemType::Kind(KindTest::AnyKind),
            "element()" => ItemType::Kind(KindTest::Element(None)),
            "attribute()" => ItemType::Kind(KindTest::Attribute(None)),
            "text()" => ItemType::Kind(KindTest::Text),
            "comment()" => ItemType::Kind(KindTest::Comment),
            "processing-instruction()" => ItemType::Kind(KindTest::ProcessingInstruction(None)),
            "document-node()" => ItemType::Kind(KindTest::Document(None)),
            "function(*)" => ItemType::Function(None),
            "map(*)" => ItemType::Map(None),
            "array(*)" => ItemType::Array(None),
            other => ItemType::Atomic(AtomicType::from_local_name(other.strip_prefix("xs:")?)?),
        };
        Some(SequenceType::Typed(item, occ))
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::Empty => f.write_str("empty-sequence()"),
            SequenceType::Typed(t, o) => write!(f, "{t}{}", o.indicator()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("xs:string?", SequenceType::atomic(AtomicType::String, Occurrence::ZeroOrOne))]
    #[case("item()*", SequenceType::item_star())]
    #[case("node()+", SequenceType::Typed(ItemType::Kind(KindTest::AnyKind), Occurrence::OneOrMore))]
    #[case("map(*)", SequenceType::Typed(ItemType::Map(None), Occurrence::One))]
    #[case("array(*)?", SequenceType::Typed(ItemType::Array(None), Occurrence::ZeroOrOne))]
    #[case("xs:boolean", SequenceType::atomic(AtomicType::Boolean, Occurrence::One))]
    fn parses_signature_types(#[case] text: &str, #[case] expected: SequenceType) {
        assert_eq!(SequenceType::parse_signature(text), Some(expected));
    }

    #[test]
    fn unknown_signature_types_are_rejected() {
        assert_eq!(SequenceType::parse_signature("xs:nope"), None);
        assert_eq!(SequenceType::parse_signature("string"), None);
    }
}
