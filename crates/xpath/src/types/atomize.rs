//! Atomization and effective boolean value.

use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{DomFacade, NodeKind, XdmNode, traverse};
use crate::xdm::{AtomicPayload, AtomicValue, Fetch, XdmItem, ready_or_pending};

/// Typed value of a node: untypedAtomic for everything except comments and
/// processing instructions, which carry `xs:string`.
pub fn atomize_node<N: XdmNode>(facade: &dyn DomFacade<N>, node: &N) -> Fetch<AtomicValue> {
    traverse::string_value(facade, node).map(|s| match node.kind() {
        NodeKind::Comment | NodeKind::ProcessingInstruction => AtomicValue::string(s),
        _ => AtomicValue::untyped(s),
    })
}

/// Atomizes one item, appending to `out`. Arrays contribute their atomized members.
pub fn atomize_item<N: XdmNode>(
    facade: &dyn DomFacade<N>,
    item: &XdmItem<N>,
    out: &mut Vec<AtomicValue>,
) -> Result<Fetch<()>, Error> {
    match item {
        XdmItem::Atomic(a) => out.push(a.clone()),
        XdmItem::Node(n) => out.push(ready_or_pending!(atomize_node(facade, n))),
        XdmItem::Array(arr) => {
            let mut staged = Vec::new();
            for member in arr.members() {
                for it in member {
                    ready_or_pending!(atomize_item(facade, it, &mut staged)?);
                }
            }
            out.extend(staged);
        }
        XdmItem::Map(_) => return Err(Error::from_code(ErrorCode::FOTY0013, "maps cannot be atomized")),
        XdmItem::Function(f) => {
            return Err(Error::from_code(ErrorCode::FOTY0013, format!("function item {f:?} cannot be atomized")));
        }
    }
    Ok(Fetch::Ready(()))
}

/// Atomizes each item in order.
pub fn atomize<N: XdmNode>(facade: &dyn DomFacade<N>, items: &[XdmItem<N>]) -> Result<Fetch<Vec<AtomicValue>>, Error> {
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        ready_or_pending!(atomize_item(facade, it, &mut out)?);
    }
    Ok(Fetch::Ready(out))
}

/// `fn:string` of a single item.
pub fn string_value<N: XdmNode>(facade: &dyn DomFacade<N>, item: &XdmItem<N>) -> Result<Fetch<String>, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(Fetch::Ready(a.lexical())),
        XdmItem::Node(n) => Ok(traverse::string_value(facade, n)),
        _ => Err(Error::from_code(ErrorCode::FOTY0014, "function items have no string value")),
    }
}

/// Effective boolean value of a single atomic value.
pub fn atomic_ebv(a: &AtomicValue) -> Result<bool, Error> {
    match a.payload() {
        AtomicPayload::Boolean(b) => Ok(*b),
        AtomicPayload::String(s) if a.ty().is_string_like() => Ok(!s.is_empty()),
        AtomicPayload::Integer(i) => Ok(*i != 0),
        AtomicPayload::Decimal(d) => Ok(!d.is_zero()),
        AtomicPayload::Float(f) => Ok(*f != 0.0 && !f.is_nan()),
        AtomicPayload::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            format!("effective boolean value is not defined for {}", a.ty()),
        )),
    }
}

/// Effective boolean value of a materialized sequence.
pub fn effective_boolean_value<N>(items: &[XdmItem<N>]) -> Result<bool, Error> {
    match items {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => atomic_ebv(a),
        [_] => Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value is not defined for function items")),
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of two or more items starting with an atomic value",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::SimpleNode;
    use rstest::rstest;

    type I = XdmItem<SimpleNode>;

    #[rstest]
    #[case(vec![], false)]
    #[case(vec![I::Atomic(AtomicValue::string(""))], false)]
    #[case(vec![I::Atomic(AtomicValue::string("x"))], true)]
    #[case(vec![I::Atomic(AtomicValue::double(f64::NAN))], false)]
    #[case(vec![I::Atomic(AtomicValue::integer(-3))], true)]
    #[case(vec![I::Atomic(AtomicValue::boolean(false))], false)]
    fn ebv_of_simple_sequences(#[case] items: Vec<I>, #[case] expected: bool) {
        assert_eq!(effective_boolean_value(&items).unwrap(), expected);
    }

    #[test]
    fn ebv_of_node_sequence_is_true() {
        let n = SimpleNode::text("");
        let items = vec![I::Node(n), I::Atomic(AtomicValue::integer(0))];
        assert!(effective_boolean_value(&items).unwrap());
    }

    #[test]
    fn ebv_of_two_atomics_is_an_error() {
        let items = vec![I::Atomic(AtomicValue::integer(1)), I::Atomic(AtomicValue::integer(2))];
        let err = effective_boolean_value(&items).unwrap_err();
        assert!(err.is(ErrorCode::FORG0006));
    }

    #[test]
    fn ebv_of_date_is_an_error() {
        let d = crate::xdm::DateTime::parse(crate::xdm::Components::DATE, "2020-01-01").unwrap();
        let items = vec![I::Atomic(AtomicValue::date_time(crate::types::AtomicType::Date, d))];
        assert!(effective_boolean_value(&items).is_err());
    }
}
