//! Effective boolean value and the comparison operators built on it.

use arbor_xpath::simple_node::{doc, elem};
use arbor_xpath::{DomFacade, Engine, ErrorCode, Options, SimpleNode, SimpleTree, XdmItem};
use rstest::rstest;
use std::rc::Rc;

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn boolean(query: &str) -> Result<bool, arbor_xpath::XPathError> {
    let root = doc().child(elem("a").child(elem("b"))).build();
    Engine::<SimpleNode>::new().evaluate_xpath_to_boolean(query, Some(XdmItem::Node(root)), facade(), &Options::default())
}

#[rstest]
#[case::empty("boolean(())", false)]
#[case::node_first("boolean((/a, 0))", true)]
#[case::empty_string("boolean('')", false)]
#[case::string("boolean('false')", true)]
#[case::zero("boolean(0)", false)]
#[case::nan("boolean(xs:double('NaN'))", false)]
#[case::untyped("boolean(xs:untypedAtomic('x'))", true)]
#[case::any_uri("boolean(xs:anyURI(''))", false)]
#[case::missing_path("boolean(/a/c)", false)]
#[case::predicate_number("exists((10, 20, 30)[2][. = 20])", true)]
#[case::if_uses_ebv("if ('') then false() else true()", true)]
#[case::general_existential("(1, 2, 3) = (3, 4)", true)]
#[case::general_untyped("/a = ''", true)]
#[case::value_eq("1 eq 1.0", true)]
#[case::node_identity("/a/b is /a/*[1]", true)]
#[case::node_order("/a << /a/b", true)]
#[case::some("some $x in (1, 2, 3) satisfies $x > 2", true)]
#[case::every("every $x in (1, 2, 3) satisfies $x > 2", false)]
fn effective_boolean_value(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(boolean(query).unwrap(), expected, "{query}");
}

#[rstest]
#[case::two_atomics("boolean((1, 2))")]
#[case::atomic_then_node("boolean((0, /a))")]
#[case::date("boolean(xs:date('2020-01-01'))")]
#[case::map("boolean(map {})")]
fn effective_boolean_value_errors(#[case] query: &str) {
    let err = boolean(query).unwrap_err();
    assert!(err.is(ErrorCode::FORG0006), "{query}: {err:?}");
}

#[test]
fn value_comparisons_need_singletons() {
    let err = boolean("(1, 2) eq 1").unwrap_err();
    assert!(err.is(ErrorCode::XPTY0004));
}

#[test]
fn incomparable_types_are_type_errors() {
    let err = boolean("1 eq 'a'").unwrap_err();
    assert!(err.is(ErrorCode::XPTY0004));
}
