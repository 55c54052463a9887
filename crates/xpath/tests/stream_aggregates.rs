//! Tests for the aggregate functions:
//! sum(), avg(), min(), max(), count()

use arbor_xpath::{DomFacade, Engine, ErrorCode, Options, SimpleNode, SimpleTree, XdmItem};
use arbor_xpath::simple_node::{attr, doc, elem, text};
use rstest::rstest;
use std::rc::Rc;

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn string(query: &str) -> String {
    Engine::<SimpleNode>::new().evaluate_xpath_to_string(query, None, facade(), &Options::default()).unwrap()
}

// ===== sum() tests =====

#[rstest]
#[case::empty("sum(())", "0")]
#[case::zero_value("sum((), 42)", "42")]
#[case::empty_zero("sum((), ())", "")]
#[case::integers("sum((1, 2, 3, 4, 5))", "15")]
#[case::decimals("sum((1.5, 2.5, 3.0))", "7")]
#[case::mixed("sum((1, 2.5, 3))", "6.5")]
#[case::doubles("sum((1, 2e0))", "3")]
#[case::durations("sum((xs:dayTimeDuration('PT1H'), xs:dayTimeDuration('PT30M')))", "PT1H30M")]
#[case::range("sum(1 to 100)", "5050")]
fn sum_values(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(query), expected);
}

#[test]
fn sum_keeps_the_integer_type() {
    assert!(Engine::<SimpleNode>::new()
        .evaluate_xpath_to_boolean("sum((1, 2)) instance of xs:integer", None, facade(), &Options::default())
        .unwrap());
}

#[test]
fn sum_of_strings_is_an_error() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_string("sum(('a', 'b'))", None, facade(), &Options::default())
        .unwrap_err();
    assert!(err.is(ErrorCode::FORG0006));
}

// ===== avg() tests =====

#[rstest]
#[case::empty("avg(())", "")]
#[case::integers("avg((1, 2, 3, 4))", "2.5")]
#[case::single("avg(7)", "7")]
#[case::durations("avg((xs:yearMonthDuration('P1Y'), xs:yearMonthDuration('P2Y')))", "P1Y6M")]
fn avg_values(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(query), expected);
}

// ===== min() / max() tests =====

#[rstest]
#[case::min_integers("min((3, 1, 2))", "1")]
#[case::max_integers("max((3, 1, 2))", "3")]
#[case::min_strings("min(('pear', 'apple'))", "apple")]
#[case::max_strings("max(('pear', 'apple'))", "pear")]
#[case::empty("max(())", "")]
#[case::nan_wins("string(min((1, xs:double('NaN'))))", "NaN")]
#[case::promoted("max((1, 2.5)) instance of xs:decimal", "true")]
fn extremes(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(query), expected);
}

#[test]
fn min_of_incomparable_values_fails() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_string("min((1, 'a'))", None, facade(), &Options::default())
        .unwrap_err();
    assert!(err.is(ErrorCode::FORG0006));
}

// ===== node based aggregates =====

#[test]
fn aggregates_atomize_untyped_node_values() {
    let root = doc()
        .child(
            elem("prices")
                .child(elem("p").attr(attr("v", "10")).child(text("1.5")))
                .child(elem("p").attr(attr("v", "20")).child(text("2.5"))),
        )
        .build();
    let engine = Engine::<SimpleNode>::new();
    let ctx = || Some(XdmItem::Node(root.clone()));
    let options = Options::default();
    assert_eq!(engine.evaluate_xpath_to_number("sum(//p)", ctx(), facade(), &options).unwrap(), 4.0);
    assert_eq!(engine.evaluate_xpath_to_number("sum(//p/@v)", ctx(), facade(), &options).unwrap(), 30.0);
    assert_eq!(engine.evaluate_xpath_to_number("max(//p/@v)", ctx(), facade(), &options).unwrap(), 20.0);
    assert_eq!(engine.evaluate_xpath_to_number("count(//p)", ctx(), facade(), &options).unwrap(), 2.0);
}
