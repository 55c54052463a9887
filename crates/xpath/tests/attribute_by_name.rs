//! Tests for attribute lookup through the attribute axis.

use arbor_xpath::simple_node::{attr, attr_ns, doc, elem, ns, text};
use arbor_xpath::{DomFacade, Engine, Options, SimpleNode, SimpleTree, XdmItem};
use rstest::rstest;
use std::rc::Rc;

fn make_tree() -> SimpleNode {
    doc()
        .child(
            elem("root")
                .namespace(ns("x", "urn:x"))
                .attr(attr("id", "42"))
                .attr(attr("class", "main"))
                .attr(attr_ns("urn:x", "x:id", "namespaced"))
                .child(elem("child").attr(attr("name", "inner")).child(text("body"))),
        )
        .build()
}

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn options() -> Options<SimpleNode> {
    Options::default().with_namespace_resolver(|prefix| (prefix == "x").then(|| "urn:x".to_string()))
}

fn string(query: &str) -> String {
    Engine::<SimpleNode>::new().evaluate_xpath_to_string(query, Some(XdmItem::Node(make_tree())), facade(), &options()).unwrap()
}

#[rstest]
#[case::existing("/root/@id/string()", "42")]
#[case::missing("string(/root/@nonexistent)", "")]
#[case::ns_mismatch("string(/root/@x:class)", "")]
#[case::namespaced("/root/@x:id/string()", "namespaced")]
#[case::any_namespace("string-join(/root/@*:id, ',')", "42,namespaced")]
#[case::nested("/root/child/@name/string()", "inner")]
#[case::abbreviated_parent("/root/child/@name/../../@class/string()", "main")]
fn lookup(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(query), expected);
}

#[test]
fn namespace_declarations_are_not_attributes() {
    assert_eq!(string("string(count(/root/@*))"), "3");
    assert_eq!(string("string(count(/root/@xmlns))"), "0");
    assert_eq!(string("string-join(/root/@*/name(), ' ')"), "id class x:id");
}

#[test]
fn document_node_has_no_attributes() {
    assert_eq!(string("string(count(/@*))"), "0");
}

#[test]
fn attribute_node_has_no_sub_attributes() {
    assert_eq!(string("string(count(/root/@id/@*))"), "0");
}

#[test]
fn attributes_are_not_children() {
    assert_eq!(string("string(count(/root/node()))"), "1");
    assert_eq!(string("/root/@id/parent::*/name()"), "root");
}

#[test]
fn attribute_predicates_select_elements() {
    let engine = Engine::<SimpleNode>::new();
    let found = engine
        .evaluate_xpath_to_first_node("//*[@name = 'inner']", Some(XdmItem::Node(make_tree())), facade(), &options())
        .unwrap()
        .expect("child element");
    assert_eq!(found.string_value(), "body");
}
