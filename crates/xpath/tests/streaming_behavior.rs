//! Streaming behaviour: results are produced as they are pulled, and facades that suspend
//! give the same answers as synchronous ones.

use arbor_xpath::simple_node::{attr, doc, elem, text};
use arbor_xpath::{
    DomFacade, Engine, ExpandedName, NativeValue, Options, ReturnType, SimpleNode, SimpleTree, SuspendingTree, XPathResult,
    XdmItem,
};
use std::cell::Cell;
use futures_lite::future::block_on;
use rstest::rstest;
use std::rc::Rc;

fn sample() -> SimpleNode {
    doc()
        .child(
            elem("library")
                .child(elem("book").attr(attr("id", "b1")).child(elem("title").child(text("Dune"))))
                .child(elem("book").attr(attr("id", "b2")).child(elem("title").child(text("Emma"))))
                .child(elem("magazine").attr(attr("id", "m1")).child(elem("title").child(text("Wired")))),
        )
        .build()
}

#[test]
fn async_iterator_stops_after_the_requested_items() {
    let engine = Engine::<SimpleNode>::new();
    let mut stream = engine
        .evaluate_xpath_to_async_iterator("1 to 999999999", None, Rc::new(SimpleTree), &Options::default())
        .unwrap();
    let first: Vec<f64> = block_on(async {
        let mut out = Vec::new();
        while out.len() < 10 {
            match stream.next_item().await {
                Some(Ok(NativeValue::Number(n))) => out.push(n),
                other => panic!("unexpected item {other:?}"),
            }
        }
        out
    });
    assert_eq!(first, (1..=10).map(f64::from).collect::<Vec<_>>());
}

#[test]
fn async_iterator_reports_errors_as_items() {
    let engine = Engine::<SimpleNode>::new();
    let mut stream = engine
        .evaluate_xpath_to_async_iterator("(1, 2, 1 div 0)", None, Rc::new(SimpleTree), &Options::default())
        .unwrap();
    block_on(async {
        assert!(matches!(stream.next_item().await, Some(Ok(NativeValue::Number(_)))));
        assert!(matches!(stream.next_item().await, Some(Ok(NativeValue::Number(_)))));
        assert!(matches!(stream.next_item().await, Some(Err(_))));
        assert!(stream.next_item().await.is_none());
    });
}

#[rstest]
#[case("count(//book)")]
#[case("string-join(//title, ',')")]
#[case("//book[2]/@id/string()")]
#[case("string(//book[title = 'Emma']/@id)")]
#[case("count(//title/ancestor::*)")]
#[case("string-join(reverse(//@id), ' ')")]
#[case("string-join(//title/preceding::title, '/')")]
#[case("name((//*)[last()])")]
fn suspending_facade_matches_synchronous_results(#[case] query: &str) {
    let root = sample();
    let engine = Engine::<SimpleNode>::new();
    let options = Options::default().with_cache_disabled(true);
    let expected = engine
        .evaluate_xpath_to_string(query, Some(XdmItem::Node(root.clone())), Rc::new(SimpleTree), &options)
        .unwrap();

    let tree = Rc::new(SuspendingTree::new());
    let facade: Rc<dyn DomFacade<SimpleNode>> = tree.clone();
    let result = block_on(engine.evaluate_xpath_async(
        query,
        Some(XdmItem::Node(root)),
        facade,
        ReturnType::String,
        &options,
    ))
    .unwrap();
    match result {
        XPathResult::String(s) => assert_eq!(s, expected),
        other => panic!("expected a string, got {other:?}"),
    }
    assert!(tree.suspensions() > 0, "the facade never suspended for {query}");
}

#[test]
fn nodes_come_back_in_document_order() {
    let root = sample();
    let engine = Engine::<SimpleNode>::new();
    let nodes = engine
        .evaluate_xpath_to_nodes(
            "(//magazine, //book)/title",
            Some(XdmItem::Node(root)),
            Rc::new(SuspendingTree::new()),
            &Options::default(),
        )
        .unwrap();
    let titles: Vec<String> = nodes.iter().map(SimpleNode::string_value).collect();
    assert_eq!(titles, vec!["Dune", "Emma", "Wired"]);
}

/// An engine with `t:tick()`, which counts its calls and returns 1.
fn ticking_engine() -> (Engine<SimpleNode>, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let mut engine = Engine::new();
    engine
        .register_custom_xpath_function(ExpandedName::new(Some("urn:tick"), "tick"), &[], "xs:integer", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(NativeValue::Number(1.0))
        })
        .unwrap();
    (engine, calls)
}

#[rstest]
#[case::left_stops_at_first_match("(1, t:tick()) = 1", true, 0)]
#[case::right_stops_at_first_match("1 = (1, t:tick())", true, 0)]
#[case::later_left_item_matches("(2, t:tick()) = (0, 1)", true, 1)]
#[case::no_match_pulls_everything("(5, t:tick()) = 7", false, 1)]
#[case::empty_left_skips_the_right("() = (1, t:tick())", false, 0)]
fn general_comparison_stops_at_the_first_match(#[case] query: &str, #[case] expected: bool, #[case] ticks: usize) {
    let (engine, calls) = ticking_engine();
    let options = Options::default().with_namespace_resolver(|p| (p == "t").then(|| "urn:tick".to_string()));
    let result = engine.evaluate_xpath_to_boolean(query, None, Rc::new(SimpleTree), &options).unwrap();
    assert_eq!(result, expected, "{query}");
    assert_eq!(calls.get(), ticks, "{query}");
}
