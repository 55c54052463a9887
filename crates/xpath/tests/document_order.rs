//! Document order of path results, set operations and selector buckets.

use arbor_xpath::simple_node::{attr, doc, elem, text};
use arbor_xpath::model::{DetachedNodeOrder, DocumentOrder};
use arbor_xpath::xdm::Fetch;
use arbor_xpath::{
    DocumentWriter, DomFacade, Engine, ErrorCode, NativeValue, Options, SimpleNode, SimpleTree, XdmItem, get_buckets_for_node,
};
use proptest::prelude::*;
use rstest::rstest;
use std::cmp::Ordering;
use std::rc::Rc;

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn names(nodes: &[SimpleNode]) -> Vec<String> {
    nodes.iter().map(|n| arbor_xpath::XdmNode::name(n).map(|q| q.local).unwrap_or_default()).collect()
}

fn sample() -> SimpleNode {
    doc()
        .child(
            elem("a")
                .attr(attr("x", "1"))
                .child(elem("b").child(elem("c")).child(text("t")))
                .child(elem("d").child(elem("e"))),
        )
        .build()
}

fn nodes(query: &str) -> Vec<String> {
    let nodes = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_nodes(query, Some(XdmItem::Node(sample())), facade(), &Options::default())
        .unwrap();
    names(&nodes)
}

#[rstest]
#[case::union_sorts("(//e | //b | //a)", &["a", "b", "e"])]
#[case::union_dedups("(//b | //b/self::*)", &["b"])]
#[case::intersect("(//* intersect //d/descendant-or-self::*)", &["d", "e"])]
#[case::except("(//* except //d//*)", &["a", "b", "c", "d"])]
#[case::reverse_axis_path("//e/ancestor::*", &["a", "d"])]
#[case::reverse_axis_position("//e/ancestor::*[1]", &["d"])]
#[case::preceding("//e/preceding::*", &["b", "c"])]
#[case::following("//c/following::*", &["d", "e"])]
#[case::attribute_before_children("(//c | /a/@x)", &["x", "c"])]
fn paths_and_set_operations(#[case] query: &str, #[case] expected: &[&str]) {
    assert_eq!(nodes(query), expected);
}

#[test]
fn sequences_keep_their_order() {
    let engine = Engine::<SimpleNode>::new();
    let root = sample();
    let strings = engine
        .evaluate_xpath_to_strings("(//e, //b) ! name()", Some(XdmItem::Node(root)), facade(), &Options::default())
        .unwrap();
    assert_eq!(strings, vec!["e", "b"]);
}

#[test]
fn set_operations_need_nodes() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_nodes("(1, 2) | //a", Some(XdmItem::Node(sample())), facade(), &Options::default())
        .unwrap_err();
    assert!(err.is(ErrorCode::XPTY0004));
}

#[test]
fn nodes_from_different_trees_have_a_stable_order() {
    let engine = Engine::<SimpleNode>::new();
    let first = elem("first").build();
    let second = elem("second").build();
    let options = Options::default().with_variable("p", NativeValue::node(first)).with_variable("q", NativeValue::node(second));
    let once = names(&engine.evaluate_xpath_to_nodes("$q | $p", None, facade(), &options).unwrap());
    let again = names(&engine.evaluate_xpath_to_nodes("$p | $q", None, facade(), &options).unwrap());
    assert_eq!(once, again);
    assert_eq!(once.len(), 2);
}

// ===== buckets and specificity =====

#[test]
fn element_buckets() {
    let buckets = get_buckets_for_node(&elem("a").build());
    let buckets: Vec<&str> = buckets.iter().map(|b| b.as_str()).collect();
    assert_eq!(buckets, vec!["type-1-or-type-2", "type-1", "name-a"]);
    let text_buckets = get_buckets_for_node(&text("t"));
    assert_eq!(text_buckets.iter().map(|b| b.as_str()).collect::<Vec<_>>(), vec!["type-3"]);
}

#[rstest]
#[case::name("self::a", Some("name-a"))]
#[case::element_wildcard("self::*", Some("type-1"))]
#[case::text("self::text()", Some("type-3"))]
#[case::attribute("@id", Some("name-id"))]
#[case::filtered("self::a[@x]", Some("name-a"))]
#[case::either_same("self::a or self::a[@y]", Some("name-a"))]
#[case::either_different("self::a or self::b", None)]
#[case::anything("true()", None)]
fn selector_buckets(#[case] selector: &str, #[case] expected: Option<&str>) {
    let bucket = Engine::<SimpleNode>::new().bucket_for_selector(selector).unwrap();
    assert_eq!(bucket.as_ref().map(|b| b.as_str()), expected);
}

#[rstest]
#[case::name_beats_kind("self::a", "self::node()", 1)]
#[case::kind_loses("self::*", "self::a", -1)]
#[case::ties("self::a", "self::b", 0)]
#[case::attributes_count("self::a[@x]", "self::a", 1)]
#[case::functions_are_external("self::a[count(*) > 1]", "self::a[@x][@y]", 1)]
fn selector_specificity(#[case] a: &str, #[case] b: &str, #[case] expected: i32) {
    assert_eq!(Engine::<SimpleNode>::new().compare_specificity(a, b).unwrap(), expected);
}

// ===== generated trees =====

/// Builds a tree where element `i + 1` is appended to the element chosen by `parents[i]`.
fn grow(parents: &[usize]) -> SimpleNode {
    let root = elem("n0").build();
    let mut all = vec![root.clone()];
    for (i, p) in parents.iter().enumerate() {
        let child = elem(&format!("n{}", i + 1)).build();
        let parent = all[p % all.len()].clone();
        SimpleTree.insert_before(&parent, &child, None).unwrap();
        all.push(child);
    }
    root
}

/// Like [`grow`], but names come from a three-letter alphabet, every element carries an
/// attribute, and the tree hangs below a document node.
fn grow_labelled(shape: &[(usize, u8)]) -> SimpleNode {
    let label = |l: u8| ["a", "b", "c"][usize::from(l % 3)];
    let document = doc().build();
    let top = elem("c").attr(attr("k", "0")).build();
    SimpleTree.insert_before(&document, &top, None).unwrap();
    let mut all = vec![top];
    for (i, (p, l)) in shape.iter().enumerate() {
        let child = elem(label(*l)).attr(attr("k", &(i + 1).to_string())).build();
        let parent = all[p % all.len()].clone();
        SimpleTree.insert_before(&parent, &child, None).unwrap();
        all.push(child);
    }
    document
}

/// Every node of a tree, attributes included.
fn all_nodes(root: &SimpleNode) -> Vec<SimpleNode> {
    let mut out = Vec::new();
    for n in root.descendants_or_self() {
        out.extend(n.attributes());
        out.push(n);
    }
    out
}

fn ready<T>(fetch: Fetch<T>) -> T {
    match fetch {
        Fetch::Ready(v) => v,
        Fetch::Pending(_) => panic!("an in-memory tree never suspends"),
    }
}

fn shape() -> impl Strategy<Value = Vec<(usize, u8)>> {
    proptest::collection::vec((0usize..32, 0u8..3), 0..10)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn union_equals_the_equivalent_filter(shape in shape()) {
        let document = grow_labelled(&shape);
        let engine = Engine::<SimpleNode>::new();
        let ctx = || Some(XdmItem::Node(document.clone()));
        let union = engine.evaluate_xpath_to_nodes("//a | //b", ctx(), facade(), &Options::default()).unwrap();
        let filtered =
            engine.evaluate_xpath_to_nodes("//*[self::a or self::b]", ctx(), facade(), &Options::default()).unwrap();
        prop_assert_eq!(union, filtered);
    }

    #[test]
    fn document_order_is_a_strict_total_order(first in shape(), second in shape(), third in shape()) {
        let trees = [grow_labelled(&first), grow(&second.iter().map(|(p, _)| *p).collect::<Vec<_>>()), grow_labelled(&third)];
        let nodes: Vec<SimpleNode> = trees.iter().flat_map(all_nodes).collect();
        let registry = Rc::new(DetachedNodeOrder::new());
        let order = DocumentOrder::new(Rc::clone(&registry));
        let tree = SimpleTree;
        let cmp = |a: &SimpleNode, b: &SimpleNode| ready(order.compare(&tree, a, b));
        for a in &nodes {
            prop_assert_eq!(cmp(a, a), Ordering::Equal);
            for b in &nodes {
                let ab = cmp(a, b);
                prop_assert_eq!(ab, cmp(b, a).reverse());
                prop_assert_eq!(ab == Ordering::Equal, a == b);
                if ab != Ordering::Less {
                    continue;
                }
                for c in &nodes {
                    if cmp(b, c) == Ordering::Less {
                        prop_assert_eq!(cmp(a, c), Ordering::Less);
                    }
                }
            }
        }
        // A later evaluation sharing the registry agrees on every pair, detached trees included.
        let later = DocumentOrder::new(registry);
        for a in &nodes {
            for b in &nodes {
                prop_assert_eq!(ready(later.compare(&tree, a, b)), cmp(a, b));
            }
        }
    }

    #[test]
    fn descendant_axis_is_preorder(parents in proptest::collection::vec(0usize..64, 0..40)) {
        let root = grow(&parents);
        let expected = names(&root.descendants_or_self());
        let engine = Engine::<SimpleNode>::new();
        let ctx = || Some(XdmItem::Node(root.clone()));
        let got = engine.evaluate_xpath_to_nodes("descendant-or-self::*", ctx(), facade(), &Options::default()).unwrap();
        prop_assert_eq!(names(&got), expected.clone());
        let reversed = engine
            .evaluate_xpath_to_nodes("reverse(descendant-or-self::*) | ()", ctx(), facade(), &Options::default())
            .unwrap();
        prop_assert_eq!(names(&reversed), expected);
    }
}
