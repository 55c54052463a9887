//! XQuery Update Facility: pending update lists, conflicts, application and transform
//! expressions.

use arbor_xpath::simple_node::{attr, doc, elem, text};
use arbor_xpath::{
    DocumentWriter, DomFacade, Engine, Error, ErrorCode, Language, NodesFactory, Options, PendingUpdate, SimpleNode,
    SimpleTree, XdmItem,
};
use rstest::rstest;
use std::cell::RefCell;
use std::rc::Rc;

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn options() -> Options<SimpleNode> {
    let tree = Rc::new(SimpleTree);
    let factory: Rc<dyn NodesFactory<SimpleNode>> = tree.clone();
    let writer: Rc<dyn DocumentWriter<SimpleNode>> = tree;
    Options::default().with_language(Language::XQueryUpdate31).with_nodes_factory(factory).with_document_writer(writer)
}

fn sample() -> SimpleNode {
    doc()
        .child(
            elem("r")
                .attr(attr("id", "1"))
                .child(elem("a").child(text("alpha")))
                .child(elem("b"))
                .child(elem("c").child(text("gamma"))),
        )
        .build()
}

/// Evaluates `query` against `root` and applies its pending updates.
fn update(root: &SimpleNode, query: &str) -> Result<(), arbor_xpath::XPathError> {
    let engine = Engine::<SimpleNode>::new();
    let options = options();
    let result = engine.evaluate_updating_expression(query, Some(XdmItem::Node(root.clone())), facade(), &options)?;
    engine.execute_pending_updates(result.updates, facade(), &options)
}

#[rstest]
#[case::delete("delete node /r/b", r#"<r id="1"><a>alpha</a><c>gamma</c></r>"#)]
#[case::insert_into("insert node <d/> into /r/b", r#"<r id="1"><a>alpha</a><b><d/></b><c>gamma</c></r>"#)]
#[case::insert_first("insert node <z/> as first into /r", r#"<r id="1"><z/><a>alpha</a><b/><c>gamma</c></r>"#)]
#[case::insert_before("insert node <x/> before /r/c", r#"<r id="1"><a>alpha</a><b/><x/><c>gamma</c></r>"#)]
#[case::insert_after("insert node text { 'tail' } after /r/c", r#"<r id="1"><a>alpha</a><b/><c>gamma</c>tail</r>"#)]
#[case::insert_attribute("insert node attribute k { 'v' } into /r/b", r#"<r id="1"><a>alpha</a><b k="v"/><c>gamma</c></r>"#)]
#[case::replace_node("replace node /r/b with (<x/>, <y/>)", r#"<r id="1"><a>alpha</a><x/><y/><c>gamma</c></r>"#)]
#[case::replace_value("replace value of node /r/a with 'beta'", r#"<r id="1"><a>beta</a><b/><c>gamma</c></r>"#)]
#[case::replace_attribute_value("replace value of node /r/@id with 2", r#"<r id="2"><a>alpha</a><b/><c>gamma</c></r>"#)]
#[case::rename("rename node /r/a as 'first'", r#"<r id="1"><first>alpha</first><b/><c>gamma</c></r>"#)]
#[case::several("(delete node /r/a, rename node /r/c as 'last')", r#"<r id="1"><b/><last>gamma</last></r>"#)]
#[case::flwor("for $e in /r/* return rename node $e as upper-case(local-name($e))", r#"<r id="1"><A>alpha</A><B/><C>gamma</C></r>"#)]
fn updates_change_the_document(#[case] query: &str, #[case] expected: &str) {
    let root = sample();
    update(&root, query).unwrap();
    assert_eq!(root.children()[0].to_xml(), expected);
}

#[test]
fn updates_are_not_visible_before_they_are_applied() {
    let root = sample();
    let result = Engine::<SimpleNode>::new()
        .evaluate_updating_expression("delete node /r/a", Some(XdmItem::Node(root.clone())), facade(), &options())
        .unwrap();
    assert_eq!(result.updates.len(), 1);
    assert_eq!(result.updates[0].kind(), "delete");
    assert!(result.value.is_empty());
    assert_eq!(root.children()[0].children().len(), 3);
}

#[test]
fn updating_and_simple_operands_do_not_mix() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_updating_expression("(delete node /r/a, count(/r/*))", Some(XdmItem::Node(sample())), facade(), &options())
        .unwrap_err();
    assert!(err.is(ErrorCode::XUST0001));
}

#[rstest]
#[case::double_rename("(rename node /r/a as 'x', rename node /r/a as 'y')", ErrorCode::XUDY0015)]
#[case::double_replace("(replace node /r/a with <x/>, replace node /r/a with <y/>)", ErrorCode::XUDY0016)]
#[case::double_value("(replace value of node /r/a with 'x', replace value of node /r/a with 'y')", ErrorCode::XUDY0017)]
#[case::double_put("(put(/r, 'file:///same.xml'), put(/r/a, 'file:///same.xml'))", ErrorCode::XUDY0031)]
fn conflicting_updates_are_rejected(#[case] query: &str, #[case] code: ErrorCode) {
    let root = sample();
    let err = Engine::<SimpleNode>::new()
        .evaluate_updating_expression(query, Some(XdmItem::Node(root)), facade(), &options())
        .unwrap_err();
    assert!(err.is(code), "{query}: {err:?}");
}

#[rstest]
#[case::insert_into_attribute("insert node <x/> into /r/@id", ErrorCode::XUTY0005)]
#[case::two_targets("delete node /r/*, insert node <x/> into /r/*", ErrorCode::XUTY0005)]
#[case::rename_document("rename node (/) as 'x'", ErrorCode::XUTY0012)]
#[case::replace_document("replace node (/) with <x/>", ErrorCode::XUTY0008)]
fn bad_targets_are_type_errors(#[case] query: &str, #[case] code: ErrorCode) {
    let root = sample();
    let err = update(&root, query).unwrap_err();
    assert!(err.is(code), "{query}: {err:?}");
}

#[rstest]
#[case::duplicate_attribute("(insert node <new/> into /r, insert node attribute id { '2' } into /r)", ErrorCode::XUDY0021)]
#[case::renamed_onto_existing("(insert node <new/> into /r/b, insert node attribute k { 'v' } into /r, rename node /r/@id as 'k')", ErrorCode::XUDY0021)]
fn failing_lists_leave_the_document_unchanged(#[case] query: &str, #[case] code: ErrorCode) {
    let root = sample();
    let before = root.to_xml();
    let err = update(&root, query).unwrap_err();
    assert!(err.is(code), "{query}: {err:?}");
    assert_eq!(root.to_xml(), before);
}

#[test]
fn replacing_an_attribute_keeps_its_name_free() {
    let root = sample();
    update(&root, "replace node /r/@id with attribute id { 'new' }").unwrap();
    assert_eq!(root.children()[0].attribute_value("id").as_deref(), Some("new"));
}

#[test]
fn updating_expressions_need_the_update_entry_point() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_nodes("delete node /r/a", Some(XdmItem::Node(sample())), facade(), &options())
        .unwrap_err();
    assert!(err.is(ErrorCode::XUST0001));
}

#[test]
fn transform_leaves_the_original_untouched() {
    let root = sample();
    let before = root.to_xml();
    let copy = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_first_node(
            "copy $c := /r modify (delete node $c/b, rename node $c/a as 'first') return $c",
            Some(XdmItem::Node(root.clone())),
            facade(),
            &options(),
        )
        .unwrap()
        .expect("modified copy");
    assert_eq!(copy.to_xml(), r#"<r id="1"><first>alpha</first><c>gamma</c></r>"#);
    assert_eq!(root.to_xml(), before);
}

#[test]
fn transform_may_only_modify_its_copies() {
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_first_node(
            "copy $c := /r/a modify delete node /r/b return $c",
            Some(XdmItem::Node(sample())),
            facade(),
            &options(),
        )
        .unwrap_err();
    assert!(err.is(ErrorCode::XUDY0014));
}

#[test]
fn transform_without_a_factory_fails() {
    let options = Options::default().with_language(Language::XQueryUpdate31);
    let err = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_first_node("copy $c := . modify () return $c", Some(XdmItem::Node(sample())), facade(), &options)
        .unwrap_err();
    assert!(err.is(ErrorCode::FOER0000));
}

#[test]
fn pending_updates_need_a_writer() {
    let root = sample();
    let engine = Engine::<SimpleNode>::new();
    let result = engine
        .evaluate_updating_expression("delete node /r/a", Some(XdmItem::Node(root)), facade(), &options())
        .unwrap();
    let err = engine.execute_pending_updates(result.updates, facade(), &Options::default()).unwrap_err();
    assert!(err.is(ErrorCode::FOER0000));
}

#[test]
fn put_without_storage_is_rejected() {
    let root = sample();
    let err = update(&root, "put(/r, 'file:///out.xml')").unwrap_err();
    assert!(err.is(ErrorCode::FOUP0002));
}

/// Writes through to the simple tree and remembers what `fn:put` stored.
#[derive(Default)]
struct StoringWriter {
    stored: RefCell<Vec<(String, String)>>,
}

impl DocumentWriter<SimpleNode> for StoringWriter {
    fn insert_before(&self, parent: &SimpleNode, node: &SimpleNode, reference: Option<&SimpleNode>) -> Result<(), Error> {
        SimpleTree.insert_before(parent, node, reference)
    }

    fn remove_child(&self, parent: &SimpleNode, node: &SimpleNode) -> Result<(), Error> {
        SimpleTree.remove_child(parent, node)
    }

    fn set_attribute_ns(&self, element: &SimpleNode, ns_uri: Option<&str>, qualified_name: &str, value: &str) -> Result<(), Error> {
        SimpleTree.set_attribute_ns(element, ns_uri, qualified_name, value)
    }

    fn remove_attribute_ns(&self, element: &SimpleNode, ns_uri: Option<&str>, local_name: &str) -> Result<(), Error> {
        SimpleTree.remove_attribute_ns(element, ns_uri, local_name)
    }

    fn set_data(&self, node: &SimpleNode, value: &str) -> Result<(), Error> {
        SimpleTree.set_data(node, value)
    }

    fn put(&self, node: &SimpleNode, uri: &str) -> Result<(), Error> {
        self.stored.borrow_mut().push((uri.to_string(), node.to_xml()));
        Ok(())
    }
}

#[test]
fn put_runs_after_the_other_updates() {
    let root = sample();
    let writer = Rc::new(StoringWriter::default());
    let options = options().with_document_writer(writer.clone());
    let engine = Engine::<SimpleNode>::new();
    let result = engine
        .evaluate_updating_expression(
            "(put(/r, 'file:///out.xml'), delete node /r/b)",
            Some(XdmItem::Node(root)),
            facade(),
            &options,
        )
        .unwrap();
    assert!(matches!(result.updates[0], PendingUpdate::Put { .. }));
    engine.execute_pending_updates(result.updates, facade(), &options).unwrap();
    assert_eq!(
        writer.stored.borrow().as_slice(),
        &[("file:///out.xml".to_string(), r#"<r id="1"><a>alpha</a><c>gamma</c></r>"#.to_string())]
    );
}

#[test]
fn transferable_updates_keep_their_shape() {
    let root = sample();
    let result = Engine::<SimpleNode>::new()
        .evaluate_updating_expression(
            "(rename node /r/a as 'x', insert node <n/> into /r/b)",
            Some(XdmItem::Node(root)),
            facade(),
            &options(),
        )
        .unwrap();
    let transferable = result.transferable();
    assert_eq!(transferable.len(), 2);
    let json = serde_json::to_value(transferable.iter().map(|u| u.clone().map_nodes(|n| n.to_xml())).collect::<Vec<_>>())
        .unwrap();
    assert_eq!(json[0]["type"], "rename");
}
