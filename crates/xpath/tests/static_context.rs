//! Static context: namespace and function name resolution, library modules and imports.

use arbor_xpath::{Engine, ErrorCode, ExpandedName, Language, Options, SimpleNode, SimpleTree, XPathError};
use arbor_xpath::simple_node::{doc, elem_ns};
use arbor_xpath::XdmItem;
use rstest::rstest;
use std::rc::Rc;

const MATH_MODULE: &str = r#"
    module namespace m = "urn:example:math";
    declare variable $m:base := 10;
    declare function m:double($x) { $x * 2 };
    declare function m:shift($x) { $x + $m:base };
"#;

fn string(engine: &Engine<SimpleNode>, query: &str, options: &Options<SimpleNode>) -> Result<String, XPathError> {
    engine.evaluate_xpath_to_string(query, None, Rc::new(SimpleTree), options)
}

#[test]
fn default_context_contains_builtin_functions() {
    let engine = Engine::<SimpleNode>::new();
    assert_eq!(string(&engine, "string(fn:true())", &Options::default()).unwrap(), "true");
    assert_eq!(string(&engine, "string(math:pi() > 3)", &Options::default()).unwrap(), "true");
}

#[rstest]
#[case::unknown_function("nope()", ErrorCode::XPST0017)]
#[case::wrong_arity("fn:true(1)", ErrorCode::XPST0017)]
#[case::unknown_prefix("zz:thing()", ErrorCode::XPST0081)]
#[case::unknown_variable("$missing", ErrorCode::XPST0008)]
#[case::syntax("1 +", ErrorCode::XPST0003)]
fn static_errors(#[case] query: &str, #[case] code: ErrorCode) {
    let err = string(&Engine::new(), query, &Options::default()).unwrap_err();
    assert!(matches!(err, XPathError::Static { .. } | XPathError::Parse { .. }), "{err:?}");
    assert!(err.is(code), "{query}: {err:?}");
}

#[test]
fn namespace_resolver_answers_unknown_prefixes() {
    let root = doc().child(elem_ns("urn:books", "b:shelf")).build();
    let options = Options::default().with_namespace_resolver(|p| (p == "bk").then(|| "urn:books".to_string()));
    let found = Engine::<SimpleNode>::new()
        .evaluate_xpath_to_boolean("exists(/bk:shelf)", Some(XdmItem::Node(root)), Rc::new(SimpleTree), &options)
        .unwrap();
    assert!(found);
}

#[test]
fn function_name_resolver_maps_unprefixed_calls() {
    let mut engine = Engine::<SimpleNode>::new();
    engine
        .register_custom_xpath_function(ExpandedName::new(Some("urn:host"), "answer"), &[], "xs:integer", |_, _| {
            Ok(42.into())
        })
        .unwrap();
    let options = Options::default().with_function_name_resolver(|prefix, local, arity| {
        (prefix.is_empty() && local == "answer" && arity == 0).then(|| ExpandedName::new(Some("urn:host"), "answer"))
    });
    assert_eq!(string(&engine, "string(answer() + 1)", &options).unwrap(), "43");
    assert_eq!(string(&engine, "string(count((1, 2)))", &options).unwrap(), "2");
}

#[test]
fn registered_modules_are_imported_by_prefix() {
    let mut engine = Engine::<SimpleNode>::new();
    assert_eq!(engine.register_xquery_module(MATH_MODULE).unwrap(), "urn:example:math");
    let options = Options::default().with_module_import("mth", "urn:example:math");
    assert_eq!(string(&engine, "string(mth:double(21))", &options).unwrap(), "42");
    assert_eq!(string(&engine, "string(mth:shift(1))", &options).unwrap(), "11");
    assert_eq!(string(&engine, "string($mth:base)", &options).unwrap(), "10");
}

#[test]
fn xquery_prolog_imports_registered_modules() {
    let mut engine = Engine::<SimpleNode>::new();
    engine.register_xquery_module(MATH_MODULE).unwrap();
    let options = Options::default().with_language(Language::XQuery31);
    let query = r#"import module namespace x = "urn:example:math"; x:double(4)"#;
    let value = engine.evaluate_xpath_to_number(query, None, Rc::new(SimpleTree), &options).unwrap();
    assert_eq!(value, 8.0);
}

#[test]
fn module_registration_is_additive() {
    let mut engine = Engine::<SimpleNode>::new();
    engine.register_xquery_module(MATH_MODULE).unwrap();
    engine
        .register_xquery_module(
            r#"module namespace m = "urn:example:math"; declare function m:triple($x) { $x * 3 };"#,
        )
        .unwrap();
    let options = Options::default().with_module_import("m", "urn:example:math");
    assert_eq!(string(&engine, "string(m:triple(2) + m:double(2))", &options).unwrap(), "10");
    assert_eq!(engine.modules().len(), 1);
}

#[test]
fn importing_an_unknown_module_fails() {
    let options = Options::default().with_module_import("q", "urn:nowhere");
    let err = string(&Engine::new(), "1", &options).unwrap_err();
    assert!(err.is(ErrorCode::XQST0059));
}

#[test]
fn module_declarations_must_use_the_target_namespace() {
    let mut engine = Engine::<SimpleNode>::new();
    let err = engine
        .register_xquery_module(r#"module namespace m = "urn:m"; declare function local:f() { 1 };"#)
        .unwrap_err();
    assert!(err.is(ErrorCode::XQST0048), "{err:?}");
}

#[test]
fn library_modules_cannot_be_evaluated() {
    let options = Options::default().with_language(Language::XQuery31);
    let err = string(&Engine::new(), MATH_MODULE, &options).unwrap_err();
    assert!(err.is(ErrorCode::XPST0003));
}

#[test]
fn main_modules_cannot_be_registered() {
    let err = Engine::<SimpleNode>::new().register_xquery_module("1 + 1").unwrap_err();
    assert!(err.is(ErrorCode::XPST0003));
}

#[test]
fn variables_are_bound_from_options() {
    let options = Options::default().with_variable("limit", 3).with_variable("label", "n");
    let engine = Engine::<SimpleNode>::new();
    assert_eq!(string(&engine, "$label || string($limit * 2)", &options).unwrap(), "n6");
    let rebound = options.clone().with_variable("limit", 5);
    assert_eq!(string(&engine, "$label || string($limit * 2)", &rebound).unwrap(), "n10");
}
