//! Function conversion rules at call time, for built-in functions and for host functions
//! registered on the engine.

use arbor_xpath::simple_node::{attr, doc as simple_doc, elem, text};
use arbor_xpath::{
    DomFacade, Engine, Error, ErrorCode, ExpandedName, NativeValue, Options, SimpleNode, SimpleTree, XdmItem,
};
use rstest::rstest;
use std::rc::Rc;

const TEST_NS: &str = "urn:test";

fn build_doc() -> SimpleNode {
    simple_doc()
        .child(
            elem("root")
                .child(elem("item").attr(attr("value", "Sample")))
                .child(elem("item").attr(attr("value", "Data")))
                .child(elem("item").child(text("2"))),
        )
        .build()
}

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn options() -> Options<SimpleNode> {
    Options::default().with_namespace_resolver(|prefix| (prefix == "t").then(|| TEST_NS.to_string()))
}

fn string(engine: &Engine<SimpleNode>, query: &str) -> Result<String, arbor_xpath::XPathError> {
    engine.evaluate_xpath_to_string(query, Some(XdmItem::Node(build_doc())), facade(), &options())
}

// ===== built-in functions =====

#[rstest]
#[case::atomizes_attributes("string(string-length(//item[1]/@value))", "6")]
#[case::contains_untyped("string(contains(//item[1]/@value, //item[2]/@value))", "false")]
#[case::substring_casts_numbers("substring(//item[1]/@value, //item[3]/text(), 3)", "amp")]
#[case::number_of_untyped("string(number(//item[3]))", "2")]
#[case::number_of_string("string(number('abc'))", "NaN")]
#[case::contains_any_uri("string(contains(xs:anyURI('http://x.org'), 'x.org'))", "true")]
#[case::distinct_untyped("string(count(distinct-values((//item/@value, 'Data'))))", "2")]
#[case::subsequence_doubles("string-join(subsequence((1, 2, 3, 4), 1.5, 2), ',')", "2,3")]
#[case::round_untyped_precision("string(round(3.14159, //item[3]))", "3.14")]
#[case::years_from_untyped("string(years-from-duration(xs:yearMonthDuration('P3Y2M')))", "3")]
fn builtin_conversion(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(&Engine::new(), query).unwrap(), expected);
}

#[rstest]
#[case::cardinality("string-length(//item/@value)", ErrorCode::XPTY0004)]
#[case::bad_untyped_number("substring('abc', //item[1]/@value)", ErrorCode::FORG0001)]
#[case::string_is_not_numeric("substring('abc', '2')", ErrorCode::XPTY0004)]
#[case::invalid_regex("matches('a', '(')", ErrorCode::FORX0002)]
#[case::bad_duration("years-from-duration(xs:duration('nope'))", ErrorCode::FORG0001)]
#[case::huge_subarray_length("array:subarray([1, 2], 1, 170141183460469231731687303715884105727)", ErrorCode::FOAY0001)]
#[case::huge_subarray_start("array:subarray([1, 2], 99999999999999999999999)", ErrorCode::FOAY0001)]
#[case::non_step_path("string((1, 2)/a)", ErrorCode::XPTY0019)]
fn builtin_conversion_errors(#[case] query: &str, #[case] code: ErrorCode) {
    let err = string(&Engine::new(), query).unwrap_err();
    assert!(err.is(code), "{query}: {err:?}");
}

#[test]
fn path_errors_name_the_offending_type() {
    let message = string(&Engine::new(), "string((1, 2)/a)").unwrap_err().to_string();
    assert!(message.contains("a value of type xs:integer"), "{message}");
}

// ===== host functions =====

fn engine_with_functions() -> Engine<SimpleNode> {
    let mut engine = Engine::new();
    engine
        .register_custom_xpath_function(
            ExpandedName::new(Some(TEST_NS), "describe"),
            &["xs:string?"],
            "xs:string",
            |_, args| {
                Ok(match &args[0] {
                    NativeValue::Null => "nothing".into(),
                    NativeValue::String(s) => format!("'{s}'").into(),
                    other => format!("{other:?}").into(),
                })
            },
        )
        .unwrap();
    engine
        .register_custom_xpath_function(
            ExpandedName::new(Some(TEST_NS), "total"),
            &["xs:double*"],
            "xs:integer",
            |_, args| match &args[0] {
                NativeValue::List(values) => Ok(values.iter().filter_map(|v| v.as_f64()).sum::<f64>().into()),
                _ => Err(Error::from_code(ErrorCode::FOER0000, "expected a list")),
            },
        )
        .unwrap();
    engine
        .register_custom_xpath_function(ExpandedName::new(Some(TEST_NS), "tag"), &["node()"], "xs:string?", |_, args| {
            Ok(args[0].as_node().and_then(|n| arbor_xpath::XdmNode::name(n)).map(|q| q.local).into())
        })
        .unwrap();
    engine
        .register_custom_xpath_function(ExpandedName::new(Some(TEST_NS), "focus"), &[], "xs:string", |ctx, _| {
            Ok(match ctx.context_item {
                Some(XdmItem::Node(_)) => "node",
                Some(_) => "item",
                None => "absent",
            }
            .into())
        })
        .unwrap();
    engine
        .register_custom_xpath_function(ExpandedName::new(Some(TEST_NS), "fail"), &[], "xs:string", |_, _| {
            Err(Error::from_code(ErrorCode::FOER0000, "host refused"))
        })
        .unwrap();
    engine
}

#[rstest]
#[case::empty_is_null("t:describe(())", "nothing")]
#[case::string_passes("t:describe('x')", "'x'")]
#[case::untyped_is_cast("t:describe(//item[2]/@value)", "'Data'")]
#[case::star_is_a_list("string(t:total((1, 2, 4.0)))", "7")]
#[case::empty_list("string(t:total(()))", "0")]
#[case::nodes_pass("t:tag(/root/item[1])", "item")]
#[case::braced_name("Q{urn:test}describe('y')", "'y'")]
#[case::focus_is_visible("t:focus()", "node")]
#[case::focus_inside_paths("string-join(//item ! t:focus(), ',')", "node,node,node")]
fn host_function_arguments_and_results(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(&engine_with_functions(), query).unwrap(), expected);
}

#[test]
fn attribute_nodes_cannot_reach_the_host() {
    let err = string(&engine_with_functions(), "t:tag(//item[1]/@value)").unwrap_err();
    assert!(err.is(ErrorCode::XPTY0004));
}

#[test]
fn host_errors_surface_with_their_code() {
    let err = string(&engine_with_functions(), "t:fail()").unwrap_err();
    assert!(err.is(ErrorCode::FOER0000));
}

#[test]
fn host_functions_are_usable_as_function_items() {
    let engine = engine_with_functions();
    assert_eq!(string(&engine, "string-join(('a', 'b') ! t:describe#1(.), ' ')").unwrap(), "'a' 'b'");
}

#[rstest]
#[case::no_namespace(ExpandedName::local("bare"), ErrorCode::XQST0060)]
#[case::reserved(ExpandedName::new(Some("http://www.w3.org/2005/xpath-functions"), "mine"), ErrorCode::XQST0045)]
fn host_function_names_are_checked(#[case] name: ExpandedName, #[case] code: ErrorCode) {
    let mut engine = Engine::<SimpleNode>::new();
    let err = engine.register_custom_xpath_function(name, &[], "item()*", |_, _| Ok(NativeValue::Null)).unwrap_err();
    assert!(err.is(code));
}

#[test]
fn unknown_parameter_types_are_rejected() {
    let mut engine = Engine::<SimpleNode>::new();
    let err = engine
        .register_custom_xpath_function(ExpandedName::new(Some(TEST_NS), "odd"), &["xs:nonsense"], "item()*", |_, _| {
            Ok(NativeValue::Null)
        })
        .unwrap_err();
    assert!(err.is(ErrorCode::XPST0051));
}
