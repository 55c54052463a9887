use arbor_xpath::{Engine, ErrorCode, Options, SimpleNode, SimpleTree};
use rstest::rstest;
use std::rc::Rc;

fn eval(query: &str) -> Result<String, arbor_xpath::XPathError> {
    Engine::<SimpleNode>::new().evaluate_xpath_to_string(query, None, Rc::new(SimpleTree), &Options::default())
}

#[rstest]
fn concat_variadic_many_args() {
    let expr = r#"concat('a', '-', 'b', '-', 'c', '-', 'd', '-', 'e', '-', 'f', '-', 'g')"#;
    assert_eq!(eval(expr).expect("concat should succeed"), "a-b-c-d-e-f-g");
}

#[rstest]
fn concat_too_few_args_reports_wrong_arity() {
    let err = eval("concat('a')").expect_err("concat needs two arguments");
    assert!(err.is(ErrorCode::XPST0017), "{err:?}");
}

#[rstest]
#[case::empty_arguments("concat((), 'a', ())", "a")]
#[case::numbers("concat(1, 2.5, xs:double('1e3'))", "12.51000")]
#[case::booleans("concat(true(), '/', false())", "true/false")]
#[case::operator("'a' || 1 || ()", "a1")]
fn concat_atomizes_its_arguments(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query).unwrap(), expected);
}

#[test]
fn concat_rejects_sequences() {
    let err = eval("concat(('a', 'b'), 'c')").unwrap_err();
    assert!(err.is(ErrorCode::XPTY0004));
}

#[rstest]
#[case::string_join("string-join(('a', 'b', 'c'), '+')", "a+b+c")]
#[case::string_join_numbers("string-join(1 to 3)", "123")]
#[case::substring_before("substring-before('2024-05-01', '-')", "2024")]
#[case::substring_after("substring-after('2024-05-01', '-')", "05-01")]
#[case::translate("translate('bar', 'abc', 'ABC')", "BAr")]
#[case::translate_drops("translate('--aaa--', 'a-', 'A')", "AAA")]
#[case::normalize_space("normalize-space('  a   b  ')", "a b")]
#[case::upper("upper-case('straße')", "STRASSE")]
#[case::codepoints("codepoints-to-string((72, 105))", "Hi")]
#[case::nfd("string(string-length(normalize-unicode('é', 'NFD')))", "2")]
#[case::replace("replace('abracadabra', 'a(.)', 'a$1$1')", "abbraccaddabbra")]
#[case::tokenize("string-join(tokenize(' a  b '), '|')", "a|b")]
#[case::compare("string(compare('abc', 'abd'))", "-1")]
#[case::substring_surrogates("substring('😀ab', 2)", "ab")]
fn string_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(query).unwrap(), expected);
}
