//! Casts, constructor functions and `castable as`.

use arbor_xpath::{DomFacade, Engine, ErrorCode, Options, SimpleNode, SimpleTree};
use proptest::prelude::*;
use rstest::rstest;
use std::rc::Rc;

fn facade() -> Rc<dyn DomFacade<SimpleNode>> {
    Rc::new(SimpleTree)
}

fn string(query: &str) -> Result<String, arbor_xpath::XPathError> {
    Engine::<SimpleNode>::new().evaluate_xpath_to_string(query, None, facade(), &Options::default())
}

#[rstest]
#[case::float_to_untyped("string(xs:float('10.123') cast as xs:untypedAtomic)", "10.123")]
#[case::double_exponent("string(xs:double('1234567'))", "1.234567E6")]
#[case::decimal_trailing_zeros("string(xs:decimal('01.500'))", "1.5")]
#[case::integer_from_decimal("string(xs:integer(-3.9))", "-3")]
#[case::boolean_from_number("string(xs:boolean(0))", "false")]
#[case::boolean_from_string("string(xs:boolean(' 1 '))", "true")]
#[case::date_with_zone("string(xs:date('2024-02-29+01:00'))", "2024-02-29+01:00")]
#[case::date_time_to_date("string(xs:date(xs:dateTime('2024-03-01T23:59:59Z')))", "2024-03-01Z")]
#[case::duration_normalized("string(xs:dayTimeDuration('PT90M'))", "PT1H30M")]
#[case::hex_to_base64("string(xs:base64Binary(xs:hexBinary('48656C6C6F')))", "SGVsbG8=")]
#[case::empty_cast("string(() cast as xs:integer?)", "")]
#[case::castable_yes("string('12' castable as xs:integer)", "true")]
#[case::castable_no("string('1.5' castable as xs:integer)", "false")]
#[case::castable_empty("string(() castable as xs:integer)", "false")]
#[case::castable_empty_optional("string(() castable as xs:integer?)", "true")]
fn casts(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(string(query).unwrap(), expected);
}

#[rstest]
#[case::invalid_lexical("xs:integer('ten')", ErrorCode::FORG0001)]
#[case::out_of_range("xs:byte(300)", ErrorCode::FORG0001)]
#[case::nan_to_integer("xs:integer(xs:double('NaN'))", ErrorCode::FOCA0002)]
#[case::no_conversion("xs:date(12)", ErrorCode::XPTY0004)]
#[case::boolean_to_time("xs:time(true())", ErrorCode::XPTY0004)]
#[case::date_to_integer("xs:integer(xs:date('2020-01-01'))", ErrorCode::XPTY0004)]
#[case::number_to_binary("xs:hexBinary(1)", ErrorCode::XPTY0004)]
#[case::duration_to_boolean("xs:boolean(xs:dayTimeDuration('PT1S'))", ErrorCode::XPTY0004)]
#[case::sequence("(1, 2) cast as xs:string", ErrorCode::XPTY0004)]
#[case::empty_not_allowed("() cast as xs:integer", ErrorCode::XPTY0004)]
#[case::invalid_date("xs:date('2023-02-29')", ErrorCode::FORG0001)]
fn cast_errors(#[case] query: &str, #[case] code: ErrorCode) {
    let err = string(query).unwrap_err();
    assert!(err.is(code), "{query}: {err:?}");
}

#[rstest]
#[case::notation("'a' cast as xs:NOTATION")]
#[case::any_atomic("'a' cast as xs:anyAtomicType")]
#[case::notation_castable("'a' castable as xs:NOTATION")]
#[case::any_simple("xs:untypedAtomic('1') cast as xs:anySimpleType")]
#[case::any_simple_castable("1 castable as xs:anySimpleType")]
fn abstract_targets_are_static_errors(#[case] query: &str) {
    let err = string(query).unwrap_err();
    assert!(err.is(ErrorCode::XPST0080), "{query}: {err:?}");
}

#[rstest]
#[case::unknown_cast("'a' cast as xs:nothing")]
#[case::any_simple_is_not_an_item_type("1 instance of xs:anySimpleType")]
fn unknown_types_are_static_errors(#[case] query: &str) {
    let err = string(query).unwrap_err();
    assert!(err.is(ErrorCode::XPST0051), "{query}: {err:?}");
}

proptest! {
    #[test]
    fn integers_survive_a_string_round_trip(n in -1_000_000_000i32..1_000_000_000) {
        let options = Options::default().with_variable("n", n);
        let same = Engine::<SimpleNode>::new()
            .evaluate_xpath_to_boolean("xs:integer(xs:string(xs:integer($n))) eq xs:integer($n)", None, facade(), &options)
            .unwrap();
        prop_assert!(same);
    }

    #[test]
    fn doubles_survive_a_string_round_trip(d in -1e300f64..1e300) {
        let options = Options::default().with_variable("d", d);
        let same = Engine::<SimpleNode>::new()
            .evaluate_xpath_to_boolean("xs:double(string($d)) eq $d", None, facade(), &options)
            .unwrap();
        prop_assert!(same);
    }

    #[test]
    fn casting_to_the_same_type_changes_nothing(s in "[a-z0-9 ]{0,12}") {
        let options = Options::default().with_variable("s", s.as_str());
        let same = Engine::<SimpleNode>::new()
            .evaluate_xpath_to_boolean("(($s cast as xs:string) cast as xs:string) eq $s", None, facade(), &options)
            .unwrap();
        prop_assert!(same);
    }
}
