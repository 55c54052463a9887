use super::common::{
    atomic, atomized, boolean, check_collation, context_item, double_arg, empty, integer, item_string, opt_atomic, ready,
    string, string_arg,
};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::lexical::collapse_whitespace;
use crate::xdm::{AtomicValue, XdmItem, XdmSequence, ready_or_pending};
use itertools::Itertools;
use smallvec::SmallVec;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Each argument is `xs:anyAtomicType?`; there is no signature to coerce them, so
/// atomization and the cardinality check happen here.
pub(super) fn concat_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        let values = ready_or_pending!(atomized(cc, arg)?);
        match values.as_slice() {
            [] => {}
            [v] => out.push_str(&v.lexical()),
            _ => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("argument {} of fn:concat is a sequence of {} values", i + 1, values.len()),
                ));
            }
        }
    }
    string(out)
}

pub(super) fn string_join_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let separator = args.get(1).map(|s| string_arg(s)).unwrap_or_default();
    let joined = args[0].iter().filter_map(XdmItem::as_atomic).map(AtomicValue::lexical).join(&separator);
    string(joined)
}

/// The string argument, or the string value of the context item for the zero-argument forms.
fn string_or_context<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> Result<crate::xdm::Fetch<String>, Error> {
    match args.first() {
        Some(arg) => Ok(crate::xdm::Fetch::Ready(string_arg(arg))),
        None => item_string(cc, std::slice::from_ref(context_item(cc)?)),
    }
}

pub(super) fn string_length_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = ready_or_pending!(string_or_context(cc, args)?);
    integer(s.chars().count() as i128)
}

pub(super) fn normalize_space_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = ready_or_pending!(string_or_context(cc, args)?);
    string(collapse_whitespace(&s))
}

pub(super) fn normalize_unicode_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    let form = args.get(1).map(|f| string_arg(f).trim().to_ascii_uppercase()).unwrap_or_else(|| "NFC".to_string());
    let normalized: String = match form.as_str() {
        "" => s,
        "NFC" => s.nfc().collect(),
        "NFD" => s.nfd().collect(),
        "NFKC" => s.nfkc().collect(),
        "NFKD" => s.nfkd().collect(),
        other => {
            return Err(Error::from_code(ErrorCode::FOCH0003, format!("unsupported normalization form '{other}'")));
        }
    };
    string(normalized)
}

pub(super) fn upper_case_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    string(string_arg(&args[0]).to_uppercase())
}

pub(super) fn lower_case_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    string(string_arg(&args[0]).to_lowercase())
}

pub(super) fn contains_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    boolean(string_arg(&args[0]).contains(&string_arg(&args[1])))
}

pub(super) fn starts_with_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    boolean(string_arg(&args[0]).starts_with(&string_arg(&args[1])))
}

pub(super) fn ends_with_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    boolean(string_arg(&args[0]).ends_with(&string_arg(&args[1])))
}

pub(super) fn substring_before_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    let (s, needle) = (string_arg(&args[0]), string_arg(&args[1]));
    string(s.find(&needle).map(|i| &s[..i]).unwrap_or_default())
}

pub(super) fn substring_after_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    let (s, needle) = (string_arg(&args[0]), string_arg(&args[1]));
    string(s.find(&needle).map(|i| &s[i + needle.len()..]).unwrap_or_default())
}

/// XPath `round`: halves go towards positive infinity.
fn xpath_round(f: f64) -> f64 {
    (f + 0.5).floor()
}

/// Characters at 1-based positions `p` with `round(start) <= p < round(start) + round(length)`.
pub(crate) fn substring(s: &str, start: f64, length: Option<f64>) -> String {
    let first = xpath_round(start);
    let end = match length {
        Some(len) => first + xpath_round(len),
        None => f64::INFINITY,
    };
    if first.is_nan() || end.is_nan() {
        return String::new();
    }
    s.chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= first && p < end
        })
        .map(|(_, c)| c)
        .collect()
}

pub(super) fn substring_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    let length = args.get(2).map(|l| double_arg(l));
    string(substring(&s, double_arg(&args[1]), length))
}

pub(super) fn translate_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    let from: SmallVec<[char; 16]> = string_arg(&args[1]).chars().collect();
    let to: SmallVec<[char; 16]> = string_arg(&args[2]).chars().collect();
    let mut map: HashMap<char, Option<char>> = HashMap::with_capacity(from.len());
    for (i, c) in from.iter().enumerate() {
        map.entry(*c).or_insert_with(|| to.get(i).copied());
    }
    let out: String = s
        .chars()
        .filter_map(|c| match map.get(&c) {
            Some(mapped) => *mapped,
            None => Some(c),
        })
        .collect();
    string(out)
}

fn is_xml_char(c: char) -> bool {
    matches!(c as u32, 0x9 | 0xA | 0xD | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x10000..=0x10FFFF)
}

pub(super) fn codepoints_to_string_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut out = String::with_capacity(args[0].len());
    for item in &args[0] {
        let cp = item.as_atomic().and_then(AtomicValue::to_i128).unwrap_or(-1);
        let c = u32::try_from(cp)
            .ok()
            .and_then(char::from_u32)
            .filter(|c| is_xml_char(*c))
            .ok_or_else(|| Error::from_code(ErrorCode::FOCH0001, format!("{cp} is not a valid XML character")))?;
        out.push(c);
    }
    string(out)
}

pub(super) fn string_to_codepoints_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    ready(s.chars().map(|c| XdmItem::Atomic(AtomicValue::integer(i64::from(u32::from(c))))).collect())
}

pub(super) fn compare_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    check_collation(args.get(2))?;
    let (Some(a), Some(b)) = (opt_atomic(&args[0]), opt_atomic(&args[1])) else { return empty() };
    let ord = a.lexical().cmp(&b.lexical());
    integer(ord as i128)
}

pub(super) fn codepoint_equal_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (Some(a), Some(b)) = (opt_atomic(&args[0]), opt_atomic(&args[1])) else { return empty() };
    boolean(a.lexical() == b.lexical())
}

pub(super) fn untyped_atomic_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    atomic(AtomicValue::untyped(string_arg(&args[0])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("motor car", 6.0, None, " car")]
    #[case("metadata", 4.0, Some(3.0), "ada")]
    #[case("12345", 1.5, Some(2.6), "234")]
    #[case("12345", 0.0, Some(3.0), "12")]
    #[case("12345", 5.0, Some(-3.0), "")]
    #[case("12345", -3.0, Some(5.0), "1")]
    #[case("12345", f64::NAN, Some(3.0), "")]
    #[case("12345", -42.0, Some(f64::INFINITY), "12345")]
    #[case("12345", f64::NEG_INFINITY, Some(f64::INFINITY), "")]
    fn substring_positions(#[case] s: &str, #[case] start: f64, #[case] len: Option<f64>, #[case] expected: &str) {
        assert_eq!(substring(s, start, len), expected);
    }

    #[test]
    fn codepoint_validity() {
        assert!(is_xml_char('a'));
        assert!(!is_xml_char('\u{0}'));
        assert!(is_xml_char('\u{1F600}'));
    }
}
