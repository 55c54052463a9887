use super::common::{atomic, empty, opt_atomic, string, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{AtomicValue, XdmSequence};
use std::fmt::Write;
use std::sync::Arc;

fn percent_encode(s: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if keep(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

/// Resolves `relative` against `base` the RFC 3986 way.
pub(crate) fn resolve_uri(relative: &str, base: Option<&str>) -> Result<String, Error> {
    if let Ok(absolute) = url::Url::parse(relative) {
        return Ok(absolute.to_string());
    }
    let Some(base) = base else {
        return Err(Error::from_code(ErrorCode::FONS0005, "there is no base URI to resolve against"));
    };
    let base = url::Url::parse(base).map_err(|e| {
        Error::from_code(ErrorCode::FORG0002, format!("invalid base URI '{base}'"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    })?;
    if base.cannot_be_a_base() {
        return Err(Error::from_code(ErrorCode::FORG0009, format!("'{base}' cannot serve as a base URI")));
    }
    base.join(relative).map(String::from).map_err(|e| {
        Error::from_code(ErrorCode::FORG0002, format!("cannot resolve '{relative}'"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    })
}

pub(super) fn resolve_uri_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(relative) = opt_atomic(&args[0]) else { return empty() };
    let base = args.get(1).map(|b| string_arg(b));
    atomic(AtomicValue::any_uri(resolve_uri(&relative.lexical(), base.as_deref())?))
}

pub(super) fn encode_for_uri_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    string(percent_encode(&s, |c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')))
}

pub(super) fn iri_to_uri_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    string(percent_encode(&s, |c| {
        c.is_ascii_graphic() && !matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '\\' | '^' | '`')
    }))
}

pub(super) fn escape_html_uri_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_arg(&args[0]);
    string(percent_encode(&s, |c| (' '..='~').contains(&c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("b/c.xml", Some("http://example.com/a/x.xml"), "http://example.com/a/b/c.xml")]
    #[case("../d", Some("http://example.com/a/b/"), "http://example.com/a/d")]
    #[case("http://other.org/", None, "http://other.org/")]
    fn resolves_against_base(#[case] rel: &str, #[case] base: Option<&str>, #[case] expected: &str) {
        assert_eq!(resolve_uri(rel, base).unwrap(), expected);
    }

    #[test]
    fn relative_without_base_fails() {
        assert!(resolve_uri("a/b", None).unwrap_err().is(ErrorCode::FONS0005));
    }

    #[test]
    fn encoding() {
        let keep = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        assert_eq!(percent_encode("100% ü", keep), "100%25%20%C3%BC");
    }
}
