use super::common::{atomic, empty, node_arg, opt_atomic, optional, string_arg};
use super::{CallCtx, FnResult};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{XdmNode, traverse};
use crate::types::lexical::{is_ncname, is_qname};
use crate::xdm::{AtomicPayload, AtomicValue, QName, XdmItem, XdmSequence, ready_or_pending};

/// Splits `prefix:local` into its parts.
fn split_lexical(lexical: &str) -> Result<(Option<&str>, &str), Error> {
    if !is_qname(lexical) {
        return Err(Error::from_code(ErrorCode::FOCA0002, format!("'{lexical}' is not a lexical QName")));
    }
    Ok(match lexical.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, lexical),
    })
}

fn qname_of<N>(arg: &[XdmItem<N>]) -> Option<&QName> {
    match opt_atomic(arg).map(AtomicValue::payload) {
        Some(AtomicPayload::QName(q)) => Some(q),
        _ => None,
    }
}

/// `fn:QName($uri, $lexical)`.
pub(super) fn qname_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let uri = string_arg(&args[0]);
    let lexical = string_arg(&args[1]);
    let (prefix, local) = split_lexical(lexical.trim())?;
    if uri.is_empty() && prefix.is_some() {
        return Err(Error::from_code(ErrorCode::FOCA0002, format!("prefixed QName '{lexical}' needs a namespace")));
    }
    let ns = (!uri.is_empty()).then_some(uri.as_str());
    atomic(AtomicValue::qname(QName::new(prefix, ns, local)))
}

/// `fn:resolve-QName($lexical, $element)`: the prefix resolves against the element's in-scope namespaces.
pub(super) fn resolve_qname_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(value) = opt_atomic(&args[0]) else { return empty() };
    let lexical = value.lexical();
    let (prefix, local) = split_lexical(lexical.trim())?;
    let Some(element) = node_arg(&args[1], "resolve-QName")? else { return empty() };
    let binding = ready_or_pending!(traverse::in_scope_namespace(&*cc.params.facade, &element, prefix));
    let ns = match (binding, prefix) {
        (Some(ns), _) => ns,
        (None, None) => None,
        (None, Some(p)) => {
            return Err(Error::from_code(ErrorCode::FONS0004, format!("no namespace is bound to prefix '{p}'")));
        }
    };
    atomic(AtomicValue::qname(QName::new(prefix, ns.as_deref(), local)))
}

pub(super) fn prefix_from_qname_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let prefix = qname_of(&args[0]).and_then(|q| q.prefix.clone());
    optional(prefix.map(|p| AtomicValue::new(crate::types::AtomicType::NCName, AtomicPayload::String(p.into()))))
}

pub(super) fn local_name_from_qname_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let local = qname_of(&args[0]).map(|q| q.local.clone());
    optional(local.map(|l| AtomicValue::new(crate::types::AtomicType::NCName, AtomicPayload::String(l.into()))))
}

pub(super) fn namespace_uri_from_qname_fn<N: XdmNode>(_cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(q) = qname_of(&args[0]) else { return empty() };
    atomic(AtomicValue::any_uri(q.ns_uri.clone().unwrap_or_default()))
}

/// `fn:namespace-uri-for-prefix($prefix, $element)`.
pub(super) fn namespace_uri_for_prefix_fn<N: XdmNode>(cc: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let prefix = string_arg(&args[0]);
    if !prefix.is_empty() && !is_ncname(&prefix) {
        return empty();
    }
    let Some(element) = node_arg(&args[1], "namespace-uri-for-prefix")? else { return empty() };
    let prefix = (!prefix.is_empty()).then_some(prefix.as_str());
    let binding = ready_or_pending!(traverse::in_scope_namespace(&*cc.params.facade, &element, prefix));
    optional(binding.flatten().map(AtomicValue::any_uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a:b", Some("a"), "b")]
    #[case("local", None, "local")]
    fn lexical_qnames_split(#[case] lexical: &str, #[case] prefix: Option<&str>, #[case] local: &str) {
        assert_eq!(split_lexical(lexical).unwrap(), (prefix, local));
    }

    #[rstest]
    #[case("1abc")]
    #[case("a:b:c")]
    #[case("")]
    fn malformed_qnames(#[case] lexical: &str) {
        assert!(split_lexical(lexical).unwrap_err().is(ErrorCode::FOCA0002));
    }
}
