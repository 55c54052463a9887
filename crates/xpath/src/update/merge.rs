use super::PendingUpdate;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use std::collections::{HashMap, HashSet};

/// Concatenates pending update lists and rejects the result when two updates conflict.
pub fn merge_updates<N: XdmNode>(
    lists: impl IntoIterator<Item = Vec<PendingUpdate<N>>>,
) -> Result<Vec<PendingUpdate<N>>, Error> {
    let merged: Vec<_> = lists.into_iter().flatten().collect();
    check_compatibility(&merged)?;
    Ok(merged)
}

/// Conflict rules of a pending update list:
///
/// * two renames of one node raise `XUDY0015`,
/// * two `replace node` on one node raise `XUDY0016`,
/// * two value replacements on one node raise `XUDY0017`,
/// * two `fn:put` to one URI raise `XUDY0031`,
/// * namespace bindings introduced on one element must agree (`XUDY0024`).
pub fn check_compatibility<N: XdmNode>(updates: &[PendingUpdate<N>]) -> Result<(), Error> {
    tracing::trace!(count = updates.len(), "checking pending update list");
    let mut renamed = HashSet::new();
    let mut replaced = HashSet::new();
    let mut revalued = HashSet::new();
    let mut stored = HashSet::new();
    let mut bindings: HashMap<&N, HashMap<String, Option<String>>> = HashMap::new();

    for update in updates {
        match update {
            PendingUpdate::Rename { target, name } => {
                if !renamed.insert(target) {
                    return Err(conflict(ErrorCode::XUDY0015, "renamed", target));
                }
                if target.kind() == NodeKind::Element
                    && let Some(prefix) = &name.prefix
                {
                    bind(&mut bindings, target, prefix, name.ns_uri.clone())?;
                }
            }
            PendingUpdate::ReplaceNode { target, .. } => {
                if !replaced.insert(target) {
                    return Err(conflict(ErrorCode::XUDY0016, "replaced", target));
                }
            }
            PendingUpdate::ReplaceValue { target, .. } | PendingUpdate::ReplaceElementContent { target, .. } => {
                if !revalued.insert(target) {
                    return Err(conflict(ErrorCode::XUDY0017, "given a new value", target));
                }
            }
            PendingUpdate::Put { uri, .. } => {
                if !stored.insert(uri.as_str()) {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0031,
                        format!("more than one document is stored at '{uri}'"),
                    ));
                }
            }
            PendingUpdate::InsertAttributes { target, attributes } => {
                for name in attributes.iter().filter_map(XdmNode::name) {
                    if let Some(prefix) = &name.prefix {
                        bind(&mut bindings, target, prefix, name.ns_uri.clone())?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn conflict<N: XdmNode>(code: ErrorCode, what: &str, target: &N) -> Error {
    Error::from_code(code, format!("node {target:?} is {what} more than once"))
}

fn bind<'a, N: XdmNode>(
    bindings: &mut HashMap<&'a N, HashMap<String, Option<String>>>,
    element: &'a N,
    prefix: &str,
    uri: Option<String>,
) -> Result<(), Error> {
    let scope = bindings.entry(element).or_default();
    match scope.get(prefix) {
        Some(existing) if *existing != uri => Err(Error::from_code(
            ErrorCode::XUDY0024,
            format!("prefix '{prefix}' would be bound to two namespaces on one element"),
        )),
        _ => {
            scope.insert(prefix.to_string(), uri);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, attr_ns, doc, elem, text};
    use crate::xdm::QName;
    use rstest::rstest;

    fn target() -> SimpleNode {
        let root = doc().child(elem("a").child(text("x"))).build();
        root.children()[0].clone()
    }

    #[rstest]
    #[case::renames(ErrorCode::XUDY0015)]
    #[case::replacements(ErrorCode::XUDY0016)]
    #[case::values(ErrorCode::XUDY0017)]
    #[case::puts(ErrorCode::XUDY0031)]
    fn each_conflict_has_its_code(#[case] code: ErrorCode) {
        let a = target();
        let update = match code {
            ErrorCode::XUDY0015 => PendingUpdate::Rename { target: a.clone(), name: QName::local("b") },
            ErrorCode::XUDY0016 => PendingUpdate::ReplaceNode { target: a.clone(), replacement: vec![] },
            ErrorCode::XUDY0017 => PendingUpdate::ReplaceElementContent { target: a.clone(), text: None },
            _ => PendingUpdate::Put { node: a.clone(), uri: "file:///out.xml".into() },
        };
        let err = merge_updates([vec![update.clone()], vec![update]]).unwrap_err();
        assert!(err.is(code));
    }

    #[test]
    fn updates_on_distinct_targets_merge() {
        let a = target();
        let b = elem("b").build();
        let merged = merge_updates([
            vec![PendingUpdate::Rename { target: a.clone(), name: QName::local("x") }],
            vec![PendingUpdate::Rename { target: b, name: QName::local("y") }, PendingUpdate::Delete { target: a }],
        ])
        .unwrap();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn conflicting_prefixes_on_one_element() {
        let a = target();
        let first = attr_ns("urn:one", "p:x", "1");
        let second = attr_ns("urn:two", "p:y", "2");
        let err = check_compatibility(&[
            PendingUpdate::InsertAttributes { target: a.clone(), attributes: vec![first] },
            PendingUpdate::InsertAttributes { target: a, attributes: vec![second] },
        ])
        .unwrap_err();
        assert!(err.is(ErrorCode::XUDY0024));
    }
}
