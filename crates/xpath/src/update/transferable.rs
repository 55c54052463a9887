use super::PendingUpdate;
use crate::xdm::QName;
use serde::{Deserialize, Serialize};

/// A name in the transferable shape; an empty prefix means none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferableName {
    pub prefix: String,
    pub namespace_uri: Option<String>,
    pub local_name: String,
}

impl From<QName> for TransferableName {
    fn from(name: QName) -> Self {
        Self { prefix: name.prefix.unwrap_or_default(), namespace_uri: name.ns_uri, local_name: name.local }
    }
}

impl From<TransferableName> for QName {
    fn from(name: TransferableName) -> Self {
        let prefix = (!name.prefix.is_empty()).then_some(name.prefix.as_str());
        QName::new(prefix, name.namespace_uri.as_deref(), &name.local_name)
    }
}

/// A pending update that can cross a process or language boundary.
///
/// Node handles become whatever the caller maps them to with [`map_nodes`](Self::map_nodes),
/// typically stable identifiers of the host document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransferablePendingUpdate<T> {
    InsertInto { target: T, content: Vec<T> },
    InsertIntoAsFirst { target: T, content: Vec<T> },
    InsertIntoAsLast { target: T, content: Vec<T> },
    InsertBefore { target: T, content: Vec<T> },
    InsertAfter { target: T, content: Vec<T> },
    InsertAttributes { target: T, content: Vec<T> },
    Delete { target: T },
    ReplaceNode { target: T, replacement: Vec<T> },
    ReplaceValue { target: T, string_value: String },
    ReplaceElementContent { target: T, text: Option<T> },
    Rename { target: T, new_name: TransferableName },
    Put { target: T, uri: String },
}

impl<T> TransferablePendingUpdate<T> {
    pub fn map_nodes<U>(self, mut f: impl FnMut(T) -> U) -> TransferablePendingUpdate<U> {
        use TransferablePendingUpdate as T2;
        match self {
            T2::InsertInto { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertInto { target: f(target), content }
            }
            T2::InsertIntoAsFirst { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertIntoAsFirst { target: f(target), content }
            }
            T2::InsertIntoAsLast { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertIntoAsLast { target: f(target), content }
            }
            T2::InsertBefore { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertBefore { target: f(target), content }
            }
            T2::InsertAfter { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertAfter { target: f(target), content }
            }
            T2::InsertAttributes { target, content } => {
                let content = map_all(content, &mut f);
                T2::InsertAttributes { target: f(target), content }
            }
            T2::ReplaceNode { target, replacement } => {
                let replacement = map_all(replacement, &mut f);
                T2::ReplaceNode { target: f(target), replacement }
            }
            T2::Delete { target } => T2::Delete { target: f(target) },
            T2::ReplaceValue { target, string_value } => T2::ReplaceValue { target: f(target), string_value },
            T2::ReplaceElementContent { target, text } => {
                T2::ReplaceElementContent { target: f(target), text: text.map(&mut f) }
            }
            T2::Rename { target, new_name } => T2::Rename { target: f(target), new_name },
            T2::Put { target, uri } => T2::Put { target: f(target), uri },
        }
    }
}

fn map_all<T, U>(nodes: Vec<T>, f: &mut impl FnMut(T) -> U) -> Vec<U> {
    nodes.into_iter().map(f).collect()
}

impl<N> From<PendingUpdate<N>> for TransferablePendingUpdate<N> {
    fn from(update: PendingUpdate<N>) -> Self {
        use TransferablePendingUpdate as T;
        match update {
            PendingUpdate::InsertInto { target, content } => T::InsertInto { target, content },
            PendingUpdate::InsertIntoAsFirst { target, content } => T::InsertIntoAsFirst { target, content },
            PendingUpdate::InsertIntoAsLast { target, content } => T::InsertIntoAsLast { target, content },
            PendingUpdate::InsertBefore { target, content } => T::InsertBefore { target, content },
            PendingUpdate::InsertAfter { target, content } => T::InsertAfter { target, content },
            PendingUpdate::InsertAttributes { target, attributes } => T::InsertAttributes { target, content: attributes },
            PendingUpdate::Delete { target } => T::Delete { target },
            PendingUpdate::ReplaceNode { target, replacement } => T::ReplaceNode { target, replacement },
            PendingUpdate::ReplaceValue { target, value } => T::ReplaceValue { target, string_value: value },
            PendingUpdate::ReplaceElementContent { target, text } => T::ReplaceElementContent { target, text },
            PendingUpdate::Rename { target, name } => T::Rename { target, new_name: name.into() },
            PendingUpdate::Put { node, uri } => T::Put { target: node, uri },
        }
    }
}

impl<N> From<TransferablePendingUpdate<N>> for PendingUpdate<N> {
    fn from(update: TransferablePendingUpdate<N>) -> Self {
        use TransferablePendingUpdate as T;
        match update {
            T::InsertInto { target, content } => PendingUpdate::InsertInto { target, content },
            T::InsertIntoAsFirst { target, content } => PendingUpdate::InsertIntoAsFirst { target, content },
            T::InsertIntoAsLast { target, content } => PendingUpdate::InsertIntoAsLast { target, content },
            T::InsertBefore { target, content } => PendingUpdate::InsertBefore { target, content },
            T::InsertAfter { target, content } => PendingUpdate::InsertAfter { target, content },
            T::InsertAttributes { target, content } => PendingUpdate::InsertAttributes { target, attributes: content },
            T::Delete { target } => PendingUpdate::Delete { target },
            T::ReplaceNode { target, replacement } => PendingUpdate::ReplaceNode { target, replacement },
            T::ReplaceValue { target, string_value } => PendingUpdate::ReplaceValue { target, value: string_value },
            T::ReplaceElementContent { target, text } => PendingUpdate::ReplaceElementContent { target, text },
            T::Rename { target, new_name } => PendingUpdate::Rename { target, name: new_name.into() },
            T::Put { target, uri } => PendingUpdate::Put { node: target, uri },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_a_type_tag() {
        let update: TransferablePendingUpdate<u32> =
            PendingUpdate::Rename { target: 7, name: QName::new(Some("p"), Some("urn:x"), "n") }.into();
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "rename",
                "target": 7,
                "newName": { "prefix": "p", "namespaceUri": "urn:x", "localName": "n" }
            })
        );
        let back: TransferablePendingUpdate<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn node_handles_are_mapped_everywhere() {
        let update: TransferablePendingUpdate<u32> =
            PendingUpdate::ReplaceNode { target: 1, replacement: vec![2, 3] }.into();
        let mapped = update.map_nodes(|n| format!("node-{n}"));
        assert_eq!(
            mapped,
            TransferablePendingUpdate::ReplaceNode {
                target: "node-1".to_string(),
                replacement: vec!["node-2".to_string(), "node-3".to_string()],
            }
        );
        let json = serde_json::to_string(&mapped).unwrap();
        assert!(json.starts_with(r#"{"type":"replaceNode","target":"node-1""#));
    }
}
