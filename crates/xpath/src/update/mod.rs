//! The XQuery Update Facility.
//!
//! Updating expressions never touch the tree while they are evaluated. Each one appends
//! [`PendingUpdate`] records to the evaluation's pending update list; the caller receives
//! that list next to the expression's value and applies it later with
//! [`apply_updates`] (or [`apply_updates_blocking`]). Applying first checks the list for
//! conflicting operations, then performs the writes in the fixed phase order of the
//! update facility.

mod apply;
pub(crate) mod build;
mod merge;
mod transferable;
pub(crate) mod transform;

pub use apply::{UpdateApplier, apply_updates, apply_updates_blocking};
pub use merge::{check_compatibility, merge_updates};
pub use transferable::{TransferableName, TransferablePendingUpdate};

use crate::xdm::{QName, XdmSequence};

/// One primitive change recorded by an updating expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingUpdate<N> {
    InsertInto { target: N, content: Vec<N> },
    InsertIntoAsFirst { target: N, content: Vec<N> },
    InsertIntoAsLast { target: N, content: Vec<N> },
    InsertBefore { target: N, content: Vec<N> },
    InsertAfter { target: N, content: Vec<N> },
    InsertAttributes { target: N, attributes: Vec<N> },
    Delete { target: N },
    ReplaceNode { target: N, replacement: Vec<N> },
    /// New content of an attribute, text, comment or processing instruction.
    ReplaceValue { target: N, value: String },
    /// Replaces all children of an element by one text node, or by nothing.
    ReplaceElementContent { target: N, text: Option<N> },
    Rename { target: N, name: QName },
    Put { node: N, uri: String },
}

impl<N> PendingUpdate<N> {
    /// The node the update changes; for `put`, the stored node.
    pub fn target(&self) -> &N {
        match self {
            PendingUpdate::InsertInto { target, .. }
            | PendingUpdate::InsertIntoAsFirst { target, .. }
            | PendingUpdate::InsertIntoAsLast { target, .. }
            | PendingUpdate::InsertBefore { target, .. }
            | PendingUpdate::InsertAfter { target, .. }
            | PendingUpdate::InsertAttributes { target, .. }
            | PendingUpdate::Delete { target }
            | PendingUpdate::ReplaceNode { target, .. }
            | PendingUpdate::ReplaceValue { target, .. }
            | PendingUpdate::ReplaceElementContent { target, .. }
            | PendingUpdate::Rename { target, .. } => target,
            PendingUpdate::Put { node, .. } => node,
        }
    }

    /// Update primitive name as used by the update facility.
    pub fn kind(&self) -> &'static str {
        match self {
            PendingUpdate::InsertInto { .. } => "insertInto",
            PendingUpdate::InsertIntoAsFirst { .. } => "insertIntoAsFirst",
            PendingUpdate::InsertIntoAsLast { .. } => "insertIntoAsLast",
            PendingUpdate::InsertBefore { .. } => "insertBefore",
            PendingUpdate::InsertAfter { .. } => "insertAfter",
            PendingUpdate::InsertAttributes { .. } => "insertAttributes",
            PendingUpdate::Delete { .. } => "delete",
            PendingUpdate::ReplaceNode { .. } => "replaceNode",
            PendingUpdate::ReplaceValue { .. } => "replaceValue",
            PendingUpdate::ReplaceElementContent { .. } => "replaceElementContent",
            PendingUpdate::Rename { .. } => "rename",
            PendingUpdate::Put { .. } => "put",
        }
    }

    /// Position in the apply order; lower phases run first.
    pub(crate) fn phase(&self) -> u8 {
        match self {
            PendingUpdate::InsertInto { .. }
            | PendingUpdate::InsertAttributes { .. }
            | PendingUpdate::ReplaceValue { .. }
            | PendingUpdate::Rename { .. } => 0,
            PendingUpdate::InsertBefore { .. }
            | PendingUpdate::InsertAfter { .. }
            | PendingUpdate::InsertIntoAsFirst { .. }
            | PendingUpdate::InsertIntoAsLast { .. } => 1,
            PendingUpdate::ReplaceNode { .. } => 2,
            PendingUpdate::ReplaceElementContent { .. } => 3,
            PendingUpdate::Delete { .. } => 4,
            PendingUpdate::Put { .. } => 5,
        }
    }
}

/// Value of an updating expression together with the changes it requested.
#[derive(Debug, Clone)]
pub struct UpdatingResult<N> {
    pub value: XdmSequence<N>,
    pub updates: Vec<PendingUpdate<N>>,
}

impl<N: Clone> UpdatingResult<N> {
    /// The pending updates in their serializable shape.
    pub fn transferable(&self) -> Vec<TransferablePendingUpdate<N>> {
        self.updates.iter().cloned().map(TransferablePendingUpdate::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_follow_the_apply_order() {
        let updates: Vec<PendingUpdate<u32>> = vec![
            PendingUpdate::Put { node: 1, uri: "a".into() },
            PendingUpdate::Delete { target: 1 },
            PendingUpdate::ReplaceElementContent { target: 1, text: None },
            PendingUpdate::ReplaceNode { target: 1, replacement: vec![] },
            PendingUpdate::InsertAfter { target: 1, content: vec![] },
            PendingUpdate::Rename { target: 1, name: QName::local("x") },
        ];
        let phases: Vec<u8> = updates.iter().map(PendingUpdate::phase).collect();
        assert_eq!(phases, vec![5, 4, 3, 2, 1, 0]);
        assert_eq!(updates[0].kind(), "put");
        assert_eq!(*updates[0].target(), 1);
    }
}
