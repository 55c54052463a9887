use super::PendingUpdate;
use super::merge::check_compatibility;
use crate::engine::evaluator::missing_factory;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::traverse::{self, fetch};
use crate::model::{DocumentWriter, DomFacade, NodeKind, NodesFactory, XdmNode};
use crate::xdm::{ExpandedName, Fetch, QName, ready_or_pending};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Applies a pending update list, awaiting an asynchronous facade where needed.
///
/// The list is checked for conflicts first; nothing is written when that fails.
pub async fn apply_updates<N: XdmNode>(
    updates: Vec<PendingUpdate<N>>,
    facade: Rc<dyn DomFacade<N>>,
    factory: Option<Rc<dyn NodesFactory<N>>>,
    writer: Rc<dyn DocumentWriter<N>>,
) -> Result<(), Error> {
    let mut applier = UpdateApplier::new(updates, facade, factory, writer)?;
    loop {
        match applier.poll()? {
            Fetch::Ready(()) => return Ok(()),
            Fetch::Pending(suspension) => suspension.await,
        }
    }
}

/// [`apply_updates`] for callers without an executor.
pub fn apply_updates_blocking<N: XdmNode>(
    updates: Vec<PendingUpdate<N>>,
    facade: Rc<dyn DomFacade<N>>,
    factory: Option<Rc<dyn NodesFactory<N>>>,
    writer: Rc<dyn DocumentWriter<N>>,
) -> Result<(), Error> {
    futures_lite::future::block_on(apply_updates(updates, facade, factory, writer))
}

/// A pending update list being applied one primitive at a time.
///
/// Every dynamic error the list can raise is checked before the first write, so a failing
/// list leaves the tree as it was. Each primitive performs all of its reads before its
/// first write, so a suspended read can be retried without repeating half an update.
pub struct UpdateApplier<N> {
    queue: VecDeque<PendingUpdate<N>>,
    validated: bool,
    facade: Rc<dyn DomFacade<N>>,
    factory: Option<Rc<dyn NodesFactory<N>>>,
    writer: Rc<dyn DocumentWriter<N>>,
    /// Renaming an element or processing instruction replaces the node; later updates follow it.
    renamed: RefCell<HashMap<N, N>>,
}

impl<N: XdmNode> UpdateApplier<N> {
    pub fn new(
        updates: Vec<PendingUpdate<N>>,
        facade: Rc<dyn DomFacade<N>>,
        factory: Option<Rc<dyn NodesFactory<N>>>,
        writer: Rc<dyn DocumentWriter<N>>,
    ) -> Result<Self, Error> {
        check_compatibility(&updates)?;
        let mut updates = updates;
        updates.sort_by_key(PendingUpdate::phase);
        tracing::debug!(count = updates.len(), "applying pending updates");
        Ok(Self { queue: updates.into(), validated: false, facade, factory, writer, renamed: RefCell::new(HashMap::new()) })
    }

    /// Applies as many updates as possible.
    pub fn poll(&mut self) -> Result<Fetch<()>, Error> {
        if !self.validated {
            ready_or_pending!(self.validate()?);
            self.validated = true;
        }
        while let Some(update) = self.queue.front() {
            ready_or_pending!(self.apply(update)?);
            tracing::trace!(kind = update.kind(), "applied update");
            self.queue.pop_front();
        }
        Ok(Fetch::Ready(()))
    }

    /// The node now standing in for `node` after renames.
    pub fn current(&self, node: &N) -> N {
        let renamed = self.renamed.borrow();
        let mut node = node;
        while let Some(next) = renamed.get(node) {
            node = next;
        }
        node.clone()
    }

    /// Reads what the writes depend on and raises the errors they would raise: targets
    /// without a parent, renames without a factory, and elements that would end up with
    /// two attributes of one name (`XUDY0021`).
    ///
    /// Attribute replacements and renames free the old name. Deletions run after the
    /// inserts and the writer addresses attributes by name, so they free nothing.
    fn validate(&self) -> Result<Fetch<()>, Error> {
        let facade = &*self.facade;
        let mut attributes: IndexMap<N, AttributeChanges> = IndexMap::new();
        for update in &self.queue {
            let target = update.target();
            match update {
                PendingUpdate::InsertBefore { .. } | PendingUpdate::InsertAfter { .. } => {
                    if ready_or_pending!(facade.parent_node(target)).is_none() {
                        return Err(detached(target));
                    }
                }
                PendingUpdate::ReplaceNode { replacement, .. } => {
                    let parent = ready_or_pending!(facade.parent_node(target)).ok_or_else(|| no_parent(target))?;
                    if target.kind() == NodeKind::Attribute {
                        let changes = attributes.entry(parent).or_default();
                        changes.removed.push(name_of(target).expanded());
                        changes.added.extend(replacement.iter().map(|a| name_of(a).expanded()));
                    }
                }
                PendingUpdate::InsertAttributes { attributes: added, .. } => {
                    let changes = attributes.entry(target.clone()).or_default();
                    changes.added.extend(added.iter().map(|a| name_of(a).expanded()));
                }
                PendingUpdate::Rename { name, .. } => match target.kind() {
                    NodeKind::Attribute => {
                        let owner = ready_or_pending!(facade.parent_node(target)).ok_or_else(|| detached(target))?;
                        let changes = attributes.entry(owner).or_default();
                        changes.removed.push(name_of(target).expanded());
                        changes.added.push(name.expanded());
                    }
                    NodeKind::Element | NodeKind::ProcessingInstruction => {
                        self.factory()?;
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        for (element, changes) in &attributes {
            let existing = ready_or_pending!(facade.all_attributes(element));
            let mut names: Vec<ExpandedName> = existing.iter().map(|a| name_of(a).expanded()).collect();
            for removed in &changes.removed {
                if let Some(i) = names.iter().position(|n| n == removed) {
                    names.remove(i);
                }
            }
            for added in &changes.added {
                if names.contains(added) {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0021,
                        format!("element {element:?} would have two attributes named {added}"),
                    ));
                }
                names.push(added.clone());
            }
        }
        Ok(Fetch::Ready(()))
    }

    fn factory(&self) -> Result<&dyn NodesFactory<N>, Error> {
        self.factory.as_deref().ok_or_else(missing_factory)
    }

    fn apply(&self, update: &PendingUpdate<N>) -> Result<Fetch<()>, Error> {
        let target = self.current(update.target());
        let facade = &*self.facade;
        let writer = &*self.writer;
        match update {
            PendingUpdate::InsertInto { content, .. } | PendingUpdate::InsertIntoAsLast { content, .. } => {
                for node in content {
                    writer.insert_before(&target, node, None)?;
                }
            }
            PendingUpdate::InsertIntoAsFirst { content, .. } => {
                let first = ready_or_pending!(facade.first_child(&target));
                for node in content {
                    writer.insert_before(&target, node, first.as_ref())?;
                }
            }
            PendingUpdate::InsertBefore { content, .. } => {
                let parent = ready_or_pending!(facade.parent_node(&target)).ok_or_else(|| detached(&target))?;
                for node in content {
                    writer.insert_before(&parent, node, Some(&target))?;
                }
            }
            PendingUpdate::InsertAfter { content, .. } => {
                let parent = ready_or_pending!(facade.parent_node(&target)).ok_or_else(|| detached(&target))?;
                let next = ready_or_pending!(facade.next_sibling(&target));
                for node in content {
                    writer.insert_before(&parent, node, next.as_ref())?;
                }
            }
            PendingUpdate::InsertAttributes { attributes, .. } => {
                let values = ready_or_pending!(attribute_values(facade, attributes));
                for (name, value) in &values {
                    writer.set_attribute_ns(&target, name.ns_uri.as_deref(), &name.lexical(), value)?;
                }
            }
            PendingUpdate::ReplaceValue { value, .. } => writer.set_data(&target, value)?,
            PendingUpdate::Rename { name, .. } => ready_or_pending!(self.rename(&target, name)?),
            PendingUpdate::ReplaceNode { replacement, .. } => {
                let parent = ready_or_pending!(facade.parent_node(&target)).ok_or_else(|| no_parent(&target))?;
                if target.kind() == NodeKind::Attribute {
                    let values = ready_or_pending!(attribute_values(facade, replacement));
                    let old = name_of(&target);
                    writer.remove_attribute_ns(&parent, old.ns_uri.as_deref(), &old.local)?;
                    for (name, value) in &values {
                        writer.set_attribute_ns(&parent, name.ns_uri.as_deref(), &name.lexical(), value)?;
                    }
                } else {
                    let mut anchor = target.clone();
                    for node in replacement.iter().rev() {
                        writer.insert_before(&parent, node, Some(&anchor))?;
                        anchor = node.clone();
                    }
                    writer.remove_child(&parent, &target)?;
                }
            }
            PendingUpdate::ReplaceElementContent { text, .. } => {
                let children = ready_or_pending!(traverse::children(facade, &target));
                for child in &children {
                    writer.remove_child(&target, child)?;
                }
                if let Some(text) = text {
                    writer.insert_before(&target, text, None)?;
                }
            }
            PendingUpdate::Delete { .. } => {
                let Some(parent) = ready_or_pending!(facade.parent_node(&target)) else {
                    return Ok(Fetch::Ready(()));
                };
                if target.kind() == NodeKind::Attribute {
                    let name = name_of(&target);
                    writer.remove_attribute_ns(&parent, name.ns_uri.as_deref(), &name.local)?;
                } else {
                    writer.remove_child(&parent, &target)?;
                }
            }
            PendingUpdate::Put { uri, .. } => writer.put(&target, uri)?,
        }
        Ok(Fetch::Ready(()))
    }

    /// Attributes are renamed on their owner. Elements and processing instructions are
    /// rebuilt under the new name and take the old node's place and content.
    fn rename(&self, target: &N, name: &QName) -> Result<Fetch<()>, Error> {
        let facade = &*self.facade;
        let writer = &*self.writer;
        let parent = ready_or_pending!(facade.parent_node(target));
        match target.kind() {
            NodeKind::Attribute => {
                let owner = parent.ok_or_else(|| detached(target))?;
                let value = ready_or_pending!(facade.data(target));
                let old = name_of(target);
                writer.remove_attribute_ns(&owner, old.ns_uri.as_deref(), &old.local)?;
                writer.set_attribute_ns(&owner, name.ns_uri.as_deref(), &name.lexical(), &value)?;
                return Ok(Fetch::Ready(()));
            }
            NodeKind::Element => {
                let attributes = ready_or_pending!(facade.all_attributes(target));
                let values = ready_or_pending!(attribute_values(facade, &attributes));
                let children = ready_or_pending!(traverse::children(facade, target));
                let renamed = self.factory()?.create_element_ns(name.ns_uri.as_deref(), &name.lexical())?;
                for (attr, value) in &values {
                    writer.set_attribute_ns(&renamed, attr.ns_uri.as_deref(), &attr.lexical(), value)?;
                }
                for child in &children {
                    writer.insert_before(&renamed, child, None)?;
                }
                self.swap(parent.as_ref(), target, renamed)?;
            }
            NodeKind::ProcessingInstruction => {
                let data = ready_or_pending!(facade.data(target));
                let renamed = self.factory()?.create_processing_instruction(&name.local, &data)?;
                self.swap(parent.as_ref(), target, renamed)?;
            }
            kind => {
                return Err(Error::from_code(ErrorCode::XUTY0012, format!("a {kind:?} node cannot be renamed")));
            }
        }
        Ok(Fetch::Ready(()))
    }

    fn swap(&self, parent: Option<&N>, old: &N, new: N) -> Result<(), Error> {
        if let Some(parent) = parent {
            self.writer.insert_before(parent, &new, Some(old))?;
            self.writer.remove_child(parent, old)?;
        }
        self.renamed.borrow_mut().insert(old.clone(), new);
        Ok(())
    }
}

fn name_of<N: XdmNode>(node: &N) -> QName {
    node.name().unwrap_or_else(|| QName::local(""))
}

fn detached<N: XdmNode>(node: &N) -> Error {
    Error::from_code(ErrorCode::XUDY0029, format!("node {node:?} has no parent"))
}

fn no_parent<N: XdmNode>(node: &N) -> Error {
    Error::from_code(ErrorCode::XUDY0009, format!("node {node:?} has no parent to replace it in"))
}

/// Attribute names an element loses and gains through one pending update list.
#[derive(Default)]
struct AttributeChanges {
    removed: Vec<ExpandedName>,
    added: Vec<ExpandedName>,
}

fn attribute_values<N: XdmNode>(facade: &dyn DomFacade<N>, attributes: &[N]) -> Fetch<Vec<(QName, String)>> {
    let mut out = Vec::with_capacity(attributes.len());
    for attr in attributes {
        out.push((name_of(attr), fetch!(facade.data(attr))));
    }
    Fetch::Ready(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, SimpleTree, attr, doc, elem, text};

    fn tools() -> (Rc<dyn DomFacade<SimpleNode>>, Option<Rc<dyn NodesFactory<SimpleNode>>>, Rc<dyn DocumentWriter<SimpleNode>>)
    {
        let tree = Rc::new(SimpleTree);
        let facade: Rc<dyn DomFacade<SimpleNode>> = tree.clone();
        let factory: Rc<dyn NodesFactory<SimpleNode>> = tree.clone();
        let writer: Rc<dyn DocumentWriter<SimpleNode>> = tree;
        (facade, Some(factory), writer)
    }

    fn apply(updates: Vec<PendingUpdate<SimpleNode>>) -> Result<(), Error> {
        let (facade, factory, writer) = tools();
        apply_updates_blocking(updates, facade, factory, writer)
    }

    #[test]
    fn empty_list_changes_nothing() {
        let root = doc().child(elem("a").child(text("x"))).build();
        let before = root.to_xml();
        apply(Vec::new()).unwrap();
        assert_eq!(root.to_xml(), before);
    }

    #[test]
    fn replacement_keeps_sibling_order() {
        let root = elem("r").child(elem("a")).child(elem("b")).child(elem("c")).build();
        let b = root.children()[1].clone();
        let replacement = vec![elem("x").build(), elem("y").build()];
        apply(vec![PendingUpdate::ReplaceNode { target: b, replacement }]).unwrap();
        assert_eq!(root.to_xml(), "<r><a/><x/><y/><c/></r>");
    }

    #[test]
    fn inserts_land_in_phase_order() {
        let root = elem("r").child(elem("a")).build();
        let a = root.children()[0].clone();
        apply(vec![
            PendingUpdate::Delete { target: a.clone() },
            PendingUpdate::InsertAfter { target: a, content: vec![elem("after").build()] },
            PendingUpdate::InsertIntoAsFirst { target: root.clone(), content: vec![elem("first").build()] },
            PendingUpdate::InsertAttributes { target: root.clone(), attributes: vec![attr("id", "1")] },
        ])
        .unwrap();
        assert_eq!(root.to_xml(), r#"<r id="1"><first/><after/></r>"#);
    }

    #[test]
    fn renamed_elements_keep_content_and_position() {
        let root = elem("r").child(elem("a").attr(attr("k", "v")).child(text("t"))).child(elem("b")).build();
        let a = root.children()[0].clone();
        apply(vec![
            PendingUpdate::Rename { target: a.clone(), name: QName::local("z") },
            PendingUpdate::InsertIntoAsLast { target: a, content: vec![text("u")] },
        ])
        .unwrap();
        assert_eq!(root.to_xml(), r#"<r><z k="v">tu</z><b/></r>"#);
    }

    #[test]
    fn element_content_is_replaced_by_one_text() {
        let root = elem("r").child(elem("a")).child(text("old")).build();
        apply(vec![PendingUpdate::ReplaceElementContent { target: root.clone(), text: Some(text("new")) }]).unwrap();
        assert_eq!(root.to_xml(), "<r>new</r>");
    }

    #[test]
    fn attributes_are_deleted_from_their_owner() {
        let root = elem("r").attr(attr("a", "1")).attr(attr("b", "2")).build();
        let a = root.attributes()[0].clone();
        apply(vec![PendingUpdate::Delete { target: a }]).unwrap();
        assert_eq!(root.to_xml(), r#"<r b="2"/>"#);
    }

    #[test]
    fn duplicate_attribute_insertion_fails() {
        let root = elem("r").attr(attr("id", "0")).build();
        let err =
            apply(vec![PendingUpdate::InsertAttributes { target: root.clone(), attributes: vec![attr("id", "1")] }])
                .unwrap_err();
        assert!(err.is(ErrorCode::XUDY0021));
        assert_eq!(root.attribute_value("id").as_deref(), Some("0"));
    }

    #[test]
    fn duplicate_attribute_leaves_earlier_phases_unapplied() {
        let root = doc().child(elem("r").attr(attr("id", "1")).child(elem("a").child(text("x")))).build();
        let r = root.children()[0].clone();
        let before = root.to_xml();
        let err = apply(vec![
            PendingUpdate::InsertInto { target: r.clone(), content: vec![elem("new").build()] },
            PendingUpdate::InsertAttributes { target: r, attributes: vec![attr("id", "2")] },
        ])
        .unwrap_err();
        assert!(err.is(ErrorCode::XUDY0021));
        assert_eq!(root.to_xml(), before);
    }

    #[test]
    fn attribute_replaced_by_one_of_the_same_name() {
        let root = elem("r").attr(attr("id", "1")).build();
        let id = root.attributes()[0].clone();
        apply(vec![PendingUpdate::ReplaceNode { target: id, replacement: vec![attr("id", "2")] }]).unwrap();
        assert_eq!(root.to_xml(), r#"<r id="2"/>"#);
    }

    #[test]
    fn missing_parent_fails_before_any_write() {
        let root = elem("r").child(elem("a")).build();
        let lonely = elem("lonely").build();
        let err = apply(vec![
            PendingUpdate::InsertInto { target: root.clone(), content: vec![elem("b").build()] },
            PendingUpdate::InsertBefore { target: lonely, content: vec![elem("c").build()] },
        ])
        .unwrap_err();
        assert!(err.is(ErrorCode::XUDY0029));
        assert_eq!(root.to_xml(), "<r><a/></r>");
    }

    #[test]
    fn put_without_storage_is_rejected() {
        let root = doc().child(elem("r")).build();
        let err = apply(vec![PendingUpdate::Put { node: root, uri: "out.xml".into() }]).unwrap_err();
        assert!(err.is(ErrorCode::FOUP0002));
    }
}
