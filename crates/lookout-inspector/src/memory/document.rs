//! Arena-backed document.
//!
//! Nodes are never freed: a removed subtree stays in the arena, detached,
//! so handles held by clients keep answering (`isConnected: false`).

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DocumentSpec, NodeSpec};
use crate::errors::WalkerError;
use crate::walker::{DomNode, Mutation, MutationKind, NodeRef, node_type};

/// Namespace given to every element.
pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

const ROOT: u64 = 0;

#[derive(Clone, Debug)]
enum NodeKind {
    Document,
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag: String,
    },
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug)]
pub(crate) struct NodeData {
    kind: NodeKind,
    parent: Option<u64>,
    children: Vec<u64>,
    attrs: Vec<(String, String)>,
    pub(crate) locks: Vec<String>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attrs: Vec::new(),
            locks: Vec::new(),
        }
    }

    pub(crate) fn node_type(&self) -> u16 {
        match self.kind {
            NodeKind::Document => node_type::DOCUMENT,
            NodeKind::Doctype { .. } => node_type::DOCUMENT_TYPE,
            NodeKind::Element { .. } => node_type::ELEMENT,
            NodeKind::Text(_) => node_type::TEXT,
            NodeKind::Comment(_) => node_type::COMMENT,
        }
    }

    pub(crate) fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub(crate) fn node_name(&self) -> String {
        match &self.kind {
            NodeKind::Document => "#document".to_owned(),
            NodeKind::Doctype { name, .. } => name.clone(),
            NodeKind::Element { tag } => tag.to_ascii_uppercase(),
            NodeKind::Text(_) => "#text".to_owned(),
            NodeKind::Comment(_) => "#comment".to_owned(),
        }
    }

    pub(crate) fn parent(&self) -> Option<u64> {
        self.parent
    }

    pub(crate) fn children(&self) -> &[u64] {
        &self.children
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Default)]
pub(crate) struct DocState {
    nodes: HashMap<u64, NodeData>,
    next_key: u64,
    pending: Vec<(u64, MutationKind)>,
}

impl DocState {
    fn with_document() -> Self {
        let mut state = Self::default();
        let _ = state.alloc(NodeKind::Document);
        state
    }

    fn alloc(&mut self, kind: NodeKind) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        let _ = self.nodes.insert(key, NodeData::new(kind));
        key
    }

    pub(crate) fn get(&self, key: u64) -> Result<&NodeData, WalkerError> {
        self.nodes.get(&key).ok_or(WalkerError::UnknownNode { key })
    }

    pub(crate) fn get_mut(&mut self, key: u64) -> Result<&mut NodeData, WalkerError> {
        self.nodes.get_mut(&key).ok_or(WalkerError::UnknownNode { key })
    }

    /// Whether `ancestor` is `node` or above it.
    fn contains(&self, ancestor: u64, node: u64) -> bool {
        let mut cursor = Some(node);
        while let Some(key) = cursor {
            if key == ancestor {
                return true;
            }
            cursor = self.nodes.get(&key).and_then(|n| n.parent);
        }
        false
    }

    fn is_connected(&self, key: u64) -> bool {
        self.contains(ROOT, key)
    }

    /// Connected nodes in document order.
    pub(crate) fn document_order(&self) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(key) = stack.pop() {
            order.push(key);
            if let Some(node) = self.nodes.get(&key) {
                stack.extend(node.children.iter().rev());
            }
        }
        order
    }

    fn detach(&mut self, child: u64) {
        let Some(parent) = self.nodes.get(&child).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = None;
        }
        self.pending.push((parent, MutationKind::ChildList));
    }

    fn build(&mut self, parent: u64, spec: &NodeSpec) {
        let key = match spec {
            NodeSpec::Element {
                tag,
                attrs,
                children,
            } => {
                let key = self.alloc(NodeKind::Element {
                    tag: tag.to_ascii_lowercase(),
                });
                if let Some(node) = self.nodes.get_mut(&key) {
                    node.attrs = attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                }
                for child in children {
                    self.build(key, child);
                }
                key
            }
            NodeSpec::Text { text } => self.alloc(NodeKind::Text(text.clone())),
            NodeSpec::Comment { comment } => self.alloc(NodeKind::Comment(comment.clone())),
        };
        self.link(parent, key);
    }

    fn link(&mut self, parent: u64, child: u64) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
    }
}

struct Observer {
    id: u64,
    visited: Option<Arc<Mutex<HashSet<u64>>>>,
    tx: mpsc::UnboundedSender<Vec<Mutation>>,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<Observer>,
}

pub(crate) struct Shared {
    state: Mutex<DocState>,
    observers: Mutex<Observers>,
}

/// A mutable in-memory document. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryDocument {
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("nodes", &self.shared.state.lock().nodes.len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// A document with no children.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DocState::with_document()),
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Build a document from its JSON description.
    pub fn from_spec(spec: &DocumentSpec) -> Self {
        let doc = Self::new();
        {
            let mut state = doc.shared.state.lock();
            if let Some(name) = &spec.doctype {
                let key = state.alloc(NodeKind::Doctype {
                    name: name.clone(),
                    public_id: String::new(),
                    system_id: String::new(),
                });
                state.link(ROOT, key);
            }
            for child in &spec.children {
                state.build(ROOT, child);
            }
        }
        doc
    }

    fn handle(&self, key: u64) -> NodeRef {
        Arc::new(MemoryNode {
            doc: self.shared.clone(),
            key,
        })
    }

    /// Handle for `key`, if the arena holds it.
    pub fn node(&self, key: u64) -> Option<NodeRef> {
        self.shared
            .state
            .lock()
            .nodes
            .contains_key(&key)
            .then(|| self.handle(key))
    }

    /// Handles for `keys`, in order.
    pub(crate) fn handles(&self, keys: &[u64]) -> Vec<NodeRef> {
        keys.iter().map(|key| self.handle(*key)).collect()
    }

    /// The document node.
    pub fn document_node(&self) -> NodeRef {
        self.handle(ROOT)
    }

    /// The first element child of the document.
    pub fn document_element(&self) -> Option<NodeRef> {
        let key = {
            let state = self.shared.state.lock();
            let root = state.get(ROOT).ok()?;
            root.children
                .iter()
                .copied()
                .find(|c| state.nodes.get(c).is_some_and(NodeData::is_element))?
        };
        Some(self.handle(key))
    }

    /// First connected element whose `id` attribute equals `id`.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeRef> {
        let key = {
            let state = self.shared.state.lock();
            state.document_order().into_iter().find(|key| {
                state
                    .nodes
                    .get(key)
                    .is_some_and(|n| n.is_element() && n.attribute("id").as_deref() == Some(id))
            })?
        };
        Some(self.handle(key))
    }

    /// Every connected node in document order.
    pub fn all_nodes(&self) -> Vec<NodeRef> {
        let keys = self.shared.state.lock().document_order();
        self.handles(&keys)
    }

    /// Children of `node`.
    pub fn children_of(&self, node: &NodeRef) -> Result<Vec<NodeRef>, WalkerError> {
        let key = self.key_of(node.as_ref())?;
        let keys = self.shared.state.lock().get(key)?.children.clone();
        Ok(self.handles(&keys))
    }

    /// Resolve a handle issued by this document.
    pub(crate) fn key_of(&self, node: &dyn DomNode) -> Result<u64, WalkerError> {
        let key = node.key();
        match node.as_any().downcast_ref::<MemoryNode>() {
            Some(own) if Arc::ptr_eq(&own.doc, &self.shared) => {
                let _ = self.shared.state.lock().get(key)?;
                Ok(key)
            }
            _ => Err(WalkerError::UnknownNode { key }),
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&DocState) -> R) -> R {
        f(&self.shared.state.lock())
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut DocState) -> R) -> R {
        f(&mut self.shared.state.lock())
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// New detached element.
    pub fn create_element(&self, tag: &str) -> u64 {
        self.shared.state.lock().alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
        })
    }

    /// New detached text node.
    pub fn create_text(&self, data: &str) -> u64 {
        self.shared.state.lock().alloc(NodeKind::Text(data.to_owned()))
    }

    /// New detached comment.
    pub fn create_comment(&self, data: &str) -> u64 {
        self.shared.state.lock().alloc(NodeKind::Comment(data.to_owned()))
    }

    /// Move `child` to the end of `parent`'s children.
    pub fn append_child(&self, parent: u64, child: u64) -> Result<(), WalkerError> {
        let mut state = self.shared.state.lock();
        let _ = state.get(parent)?;
        let _ = state.get(child)?;
        if child == ROOT || state.contains(child, parent) {
            return Err(WalkerError::HierarchyRequest { key: child });
        }
        state.detach(child);
        state.link(parent, child);
        state.pending.push((parent, MutationKind::ChildList));
        Ok(())
    }

    /// Detach `child` from `parent`.
    pub fn remove_child(&self, parent: u64, child: u64) -> Result<(), WalkerError> {
        let mut state = self.shared.state.lock();
        if state.get(child)?.parent != Some(parent) {
            return Err(WalkerError::NotAChild { parent, child });
        }
        state.detach(child);
        Ok(())
    }

    /// Set an attribute, keeping its position if it already exists.
    pub fn set_attribute(&self, node: u64, name: &str, value: &str) -> Result<(), WalkerError> {
        let mut state = self.shared.state.lock();
        let data = element_mut(&mut state, node)?;
        let old_value = match data.attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => Some(std::mem::replace(v, value.to_owned())),
            None => {
                data.attrs.push((name.to_owned(), value.to_owned()));
                None
            }
        };
        state.pending.push((
            node,
            MutationKind::Attributes {
                name: name.to_owned(),
                namespace: None,
                old_value,
            },
        ));
        Ok(())
    }

    /// Remove an attribute. Absent attributes are not an error and queue
    /// nothing.
    pub fn remove_attribute(&self, node: u64, name: &str) -> Result<(), WalkerError> {
        let mut state = self.shared.state.lock();
        let data = element_mut(&mut state, node)?;
        let Some(pos) = data.attrs.iter().position(|(n, _)| n == name) else {
            return Ok(());
        };
        let (_, old) = data.attrs.remove(pos);
        state.pending.push((
            node,
            MutationKind::Attributes {
                name: name.to_owned(),
                namespace: None,
                old_value: Some(old),
            },
        ));
        Ok(())
    }

    /// Replace the data of a text or comment node.
    pub fn set_text(&self, node: u64, data: &str) -> Result<(), WalkerError> {
        let mut state = self.shared.state.lock();
        let target = state.get_mut(node)?;
        let node_name = target.node_name();
        match &mut target.kind {
            NodeKind::Text(text) | NodeKind::Comment(text) => data.clone_into(text),
            _ => return Err(WalkerError::NotCharacterData { node_name }),
        }
        state.pending.push((node, MutationKind::CharacterData));
        Ok(())
    }

    /// Records queued since the last flush.
    pub fn pending_mutations(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Deliver queued records to every subscriber as one batch.
    ///
    /// Subscribers that watch visited nodes only receive records whose
    /// target they visited. Returns the number of records flushed.
    pub fn flush_mutations(&self) -> usize {
        let pending = std::mem::take(&mut self.shared.state.lock().pending);
        if pending.is_empty() {
            return 0;
        }
        let count = pending.len();
        let batch: Vec<Mutation> = pending
            .into_iter()
            .map(|(key, kind)| Mutation {
                target: self.handle(key),
                kind,
            })
            .collect();

        let mut observers = self.shared.observers.lock();
        observers.list.retain(|observer| {
            let records: Vec<Mutation> = match &observer.visited {
                Some(visited) => {
                    let visited = visited.lock();
                    batch
                        .iter()
                        .filter(|m| visited.contains(&m.target.key()))
                        .cloned()
                        .collect()
                }
                None => batch.clone(),
            };
            if records.is_empty() {
                return !observer.tx.is_closed();
            }
            observer.tx.send(records).is_ok()
        });
        debug!(records = count, observers = observers.list.len(), "mutations flushed");
        count
    }

    pub(crate) fn subscribe(
        &self,
        visited: Option<Arc<Mutex<HashSet<u64>>>>,
    ) -> (u64, mpsc::UnboundedReceiver<Vec<Mutation>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.shared.observers.lock();
        let id = observers.next_id;
        observers.next_id += 1;
        observers.list.push(Observer { id, visited, tx });
        (id, rx)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.shared.observers.lock().list.retain(|o| o.id != id);
    }

    /// Live mutation subscribers.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.lock().list.len()
    }
}

fn element_mut(state: &mut DocState, key: u64) -> Result<&mut NodeData, WalkerError> {
    let data = state.get_mut(key)?;
    if !data.is_element() {
        return Err(WalkerError::NotAnElement {
            node_name: data.node_name(),
        });
    }
    Ok(data)
}

/// Handle to a node of a [`MemoryDocument`].
pub struct MemoryNode {
    doc: Arc<Shared>,
    key: u64,
}

impl MemoryNode {
    fn read<R>(&self, default: R, f: impl FnOnce(&DocState, &NodeData) -> R) -> R {
        let state = self.doc.state.lock();
        match state.nodes.get(&self.key) {
            Some(node) => f(&state, node),
            None => default,
        }
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNode")
            .field("key", &self.key)
            .field("name", &self.node_name())
            .finish()
    }
}

impl DomNode for MemoryNode {
    fn key(&self) -> u64 {
        self.key
    }

    fn node_type(&self) -> u16 {
        self.read(0, |_, n| n.node_type())
    }

    fn node_name(&self) -> String {
        self.read(String::new(), |_, n| n.node_name())
    }

    fn node_value(&self) -> Option<String> {
        self.read(None, |_, n| match &n.kind {
            NodeKind::Text(data) | NodeKind::Comment(data) => Some(data.clone()),
            _ => None,
        })
    }

    fn tag_name(&self) -> Option<String> {
        self.read(None, |_, n| n.is_element().then(|| n.node_name()))
    }

    fn namespace_uri(&self) -> Option<String> {
        self.read(None, |_, n| n.is_element().then(|| XHTML_NAMESPACE.to_owned()))
    }

    fn id(&self) -> Option<String> {
        self.read(None, |_, n| {
            n.is_element().then(|| n.attribute("id").unwrap_or_default())
        })
    }

    fn class_name(&self) -> Option<String> {
        self.read(None, |_, n| {
            n.is_element().then(|| n.attribute("class").unwrap_or_default())
        })
    }

    fn num_children(&self) -> usize {
        self.read(0, |_, n| n.children.len())
    }

    fn name(&self) -> Option<String> {
        self.read(None, |_, n| match &n.kind {
            NodeKind::Doctype { name, .. } => Some(name.clone()),
            _ => None,
        })
    }

    fn public_id(&self) -> Option<String> {
        self.read(None, |_, n| match &n.kind {
            NodeKind::Doctype { public_id, .. } => Some(public_id.clone()),
            _ => None,
        })
    }

    fn system_id(&self) -> Option<String> {
        self.read(None, |_, n| match &n.kind {
            NodeKind::Doctype { system_id, .. } => Some(system_id.clone()),
            _ => None,
        })
    }

    fn attributes(&self) -> Option<Vec<(String, String)>> {
        self.read(None, |_, n| n.is_element().then(|| n.attrs.clone()))
    }

    fn get_attribute(&self, name: &str) -> Option<String> {
        self.read(None, |_, n| n.attribute(name))
    }

    fn pseudo_class_locks(&self) -> Vec<String> {
        self.read(Vec::new(), |_, n| n.locks.clone())
    }

    fn is_document_element(&self) -> bool {
        self.read(false, |_, n| n.is_element() && n.parent == Some(ROOT))
    }

    fn is_connected(&self) -> bool {
        self.read(false, |state, _| state.is_connected(self.key))
    }

    fn is_walker_root(&self) -> bool {
        self.key == ROOT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn document() -> MemoryDocument {
        let spec: DocumentSpec = serde_json::from_value(json!({
            "doctype": "html",
            "children": [{
                "tag": "HTML",
                "children": [
                    {"tag": "body", "attrs": {"id": "body"}, "children": [
                        {"tag": "p", "attrs": {"id": "p"}, "children": [{"text": "hi"}]}
                    ]}
                ]
            }]
        }))
        .unwrap();
        MemoryDocument::from_spec(&spec)
    }

    #[test]
    fn builds_tree_from_spec() {
        let doc = document();
        let html = doc.document_element().unwrap();
        assert_eq!(html.node_name(), "HTML");
        assert!(html.is_document_element());
        assert_eq!(doc.document_node().num_children(), 2);
        let p = doc.get_element_by_id("p").unwrap();
        assert_eq!(p.num_children(), 1);
        assert_eq!(doc.all_nodes().len(), 6);
    }

    #[test]
    fn append_and_remove_queue_child_list() {
        let doc = document();
        let body = doc.get_element_by_id("body").unwrap().key();
        let div = doc.create_element("div");
        assert!(!doc.node(div).unwrap().is_connected());
        doc.append_child(body, div).unwrap();
        assert!(doc.node(div).unwrap().is_connected());
        doc.remove_child(body, div).unwrap();
        assert!(!doc.node(div).unwrap().is_connected());
        assert_eq!(doc.pending_mutations(), 2);
    }

    #[test]
    fn moving_a_node_reports_both_parents() {
        let doc = document();
        let body = doc.get_element_by_id("body").unwrap().key();
        let p = doc.get_element_by_id("p").unwrap().key();
        let html = doc.document_element().unwrap().key();
        doc.append_child(html, p).unwrap();
        assert_eq!(doc.pending_mutations(), 2);
        assert_eq!(doc.node(body).unwrap().num_children(), 0);
    }

    #[test]
    fn append_rejects_cycles() {
        let doc = document();
        let body = doc.get_element_by_id("body").unwrap().key();
        let p = doc.get_element_by_id("p").unwrap().key();
        assert_matches!(doc.append_child(p, body), Err(WalkerError::HierarchyRequest { .. }));
        assert_matches!(doc.append_child(p, p), Err(WalkerError::HierarchyRequest { .. }));
    }

    #[test]
    fn remove_requires_child() {
        let doc = document();
        let html = doc.document_element().unwrap().key();
        let p = doc.get_element_by_id("p").unwrap().key();
        assert_matches!(doc.remove_child(html, p), Err(WalkerError::NotAChild { .. }));
    }

    #[test]
    fn attributes_track_old_value() {
        let doc = document();
        let p = doc.get_element_by_id("p").unwrap();
        doc.set_attribute(p.key(), "title", "a").unwrap();
        doc.set_attribute(p.key(), "title", "b").unwrap();
        doc.remove_attribute(p.key(), "missing").unwrap();
        doc.remove_attribute(p.key(), "title").unwrap();
        assert_eq!(doc.pending_mutations(), 3);
        assert!(p.get_attribute("title").is_none());
    }

    #[test]
    fn attributes_need_an_element() {
        let doc = document();
        let text = doc.create_text("x");
        assert_matches!(
            doc.set_attribute(text, "a", "b"),
            Err(WalkerError::NotAnElement { node_name }) if node_name == "#text"
        );
        let body = doc.get_element_by_id("body").unwrap().key();
        assert_matches!(doc.set_text(body, "x"), Err(WalkerError::NotCharacterData { .. }));
    }

    #[tokio::test]
    async fn flush_delivers_one_batch() {
        let doc = document();
        let (_, mut rx) = doc.subscribe(None);
        let p = doc.get_element_by_id("p").unwrap().key();
        doc.set_attribute(p, "class", "x").unwrap();
        doc.set_attribute(p, "class", "y").unwrap();
        assert_eq!(doc.flush_mutations(), 2);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_matches!(
            &batch[1].kind,
            MutationKind::Attributes { old_value: Some(old), .. } if old == "x"
        );
        assert_eq!(doc.flush_mutations(), 0);
    }

    #[test]
    fn visited_filter_and_closed_observers() {
        let doc = document();
        let visited = Arc::new(Mutex::new(HashSet::new()));
        let (_, mut rx) = doc.subscribe(Some(visited.clone()));
        let (_, dropped) = doc.subscribe(None);
        drop(dropped);
        let p = doc.get_element_by_id("p").unwrap().key();
        doc.set_attribute(p, "a", "1").unwrap();
        let _ = doc.flush_mutations();
        assert!(rx.try_recv().is_err());
        assert_eq!(doc.observer_count(), 1);

        let _ = visited.lock().insert(p);
        doc.set_attribute(p, "a", "2").unwrap();
        let _ = doc.flush_mutations();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_observer() {
        let doc = document();
        let (id, _rx) = doc.subscribe(None);
        assert_eq!(doc.observer_count(), 1);
        doc.unsubscribe(id);
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn foreign_handles_do_not_resolve() {
        let a = document();
        let b = document();
        let node = b.get_element_by_id("p").unwrap();
        assert_matches!(a.key_of(node.as_ref()), Err(WalkerError::UnknownNode { .. }));
        assert!(b.key_of(node.as_ref()).is_ok());
    }
}
