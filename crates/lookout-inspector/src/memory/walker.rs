//! [`Walker`] over a [`MemoryDocument`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::document::MemoryDocument;
use crate::errors::WalkerError;
use crate::walker::{
    ChildrenOptions, ClearLocksOptions, Mutation, NodeRef, NodeWindow, ParentsOptions,
    PseudoLockOptions, SiblingOptions, Walker, WalkerOptions, node_filter,
};

/// Pseudo-classes that can be locked on an element.
pub const LOCKABLE_PSEUDO_CLASSES: [&str; 3] = ["hover", "active", "focus"];

/// Walker bound to one in-memory document.
pub struct MemoryWalker {
    doc: MemoryDocument,
    options: WalkerOptions,
    visited: Arc<Mutex<HashSet<u64>>>,
    subscriptions: Mutex<Vec<u64>>,
    destroyed: AtomicBool,
}

impl MemoryWalker {
    /// Walker over `doc`.
    pub fn new(doc: MemoryDocument, options: WalkerOptions) -> Self {
        Self {
            doc,
            options,
            visited: Arc::new(Mutex::new(HashSet::new())),
            subscriptions: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The walked document.
    pub fn document(&self) -> &MemoryDocument {
        &self.doc
    }

    /// Whether [`Walker::destroy`] ran.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Whether the walker has returned `key` to a caller.
    pub fn has_visited(&self, key: u64) -> bool {
        self.visited.lock().contains(&key)
    }

    fn check(&self) -> Result<(), WalkerError> {
        if self.is_destroyed() {
            return Err(WalkerError::Destroyed);
        }
        Ok(())
    }

    /// Give other tasks a turn, then make sure we were not destroyed meanwhile.
    async fn settle(&self) -> Result<(), WalkerError> {
        tokio::task::yield_now().await;
        self.check()
    }

    fn resolve(&self, node: &NodeRef) -> Result<u64, WalkerError> {
        self.check()?;
        self.doc.key_of(node.as_ref())
    }

    fn visit(&self, keys: &[u64]) -> Vec<NodeRef> {
        self.visited.lock().extend(keys.iter().copied());
        self.doc.handles(keys)
    }

    /// Window over `parent`'s shown children. `include` must be a child of
    /// `parent`; when `what_to_show` hides it the window is anchored where it
    /// would sit among the shown ones.
    fn window(
        &self,
        parent: u64,
        include: Option<u64>,
        max_nodes: Option<usize>,
        what_to_show: u32,
    ) -> Result<NodeWindow, WalkerError> {
        let (keys, anchor) =
            self.doc.with_state(|state| -> Result<(Vec<u64>, Option<usize>), WalkerError> {
                let children = state.get(parent)?.children();
                let mut shown = Vec::with_capacity(children.len());
                let mut anchor = None;
                for key in children {
                    if include == Some(*key) {
                        anchor = Some(shown.len());
                    }
                    if node_filter::accepts(what_to_show, state.get(*key)?.node_type()) {
                        shown.push(*key);
                    }
                }
                if let (Some(child), None) = (include, anchor) {
                    return Err(WalkerError::NotAChild { parent, child });
                }
                Ok((shown, anchor))
            })?;
        let (has_first, has_last, range) = window_range(keys.len(), anchor, max_nodes);
        Ok(NodeWindow {
            has_first,
            has_last,
            nodes: self.visit(&keys[range]),
        })
    }

    fn lock(
        &self,
        key: u64,
        pseudo: &str,
        parents: bool,
        on: bool,
    ) -> Result<Vec<NodeRef>, WalkerError> {
        validate_pseudo(pseudo)?;
        let changed = self.doc.with_state_mut(|state| -> Result<Vec<u64>, WalkerError> {
            let node = state.get(key)?;
            if !node.is_element() {
                return Err(WalkerError::NotAnElement {
                    node_name: node.node_name(),
                });
            }
            let mut targets = vec![key];
            if parents {
                let mut cursor = node.parent();
                while let Some(ancestor) = cursor {
                    let data = state.get(ancestor)?;
                    if data.is_element() {
                        targets.push(ancestor);
                    }
                    cursor = data.parent();
                }
            }
            let mut changed = Vec::new();
            for target in targets {
                let locks = &mut state.get_mut(target)?.locks;
                let present = locks.iter().any(|l| l == pseudo);
                if on && !present {
                    locks.push(pseudo.to_owned());
                    changed.push(target);
                } else if !on && present {
                    locks.retain(|l| l != pseudo);
                    changed.push(target);
                }
            }
            Ok(changed)
        })?;
        Ok(self.visit(&changed))
    }
}

fn validate_pseudo(pseudo: &str) -> Result<(), WalkerError> {
    if LOCKABLE_PSEUDO_CLASSES.contains(&pseudo) {
        Ok(())
    } else {
        Err(WalkerError::InvalidPseudoClass {
            pseudo: pseudo.to_owned(),
        })
    }
}

/// Pick `max_nodes` of `len` entries: from the start, or centred on index
/// `anchor`. A zero cap is treated as one.
fn window_range(
    len: usize,
    anchor: Option<usize>,
    max_nodes: Option<usize>,
) -> (bool, bool, std::ops::Range<usize>) {
    let max = match max_nodes {
        Some(max) if max < len => max.max(1),
        _ => return (true, true, 0..len),
    };
    let start = anchor.map_or(0, |pos| pos.saturating_sub(max / 2).min(len - max));
    let end = start + max;
    (start == 0, end >= len, start..end)
}

#[async_trait]
impl Walker for MemoryWalker {
    async fn root(&self) -> Result<NodeRef, WalkerError> {
        self.check()?;
        self.settle().await?;
        let root = self.doc.document_node();
        Ok(self.visit(&[root.key()]).remove(0))
    }

    async fn children(
        &self,
        node: NodeRef,
        options: ChildrenOptions,
    ) -> Result<NodeWindow, WalkerError> {
        let parent = self.resolve(&node)?;
        let include = match &options.include {
            Some(include) => Some(self.doc.key_of(include.as_ref())?),
            None => None,
        };
        self.settle().await?;
        self.window(parent, include, options.max_nodes, options.what_to_show)
    }

    async fn parents(
        &self,
        node: NodeRef,
        options: ParentsOptions,
    ) -> Result<Vec<NodeRef>, WalkerError> {
        let key = self.resolve(&node)?;
        self.settle().await?;
        let ancestors = self.doc.with_state(|state| -> Result<Vec<u64>, WalkerError> {
            let mut ancestors = Vec::new();
            let mut cursor = state.get(key)?.parent();
            while let Some(parent) = cursor {
                let data = state.get(parent)?;
                if node_filter::accepts(options.what_to_show, data.node_type()) {
                    ancestors.push(parent);
                }
                cursor = data.parent();
            }
            Ok(ancestors)
        })?;
        Ok(self.visit(&ancestors))
    }

    async fn siblings(
        &self,
        node: NodeRef,
        options: SiblingOptions,
    ) -> Result<NodeWindow, WalkerError> {
        let key = self.resolve(&node)?;
        self.settle().await?;
        let parent = self.doc.with_state(|state| state.get(key).map(|n| n.parent()))?;
        match parent {
            Some(parent) => self.window(parent, Some(key), options.max_nodes, options.what_to_show),
            None => Ok(NodeWindow {
                has_first: true,
                has_last: true,
                nodes: self.visit(&[key]),
            }),
        }
    }

    async fn add_pseudo_class_lock(
        &self,
        node: NodeRef,
        pseudo: String,
        options: PseudoLockOptions,
    ) -> Result<Vec<NodeRef>, WalkerError> {
        let key = self.resolve(&node)?;
        self.settle().await?;
        self.lock(key, &pseudo, options.parents, true)
    }

    async fn remove_pseudo_class_lock(
        &self,
        node: NodeRef,
        pseudo: String,
        options: PseudoLockOptions,
    ) -> Result<Vec<NodeRef>, WalkerError> {
        let key = self.resolve(&node)?;
        self.settle().await?;
        self.lock(key, &pseudo, options.parents, false)
    }

    async fn clear_pseudo_class_locks(
        &self,
        node: Option<NodeRef>,
        pseudo: Option<String>,
        options: ClearLocksOptions,
    ) -> Result<Vec<NodeRef>, WalkerError> {
        self.check()?;
        if let Some(pseudo) = &pseudo {
            validate_pseudo(pseudo)?;
        }
        let key = match &node {
            Some(node) => Some(self.resolve(node)?),
            None => None,
        };
        self.settle().await?;
        let changed = self.doc.with_state_mut(|state| -> Result<Vec<u64>, WalkerError> {
            let targets = if options.all {
                state.document_order()
            } else {
                key.into_iter().collect()
            };
            let mut changed = Vec::new();
            for target in targets {
                let locks = &mut state.get_mut(target)?.locks;
                let before = locks.len();
                match &pseudo {
                    Some(pseudo) => locks.retain(|l| l != pseudo),
                    None => locks.clear(),
                }
                if locks.len() != before {
                    changed.push(target);
                }
            }
            Ok(changed)
        })?;
        Ok(self.visit(&changed))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<Mutation>> {
        if self.is_destroyed() {
            let (_, rx) = mpsc::unbounded_channel();
            return rx;
        }
        let visited = self.options.watch_visited.then(|| self.visited.clone());
        let (id, rx) = self.doc.subscribe(visited);
        self.subscriptions.lock().push(id);
        rx
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for id in self.subscriptions.lock().drain(..) {
            self.doc.unsubscribe(id);
        }
        self.visited.lock().clear();
        debug!("memory walker destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DocumentSpec;
    use assert_matches::assert_matches;
    use serde_json::json;

    // document > [doctype, html > [body#b > [p#p0..p#p4, "text", <!--c-->]]]
    fn walker(watch_visited: bool) -> MemoryWalker {
        let mut children: Vec<_> = (0..5)
            .map(|i| json!({"tag": "p", "attrs": {"id": format!("p{i}")}}))
            .collect();
        children.push(json!({"text": "text"}));
        children.push(json!({"comment": "c"}));
        let spec: DocumentSpec = serde_json::from_value(json!({
            "doctype": "html",
            "children": [{"tag": "html", "children": [
                {"tag": "body", "attrs": {"id": "b"}, "children": children}
            ]}]
        }))
        .unwrap();
        MemoryWalker::new(MemoryDocument::from_spec(&spec), WalkerOptions { watch_visited })
    }

    fn by_id(walker: &MemoryWalker, id: &str) -> NodeRef {
        walker.document().get_element_by_id(id).unwrap()
    }

    fn ids(nodes: &[NodeRef]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| n.id().filter(|id| !id.is_empty()).unwrap_or_else(|| n.node_name()))
            .collect()
    }

    #[test]
    fn window_range_cases() {
        assert_eq!(window_range(5, None, None), (true, true, 0..5));
        assert_eq!(window_range(5, None, Some(2)), (true, false, 0..2));
        assert_eq!(window_range(5, Some(2), Some(3)), (false, false, 1..4));
        assert_eq!(window_range(5, Some(4), Some(2)), (false, true, 3..5));
        assert_eq!(window_range(5, Some(0), Some(2)), (true, false, 0..2));
        assert_eq!(window_range(5, Some(5), Some(2)), (false, true, 3..5));
        assert_eq!(window_range(5, None, Some(5)), (true, true, 0..5));
        assert_eq!(window_range(5, None, Some(0)), (true, false, 0..1));
        assert_eq!(window_range(0, None, Some(3)), (true, true, 0..0));
    }

    #[tokio::test]
    async fn root_is_document() {
        let w = walker(true);
        let root = w.root().await.unwrap();
        assert!(root.is_walker_root());
        assert_eq!(root.node_type(), 9);
        assert!(w.has_visited(root.key()));
    }

    #[tokio::test]
    async fn children_window_from_start() {
        let w = walker(true);
        let body = by_id(&w, "b");
        let window = w
            .children(
                body,
                ChildrenOptions {
                    max_nodes: Some(2),
                    what_to_show: node_filter::SHOW_ELEMENT,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(window.has_first);
        assert!(!window.has_last);
        assert_eq!(ids(&window.nodes), ["p0", "p1"]);
    }

    #[tokio::test]
    async fn children_window_centred_on_include() {
        let w = walker(true);
        let body = by_id(&w, "b");
        let window = w
            .children(
                body,
                ChildrenOptions {
                    include: Some(by_id(&w, "p3")),
                    max_nodes: Some(3),
                    what_to_show: node_filter::SHOW_ELEMENT,
                },
            )
            .await
            .unwrap();
        assert!(!window.has_first);
        assert!(window.has_last);
        assert_eq!(ids(&window.nodes), ["p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn children_include_must_be_a_child() {
        let w = walker(true);
        let body = by_id(&w, "b");
        let html = w.document().document_element().unwrap();
        let result = w
            .children(
                body.clone(),
                ChildrenOptions {
                    include: Some(html.clone()),
                    max_nodes: Some(2),
                    ..Default::default()
                },
            )
            .await;
        assert_matches!(result, Err(WalkerError::NotAChild { parent, child }) => {
            assert_eq!(parent, body.key());
            assert_eq!(child, html.key());
        });
    }

    #[tokio::test]
    async fn hidden_include_anchors_at_its_position() {
        let w = walker(true);
        let body = by_id(&w, "b");
        let text = w
            .children(
                body.clone(),
                ChildrenOptions {
                    what_to_show: node_filter::SHOW_TEXT,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .nodes
            .remove(0);
        let window = w
            .children(
                body,
                ChildrenOptions {
                    include: Some(text),
                    max_nodes: Some(2),
                    what_to_show: node_filter::SHOW_ELEMENT,
                },
            )
            .await
            .unwrap();
        assert!(!window.has_first);
        assert!(window.has_last);
        assert_eq!(ids(&window.nodes), ["p3", "p4"]);
    }

    #[tokio::test]
    async fn children_filters_by_what_to_show() {
        let w = walker(true);
        let body = by_id(&w, "b");
        let window = w
            .children(
                body.clone(),
                ChildrenOptions {
                    what_to_show: node_filter::SHOW_TEXT | node_filter::SHOW_COMMENT,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(&window.nodes), ["#text", "#comment"]);

        let all = w.children(body, ChildrenOptions::default()).await.unwrap();
        assert_eq!(all.nodes.len(), 7);
    }

    #[tokio::test]
    async fn parents_nearest_first() {
        let w = walker(true);
        let p = by_id(&w, "p1");
        let parents = w.parents(p.clone(), ParentsOptions::default()).await.unwrap();
        assert_eq!(ids(&parents), ["b", "HTML", "#document"]);

        let elements = w
            .parents(p, ParentsOptions { what_to_show: node_filter::SHOW_ELEMENT })
            .await
            .unwrap();
        assert_eq!(ids(&elements), ["b", "HTML"]);
    }

    #[tokio::test]
    async fn siblings_include_node() {
        let w = walker(true);
        let window = w
            .siblings(
                by_id(&w, "p2"),
                SiblingOptions {
                    max_nodes: Some(3),
                    what_to_show: node_filter::SHOW_ELEMENT,
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(&window.nodes), ["p1", "p2", "p3"]);

        let root = w.root().await.unwrap();
        let alone = w.siblings(root, SiblingOptions::default()).await.unwrap();
        assert!(alone.has_first && alone.has_last);
        assert_eq!(alone.nodes.len(), 1);
    }

    #[tokio::test]
    async fn lock_with_parents_reports_element_ancestors() {
        let w = walker(true);
        let p = by_id(&w, "p0");
        let changed = w
            .add_pseudo_class_lock(p.clone(), "hover".into(), PseudoLockOptions { parents: true })
            .await
            .unwrap();
        assert_eq!(ids(&changed), ["p0", "b", "HTML"]);
        assert_eq!(p.pseudo_class_locks(), ["hover"]);

        // already locked: nothing changes
        let again = w
            .add_pseudo_class_lock(p.clone(), "hover".into(), PseudoLockOptions::default())
            .await
            .unwrap();
        assert!(again.is_empty());

        let removed = w
            .remove_pseudo_class_lock(p.clone(), "hover".into(), PseudoLockOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&removed), ["p0"]);
        assert!(p.pseudo_class_locks().is_empty());
    }

    #[tokio::test]
    async fn lock_rejects_bad_input() {
        let w = walker(true);
        assert_matches!(
            w.add_pseudo_class_lock(by_id(&w, "p0"), "visited".into(), PseudoLockOptions::default())
                .await,
            Err(WalkerError::InvalidPseudoClass { .. })
        );
        let root = w.root().await.unwrap();
        assert_matches!(
            w.add_pseudo_class_lock(root, "hover".into(), PseudoLockOptions::default()).await,
            Err(WalkerError::NotAnElement { .. })
        );
    }

    #[tokio::test]
    async fn clear_locks_node_or_all() {
        let w = walker(true);
        for id in ["p0", "p1"] {
            let _ = w
                .add_pseudo_class_lock(by_id(&w, id), "focus".into(), PseudoLockOptions::default())
                .await
                .unwrap();
        }
        let _ = w
            .add_pseudo_class_lock(by_id(&w, "p1"), "active".into(), PseudoLockOptions::default())
            .await
            .unwrap();

        let one = w
            .clear_pseudo_class_locks(
                Some(by_id(&w, "p1")),
                Some("focus".into()),
                ClearLocksOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&one), ["p1"]);
        assert_eq!(by_id(&w, "p1").pseudo_class_locks(), ["active"]);

        let all = w
            .clear_pseudo_class_locks(None, None, ClearLocksOptions { all: true })
            .await
            .unwrap();
        assert_eq!(ids(&all), ["p0", "p1"]);

        let none = w
            .clear_pseudo_class_locks(None, None, ClearLocksOptions::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn watch_visited_forwards_only_visited_targets() {
        let w = walker(true);
        let mut rx = w.subscribe();
        let doc = w.document().clone();
        let p0 = by_id(&w, "p0").key();
        let p1 = by_id(&w, "p1");

        doc.set_attribute(p0, "title", "x").unwrap();
        let _ = doc.flush_mutations();
        assert!(rx.try_recv().is_err());

        let options = SiblingOptions {
            max_nodes: Some(1),
            ..Default::default()
        };
        let _ = w.siblings(p1.clone(), options).await.unwrap();
        doc.set_attribute(p0, "title", "y").unwrap();
        doc.set_attribute(p1.key(), "title", "y").unwrap();
        let _ = doc.flush_mutations();
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].target.key(), p1.key());
    }

    #[tokio::test]
    async fn unwatched_walker_sees_everything() {
        let w = walker(false);
        let mut rx = w.subscribe();
        let doc = w.document().clone();
        doc.set_attribute(by_id(&w, "p0").key(), "title", "x").unwrap();
        let _ = doc.flush_mutations();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn destroy_fails_later_calls_and_unsubscribes() {
        let w = walker(true);
        let mut rx = w.subscribe();
        assert_eq!(w.document().observer_count(), 1);
        w.destroy();
        w.destroy();
        assert!(w.is_destroyed());
        assert_eq!(w.document().observer_count(), 0);
        assert!(rx.recv().await.is_none());
        assert_matches!(w.root().await, Err(WalkerError::Destroyed));
        assert_matches!(
            w.children(by_id(&w, "b"), ChildrenOptions::default()).await,
            Err(WalkerError::Destroyed)
        );
        assert!(w.subscribe().recv().await.is_none());
    }

    #[tokio::test]
    async fn foreign_node_is_rejected() {
        let a = walker(true);
        let b = walker(true);
        assert_matches!(
            a.children(by_id(&b, "b"), ChildrenOptions::default()).await,
            Err(WalkerError::UnknownNode { .. })
        );
    }
}
