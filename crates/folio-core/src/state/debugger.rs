//! Layout debugger state: the published tree and the selected node.
//!
//! The orchestrator is the only writer of the tree; the inspector UI is the
//! only writer of the selection. Replacing the tree always clears the
//! selection so it never points into a discarded snapshot.

use std::sync::Arc;

use tokio::sync::watch;

use crate::layout::{LayoutNode, LayoutTree};

#[derive(Debug, Clone, Default)]
pub struct DebugSnapshot {
    pub layout: Option<Arc<LayoutTree>>,
    pub selected: Option<String>,
}

impl DebugSnapshot {
    pub fn selection(&self) -> Option<Selection> {
        let tree = self.layout.as_ref()?;
        let id = self.selected.as_ref()?;
        tree.contains(id).then(|| Selection {
            tree: Arc::clone(tree),
            id: id.clone(),
        })
    }
}

/// A selected node, addressed by id within the tree it was selected from.
#[derive(Debug, Clone)]
pub struct Selection {
    tree: Arc<LayoutTree>,
    id: String,
}

impl Selection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree(&self) -> &Arc<LayoutTree> {
        &self.tree
    }

    pub fn node(&self) -> &LayoutNode {
        self.tree
            .get(&self.id)
            .unwrap_or_else(|| self.tree.root())
    }

    pub fn parent(&self) -> Option<&LayoutNode> {
        self.tree.parent(&self.id)
    }
}

#[derive(Debug)]
pub struct DebuggerState {
    tx: watch::Sender<DebugSnapshot>,
}

impl Default for DebuggerState {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggerState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DebugSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DebugSnapshot> {
        self.tx.subscribe()
    }

    pub fn layout(&self) -> Option<Arc<LayoutTree>> {
        self.tx.borrow().layout.clone()
    }

    /// Publish a new tree (or none), clearing any selection.
    pub fn replace_layout(&self, layout: Option<LayoutTree>) {
        let layout = layout.map(Arc::new);
        self.tx.send_modify(|snap| {
            snap.layout = layout;
            snap.selected = None;
        });
    }

    /// Select a node of the current tree. Unknown ids are rejected.
    pub fn select(&self, id: &str) -> bool {
        self.tx.send_if_modified(|snap| {
            let known = snap.layout.as_ref().is_some_and(|tree| tree.contains(id));
            if !known || snap.selected.as_deref() == Some(id) {
                return false;
            }
            snap.selected = Some(id.to_string());
            true
        });
        self.tx.borrow().selected.as_deref() == Some(id)
    }

    pub fn clear_selection(&self) {
        self.tx.send_if_modified(|snap| snap.selected.take().is_some());
    }

    pub fn selection(&self) -> Option<Selection> {
        self.tx.borrow().selection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::index;

    fn tree() -> LayoutTree {
        index(
            LayoutNode::new("page")
                .with_child(LayoutNode::new("text"))
                .with_child(LayoutNode::new("view").with_child(LayoutNode::new("text"))),
        )
    }

    #[test]
    fn test_select_known_node() {
        let state = DebuggerState::new();
        state.replace_layout(Some(tree()));
        assert!(state.select("page__view__2__text__1"));
        let sel = state.selection().unwrap();
        assert_eq!(sel.node().node_type, "text");
        assert_eq!(sel.parent().unwrap().node_type, "view");
    }

    #[test]
    fn test_select_unknown_node_is_rejected() {
        let state = DebuggerState::new();
        assert!(!state.select("page"));
        state.replace_layout(Some(tree()));
        assert!(!state.select("page__image__1"));
        assert!(state.selection().is_none());
    }

    #[test]
    fn test_replacing_tree_clears_selection() {
        let state = DebuggerState::new();
        state.replace_layout(Some(tree()));
        assert!(state.select("page__text__1"));
        let held = state.selection().unwrap();

        state.replace_layout(Some(tree()));
        assert!(state.selection().is_none());
        // The held selection still refers to the tree it came from.
        assert!(!Arc::ptr_eq(held.tree(), &state.layout().unwrap()));
        assert_eq!(held.node().node_type, "text");
    }

    #[test]
    fn test_clearing_layout() {
        let state = DebuggerState::new();
        state.replace_layout(Some(tree()));
        state.replace_layout(None);
        assert!(state.layout().is_none());
    }
}
