//! Layout indexer: assigns stable ids and builds the lookup-only parent relation.

use std::collections::HashMap;

use serde::{Serialize, Serializer};

use super::node::LayoutNode;

/// Separator between id components.
pub const ID_SEPARATOR: &str = "__";

/// An indexed layout snapshot.
///
/// Every node carries a unique `id`. Parent navigation goes through an
/// id → child-index-path table kept beside the tree, so the tree itself stays
/// acyclic and serializes as plain nested nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutTree {
    root: LayoutNode,
    paths: HashMap<String, Vec<usize>>,
    order: Vec<String>,
}

/// Index a freshly received snapshot.
///
/// Pre-order, depth first. A node visited with `(prefix, position)` gets
/// `join("__", [prefix, type, position])` with empty components dropped, so
/// the root id is just its type and same-type siblings are told apart by
/// their 1-based position.
pub fn index(mut root: LayoutNode) -> LayoutTree {
    let mut paths = HashMap::new();
    let mut order = Vec::new();
    let mut path = Vec::new();
    assign(&mut root, None, None, &mut path, &mut paths, &mut order);
    LayoutTree { root, paths, order }
}

fn assign(
    node: &mut LayoutNode,
    prefix: Option<&str>,
    position: Option<usize>,
    path: &mut Vec<usize>,
    paths: &mut HashMap<String, Vec<usize>>,
    order: &mut Vec<String>,
) {
    let position = position.map(|p| p.to_string());
    let base = [prefix, Some(node.node_type.as_str()), position.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(ID_SEPARATOR);

    // Types containing the separator can forge another node's id.
    let mut id = base.clone();
    let mut n = 1;
    while paths.contains_key(&id) {
        n += 1;
        id = format!("{base}~{n}");
    }

    paths.insert(id.clone(), path.clone());
    order.push(id.clone());

    for (i, child) in node.children.iter_mut().enumerate() {
        path.push(i);
        assign(child, Some(&id), Some(i + 1), path, paths, order);
        path.pop();
    }

    node.id = Some(id);
}

impl LayoutTree {
    pub fn root(&self) -> &LayoutNode {
        &self.root
    }

    pub fn root_id(&self) -> &str {
        self.order.first().map(String::as_str).unwrap_or_default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.paths.contains_key(id)
    }

    /// All ids in pre-order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&LayoutNode> {
        self.paths.get(id).and_then(|path| self.node_at(path))
    }

    /// The owning node of `id`; `None` for the root or unknown ids.
    pub fn parent(&self, id: &str) -> Option<&LayoutNode> {
        let path = self.paths.get(id)?;
        let (_, parent_path) = path.split_last()?;
        self.node_at(parent_path)
    }

    pub fn parent_id(&self, id: &str) -> Option<&str> {
        self.parent(id).and_then(|node| node.id.as_deref())
    }

    pub fn children_ids(&self, id: &str) -> Vec<&str> {
        self.get(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| child.id.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Root-first chain of nodes from the root down to `id`, inclusive.
    pub fn ancestors(&self, id: &str) -> Vec<&LayoutNode> {
        let Some(path) = self.paths.get(id) else {
            return Vec::new();
        };
        let mut chain = Vec::with_capacity(path.len() + 1);
        let mut node = &self.root;
        chain.push(node);
        for &i in path {
            node = &node.children[i];
            chain.push(node);
        }
        chain
    }

    fn node_at(&self, path: &[usize]) -> Option<&LayoutNode> {
        path.iter()
            .try_fold(&self.root, |node, &i| node.children.get(i))
    }

    /// Indented outline, one node per line, for terminal inspection.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for id in &self.order {
            let depth = self.paths[id].len();
            let node = self.get(id).map(|n| n.node_type.as_str()).unwrap_or("?");
            out.push_str(&"  ".repeat(depth));
            out.push_str(node);
            out.push_str("  #");
            out.push_str(id);
            out.push('\n');
        }
        out
    }
}

impl Serialize for LayoutTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_texts() -> LayoutNode {
        LayoutNode::new("page")
            .with_child(LayoutNode::new("text"))
            .with_child(LayoutNode::new("text"))
    }

    #[test]
    fn test_page_with_two_texts() {
        let tree = index(page_with_texts());
        let ids: Vec<_> = tree.ids().collect();
        assert_eq!(ids, vec!["page", "page__text__1", "page__text__2"]);
        assert_eq!(tree.root().id.as_deref(), Some("page"));
    }

    #[test]
    fn test_parent_lookup() {
        let tree = index(page_with_texts());
        assert!(tree.parent("page").is_none());
        assert_eq!(tree.parent_id("page__text__2"), Some("page"));
        assert!(tree.parent("missing").is_none());
        assert_eq!(tree.children_ids("page"), vec!["page__text__1", "page__text__2"]);
        assert!(tree.children_ids("page__text__1").is_empty());
    }

    #[test]
    fn test_positions_count_all_siblings() {
        let root = LayoutNode::new("view")
            .with_child(LayoutNode::new("text"))
            .with_child(LayoutNode::new("image"))
            .with_child(LayoutNode::new("text"));
        let tree = index(root);
        assert!(tree.contains("view__text__1"));
        assert!(tree.contains("view__image__2"));
        assert!(tree.contains("view__text__3"));
    }

    #[test]
    fn test_forged_ids_are_disambiguated() {
        // First child typed "x__2" gets "a__x__2__1", which the untyped first
        // child of the second sibling ("a__x__2") would also produce.
        let root = LayoutNode::new("a")
            .with_child(LayoutNode::new("x__2"))
            .with_child(LayoutNode::new("x").with_child(LayoutNode::new("")));
        let tree = index(root);
        assert_eq!(tree.len(), 4);
        assert_eq!(
            tree.ids().collect::<Vec<_>>(),
            vec!["a", "a__x__2__1", "a__x__2", "a__x__2__1~2"]
        );
        assert_eq!(tree.parent_id("a__x__2__1~2"), Some("a__x__2"));
        let unique: std::collections::HashSet<_> = tree.ids().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_serialization_has_no_parent_field() {
        let tree = index(page_with_texts());
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["id"], "page");
        assert_eq!(json["children"][1]["id"], "page__text__2");
        assert!(json.get("parent").is_none());
        assert!(json["children"][0].get("parent").is_none());
    }

    #[test]
    fn test_outline_indents_by_depth() {
        let tree = index(page_with_texts());
        let outline = tree.outline();
        assert!(outline.starts_with("page  #page\n"));
        assert!(outline.contains("\n  text  #page__text__1\n"));
    }
}
