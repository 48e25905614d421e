use std::cell::Cell;
use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Identity of a node within its owning [`Document`].
    pub struct NodeId;
}

/// Replacement character for slashes in YAML path components.
///
/// Path components are joined with `/`, so a literal `/` inside a mapping
/// key is encoded with this character while a path is being matched and
/// decoded again for display (see [`crate::decode_path`]).
pub const PATH_SLASH: char = '\u{f8ff}';

/// Node payload. A mapping block or sequence is represented as a run of
/// sibling `Map`/`Seq` nodes, each owning its own content chain.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Scalar(String),
    Seq(Vec<NodeId>),
    Map { key: String, value: Vec<NodeId> },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub filename: Arc<str>,
    pub lineno: u32,
    handled: Cell<bool>,
}

impl Node {
    fn new(kind: NodeKind, filename: Arc<str>, lineno: u32) -> Self {
        Node {
            kind,
            filename,
            lineno,
            handled: Cell::new(false),
        }
    }
}

/// An arena-backed YAML document.
///
/// The document owns every node; sibling order is the order of ids in the
/// parent's child list (or in [`Document::root`] for top-level nodes).
#[derive(Debug, Default, Clone)]
pub struct Document {
    nodes: SlotMap<NodeId, Node>,
    root: Vec<NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn root(&self) -> &[NodeId] {
        &self.root
    }

    pub fn alloc(&mut self, kind: NodeKind, filename: &Arc<str>, lineno: u32) -> NodeId {
        self.nodes
            .insert(Node::new(kind, Arc::clone(filename), lineno))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Check whether `id` still refers to a live node.
    pub fn node_exists(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    /// Scalar content of `id`, if it is a scalar node.
    pub fn scalar(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Mapping key of `id`, if it is a mapping node.
    pub fn key(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Map { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn set_key(&mut self, id: NodeId, new_key: String) {
        if let NodeKind::Map { key, .. } = &mut self.nodes[id].kind {
            *key = new_key;
        }
    }

    pub fn set_scalar(&mut self, id: NodeId, content: String) {
        if let NodeKind::Scalar(s) = &mut self.nodes[id].kind {
            *s = content;
        }
    }

    /// Content chain of `id`: the value of a mapping, the content of a
    /// sequence element, empty for scalars.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Scalar(_) => &[],
            NodeKind::Seq(content) => content,
            NodeKind::Map { value, .. } => value,
        }
    }

    pub fn children_mut(&mut self, id: NodeId) -> Option<&mut Vec<NodeId>> {
        match &mut self.nodes[id].kind {
            NodeKind::Scalar(_) => None,
            NodeKind::Seq(content) => Some(content),
            NodeKind::Map { value, .. } => Some(value),
        }
    }

    /// Child list under `parent`, or the document root when `parent` is
    /// absent.
    pub fn child_list(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(p) => self.children(p),
            None => &self.root,
        }
    }

    pub fn child_list_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(p) => self
                .children_mut(p)
                .expect("scalar nodes have no child list"),
            None => &mut self.root,
        }
    }

    pub fn append_root(&mut self, id: NodeId) {
        self.root.push(id);
    }

    pub fn append_child(&mut self, parent: NodeId, id: NodeId) {
        if let Some(children) = self.children_mut(parent) {
            children.push(id);
        }
    }

    /// Scalar value of mapping `id`, if its value chain starts with a
    /// scalar.
    pub fn map_scalar_value(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Map { value, .. } => value.first().and_then(|&v| self.scalar(v)),
            _ => None,
        }
    }

    /// Scalar content of sequence element `id`, if its content chain starts
    /// with a scalar.
    pub fn seq_scalar(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Seq(content) => content.first().and_then(|&c| self.scalar(c)),
            _ => None,
        }
    }

    pub fn handled(&self, id: NodeId) -> bool {
        self.nodes[id].handled.get()
    }

    pub fn mark_handled(&self, id: NodeId) {
        self.nodes[id].handled.set(true);
    }

    /// Mark `id` and every node below it as handled.
    pub fn set_handled_deep(&self, id: NodeId) {
        self.nodes[id].handled.set(true);
        for &child in self.children(id) {
            self.set_handled_deep(child);
        }
    }

    /// Remove the subtree rooted at `id` from the arena. The id must no
    /// longer be referenced from any child list.
    pub fn free(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.free(child);
        }
        self.nodes.remove(id);
    }

    /// Remove and free the node at `idx` of `parent`'s child list.
    pub fn remove_at(&mut self, parent: Option<NodeId>, idx: usize) {
        let id = self.child_list_mut(parent).remove(idx);
        self.free(id);
    }

    /// Replace the node at `idx` of `parent`'s child list with
    /// `replacement` (possibly empty), freeing the old node.
    pub fn splice(&mut self, parent: Option<NodeId>, idx: usize, replacement: Vec<NodeId>) {
        let list = self.child_list_mut(parent);
        let old = list[idx];
        list.splice(idx..=idx, replacement);
        self.free(old);
    }

    /// Deep-copy a single node. With `no_child`, content chains are not
    /// copied (mapping keys are always kept).
    pub fn dup_one(&mut self, id: NodeId, no_child: bool) -> NodeId {
        let (src_kind, filename, lineno) = {
            let node = &self.nodes[id];
            (
                node.kind.clone(),
                Arc::clone(&node.filename),
                node.lineno,
            )
        };
        let kind = match src_kind {
            NodeKind::Scalar(s) => NodeKind::Scalar(s),
            NodeKind::Seq(content) => NodeKind::Seq(if no_child {
                Vec::new()
            } else {
                self.dup_ids(&content)
            }),
            NodeKind::Map { key, value } => NodeKind::Map {
                key,
                value: if no_child {
                    Vec::new()
                } else {
                    self.dup_ids(&value)
                },
            },
        };
        self.nodes.insert(Node::new(kind, filename, lineno))
    }

    /// Deep-copy a run of sibling nodes.
    pub fn dup_list(&mut self, ids: &[NodeId], no_child: bool) -> Vec<NodeId> {
        ids.iter().map(|&id| self.dup_one(id, no_child)).collect()
    }

    fn dup_ids(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        ids.iter().map(|&id| self.dup_one(id, false)).collect()
    }

    /// Deep-copy the subtree rooted at `id` of `src` into this document.
    pub fn import(&mut self, src: &Document, id: NodeId) -> NodeId {
        let node = src.node(id);
        let kind = match &node.kind {
            NodeKind::Scalar(s) => NodeKind::Scalar(s.clone()),
            NodeKind::Seq(content) => NodeKind::Seq(self.import_list(src, content)),
            NodeKind::Map { key, value } => NodeKind::Map {
                key: key.clone(),
                value: self.import_list(src, value),
            },
        };
        self.nodes
            .insert(Node::new(kind, Arc::clone(&node.filename), node.lineno))
    }

    pub fn import_list(&mut self, src: &Document, ids: &[NodeId]) -> Vec<NodeId> {
        ids.iter().map(|&id| self.import(src, id)).collect()
    }

    /// Copy a single node of `src` without its content chain (mapping keys
    /// are kept).
    pub fn import_shallow(&mut self, src: &Document, id: NodeId) -> NodeId {
        let node = src.node(id);
        let kind = match &node.kind {
            NodeKind::Scalar(s) => NodeKind::Scalar(s.clone()),
            NodeKind::Seq(_) => NodeKind::Seq(Vec::new()),
            NodeKind::Map { key, .. } => NodeKind::Map {
                key: key.clone(),
                value: Vec::new(),
            },
        };
        self.nodes
            .insert(Node::new(kind, Arc::clone(&node.filename), node.lineno))
    }

    /// Append a deep copy of every top-level node of `other`.
    pub fn append_document(&mut self, other: &Document) {
        let imported = self.import_list(other, other.root());
        self.root.extend(imported);
    }

    /// Textual path component of `id`, or `None` for scalars (whose path is
    /// the parent path with a trailing `/`). Slashes inside the component
    /// are encoded with [`PATH_SLASH`].
    pub fn path_component(&self, id: NodeId) -> Option<String> {
        let name = match &self.nodes[id].kind {
            NodeKind::Scalar(_) => return None,
            NodeKind::Seq(_) => self.seq_scalar(id).unwrap_or_default(),
            NodeKind::Map { key, .. } => key.as_str(),
        };
        Some(name.replace('/', &PATH_SLASH.to_string()))
    }

    /// Path of node `id` given its parent's path.
    pub fn node_path(&self, id: NodeId, parent_path: &str) -> String {
        match self.path_component(id) {
            None => format!("{parent_path}/"),
            Some(name) if parent_path.is_empty() => name,
            Some(name) => format!("{parent_path}/{name}"),
        }
    }
}
