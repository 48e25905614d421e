use crate::node::{Document, NodeId};

/// Per-node data passed to traversal callbacks.
#[derive(Debug, Clone)]
pub struct Iter {
    /// Current node.
    pub node: NodeId,
    /// Parent node, absent at top level.
    pub parent: Option<NodeId>,
    /// Textual path to the current node (encoded, see
    /// [`crate::decode_path`]).
    pub path: String,
}

/// Structural action requested by a traversal callback for the current
/// node. After `Replace` or `Delete` the traversal continues with the
/// successor that was in place before the call; the children of the first
/// replacement node are still visited.
pub enum Visit {
    Continue,
    /// Abort further processing.
    Stop,
    /// Splice in the given nodes in place of the current one.
    Replace(Vec<NodeId>),
    Delete,
}

fn walk<F>(doc: &mut Document, parent: Option<NodeId>, parent_path: &str, cb: &mut F) -> bool
where
    F: FnMut(&mut Document, &Iter) -> Visit,
{
    let mut idx = 0;
    loop {
        let list = doc.child_list(parent);
        if idx >= list.len() {
            return true;
        }
        let node = list[idx];
        let path = doc.node_path(node, parent_path);
        let iter = Iter { node, parent, path };

        match cb(doc, &iter) {
            Visit::Stop => return false,
            Visit::Continue => {
                if !walk(doc, Some(node), &iter.path, cb) {
                    return false;
                }
                idx += 1;
            }
            Visit::Delete => {
                doc.splice(parent, idx, Vec::new());
            }
            Visit::Replace(replacement) => {
                let head = replacement.first().copied();
                let count = replacement.len();
                doc.splice(parent, idx, replacement);
                if let Some(head) = head {
                    let head_path = doc.node_path(head, parent_path);
                    if !walk(doc, Some(head), &head_path, cb) {
                        return false;
                    }
                }
                idx += count;
            }
        }
    }
}

/// Traverse all nodes of `doc` depth-first pre-order, calling `cb` for each
/// node until it returns [`Visit::Stop`].
///
/// Returns `true` if all nodes were traversed.
pub fn traverse<F>(doc: &mut Document, cb: &mut F) -> bool
where
    F: FnMut(&mut Document, &Iter) -> Visit,
{
    walk(doc, None, "", cb)
}

/// Traverse the content chain below `parent`, with paths rooted at
/// `parent_path`.
pub fn traverse_from<F>(
    doc: &mut Document,
    parent: NodeId,
    parent_path: &str,
    cb: &mut F,
) -> bool
where
    F: FnMut(&mut Document, &Iter) -> Visit,
{
    walk(doc, Some(parent), parent_path, cb)
}

fn walk2<F>(
    a: &Document,
    a_ctx: Option<Option<NodeId>>,
    b: &Document,
    b_ctx: Option<Option<NodeId>>,
    parent_path: &str,
    cb: &mut F,
) -> bool
where
    F: FnMut(Option<&Iter>, Option<&Iter>) -> bool,
{
    let a_list: Vec<NodeId> = match a_ctx {
        Some(p) => a.child_list(p).to_vec(),
        None => Vec::new(),
    };
    let b_list: Vec<NodeId> = match b_ctx {
        Some(p) => b.child_list(p).to_vec(),
        None => Vec::new(),
    };

    /* First pass: nodes in a and a+b. */
    for &an in &a_list {
        let a_path = a.node_path(an, parent_path);
        let b_match = b_list
            .iter()
            .copied()
            .find(|&bn| b.node_path(bn, parent_path) == a_path);

        let a_iter = Iter {
            node: an,
            parent: a_ctx.flatten(),
            path: a_path.clone(),
        };
        let b_iter = b_match.map(|bn| Iter {
            node: bn,
            parent: b_ctx.flatten(),
            path: a_path.clone(),
        });
        if !cb(Some(&a_iter), b_iter.as_ref()) {
            return false;
        }

        if !walk2(a, Some(Some(an)), b, b_match.map(Some), &a_path, cb) {
            return false;
        }
    }

    /* Second pass: nodes in b only. */
    for &bn in &b_list {
        let b_path = b.node_path(bn, parent_path);
        if a_list
            .iter()
            .any(|&an| a.node_path(an, parent_path) == b_path)
        {
            continue;
        }

        let b_iter = Iter {
            node: bn,
            parent: b_ctx.flatten(),
            path: b_path.clone(),
        };
        if !cb(None, Some(&b_iter)) {
            return false;
        }

        if !walk2(a, None, b, Some(Some(bn)), &b_path, cb) {
            return false;
        }
    }

    true
}

/// Depth-first, side-by-side traversal of two documents. `cb` is called
/// once for each path present in either document, with the iterator for
/// the side that has it (both when the path exists in both). Short-circuits
/// when `cb` returns `false`.
pub fn traverse2<F>(a: &Document, b: &Document, cb: &mut F) -> bool
where
    F: FnMut(Option<&Iter>, Option<&Iter>) -> bool,
{
    walk2(a, Some(None), b, Some(None), "", cb)
}
