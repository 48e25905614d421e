use crate::node::{Document, NodeId, NodeKind, PATH_SLASH};
use crate::parse::Issue;

/// Turn an encoded YAML path into readable format.
///
/// Paths handed to traversal callbacks encode `/` characters inside
/// component names with [`PATH_SLASH`] so that components can be matched
/// with glob patterns. This restores the readable form, e.g. for printing.
pub fn decode_path(path: &str) -> String {
    path.replace(PATH_SLASH, "/")
}

fn decode_component(comp: &str) -> String {
    decode_path(comp)
}

/// Remove `.` and `..` components from a YAML path. A `..` consumes the
/// preceding component; a leading `..` and a leading `/` are stripped. A
/// trailing `/` (scalar dereference) is preserved.
pub fn canon_path(path: &str) -> String {
    let mut comps: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "." => {}
            ".." => {
                comps.pop();
            }
            c => comps.push(c),
        }
    }
    while comps.len() > 1 && comps[0].is_empty() {
        comps.remove(0);
    }
    comps.join("/")
}

impl Document {
    /// Get the node with the given document path.
    ///
    /// The path is a concatenation of mapping keys separated by `/`, with
    /// literal slashes in keys encoded as [`PATH_SLASH`]. An empty trailing
    /// component dereferences the final mapping to its value node. Every
    /// traversed node is marked handled.
    ///
    /// ```
    /// # use tela_yaml::parse_str;
    /// let doc = parse_str("<ex>", "a:\n  b: content\n").doc.expect("doc");
    /// let b = doc.get_node("a/b").expect("node");
    /// assert_eq!(doc.key(b), Some("b"));
    /// let value = doc.get_node("a/b/").expect("value");
    /// assert_eq!(doc.scalar(value), Some("content"));
    /// ```
    pub fn get_node(&self, path: &str) -> Option<NodeId> {
        let comps: Vec<&str> = path.split('/').collect();
        let mut list: &[NodeId] = self.root();
        let mut result = None;

        for (i, comp) in comps.iter().enumerate() {
            let comp = decode_component(comp);
            let node = if comp.is_empty() {
                list.first().copied()
            } else {
                list.iter()
                    .copied()
                    .find(|&n| self.key(n) == Some(comp.as_str()))
            }?;

            self.mark_handled(node);
            if i == comps.len() - 1 {
                result = Some(node);
            } else {
                list = self.children(node);
            }
        }

        result
    }

    /// Get the scalar content of the node with the given document path.
    ///
    /// `Ok(None)` means no such node exists; a terminal value that exists
    /// but is not a scalar yields a positioned warning for the caller to
    /// report.
    pub fn get_scalar(&self, path: &str) -> Result<Option<&str>, Issue> {
        let Some(node) = self.get_node(path) else {
            return Ok(None);
        };
        if let Some(content) = self.scalar(node) {
            return Ok(Some(content));
        }
        let NodeKind::Map { .. } = self.kind(node) else {
            return Ok(None);
        };
        let value = self.children(node);
        let Some(&head) = value.first() else {
            return Ok(None);
        };
        for &v in value {
            self.set_handled_deep(v);
        }
        match self.scalar(head) {
            Some(content) => Ok(Some(content)),
            None => {
                let found = self.node(head);
                Err(Issue {
                    filename: found.filename.to_string(),
                    lineno: found.lineno,
                    message: format!("Found {} instead of scalar", variant_name(&found.kind)),
                })
            }
        }
    }

    /// Collect positioned warnings for every node that was never marked
    /// handled. Children of unhandled nodes are not reported separately.
    pub fn check_unhandled(&self) -> Vec<Issue> {
        fn walk(doc: &Document, ids: &[NodeId], out: &mut Vec<Issue>) {
            for &id in ids {
                if doc.handled(id) {
                    walk(doc, doc.children(id), out);
                } else {
                    let node = doc.node(id);
                    out.push(Issue {
                        filename: node.filename.to_string(),
                        lineno: node.lineno,
                        message: format!("Unhandled {}", variant_name(&node.kind)),
                    });
                }
            }
        }

        let mut out = Vec::new();
        walk(self, self.root(), &mut out);
        out
    }
}

fn variant_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Scalar(_) => "scalar",
        NodeKind::Seq(_) => "sequence",
        NodeKind::Map { .. } => "mapping",
    }
}
