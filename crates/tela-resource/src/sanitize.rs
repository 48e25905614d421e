use tela_yaml::{Document, NodeId, NodeKind};

use crate::matching::SYSLOCAL;

/// Convert runs of whitespace in `s` to single blanks and remove leading
/// and trailing spaces.
fn sanitize_spacing(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_nonempty_scalar(doc: &Document, id: Option<NodeId>) -> bool {
    id.and_then(|id| doc.scalar(id)).is_some_and(|s| !s.is_empty())
}

fn sanitize_list(doc: &mut Document, ids: Vec<NodeId>, toplevel: bool) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(ids.len());

    for id in ids {
        let keep = match doc.kind(id) {
            /* Remove non-mappings at top-level, scalars without content
             * and sequences without scalar content. */
            _ if toplevel && !matches!(doc.kind(id), NodeKind::Map { .. }) => false,
            NodeKind::Scalar(content) => !content.is_empty(),
            NodeKind::Seq(content) => is_nonempty_scalar(doc, content.first().copied()),
            NodeKind::Map { key, .. } => !key.trim().is_empty(),
        };
        if !keep {
            doc.free(id);
            continue;
        }

        if let NodeKind::Map { key, .. } = doc.kind(id) {
            /* Ensure single spacing between words in key scalars. */
            let clean = sanitize_spacing(key);
            doc.set_key(id, clean);

            let children: Vec<NodeId> = doc.children(id).to_vec();
            let kept = sanitize_list(doc, children, false);
            if let Some(value) = doc.children_mut(id) {
                *value = kept;
            }
        }

        out.push(id);
    }

    out
}

/// Transform a document into a clean version to reduce complexity when
/// processing it.
///
/// Guarantees after the call:
/// - the top level only contains mappings
/// - scalars are non-empty
/// - sequence contents are non-empty scalars
/// - mapping keys are non-empty scalars with defined word spacing
pub fn sanitize_yaml(doc: &mut Document) {
    let root: Vec<NodeId> = doc.root().to_vec();
    let kept = sanitize_list(doc, root, true);
    *doc.child_list_mut(None) = kept;
}

fn match_type_name(doc: &Document, id: NodeId, name: &str) -> bool {
    doc.key(id).is_some_and(|key| {
        key.strip_prefix(name)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
    })
}

/// Check if the node is a non-resource ("meta") section.
fn is_meta_section(doc: &Document, id: NodeId) -> bool {
    doc.key(id) == Some("test")
}

/// Clean up system sections:
/// - rename bare `system` to `system localhost`
/// - remove top-level meta sections
/// - move non-system sections below the `system localhost` entry
///
/// Non-system sections are attached to the local system entry wherever it
/// appears in the document (the first system entry if no local one
/// exists). A document without any system entry is left with its
/// non-system sections at the top level.
pub fn cleanup_system(doc: &mut Document) {
    let root: Vec<NodeId> = doc.root().to_vec();

    let mut kept = Vec::with_capacity(root.len());
    let mut reparent = Vec::new();

    for id in root {
        if doc.key(id) == Some("system") {
            doc.set_key(id, SYSLOCAL.to_string());
            kept.push(id);
        } else if is_meta_section(doc, id) {
            doc.free(id);
        } else if match_type_name(doc, id, "system") {
            kept.push(id);
        } else {
            reparent.push(id);
        }
    }

    let target = kept
        .iter()
        .copied()
        .find(|&id| doc.key(id) == Some(SYSLOCAL))
        .or_else(|| kept.first().copied());

    match target {
        Some(target) => {
            *doc.child_list_mut(None) = kept;
            for id in reparent {
                doc.append_child(target, id);
            }
        }
        None => {
            /* No system entry to hold the rest. */
            *doc.child_list_mut(None) = reparent;
        }
    }
}

fn merge_pair(doc: &mut Document, a: NodeId, b: NodeId) {
    /* Append the content of b to the content of a; duplicate scalar values
     * are replaced, last occurrence wins. */
    let b_children: Vec<NodeId> = match doc.children_mut(b) {
        Some(children) => std::mem::take(children),
        None => Vec::new(),
    };

    let a_children = doc.children(a).to_vec();
    match (a_children.first(), b_children.first()) {
        (None, _) => {
            if let Some(value) = doc.children_mut(a) {
                *value = b_children;
            }
        }
        (Some(&a_head), Some(&b_head))
            if doc.scalar(a_head).is_some() && doc.scalar(b_head).is_some() =>
        {
            /* New value replaces old value. */
            let content = doc.scalar(b_head).map(str::to_string).unwrap_or_default();
            doc.set_scalar(a_head, content);
            for id in b_children {
                doc.free(id);
            }
        }
        _ => {
            if let Some(value) = doc.children_mut(a) {
                value.extend(b_children);
            }
        }
    }

    doc.free(b);
}

fn merge_list(doc: &mut Document, parent: Option<NodeId>) {
    let mut i = 0;
    loop {
        let list = doc.child_list(parent);
        if i >= list.len() {
            break;
        }
        let a = list[i];
        if doc.key(a).is_none() {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        loop {
            let list = doc.child_list(parent);
            if j >= list.len() {
                break;
            }
            let b = list[j];
            if doc.key(b).is_some() && doc.key(a) == doc.key(b) {
                doc.child_list_mut(parent).remove(j);
                merge_pair(doc, a, b);
            } else {
                j += 1;
            }
        }

        /* Handle child mappings. */
        let head_is_map = doc
            .children(a)
            .first()
            .is_some_and(|&c| doc.key(c).is_some());
        if head_is_map {
            merge_list(doc, Some(a));
        }

        i += 1;
    }
}

/// Merge sibling mappings with equal keys, recursively.
pub fn merge_yaml(doc: &mut Document) {
    merge_list(doc, None);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tela_yaml::parse_str;

    fn doc(text: &str) -> Document {
        parse_str("<test>", text).doc.expect("document")
    }

    fn emitted(doc: &Document) -> String {
        let mut out = Vec::new();
        tela_yaml::write_doc(doc, &mut out, 0).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn sanitize_collapses_key_spacing() {
        let mut d = doc("dasd   x:\n  size: 1\n");
        sanitize_yaml(&mut d);
        assert_eq!(d.key(d.root()[0]), Some("dasd x"));
    }

    #[test]
    fn sanitize_drops_toplevel_non_mappings() {
        let mut d = doc("- item\n");
        sanitize_yaml(&mut d);
        assert!(d.root().is_empty());
    }

    #[test]
    fn cleanup_renames_bare_system() {
        let mut d = doc("system:\n  mem: 1\n");
        cleanup_system(&mut d);
        assert_eq!(d.key(d.root()[0]), Some(SYSLOCAL));
    }

    #[test]
    fn cleanup_reparents_non_system_sections() {
        let mut d = doc("system localhost:\n  mem: 1\ndasd a:\n  size: 2\n");
        cleanup_system(&mut d);
        assert_eq!(d.root().len(), 1);
        let text = emitted(&d);
        assert_eq!(text, "system localhost:\n  mem: 1\n  dasd a:\n    size: 2\n");
    }

    #[test]
    fn cleanup_removes_meta_sections() {
        let mut d = doc("system localhost:\n  mem: 1\ntest:\n  plan: 3\n");
        cleanup_system(&mut d);
        assert!(!emitted(&d).contains("plan"));
    }

    #[test]
    fn cleanup_reparents_when_system_entry_is_not_first() {
        let mut d = doc("dasd a:\n  size: 2\nsystem localhost:\n  mem: 1\n");
        cleanup_system(&mut d);
        assert_eq!(d.root().len(), 1);
        assert_eq!(
            emitted(&d),
            "system localhost:\n  mem: 1\n  dasd a:\n    size: 2\n"
        );
    }

    #[test]
    fn cleanup_without_system_entry_keeps_content() {
        let mut d = doc("dasd a:\n  size: 2\n");
        cleanup_system(&mut d);
        assert_eq!(emitted(&d), "dasd a:\n  size: 2\n");
    }

    #[test]
    fn merge_unions_submappings() {
        let mut d = doc("a:\n  x: 1\na:\n  y: 2\n");
        merge_yaml(&mut d);
        assert_eq!(emitted(&d), "a:\n  x: 1\n  y: 2\n");
    }

    #[test]
    fn merge_scalar_last_occurrence_wins() {
        let mut d = doc("a: 1\na: 2\n");
        merge_yaml(&mut d);
        assert_eq!(emitted(&d), "a: 2\n");
    }

    #[test]
    fn merge_recurses_into_children() {
        let mut d = doc("sys:\n  disk a:\n    size: 1\n  disk a:\n    size: 2\n");
        merge_yaml(&mut d);
        assert_eq!(emitted(&d), "sys:\n  disk a:\n    size: 2\n");
    }
}
