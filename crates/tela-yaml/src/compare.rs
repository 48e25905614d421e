use crate::node::{Document, NodeKind};
use crate::traverse::traverse2;

/// Check if every node in `a` has a counterpart with the same YAML path in
/// `b`. Contents are ignored.
pub fn path_subset(a: &Document, b: &Document) -> bool {
    traverse2(a, b, &mut |a_iter, b_iter| {
        !(a_iter.is_some() && b_iter.is_none())
    })
}

/// Check if every node in `a` has a path-matching node in `b` of the same
/// variant, with equal contents for scalars.
pub fn content_subset(a: &Document, b: &Document) -> bool {
    traverse2(a, b, &mut |a_iter, b_iter| match (a_iter, b_iter) {
        (Some(ai), Some(bi)) => match (a.kind(ai.node), b.kind(bi.node)) {
            (NodeKind::Scalar(x), NodeKind::Scalar(y)) => x == y,
            (NodeKind::Seq(_), NodeKind::Seq(_)) | (NodeKind::Map { .. }, NodeKind::Map { .. }) => {
                true
            }
            _ => false,
        },
        (Some(_), None) => false,
        (None, _) => true,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parse::parse_str;

    fn doc(text: &str) -> Document {
        parse_str("<test>", text).doc.expect("document")
    }

    #[test]
    fn path_subset_ignores_content() {
        let a = doc("x:\n  y: 1\n");
        let b = doc("x:\n  y: other\n  z: 2\n");
        assert!(path_subset(&a, &b));
        assert!(!path_subset(&b, &a));
    }

    #[test]
    fn content_subset_compares_scalars() {
        let a = doc("x:\n  y: 1\n");
        let same = doc("x:\n  y: 1\n  z: 2\n");
        let differs = doc("x:\n  y: 2\n");
        assert!(content_subset(&a, &same));
        assert!(!content_subset(&a, &differs));
    }

    #[test]
    fn content_subset_detects_variant_change() {
        let a = doc("x:\n  y: 1\n");
        let b = doc("x:\n  y:\n    z: 1\n");
        assert!(!content_subset(&a, &b));
    }
}
