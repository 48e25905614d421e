use std::io::{self, BufRead, Write};

use crate::node::{Document, NodeId, NodeKind};

/* Write out YAML nodes. Restrictions:
 * - sequences can only have scalar contents
 * - scalars can only contain non-quoted characters
 */
fn write_list<W: Write>(
    doc: &Document,
    ids: &[NodeId],
    w: &mut W,
    indent: usize,
    single: bool,
    mut cont: bool,
) -> io::Result<()> {
    for &id in ids {
        if cont {
            cont = false;
        } else {
            write!(w, "{:indent$}", "")?;
        }

        match doc.kind(id) {
            NodeKind::Scalar(content) => writeln!(w, "{content}")?,
            NodeKind::Seq(content) => {
                if doc.seq_scalar(id).is_some() {
                    write!(w, "- ")?;
                    write_list(doc, content, w, indent + 2, false, true)?;
                }
            }
            NodeKind::Map { key, value } => {
                write!(w, "{key}:")?;
                match value.first().map(|&v| doc.kind(v)) {
                    None => writeln!(w)?,
                    Some(NodeKind::Scalar(content)) => writeln!(w, " {content}")?,
                    Some(_) => {
                        writeln!(w)?;
                        write_list(doc, value, w, indent + 2, false, false)?;
                    }
                }
            }
        }

        if single {
            break;
        }
    }

    Ok(())
}

/// Write a run of sibling nodes indented by `indent` spaces.
pub fn write_nodes<W: Write>(
    doc: &Document,
    ids: &[NodeId],
    w: &mut W,
    indent: usize,
) -> io::Result<()> {
    write_list(doc, ids, w, indent, false, false)
}

/// Write a single node (without its siblings).
pub fn write_node<W: Write>(
    doc: &Document,
    id: NodeId,
    w: &mut W,
    indent: usize,
) -> io::Result<()> {
    write_list(doc, &[id], w, indent, true, false)
}

/// Write a whole document.
pub fn write_doc<W: Write>(doc: &Document, w: &mut W, indent: usize) -> io::Result<()> {
    write_nodes(doc, doc.root(), w, indent)
}

/// Copy text data from `input` to `out` as a valid YAML block scalar
/// indented by `indent` spaces. With `escape`, non-printable bytes are
/// written in `\xHH` notation. Output is always newline-terminated.
pub fn sanitize_scalar<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    indent: usize,
    escape: bool,
) -> io::Result<()> {
    let mut need_nl = false;
    let mut line = Vec::new();
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        write!(out, "{:indent$}", "")?;
        for &b in &line {
            if !escape || b == b'\n' || (b.is_ascii_graphic() || b == b' ') {
                out.write_all(&[b])?;
            } else {
                write!(out, "\\x{b:02x}")?;
            }
        }
        need_nl = *line.last().unwrap_or(&b'\n') != b'\n';
    }
    if need_nl {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parse::parse_str;

    fn emit(doc: &Document) -> String {
        let mut out = Vec::new();
        write_doc(doc, &mut out, 0).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn roundtrip(text: &str) -> String {
        let doc = parse_str("<test>", text).doc.expect("document");
        emit(&doc)
    }

    #[test]
    fn emits_mapping_with_nested_block() {
        let out = roundtrip("a:\n  b: c\n  d: e\n");
        assert_eq!(out, "a:\n  b: c\n  d: e\n");
    }

    #[test]
    fn emits_sequences_inline() {
        let out = roundtrip("a:\n  - x\n  - y\n");
        assert_eq!(out, "a:\n  - x\n  - y\n");
    }

    #[test]
    fn second_and_third_emissions_are_byte_equal() {
        let first = roundtrip("x:\n - 1\n - 2\ny: z # comment\n");
        let second = roundtrip(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn write_node_skips_siblings() {
        let doc = parse_str("<test>", "a: 1\nb: 2\n").doc.unwrap();
        let mut out = Vec::new();
        write_node(&doc, doc.root()[0], &mut out, 0).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a: 1\n");
    }

    #[test]
    fn sanitize_plain_text() {
        let mut out = Vec::new();
        sanitize_scalar(&mut "one\ntwo".as_bytes(), &mut out, 4, false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "    one\n    two\n");
    }

    #[test]
    fn sanitize_escapes_nonprintable() {
        let mut out = Vec::new();
        sanitize_scalar(&mut &b"a\x01b\n"[..], &mut out, 0, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a\\x01b\n");
    }
}
