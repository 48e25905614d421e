#![doc = include_str!("../README.md")]

mod compare;
mod emit;
mod node;
mod parse;
mod path;
mod traverse;

pub use compare::{content_subset, path_subset};
pub use emit::{sanitize_scalar, write_doc, write_node, write_nodes};
pub use node::{Document, Node, NodeId, NodeKind, PATH_SLASH};
pub use parse::{Issue, Parsed, parse_file, parse_reader, parse_str};
pub use path::{canon_path, decode_path};
pub use traverse::{Iter, Visit, traverse, traverse2, traverse_from};

/// Return a copy of `src` with characters escaped for use inside a
/// double-quoted YAML scalar.
pub fn quote(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for c in src.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\\\n"),
            _ => out.push(c),
        }
    }
    out
}
