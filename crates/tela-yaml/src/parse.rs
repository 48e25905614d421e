use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::node::{Document, NodeId, NodeKind};

const SUB_INDENT: usize = 1;

/// A positioned problem found while parsing or interpreting a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{filename}:{lineno}: {message}")]
pub struct Issue {
    pub filename: String,
    pub lineno: u32,
    pub message: String,
}

/// Outcome of a parse: the document (absent on error or empty input) plus
/// any positioned warnings. Callers report the issues on their own warning
/// channel and treat an absent document as "no data".
#[derive(Debug, Default)]
pub struct Parsed {
    pub doc: Option<Document>,
    pub issues: Vec<Issue>,
}

struct Parser<R> {
    reader: R,
    filename: Arc<str>,
    lineno: u32,
    pushback: Option<String>,
    error: bool,
    eof: bool,
    issues: Vec<Issue>,
    doc: Document,
}

/// Find `c` in the unquoted portion of `s`. Returns the byte index of the
/// first occurrence outside single or double quotes.
fn find_unquoted(s: &str, c: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote = 0u8;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            0 => {
                if b == c {
                    return Some(i);
                }
                if b == b'"' || b == b'\'' {
                    quote = b;
                }
            }
            b'"' => {
                if !escape && b == b'\\' {
                    escape = true;
                } else if escape {
                    escape = false;
                } else if b == b'"' {
                    quote = 0;
                }
            }
            _ => {
                if !escape && b == b'\\' && bytes.get(i + 1) == Some(&b'\\') {
                    escape = true;
                } else if escape {
                    escape = false;
                } else if b == b'\'' {
                    quote = 0;
                }
            }
        }
    }
    None
}

/// Find a mapping key delimiter in `s`: a `:` outside quotes that is
/// followed by whitespace or end-of-line.
fn find_map(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut pos = find_unquoted(s, b':')?;
    loop {
        match bytes.get(pos + 1) {
            None => return Some(pos),
            Some(b) if b.is_ascii_whitespace() => return Some(pos),
            Some(_) => {
                let off = s[pos + 1..].find(':')?;
                pos = pos + 1 + off;
            }
        }
    }
}

fn variant_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Scalar(_) => "scalar",
        NodeKind::Seq(_) => "sequence",
        NodeKind::Map { .. } => "mapping",
    }
}

impl<R: BufRead> Parser<R> {
    fn new(reader: R, name: &str) -> Self {
        Parser {
            reader,
            filename: Arc::from(name),
            lineno: 0,
            pushback: None,
            error: false,
            eof: false,
            issues: Vec::new(),
            doc: Document::new(),
        }
    }

    fn issue(&mut self, message: String) {
        self.issues.push(Issue {
            filename: self.filename.to_string(),
            lineno: self.lineno,
            message,
        });
    }

    fn next_line(&mut self) -> Option<String> {
        if self.error || self.eof {
            return None;
        }
        if let Some(line) = self.pushback.take() {
            return Some(line);
        }
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    /// Remove surrounding quotes and resolve escapes in place. A missing
    /// closing quote is a positioned error.
    fn unquote(&mut self, s: &str) -> Option<String> {
        let mut chars = s.chars();
        let quote = match chars.next() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Some(s.to_string()),
        };
        let rest: Vec<char> = chars.collect();
        let mut out = String::with_capacity(s.len());
        let mut i = 0;
        while i < rest.len() {
            let c = rest[i];
            if quote == '"' && c == '\\' {
                match rest.get(i + 1) {
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some(&other) => {
                        // Limit: single char escape characters only and no
                        // check for valid escape characters.
                        out.push(other);
                    }
                    None => break,
                }
                i += 2;
                continue;
            }
            if c == quote {
                if quote == '\'' && rest.get(i + 1) == Some(&'\'') {
                    out.push('\'');
                    i += 2;
                    continue;
                }
                // Keep anything after the closing quote verbatim.
                out.extend(&rest[i + 1..]);
                return Some(out);
            }
            out.push(c);
            i += 1;
        }
        self.issue("Missing closing quote".into());
        self.error = true;
        None
    }

    /// Parse the remainder of a `- ` or `key:` line: either an inline
    /// scalar or a sub-block at a deeper indent.
    fn parse_implicit(&mut self, indent: usize, s: &str) -> Vec<NodeId> {
        let s = s.trim();
        if s.is_empty() {
            return self.parse_block(indent + SUB_INDENT);
        }
        match self.unquote(s) {
            Some(content) => {
                let filename = Arc::clone(&self.filename);
                vec![
                    self.doc
                        .alloc(NodeKind::Scalar(content), &filename, self.lineno),
                ]
            }
            None => Vec::new(),
        }
    }

    fn parse_block(&mut self, indent: usize) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();

        while let Some(mut line) = self.next_line() {
            self.lineno += 1;

            // Remove trailing newline.
            while line.ends_with('\n') {
                line.pop();
            }

            // Remove comment portion.
            if let Some(pos) = find_unquoted(&line, b'#') {
                line.truncate(pos);
            }

            // Document start marker.
            if line.starts_with("---") {
                continue;
            }

            // Document end marker.
            if line.starts_with("...") {
                self.eof = true;
                break;
            }

            let i = line.len() - line.trim_start_matches(' ').len();
            let rest = &line[i..];

            // Skip empty lines.
            if rest.is_empty() {
                continue;
            }

            // Block end.
            if i < indent {
                self.lineno -= 1;
                self.pushback = Some(line);
                break;
            }

            let prev_kind = out.last().map(|&id| self.doc.kind(id).clone());

            // Tab indentation outside of multi-line scalars.
            if rest.starts_with('\t')
                && !matches!(prev_kind, None | Some(NodeKind::Scalar(_)))
            {
                self.issue("Found unsupported tab indentation".into());
                self.error = true;
                break;
            }

            // Sequence element.
            if rest.starts_with('-')
                && rest[1..].chars().next().is_some_and(|c| c.is_ascii_whitespace())
            {
                if let Some(kind) = &prev_kind {
                    if !matches!(kind, NodeKind::Seq(_)) {
                        self.issue(format!(
                            "Found unexpected sequence indicator '-' - expected {}",
                            variant_name(kind)
                        ));
                        self.error = true;
                        break;
                    }
                }
                let lineno = self.lineno;
                let content = self.parse_implicit(i, &line[i + 2..]);
                if self.error {
                    break;
                }
                let filename = Arc::clone(&self.filename);
                let node = self.doc.alloc(NodeKind::Seq(content), &filename, lineno);
                out.push(node);
                continue;
            }

            // Mapping entry.
            if let Some(sep) = find_map(rest) {
                if let Some(kind) = &prev_kind {
                    if !matches!(kind, NodeKind::Map { .. }) {
                        self.issue(format!(
                            "Found unexpected mapping indicator ':' - expected {}",
                            variant_name(kind)
                        ));
                        self.error = true;
                        break;
                    }
                }
                let key = rest[..sep].trim().to_string();
                let lineno = self.lineno;
                let value = self.parse_implicit(i, &rest[sep + 1..]);
                if self.error {
                    break;
                }
                let filename = Arc::clone(&self.filename);
                let node = self
                    .doc
                    .alloc(NodeKind::Map { key, value }, &filename, lineno);
                out.push(node);
                continue;
            }

            // Scalar; consecutive scalars at one indent are folded.
            if let Some(kind) = &prev_kind {
                if !matches!(kind, NodeKind::Scalar(_)) {
                    self.issue(format!(
                        "Found unexpected scalar - expected {}",
                        variant_name(kind)
                    ));
                    self.error = true;
                    break;
                }
            }

            let Some(content) = self.unquote(rest.trim()) else {
                break;
            };
            if let Some(&prev) = out.last() {
                if let Some(old) = self.doc.scalar(prev).map(str::to_string) {
                    self.doc.set_scalar(prev, format!("{old} {content}"));
                    continue;
                }
            }
            let filename = Arc::clone(&self.filename);
            let node = self
                .doc
                .alloc(NodeKind::Scalar(content), &filename, self.lineno);
            out.push(node);
        }

        out
    }

    fn run(mut self) -> Parsed {
        let root = self.parse_block(0);
        for id in root {
            self.doc.append_root(id);
        }
        let doc = if self.error || self.doc.is_empty() {
            None
        } else {
            Some(self.doc)
        };
        Parsed {
            doc,
            issues: self.issues,
        }
    }
}

/// Read YAML from an I/O stream. Returns the parsed document, or an absent
/// document if the stream could not be parsed or held no data.
pub fn parse_reader<R: BufRead>(reader: R, name: &str) -> Parsed {
    Parser::new(reader, name).run()
}

/// Parse a string into its YAML representation.
pub fn parse_str(name: &str, content: &str) -> Parsed {
    parse_reader(content.as_bytes(), name)
}

/// Read a YAML file. An unreadable file yields an absent document without
/// an issue, matching "no configuration present".
pub fn parse_file<P: AsRef<Path>>(path: P) -> Parsed {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => parse_reader(BufReader::new(file), &path.to_string_lossy()),
        Err(_) => Parsed::default(),
    }
}
