use std::path::Path;

use glob_match::glob_match;
use tela_yaml::{Document, NodeId, NodeKind};
use tracing::debug;

/// Comparison rule names accepted in `.types` files and by `eval`.
pub const KNOWN_TYPES: &[&str] = &["object", "number", "version", "scalar", ""];

/// Comparison rule selected for a node path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// A named resource instance, matched structurally.
    Object,
    /// `[OP] value [SCALE]` numeric comparison.
    Number,
    /// Dotted version comparison.
    Version,
    /// Scalar equality/inequality.
    Scalar,
    /// Select by node variant (scalar/sequence/mapping).
    ByType,
}

impl AttrKind {
    pub fn from_name(name: &str) -> Option<AttrKind> {
        match name {
            "object" => Some(AttrKind::Object),
            "number" => Some(AttrKind::Number),
            "version" => Some(AttrKind::Version),
            "scalar" => Some(AttrKind::Scalar),
            "" => Some(AttrKind::ByType),
            _ => None,
        }
    }
}

/// One `.types` line: a path pattern with its comparison rule and tags.
#[derive(Debug, Clone)]
pub struct PathType {
    pub pattern: String,
    pub kind: AttrKind,
    /// Emit the env-var name without upper-casing.
    pub noupper: bool,
    /// Include this attribute in the system-state script input.
    pub sysin: bool,
}

/// Comparison rule resolved for a concrete node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedType {
    Object,
    Number,
    Version,
    Scalar,
    Seq,
    Map,
    Unknown,
}

/// Registry of known resource node paths, populated from
/// `libexec/resources/*.types` files.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: Vec<PathType>,
}

fn parse_tags(tags: Option<&str>) -> (bool, bool) {
    let mut noupper = false;
    let mut sysin = false;
    if let Some(tags) = tags {
        for tag in tags.split(',') {
            match tag.trim() {
                "noupper" => noupper = true,
                "sysin" => sysin = true,
                _ => {}
            }
        }
    }
    (noupper, sysin)
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Read type information from every `*.types` file in the framework's
    /// `libexec/resources` directory.
    pub fn load() -> Self {
        let mut registry = TypeRegistry::new();
        let dir = tela_cli_common::paths::libexec_dir("resources");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return registry;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "types") {
                registry.load_file(&path);
            }
        }
        registry
    }

    /// Parse one `.types` file. Each line is `pattern : type [, tag...]`.
    pub fn load_file(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        let filename = path.to_string_lossy();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_line(&filename, line);
        }
    }

    fn add_line(&mut self, filename: &str, line: &str) {
        let Some((pattern, rest)) = line.split_once(':') else {
            tela_cli_common::warn_pos(filename, 0, &format!("Malformed line: {line}"));
            return;
        };
        // Tags follow the type after a second colon or a comma.
        let (type_name, tags) = match rest.split_once(':') {
            Some((t, tags)) => (t, Some(tags)),
            None => match rest.split_once(',') {
                Some((t, tags)) => (t, Some(tags)),
                None => (rest, None),
            },
        };

        let Some(kind) = AttrKind::from_name(type_name.trim()) else {
            tela_cli_common::warn_pos(
                filename,
                0,
                &format!("Unknown data type: {}", type_name.trim()),
            );
            return;
        };
        let (noupper, sysin) = parse_tags(tags);

        debug!(pattern = pattern.trim(), ?kind, noupper, sysin, "type entry");
        self.entries.push(PathType {
            pattern: pattern.trim().to_string(),
            kind,
            noupper,
            sysin,
        });
    }

    pub fn add(&mut self, pattern: &str, kind: AttrKind, noupper: bool, sysin: bool) {
        self.entries.push(PathType {
            pattern: pattern.to_string(),
            kind,
            noupper,
            sysin,
        });
    }

    fn lookup(&self, path: &str) -> Option<&PathType> {
        self.entries
            .iter()
            .find(|entry| glob_match(&entry.pattern, path))
    }

    /// Comparison rule for the node at `path` with the given variant.
    pub fn resolve(&self, path: &str, kind: Option<&NodeKind>) -> ResolvedType {
        if let Some(entry) = self.lookup(path) {
            match entry.kind {
                AttrKind::Object => return ResolvedType::Object,
                AttrKind::Number => return ResolvedType::Number,
                AttrKind::Version => return ResolvedType::Version,
                AttrKind::Scalar => return ResolvedType::Scalar,
                AttrKind::ByType => {}
            }
        }
        match kind {
            Some(NodeKind::Scalar(_)) => ResolvedType::Scalar,
            Some(NodeKind::Seq(_)) => ResolvedType::Seq,
            Some(NodeKind::Map { .. }) => ResolvedType::Map,
            None => ResolvedType::Unknown,
        }
    }

    /// `noupper` tag for the node at `path`.
    pub fn noupper(&self, path: &str) -> bool {
        self.lookup(path).is_some_and(|e| e.noupper)
    }

    /// Check if a YAML path matches a pattern tagged `sysin`.
    pub fn is_sysin(&self, path: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.sysin && glob_match(&entry.pattern, path))
    }

    /// Determine if the node with `path` is an object node.
    pub fn is_object(&self, path: &str) -> bool {
        let map_kind = NodeKind::Map {
            key: String::new(),
            value: Vec::new(),
        };
        self.resolve(path, Some(&map_kind)) == ResolvedType::Object
    }

    /// Resolve for a node in `doc`.
    pub fn resolve_node(&self, doc: &Document, id: NodeId, path: &str) -> ResolvedType {
        self.resolve(path, Some(doc.kind(id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.add("*/dasd *", AttrKind::Object, false, false);
        r.add("*/dasd */size/", AttrKind::Number, false, false);
        r.add("*/kernel/", AttrKind::Version, false, true);
        r.add("*/fcp *", AttrKind::Object, true, false);
        r
    }

    #[test]
    fn patterns_do_not_cross_separators() {
        let r = registry();
        assert!(r.is_object("system localhost/dasd a"));
        assert!(!r.is_object("system localhost/dasd a/dasd b/extra"));
    }

    #[test]
    fn resolve_falls_back_to_variant() {
        let r = registry();
        let kind = NodeKind::Scalar("x".into());
        assert_eq!(
            r.resolve("system localhost/unknown/", Some(&kind)),
            ResolvedType::Scalar
        );
        assert_eq!(
            r.resolve("system localhost/dasd a/size/", Some(&kind)),
            ResolvedType::Number
        );
    }

    #[test]
    fn sysin_and_noupper_tags() {
        let r = registry();
        assert!(r.is_sysin("system localhost/kernel/"));
        assert!(!r.is_sysin("system localhost/dasd a/size/"));
        assert!(r.noupper("system localhost/fcp x"));
        assert!(!r.noupper("system localhost/dasd a"));
    }

    #[test]
    fn parses_types_lines() {
        let mut r = TypeRegistry::new();
        r.add_line("<test>", "*/mem/ : number");
        r.add_line("<test>", "*/scsi * : object , noupper, sysin");
        assert_eq!(r.entries.len(), 2);
        assert_eq!(r.entries[0].kind, AttrKind::Number);
        assert!(r.entries[1].noupper);
        assert!(r.entries[1].sysin);
    }
}
