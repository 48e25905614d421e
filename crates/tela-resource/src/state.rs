use std::io::Write;
use std::path::{Path, PathBuf};

use slotmap::SecondaryMap;
use tela_cli_common::{context, paths, warn, warn_pos};
use tela_yaml::{
    Document, NodeId, Visit, canon_path, content_subset, decode_path, parse_file, parse_str,
    path_subset, traverse, traverse2, write_doc, write_node,
};
use tracing::debug;

use crate::ResolveError;
use crate::matching::{LOCALHOST, SYSLOCAL};
use crate::sanitize::{cleanup_system, merge_yaml, sanitize_yaml};
use crate::types::TypeRegistry;

const INT_PREFIX: &str = "_tela";
const ATTR_FINAL: &str = "_tela_final";
const ATTR_ALIAS: &str = "_tela_alias";
const COPY_MARKER: &str = "_tela_copy ";

pub(crate) fn report_issues(issues: &[tela_yaml::Issue]) {
    for issue in issues {
        warn_pos(&issue.filename, issue.lineno, &issue.message);
    }
}

fn parse_reported(parsed: tela_yaml::Parsed) -> Option<Document> {
    report_issues(&parsed.issues);
    parsed.doc
}

fn is_resfail() -> bool {
    std::env::var("TELA_RESFAIL")
        .ok()
        .is_some_and(|v| v.parse::<i32>().unwrap_or(0) != 0)
}

/// Run a resource or requirements file through the external filter program
/// and parse the result. Falls back to reading the file directly when the
/// filter program is unavailable.
fn filter_file(res: bool, filename: &str) -> Option<Document> {
    let abs = paths::abspath(Path::new(filename))?;

    debug!(file = filename, res, "filter file");
    let flag = if res { "1" } else { "0" };
    match paths::internal_cmd("", "filter", &[&abs.to_string_lossy(), flag]) {
        Some(output) => parse_reported(tela_yaml::parse_reader(&output[..], filename)),
        None => parse_reported(parse_file(filename)),
    }
}

fn parse_stdin(name: &str) -> Option<Document> {
    let stdin = std::io::stdin();
    parse_reported(tela_yaml::parse_reader(stdin.lock(), name))
}

/// Determine the path to the default resource file: `TELA_RC` if set
/// (must exist), otherwise `~/.telarc` when present.
pub fn get_resource_path() -> Result<Option<PathBuf>, ResolveError> {
    if let Ok(rc) = std::env::var("TELA_RC") {
        let path = PathBuf::from(&rc);
        if !path.exists() {
            return Err(ResolveError::Runtime(format!(
                "TELA_RC file '{rc}' does not exist"
            )));
        }
        return Ok(Some(path));
    }

    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(home).join(".telarc");
        if path.exists() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Get the list of resources available for tests.
pub(crate) fn get_resources(filename: Option<&str>, filter: bool) -> Document {
    /* The local system is always available. */
    let mut result = parse_str("local system", &format!("{SYSLOCAL}:\n"))
        .doc
        .unwrap_or_default();

    if let Some(filename) = filename {
        let extra = if filename == "-" {
            parse_stdin("standard input")
        } else if filter {
            filter_file(true, filename)
        } else {
            parse_reported(parse_file(filename))
        };
        if let Some(extra) = extra {
            result.append_document(&extra);
        }
    }

    sanitize_yaml(&mut result);
    cleanup_system(&mut result);
    merge_yaml(&mut result);

    result
}

/// Get the list of resources requested by a test.
pub(crate) fn get_requirements(filename: &str, filter: bool) -> Document {
    /* The local system is always a requirement. */
    let mut result = parse_str("<internal>", &format!("{SYSLOCAL}:\n"))
        .doc
        .unwrap_or_default();

    let extra = if filename == "-" {
        parse_stdin("standard input")
    } else if Path::new(filename).exists() {
        if filter {
            filter_file(false, filename)
        } else {
            parse_reported(parse_file(filename))
        }
    } else {
        None
    };
    if let Some(extra) = extra {
        result.append_document(&extra);
    }

    sanitize_yaml(&mut result);
    cleanup_system(&mut result);
    merge_yaml(&mut result);

    result
}

/// System name of a `system <name>` mapping node.
pub(crate) fn sysname(doc: &Document, id: NodeId) -> Option<&str> {
    doc.key(id)?.split_once(' ').map(|(_, name)| name)
}

/// Check if the state node carries an alias matching the id portion of
/// `key`.
fn match_alias(doc: &Document, snode: NodeId, key: &str) -> bool {
    let id = match key.split_once(' ') {
        Some((_, id)) => id,
        None => "",
    };

    for &attr in doc.children(snode) {
        if doc.key(attr) != Some(ATTR_ALIAS) {
            continue;
        }
        /* Single scalar alias. */
        if doc.map_scalar_value(attr) == Some(id) {
            return true;
        }
        /* Sequence of scalar aliases. */
        if doc
            .children(attr)
            .iter()
            .any(|&seq| doc.seq_scalar(seq) == Some(id))
        {
            return true;
        }
    }

    false
}

/// Merge requirement-referenced resources into the collected state.
///
/// Resources present in both are overridden by the resource file where the
/// values are plain; resources absent from the state are added unless they
/// are typed objects, which are reported as unavailable.
fn merge_state(
    registry: &TypeRegistry,
    state: &mut Document,
    state_parent: Option<NodeId>,
    res: &Document,
    res_list: &[NodeId],
    path: &str,
) -> Result<(), ResolveError> {
    for &rnode in res_list {
        if res.key(rnode).is_none() {
            let node = res.node(rnode);
            warn_pos(&node.filename, node.lineno, "Mapping expected");
            continue;
        }
        let rkey = res.key(rnode).unwrap_or_default().to_string();

        /* Find the node with a matching name in the state. */
        let snode = state
            .child_list(state_parent)
            .iter()
            .copied()
            .find(|&s| state.key(s) == Some(rkey.as_str()) || match_alias(state, s, &rkey));

        let cpath = res.node_path(rnode, path);

        if let Some(snode) = snode {
            /* Resource was specified and exists. */
            let r_children: Vec<NodeId> = res.children(rnode).to_vec();
            if r_children.is_empty() {
                continue;
            }
            let both_maps = res
                .children(rnode)
                .first()
                .is_some_and(|&c| res.key(c).is_some())
                && state
                    .children(snode)
                    .first()
                    .is_some_and(|&c| state.key(c).is_some());
            if both_maps {
                /* Process child nodes. */
                merge_state(registry, state, Some(snode), res, &r_children, &cpath)?;
            } else {
                /* Allow override of state values with values from the
                 * resource file. */
                let node = res.node(rnode);
                context().verb(&format!(
                    "{}:{}: Override {}",
                    node.filename,
                    node.lineno,
                    decode_path(&cpath)
                ));
                let replacement = state.import_list(res, &r_children);
                if let Some(value) = state.children_mut(snode) {
                    let old_children = std::mem::take(value);
                    for old in old_children {
                        state.free(old);
                    }
                    if let Some(value) = state.children_mut(snode) {
                        *value = replacement;
                    }
                }
            }
        } else if !registry.is_object(&cpath) {
            /* Resource was specified but does not exist and is not a
             * resource object. */
            let copy = state.import(res, rnode);
            match state_parent {
                Some(parent) => state.append_child(parent, copy),
                None => state.append_root(copy),
            }
        } else {
            /* Resource was specified but does not exist. */
            let node = res.node(rnode);
            warn_pos(
                &node.filename,
                node.lineno,
                &format!("Resource unavailable: {rkey}"),
            );
            if is_resfail() {
                return Err(ResolveError::Runtime(format!(
                    "Resource unavailable: {rkey}"
                )));
            }
        }
    }
    Ok(())
}

/// Replace `_tela_copy <path>` markers with clones of the referenced
/// nodes. Unresolved references are reported and removed.
pub(crate) fn resolve_copy(doc: &mut Document) {
    traverse(doc, &mut |doc, iter| {
        let Some(value) = doc.map_scalar_value(iter.node) else {
            return Visit::Continue;
        };
        let Some(target) = value.strip_prefix(COPY_MARKER) else {
            return Visit::Continue;
        };

        let path = canon_path(&format!("{}/{}", iter.path, target.trim()));
        let replacement = if let Some(stripped) = path.strip_suffix('/') {
            match doc.get_node(stripped) {
                Some(map) => {
                    let children = doc.children(map).to_vec();
                    Some(doc.dup_list(&children, false))
                }
                None => None,
            }
        } else {
            doc.get_node(&path)
                .map(|source| vec![doc.dup_one(source, false)])
        };

        match replacement {
            Some(nodes) => Visit::Replace(nodes),
            None => {
                let node = doc.node(iter.node);
                warn_pos(
                    &node.filename,
                    node.lineno,
                    &format!("Unresolved copy source '{}'", decode_path(&path)),
                );
                Visit::Continue
            }
        }
    });

    /* Remove copy markers that could not be resolved. */
    traverse(doc, &mut |doc, iter| {
        let is_marker = doc
            .map_scalar_value(iter.node)
            .is_some_and(|v| v.starts_with(COPY_MARKER));
        if is_marker {
            let node = doc.node(iter.node);
            warn_pos(
                &node.filename,
                node.lineno,
                &format!("Unresolved copy reference '{}'", decode_path(&iter.path)),
            );
            Visit::Delete
        } else {
            Visit::Continue
        }
    });
}

/// Remove internal attributes and objects named `_tela*`.
pub(crate) fn remove_internal(doc: &mut Document) {
    traverse(doc, &mut |doc, iter| {
        if doc.key(iter.node).is_some_and(|k| k.starts_with(INT_PREFIX)) {
            Visit::Delete
        } else {
            Visit::Continue
        }
    });
}

/// Check if the system object contains a set `_tela_final` attribute.
fn is_final_sys(doc: &Document, sys: NodeId) -> bool {
    doc.children(sys).iter().any(|&attr| {
        doc.key(attr) == Some(ATTR_FINAL)
            && doc
                .map_scalar_value(attr)
                .is_none_or(|v| v.trim().parse::<i32>().unwrap_or(1) != 0)
    })
}

/// Build the input document for the system resource script: the resource
/// subtree minus attributes the script itself provides, plus any
/// script-provided attributes the requirements reference.
fn build_sysin(registry: &TypeRegistry, res: &Document, req: &Document, local: bool, name: &str) -> Document {
    let mut sysin = Document::new();
    let sys_copy = sysin.import(res, res.root()[0]);
    sysin.append_root(sys_copy);

    /* Select the relevant requirements. */
    let mut req_copy = Document::new();
    if local {
        if let Some(&first) = req.root().first() {
            let copy = req_copy.import(req, first);
            req_copy.append_root(copy);
        }
    } else {
        for &node in req.root().iter().skip(1) {
            let copy = req_copy.import(req, node);
            req_copy.append_root(copy);
        }
        /* Combine all remote requirements under this system's name. */
        let root: Vec<NodeId> = req_copy.root().to_vec();
        for id in root {
            req_copy.set_key(id, format!("system {name}"));
        }
        merge_yaml(&mut req_copy);
    }

    /* Pre-process: mark script-provided sysin nodes for removal and link
     * requirement nodes to their counterparts. */
    struct Link {
        parent: Option<NodeId>,
        neighbor: Option<NodeId>,
        required: bool,
    }
    let mut remove: SecondaryMap<NodeId, bool> = SecondaryMap::new();
    let mut links: SecondaryMap<NodeId, Link> = SecondaryMap::new();

    traverse2(&sysin, &req_copy, &mut |a, b| {
        let path = a.or(b).map(|i| i.path.clone()).unwrap_or_default();
        let sysin_attr = registry.is_sysin(&path);

        if let Some(a) = a {
            if sysin_attr {
                /* Data will be provided by the state script. */
                remove.insert(a.node, true);
            }
        }
        if let Some(b) = b {
            links.insert(
                b.node,
                Link {
                    parent: b.parent,
                    neighbor: a.map(|a| a.node),
                    required: false,
                },
            );
            if a.is_none() && sysin_attr {
                /* Node and its parents are required in the sysin data. */
                let mut cursor = Some(b.node);
                while let Some(id) = cursor {
                    match links.get_mut(id) {
                        Some(link) => {
                            link.required = true;
                            cursor = link.parent;
                        }
                        None => break,
                    }
                }
            }
        }
        true
    });

    /* Copy required requirement nodes into the sysin document, creating
     * parents as needed. */
    fn neighbor_of(
        sysin: &mut Document,
        req_copy: &Document,
        links: &mut SecondaryMap<NodeId, Link>,
        node: NodeId,
    ) -> Option<NodeId> {
        if let Some(existing) = links.get(node).and_then(|l| l.neighbor) {
            return Some(existing);
        }
        let parent = links.get(node).and_then(|l| l.parent)?;
        let parent_neighbor = neighbor_of(sysin, req_copy, links, parent)?;
        let copy = sysin.import_shallow(req_copy, node);
        sysin.append_child(parent_neighbor, copy);
        if let Some(link) = links.get_mut(node) {
            link.neighbor = Some(copy);
        }
        Some(copy)
    }

    fn add_required(
        sysin: &mut Document,
        req_copy: &Document,
        links: &mut SecondaryMap<NodeId, Link>,
        ids: &[NodeId],
    ) {
        for &id in ids {
            let needs_copy = links
                .get(id)
                .is_some_and(|l| l.required && l.neighbor.is_none());
            if needs_copy {
                let copy = sysin.import_shallow(req_copy, id);
                let parent = links.get(id).and_then(|l| l.parent);
                match parent.and_then(|p| neighbor_of(sysin, req_copy, links, p)) {
                    Some(parent_neighbor) => sysin.append_child(parent_neighbor, copy),
                    None => sysin.append_root(copy),
                }
                if let Some(link) = links.get_mut(id) {
                    link.neighbor = Some(copy);
                }
            }
            let children: Vec<NodeId> = req_copy.children(id).to_vec();
            add_required(sysin, req_copy, links, &children);
        }
    }
    let req_root: Vec<NodeId> = req_copy.root().to_vec();
    add_required(&mut sysin, &req_copy, &mut links, &req_root);

    /* Remove nodes the script will provide. */
    traverse(&mut sysin, &mut |_, iter| {
        if remove.contains_key(iter.node) {
            Visit::Delete
        } else {
            Visit::Continue
        }
    });

    sysin
}

fn cache_path() -> Option<PathBuf> {
    let enabled = std::env::var("TELA_CACHE")
        .ok()
        .is_some_and(|v| v.parse::<i32>().unwrap_or(0) == 1);
    if !enabled {
        return None;
    }
    std::env::var("_TELA_TMPDIR").ok().map(PathBuf::from)
}

fn cache_file(dir: &Path, sys: &str, slot: u32, suffix: &str) -> PathBuf {
    dir.join(format!("cache_{sys}_{slot:02}_{suffix}"))
}

fn docs_equal(a: &Document, b: &Document) -> bool {
    content_subset(a, b) && content_subset(b, a)
}

/// If `res` is given, find the slot holding the same resource document.
/// Otherwise find the first empty slot.
fn find_cache_slot(dir: &Path, sys: &str, res: Option<&Document>) -> Option<u32> {
    for slot in 0.. {
        let cached = parse_file(cache_file(dir, sys, slot, "res")).doc;
        match (res, cached) {
            (Some(res), Some(cached)) => {
                if docs_equal(res, &cached) {
                    return Some(slot);
                }
            }
            (Some(_), None) => return None,
            (None, None) => return Some(slot),
            (None, Some(_)) => {}
        }
    }
    None
}

enum CachedSysout {
    None,
    Failed,
    Doc(Document),
}

fn get_cached_sysout(dir: &Path, sys: &str, res: &Document) -> CachedSysout {
    let Some(slot) = find_cache_slot(dir, sys, Some(res)) else {
        return CachedSysout::None;
    };
    debug!(slot, "sysout: re-using cache slot");
    match parse_file(cache_file(dir, sys, slot, "sysout")).doc {
        Some(doc) => CachedSysout::Doc(doc),
        None => CachedSysout::Failed,
    }
}

fn write_doc_file(doc: &Document, path: &Path) {
    if let Ok(mut file) = std::fs::File::create(path) {
        let _ = write_doc(doc, &mut file, 0);
    }
}

fn update_cached_sysout(dir: &Path, sys: &str, res: &Document, sysout: &Document) {
    let Some(slot) = find_cache_slot(dir, sys, Some(res)) else {
        return;
    };
    debug!(slot, "sysout: updating cache slot");

    let mut merged = sysout.clone();
    if let Some(old) = parse_file(cache_file(dir, sys, slot, "sysout")).doc {
        merged.append_document(&old);
    }
    merge_yaml(&mut merged);
    write_doc_file(&merged, &cache_file(dir, sys, slot, "sysout"));
}

fn add_cached_sysout(dir: &Path, sys: &str, res: &Document, sysout: Option<&Document>) {
    let Some(slot) = find_cache_slot(dir, sys, None) else {
        return;
    };
    debug!(slot, "sysout: adding cache slot");

    write_doc_file(res, &cache_file(dir, sys, slot, "res"));
    match sysout {
        Some(doc) => write_doc_file(doc, &cache_file(dir, sys, slot, "sysout")),
        /* Remember failed collection so it is not retried. */
        None => {
            let _ = std::fs::File::create(cache_file(dir, sys, slot, "sysout"));
        }
    }
}

/// Obtain the state of one system, consulting the cache first.
fn get_sysout(
    registry: &TypeRegistry,
    sys: &str,
    req: &Document,
    res: &Document,
) -> Result<Option<Document>, ResolveError> {
    let local = sys == LOCALHOST;
    let sysin = build_sysin(registry, res, req, local, sys);

    let mut update = false;
    let cache_dir = cache_path();
    if let Some(dir) = &cache_dir {
        match get_cached_sysout(dir, sys, res) {
            CachedSysout::Failed => {
                /* Data collection failed before, don't try again. */
                return Ok(None);
            }
            CachedSysout::Doc(sysout) => {
                /* Check if all data required by the test is available. */
                if path_subset(&sysin, &sysout) {
                    return Ok(Some(sysout));
                }
                /* Same resource file, but some data is missing. */
                update = true;
            }
            CachedSysout::None => {}
        }
    }

    /* Hand the sysin data to the state script via a temporary file. */
    let (mut tmpfile, tmpname) = tela_cli_common::cleanup::mktempfile()
        .map_err(|e| ResolveError::Runtime(format!("could not create temporary file: {e}")))?;
    let _ = write_doc(&sysin, &mut tmpfile, 0);
    let _ = tmpfile.flush();
    drop(tmpfile);

    debug!(system = sys, "collecting system state");
    let output = if local {
        paths::internal_cmd("resources", "system", &[&tmpname.to_string_lossy()])
    } else {
        paths::internal_cmd("", "remote_system", &[sys, &tmpname.to_string_lossy()])
    };

    let sysout = output
        .and_then(|bytes| parse_reported(tela_yaml::parse_reader(&bytes[..], "libexec/system output")));
    if sysout.is_none() {
        warn(&format!("Could not get state of system {sys}"));
        if is_resfail() {
            return Err(ResolveError::Runtime(format!(
                "could not get state of system {sys}"
            )));
        }
    }

    let _ = std::fs::remove_file(&tmpname);
    tela_cli_common::cleanup::forget_cleanup(&tmpname);

    if let Some(dir) = &cache_dir {
        if update {
            if let Some(sysout) = &sysout {
                update_cached_sysout(dir, sys, res, sysout);
            }
        } else {
            add_cached_sysout(dir, sys, res, sysout.as_ref());
        }
    }

    Ok(sysout)
}

/// Collect the state of every system in the resource document, running the
/// per-system scripts in parallel, and merge it with the resource data.
pub(crate) fn get_state(
    registry: &TypeRegistry,
    req: &Document,
    res: &Document,
) -> Result<Document, ResolveError> {
    println!("# tela: query state");
    let _ = std::io::stdout().flush();

    let outdir = tela_cli_common::cleanup::mktempdir(None)
        .map_err(|e| ResolveError::Runtime(format!("could not create temporary directory: {e}")))?;

    /* One collection worker per system; output files are keyed by system
     * name so the merge below is deterministic. */
    std::thread::scope(|scope| -> Result<(), ResolveError> {
        let mut workers = Vec::new();

        for (idx, &node) in res.root().iter().enumerate() {
            let Some(sys) = sysname(res, node) else {
                continue;
            };
            let outfile = outdir.join(format!("sysout.{sys}"));

            if idx > 0 && req.root().len() == 1 {
                /* Skip data collection for remote systems unless required
                 * by the test. A dummy state suppresses "resource
                 * unavailable" messages. */
                let _ = std::fs::write(&outfile, format!("system {sys}:\n"));
            } else if is_final_sys(res, node) {
                /* Use the node as-is without data collection. */
                if let Ok(mut file) = std::fs::File::create(&outfile) {
                    let _ = write_node(res, node, &mut file, 0);
                }
            } else {
                /* Single-node copy so the cache can compare per system. */
                let mut res_copy = Document::new();
                let copy = res_copy.import(res, node);
                res_copy.append_root(copy);
                let req_copy = req.clone();
                let sys = sys.to_string();

                workers.push(scope.spawn(move || -> Result<(), ResolveError> {
                    let sysout = get_sysout(registry, &sys, &req_copy, &res_copy)?;
                    if let Some(sysout) = sysout {
                        write_doc_file(&sysout, &outfile);
                    }
                    Ok(())
                }));
            }
        }

        for worker in workers {
            worker
                .join()
                .map_err(|_| ResolveError::Runtime("state collection worker panicked".into()))??;
        }
        Ok(())
    })?;

    /* Collect the resulting data files in resource-document order. */
    let mut result = Document::new();
    for &node in res.root() {
        let Some(sys) = sysname(res, node) else {
            continue;
        };
        if let Some(state) = parse_reported(parse_file(outdir.join(format!("sysout.{sys}")))) {
            result.append_document(&state);
        }
    }

    /* Merge duplicate resource objects as may result from aliasing. */
    merge_yaml(&mut result);

    /* Check for stale resources and merge additional data. */
    let res_root: Vec<NodeId> = res.root().to_vec();
    merge_state(registry, &mut result, None, res, &res_root, "")?;
    resolve_copy(&mut result);
    remove_internal(&mut result);

    let _ = std::fs::remove_dir_all(&outdir);
    tela_cli_common::cleanup::forget_cleanup(&outdir);

    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::AttrKind;
    use tela_yaml::parse_str;

    fn doc(text: &str) -> Document {
        parse_str("<test>", text).doc.expect("document")
    }

    fn emitted(doc: &Document) -> String {
        let mut out = Vec::new();
        write_doc(doc, &mut out, 0).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn copy_directive_clones_subtree() {
        let mut d = doc("a:\n  x: 1\nb: _tela_copy ../a\n");
        resolve_copy(&mut d);
        let text = emitted(&d);
        /* The marker node is replaced by a clone of the referenced node. */
        assert_eq!(text, "a:\n  x: 1\na:\n  x: 1\n");
    }

    #[test]
    fn unresolved_copy_is_removed() {
        let mut d = doc("b: _tela_copy ../missing\n");
        resolve_copy(&mut d);
        assert!(d.root().is_empty());
    }

    #[test]
    fn self_referential_copy_is_removed() {
        let mut d = doc("b: _tela_copy .\n");
        resolve_copy(&mut d);
        assert!(d.root().is_empty());
    }

    #[test]
    fn internal_keys_are_removed() {
        let mut d = doc("a:\n  _tela_alias: x\n  keep: 1\n_tela_tmp: 2\n");
        remove_internal(&mut d);
        assert_eq!(emitted(&d), "a:\n  keep: 1\n");
    }

    #[test]
    fn merge_state_overrides_plain_values() {
        let registry = TypeRegistry::new();
        let mut state = doc("system localhost:\n  mem: 1G\n");
        let res = doc("system localhost:\n  mem: 4G\n");
        let res_root: Vec<NodeId> = res.root().to_vec();
        merge_state(&registry, &mut state, None, &res, &res_root, "").unwrap();
        assert_eq!(emitted(&state), "system localhost:\n  mem: 4G\n");
    }

    #[test]
    fn merge_state_adds_missing_plain_nodes() {
        let registry = TypeRegistry::new();
        let mut state = doc("system localhost:\n  mem: 1G\n");
        let res = doc("system localhost:\n  extra: x\n");
        let res_root: Vec<NodeId> = res.root().to_vec();
        merge_state(&registry, &mut state, None, &res, &res_root, "").unwrap();
        let text = emitted(&state);
        assert!(text.contains("mem: 1G"));
        assert!(text.contains("extra: x"));
    }

    #[test]
    fn merge_state_reports_missing_objects() {
        let mut registry = TypeRegistry::new();
        registry.add("*/dasd *", AttrKind::Object, false, false);
        let mut state = doc("system localhost:\n  mem: 1G\n");
        let res = doc("system localhost:\n  dasd x:\n    size: 1G\n");
        let res_root: Vec<NodeId> = res.root().to_vec();
        merge_state(&registry, &mut state, None, &res, &res_root, "").unwrap();
        /* The unavailable object is not copied into the state. */
        assert!(!emitted(&state).contains("dasd"));
    }

    #[test]
    fn alias_matches_state_node() {
        let d = doc("dasd 0.0.1000:\n  _tela_alias: mydisk\n");
        assert!(match_alias(&d, d.root()[0], "dasd mydisk"));
        assert!(!match_alias(&d, d.root()[0], "dasd other"));

        let seq = doc("dasd 0.0.1000:\n  _tela_alias:\n    - one\n    - two\n");
        assert!(match_alias(&seq, seq.root()[0], "dasd two"));
    }

    #[test]
    fn cache_slots_reuse_matching_resource_documents() {
        let dir = tela_cli_common::cleanup::mktempdir(None).unwrap();
        let res = doc("system localhost:\n  mem: 1G\n");
        let sysout = doc("system localhost:\n  mem: 1G\n  kernel: 5.4\n");

        assert!(matches!(
            get_cached_sysout(&dir, "localhost", &res),
            CachedSysout::None
        ));

        add_cached_sysout(&dir, "localhost", &res, Some(&sysout));
        match get_cached_sysout(&dir, "localhost", &res) {
            CachedSysout::Doc(cached) => {
                assert_eq!(cached.get_scalar("system localhost/kernel"), Ok(Some("5.4")));
            }
            _ => panic!("expected cached sysout"),
        }

        /* A different resource document must not reuse the slot. */
        let other = doc("system localhost:\n  mem: 2G\n");
        assert!(matches!(
            get_cached_sysout(&dir, "localhost", &other),
            CachedSysout::None
        ));

        let _ = std::fs::remove_dir_all(&dir);
        tela_cli_common::cleanup::forget_cleanup(&dir);
    }

    #[test]
    fn failed_collection_is_cached_as_failed() {
        let dir = tela_cli_common::cleanup::mktempdir(None).unwrap();
        let res = doc("system localhost:\n  mem: 1G\n");

        add_cached_sysout(&dir, "localhost", &res, None);
        assert!(matches!(
            get_cached_sysout(&dir, "localhost", &res),
            CachedSysout::Failed
        ));

        let _ = std::fs::remove_dir_all(&dir);
        tela_cli_common::cleanup::forget_cleanup(&dir);
    }

    #[test]
    fn sysin_includes_required_attributes_only() {
        let mut registry = TypeRegistry::new();
        registry.add("*/kernel/", AttrKind::Scalar, false, true);
        let res = doc("system localhost:\n  mem: 1G\n  kernel: 5.4\n");
        let req = doc("system localhost:\n  kernel: \">=5.0\"\n");
        let sysin = build_sysin(&registry, &res, &req, true, LOCALHOST);
        let text = emitted(&sysin);
        /* Script-provided data is dropped; the requirement's reference is
         * announced instead. */
        assert!(text.contains("mem: 1G"), "{text}");
        assert!(text.contains("kernel"), "{text}");
        assert!(!text.contains("5.4"), "{text}");
    }
}
