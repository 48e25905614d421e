#![doc = include_str!("../README.md")]

mod matching;
mod sanitize;
mod state;
mod types;

pub use matching::{LOCALHOST, Matcher, SYSLOCAL};
pub use sanitize::{cleanup_system, merge_yaml, sanitize_yaml};
pub use state::get_resource_path;
pub use types::{AttrKind, PathType, ResolvedType, TypeRegistry};

use std::path::PathBuf;

use tela_yaml::{Document, NodeKind};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{0}")]
    Runtime(String),
    #[error("unknown resource type '{0}'")]
    UnknownType(String),
}

/// Outcome of resolving a requirements document against resources.
pub enum Resolution {
    /// Requirements were fulfilled; `env` holds `KEY=VALUE` bindings ready
    /// to export to the test process.
    Match {
        env: Vec<String>,
        matchfile: Option<PathBuf>,
    },
    /// No combination of resources fulfills the requirements.
    NoMatch { reason: String },
}

/// Match a requirements document against a resource document.
///
/// On success, the environment bindings are returned and, when requested,
/// `res` is reduced to the matched-resource document. On failure the reason
/// names the requirement with the fewest matches.
pub fn resolve_documents(
    registry: &TypeRegistry,
    req: &Document,
    res: &mut Document,
    want_match_doc: bool,
) -> Resolution {
    let mut matcher = Matcher::new(registry, req, res);

    if matcher.match_objects(req, req.root(), res, res.root()) {
        let env = matcher.to_env(req, res);
        if want_match_doc {
            matcher.into_match_doc(req, res);
        }
        Resolution::Match {
            env,
            matchfile: None,
        }
    } else {
        Resolution::NoMatch {
            reason: matcher.reason(req),
        }
    }
}

/// Resolve testcase resource requirements against available resources.
///
/// Requirements come from `reqfile` (`-` for stdin); resources from
/// `resfile` or the default resource file. With `do_filter`, both are run
/// through the external filter program. With `do_state`, the state of each
/// system is collected through the platform scripts before matching. With
/// `want_matchfile`, the reduced resource document is written to a
/// temporary file whose path is returned in the resolution.
pub fn resolve(
    reqfile: &str,
    resfile: Option<&str>,
    do_filter: bool,
    do_state: bool,
    want_matchfile: bool,
) -> Result<Resolution, ResolveError> {
    let registry = TypeRegistry::load();

    let req = state::get_requirements(reqfile, do_filter);
    let res = state::get_resources(resfile, do_filter);

    /* Get the state of all resources. */
    let mut current = if do_state {
        state::get_state(&registry, &req, &res)?
    } else {
        res.clone()
    };

    match resolve_documents(&registry, &req, &mut current, want_matchfile) {
        Resolution::Match { env, .. } => {
            let matchfile = if want_matchfile {
                let (mut file, path) = tela_cli_common::cleanup::mktempfile().map_err(|e| {
                    ResolveError::Runtime(format!("could not create match file: {e}"))
                })?;
                tela_yaml::write_doc(&current, &mut file, 0)
                    .map_err(|e| ResolveError::Runtime(format!("could not write match file: {e}")))?;
                Some(path)
            } else {
                None
            };
            Ok(Resolution::Match { env, matchfile })
        }
        no_match @ Resolution::NoMatch { .. } => Ok(no_match),
    }
}

/// Evaluate a single typed comparison between a requirement value and a
/// resource value, as used by the `eval` subcommand.
pub fn res_eval(type_name: &str, req: &str, res: &str) -> Result<bool, ResolveError> {
    let mut registry = TypeRegistry::new();
    let kind =
        AttrKind::from_name(type_name).ok_or_else(|| ResolveError::UnknownType(type_name.into()))?;
    registry.add("**", kind, false, false);
    if kind == AttrKind::Object {
        /* Structural comparison needs mapping input; single values never
         * are. */
        return Ok(false);
    }

    let req_doc = scalar_doc(req);
    let res_doc = scalar_doc(res);
    let mut matcher = Matcher::new(&registry, &req_doc, &res_doc);
    Ok(matcher.eval_scalars(&req_doc, &res_doc))
}

fn scalar_doc(content: &str) -> Document {
    let mut doc = Document::new();
    let file: std::sync::Arc<str> = std::sync::Arc::from("cmdline");
    let id = doc.alloc(NodeKind::Scalar(content.to_string()), &file, 0);
    doc.append_root(id);
    doc
}

/// Known type names for `eval` error reporting.
pub fn known_types() -> &'static [&'static str] {
    types::KNOWN_TYPES
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tela_yaml::parse_str;

    #[test]
    fn eval_number_scaling() {
        assert!(res_eval("number", ">=1gi", "1073741824").unwrap());
        assert!(!res_eval("number", ">=1g", "999999999").unwrap());
        assert!(res_eval("number", "2ki", "2048").unwrap());
        assert!(res_eval("number", "!=3", "4").unwrap());
    }

    #[test]
    fn eval_version_ordering() {
        assert!(res_eval("version", "<=2.3", "2.3").unwrap());
        assert!(!res_eval("version", "<=2.3", "2.3.1").unwrap());
        assert!(res_eval("version", "<2.3.a", "2.3.b").unwrap());
    }

    #[test]
    fn eval_scalar_equality() {
        assert!(res_eval("scalar", "abc", "abc").unwrap());
        assert!(res_eval("scalar", "!=abc", "abd").unwrap());
        assert!(!res_eval("scalar", "abc", "abd").unwrap());
    }

    #[test]
    fn eval_unknown_type() {
        assert!(matches!(
            res_eval("nope", "a", "b"),
            Err(ResolveError::UnknownType(_))
        ));
    }

    #[test]
    fn resolve_documents_end_to_end() {
        let mut registry = TypeRegistry::new();
        registry.add("*/disk *", AttrKind::Object, false, false);
        registry.add("*/disk */size/", AttrKind::Number, false, false);

        let req = parse_str(
            "<req>",
            "system localhost:\n  disk d:\n    size: \">=1G\"\n",
        )
        .doc
        .unwrap();
        let mut res = parse_str(
            "<res>",
            "system localhost:\n  disk 0.0.1:\n    size: \"2G\"\n",
        )
        .doc
        .unwrap();

        match resolve_documents(&registry, &req, &mut res, true) {
            Resolution::Match { env, .. } => {
                assert!(env.contains(&"TELA_SYSTEM_DISK_D=0.0.1".to_string()), "{env:?}");
            }
            Resolution::NoMatch { reason } => panic!("no match: {reason}"),
        }

        let mut out = Vec::new();
        tela_yaml::write_doc(&res, &mut out, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("disk d:"), "{text}");
        assert!(text.contains("_id: 0.0.1"), "{text}");
    }

    #[test]
    fn resolve_documents_reports_reason() {
        let registry = TypeRegistry::new();
        let req = parse_str("<req>", "system localhost:\n  mem: 8G\n")
            .doc
            .unwrap();
        let mut res = parse_str("<res>", "system localhost:\n  mem: 2G\n")
            .doc
            .unwrap();
        match resolve_documents(&registry, &req, &mut res, false) {
            Resolution::NoMatch { reason } => {
                assert!(reason.contains("mem"), "{reason}");
            }
            Resolution::Match { .. } => panic!("unexpected match"),
        }
    }
}
