use slotmap::SecondaryMap;
use tela_yaml::{Document, NodeId, NodeKind, Visit, decode_path, traverse};
use tracing::trace;

use crate::types::{ResolvedType, TypeRegistry};

pub const LOCALHOST: &str = "localhost";
pub const SYSLOCAL: &str = "system localhost";

/// Per-node scratch state for one matching run, kept outside the document
/// in maps keyed by node identity.
#[derive(Debug, Clone, Default)]
struct MatchData {
    path: String,
    resolved: Option<ResolvedType>,
    noupper: bool,
    /* Requirement nodes. */
    res: Vec<NodeId>,
    num_matched: u32,
    /* Resource nodes. */
    assigned: bool,
    next_compat: Option<NodeId>,
}

#[derive(Debug)]
struct AttrVar {
    name: String,
    value: String,
    owner: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    None,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn parse_op(s: &mut &str) -> Op {
    if let Some(rest) = s.strip_prefix("!=") {
        *s = rest;
        Op::Ne
    } else if let Some(rest) = s.strip_prefix("<=") {
        *s = rest;
        Op::Le
    } else if let Some(rest) = s.strip_prefix('<') {
        *s = rest;
        Op::Lt
    } else if let Some(rest) = s.strip_prefix(">=") {
        *s = rest;
        Op::Ge
    } else if let Some(rest) = s.strip_prefix('>') {
        *s = rest;
        Op::Gt
    } else {
        Op::None
    }
}

fn cmp_number(a: i64, b: i64, op: Op) -> bool {
    match op {
        Op::None => a == b,
        Op::Ne => a != b,
        Op::Lt => a < b,
        Op::Le => a <= b,
        Op::Gt => a > b,
        Op::Ge => a >= b,
    }
}

fn cmp_string(a: &str, b: &str, op: Op) -> bool {
    let c = a.cmp(b);
    match op {
        Op::None => c.is_eq(),
        Op::Ne => c.is_ne(),
        Op::Lt => c.is_lt(),
        Op::Le => c.is_le(),
        Op::Gt => c.is_gt(),
        Op::Ge => c.is_ge(),
    }
}

/// Parse a leading integer (decimal or `0x` hex), returning the value and
/// the unparsed remainder.
fn parse_long(s: &str) -> Option<(i64, &str)> {
    let s = s.trim_start();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (16, rest),
        None => (10, s),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some((if negative { -value } else { value }, &digits[end..]))
}

/// Parse decimal and binary unit prefixes and return the resulting factor.
/// Decimal prefixes are `k`, `m`, `g`, `t`; binary prefixes `ki`, `mi`,
/// `gi`, `ti`.
fn parse_scale(s: &mut &str) -> i64 {
    let mut chars = s.chars();
    let unit = chars.next().map(|c| c.to_ascii_lowercase());
    let binary = chars.next().is_some_and(|c| c.to_ascii_lowercase() == 'i');
    let (consumed, factor) = match unit {
        Some('k') if binary => (2, 1i64 << 10),
        Some('k') => (1, 1_000),
        Some('m') if binary => (2, 1 << 20),
        Some('m') => (1, 1_000_000),
        Some('g') if binary => (2, 1 << 30),
        Some('g') => (1, 1_000_000_000),
        Some('t') if binary => (2, 1 << 40),
        Some('t') => (1, 1_000_000_000_000),
        _ => (0, 1),
    };
    *s = &s[consumed..];
    factor
}

/// Split off the next version component at `.`, `-` or `_`.
fn next_component<'a>(rest: &mut Option<&'a str>) -> Option<&'a str> {
    let s = (*rest)?.trim_start();
    match s.find(['.', '-', '_']) {
        Some(pos) => {
            *rest = Some(&s[pos + 1..]);
            Some(&s[..pos])
        }
        None => {
            *rest = None;
            Some(s)
        }
    }
}

/// Compare one version component: numerically when both sides are numeric,
/// as strings otherwise.
fn cmp_subver(a: &str, b: &str, op: Op) -> bool {
    let a_num: Option<i64> = if a.is_empty() { Some(0) } else { a.parse().ok() };
    let b_num: Option<i64> = if b.is_empty() { Some(0) } else { b.parse().ok() };
    match (a_num, b_num) {
        (Some(x), Some(y)) => cmp_number(x, y, op),
        _ => cmp_string(a, b, op),
    }
}

fn type_word(key: &str) -> &str {
    key.split(' ').next().unwrap_or(key)
}

/// Check if the keys of two mapping nodes start with the same type word.
fn match_type(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => type_word(a) == type_word(b),
        _ => false,
    }
}

pub(crate) fn is_syslocal(doc: &Document, id: NodeId) -> bool {
    doc.key(id) == Some(SYSLOCAL)
}

pub(crate) fn is_wildcard(doc: &Document, id: NodeId) -> bool {
    doc.key(id).is_some_and(|k| k.ends_with(" *"))
}

/// Shorten the local system name for prefixes and match keys.
pub(crate) fn sys_short(key: &str) -> &str {
    if key == SYSLOCAL { "system" } else { key }
}

/// One resource-matching run: scratch state for the requirement and
/// resource trees plus the attribute-variable table.
pub struct Matcher<'r> {
    registry: &'r TypeRegistry,
    req_md: SecondaryMap<NodeId, MatchData>,
    res_md: SecondaryMap<NodeId, MatchData>,
    vars: Vec<AttrVar>,
}

impl<'r> Matcher<'r> {
    pub fn new(registry: &'r TypeRegistry, req: &Document, res: &Document) -> Self {
        let mut matcher = Matcher {
            registry,
            req_md: SecondaryMap::new(),
            res_md: SecondaryMap::new(),
            vars: Vec::new(),
        };
        matcher.alloc_md(req, req.root(), "", false);
        matcher.alloc_md(res, res.root(), "", true);
        matcher
    }

    fn alloc_md(&mut self, doc: &Document, ids: &[NodeId], path: &str, res_side: bool) {
        for (pos, &id) in ids.iter().enumerate() {
            let node_path = doc.node_path(id, path);
            let data = MatchData {
                resolved: Some(self.registry.resolve_node(doc, id, &node_path)),
                noupper: self.registry.noupper(&node_path),
                path: node_path.clone(),
                ..MatchData::default()
            };
            if res_side {
                self.res_md.insert(id, data);
            } else {
                self.req_md.insert(id, data);
            }

            let children: Vec<NodeId> = doc.children(id).to_vec();
            self.alloc_md(doc, &children, &node_path, res_side);

            if res_side {
                /* Determine next compatible resource in list. */
                let next = ids[pos + 1..]
                    .iter()
                    .copied()
                    .find(|&n| match_type(doc.key(id), doc.key(n)));
                if let Some(md) = self.res_md.get_mut(id) {
                    md.next_compat = next;
                }
            }
        }
    }

    fn get_var(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }

    fn del_vars(&mut self, owner: NodeId) {
        self.vars.retain(|v| v.owner != owner);
    }

    /// Replace all `%{name}` occurrences in `s` with their bound values.
    fn resolve_attr_var(&self, doc: &Document, node: NodeId, s: &str) -> Option<String> {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                self.scalar_error(doc, node, "unterminated variable name");
                return None;
            };
            let name = &after[..end];
            let Some(value) = self.get_var(name) else {
                self.scalar_error(doc, node, "undefined variable");
                return None;
            };
            /* Do not resolve recursive references. */
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Some(out)
    }

    fn scalar_error(&self, doc: &Document, node: NodeId, reason: &str) {
        let n = doc.node(node);
        tela_cli_common::warn_pos(&n.filename, n.lineno, &format!("Error in scalar: {reason}"));
    }

    /// Bind a variable on its first plain-equality occurrence. Returns
    /// `true` if an assignment was performed (which counts as a match).
    fn assign_attr_var(&mut self, doc: &Document, node: NodeId, req: &str, res: &str) -> bool {
        let mut s = req;
        if parse_op(&mut s) != Op::None {
            /* Attribute condition. */
            return false;
        }
        let Some(start) = req.find("%{") else {
            return false;
        };
        let after = &req[start + 2..];
        let Some(end) = after.find('}') else {
            self.scalar_error(doc, node, "unterminated variable name");
            return false;
        };
        let name = &after[..end];
        if self.get_var(name).is_some() {
            /* Only first occurrence is an assignment. */
            return false;
        }
        trace!(name, value = res, "assign attribute variable");
        self.vars.push(AttrVar {
            name: name.to_string(),
            value: res.to_string(),
            owner: node,
        });
        true
    }

    fn match_number(
        &mut self,
        req_doc: &Document,
        req: NodeId,
        res_doc: &Document,
        res: NodeId,
    ) -> bool {
        let (Some(req_s), Some(res_s)) = (req_doc.scalar(req), res_doc.scalar(res)) else {
            return false;
        };
        if self.assign_attr_var(req_doc, req, req_s, res_s) {
            /* Variable assignments are considered a match. */
            return true;
        }
        let Some(resolved) = self.resolve_attr_var(req_doc, req, req_s) else {
            return false;
        };

        let mut r: &str = &resolved;
        let op = parse_op(&mut r);
        let Some((req_value, mut rest)) = parse_long(r) else {
            return false;
        };
        rest = rest.trim_start();
        let req_value = req_value.saturating_mul(parse_scale(&mut rest));

        let Some((res_value, mut rest)) = parse_long(res_s) else {
            return false;
        };
        rest = rest.trim_start();
        let res_value = res_value.saturating_mul(parse_scale(&mut rest));

        cmp_number(res_value, req_value, op)
    }

    fn match_version(
        &mut self,
        req_doc: &Document,
        req: NodeId,
        res_doc: &Document,
        res: NodeId,
    ) -> bool {
        let (Some(req_s), Some(res_s)) = (req_doc.scalar(req), res_doc.scalar(res)) else {
            return false;
        };
        if self.assign_attr_var(req_doc, req, req_s, res_s) {
            return true;
        }
        let Some(resolved) = self.resolve_attr_var(req_doc, req, req_s) else {
            return false;
        };

        let mut r: &str = &resolved;
        let op = parse_op(&mut r);

        let mut req_rest = Some(r);
        let mut res_rest = Some(res_s);
        while req_rest.is_some() && res_rest.is_some() {
            let a = next_component(&mut res_rest).unwrap_or("");
            let b = next_component(&mut req_rest).unwrap_or("");
            if !cmp_subver(a, b, Op::None) {
                /* First subversion that is different. */
                return cmp_subver(a, b, op);
            }
        }

        /* One version is short. */
        cmp_subver(res_rest.unwrap_or(""), req_rest.unwrap_or(""), op)
    }

    fn match_scalar(
        &mut self,
        req_doc: &Document,
        req: NodeId,
        res_doc: &Document,
        res: NodeId,
    ) -> bool {
        let (Some(req_s), Some(res_s)) = (req_doc.scalar(req), res_doc.scalar(res)) else {
            return false;
        };
        if self.assign_attr_var(req_doc, req, req_s, res_s) {
            return true;
        }
        let Some(resolved) = self.resolve_attr_var(req_doc, req, req_s) else {
            return false;
        };

        let mut r: &str = &resolved;
        match parse_op(&mut r) {
            Op::None => r.trim_start() == res_s,
            Op::Ne => r.trim_start() != res_s,
            _ => {
                let n = req_doc.node(req);
                tela_cli_common::warn_pos(
                    &n.filename,
                    n.lineno,
                    "Operator unsupported for scalar type",
                );
                req_s == res_s
            }
        }
    }

    fn match_seq(
        &mut self,
        req_doc: &Document,
        req_list: &[NodeId],
        res_doc: &Document,
        res_list: &[NodeId],
    ) -> bool {
        /* Match if all elements in the requirement sequence have identical
         * counterparts in the resource sequence. */
        for &req_el in req_list {
            let req_children: Vec<NodeId> = req_doc.children(req_el).to_vec();
            let found = res_list.iter().any(|&res_el| {
                let res_children: Vec<NodeId> = res_doc.children(res_el).to_vec();
                self.match_value(req_doc, &req_children, res_doc, &res_children)
            });
            if !found {
                return false;
            }
            if let Some(md) = self.req_md.get_mut(req_el) {
                md.num_matched += 1;
            }
        }
        true
    }

    /// Check if a resource content chain fulfills a requirement content
    /// chain. The comparison rule is selected by the requirement head's
    /// registered type.
    fn match_value(
        &mut self,
        req_doc: &Document,
        req_list: &[NodeId],
        res_doc: &Document,
        res_list: &[NodeId],
    ) -> bool {
        let Some(&req_head) = req_list.first() else {
            return true;
        };
        let Some(&res_head) = res_list.first() else {
            return false;
        };

        let resolved = self
            .req_md
            .get(req_head)
            .and_then(|md| md.resolved)
            .unwrap_or(ResolvedType::Unknown);

        let result = match resolved {
            ResolvedType::Object | ResolvedType::Map => {
                self.match_objects(req_doc, req_list, res_doc, res_list)
            }
            ResolvedType::Number => self.match_number(req_doc, req_head, res_doc, res_head),
            ResolvedType::Version => self.match_version(req_doc, req_head, res_doc, res_head),
            ResolvedType::Scalar => self.match_scalar(req_doc, req_head, res_doc, res_head),
            ResolvedType::Seq => self.match_seq(req_doc, req_list, res_doc, res_list),
            ResolvedType::Unknown => false,
        };

        if result {
            if let Some(md) = self.req_md.get_mut(req_head) {
                md.num_matched += 1;
            }
        }
        result
    }

    /// Compare two single-value documents using the requirement head's
    /// registered comparison rule (the `eval` subcommand entry point).
    pub fn eval_scalars(&mut self, req: &Document, res: &Document) -> bool {
        let req_root: Vec<NodeId> = req.root().to_vec();
        let res_root: Vec<NodeId> = res.root().to_vec();
        self.match_value(req, &req_root, res, &res_root)
    }

    fn first_res(
        &self,
        res_doc: &Document,
        res_list: &[NodeId],
        req_doc: &Document,
        req: NodeId,
    ) -> Option<NodeId> {
        let req_local = is_syslocal(req_doc, req);
        res_list.iter().copied().find(|&n| {
            match_type(res_doc.key(n), req_doc.key(req)) && is_syslocal(res_doc, n) == req_local
        })
    }

    fn next_res(&self, res: NodeId) -> Option<NodeId> {
        self.res_md.get(res).and_then(|md| md.next_compat)
    }

    fn assign(&mut self, req: NodeId, res: NodeId) {
        if let Some(md) = self.req_md.get_mut(req) {
            md.res.push(res);
        }
        if let Some(md) = self.res_md.get_mut(res) {
            md.assigned = true;
        }
    }

    /// Undo the assignments of `req` and all its children, including any
    /// attribute variables they bound.
    fn unassign(&mut self, req_doc: &Document, req: NodeId) {
        if let Some(md) = self.req_md.get_mut(req) {
            for res in std::mem::take(&mut md.res) {
                if let Some(res_md) = self.res_md.get_mut(res) {
                    res_md.assigned = false;
                }
            }
        }
        self.del_vars(req);
        let children: Vec<NodeId> = req_doc.children(req).to_vec();
        for child in children {
            self.unassign(req_doc, child);
        }
    }

    fn unassign_children(&mut self, req_doc: &Document, req: NodeId) {
        let children: Vec<NodeId> = req_doc.children(req).to_vec();
        for child in children {
            self.unassign(req_doc, child);
        }
    }

    /// Try to find a matching object in `res_list` for every object in
    /// `req_list`, backtracking over earlier assignments when a later
    /// requirement cannot be fulfilled.
    pub fn match_objects(
        &mut self,
        req_doc: &Document,
        req_list: &[NodeId],
        res_doc: &Document,
        res_list: &[NodeId],
    ) -> bool {
        let mut idx = 0;
        /* Candidate to resume from after backtracking. */
        let mut resume: Option<Option<NodeId>> = None;

        while idx < req_list.len() {
            let req = req_list[idx];
            if is_wildcard(req_doc, req) {
                /* Simplify wildcard requirement matching by first
                 * fulfilling non-wildcard requirements. */
                idx += 1;
                resume = None;
                continue;
            }

            let mut cand = match resume.take() {
                Some(c) => c,
                None => self.first_res(res_doc, res_list, req_doc, req),
            };

            /* Find a free resource object that fulfills the requirement. */
            let found = loop {
                let Some(c) = cand else { break None };
                let free = self.res_md.get(c).is_none_or(|md| !md.assigned);
                if free {
                    let req_children: Vec<NodeId> = req_doc.children(req).to_vec();
                    let res_children: Vec<NodeId> = res_doc.children(c).to_vec();
                    if self.match_value(req_doc, &req_children, res_doc, &res_children) {
                        break Some(c);
                    }
                    /* Clear partial assignments of the failed attempt. */
                    self.unassign_children(req_doc, req);
                }
                cand = self.next_res(c);
            };

            if let Some(res) = found {
                trace!(req = ?self.req_md.get(req).map(|m| &m.path), "assigned");
                self.assign(req, res);
                if let Some(md) = self.req_md.get_mut(req) {
                    md.num_matched += 1;
                }
                idx += 1;
                continue;
            }

            /* No match - go back to the previous assigned requirement. */
            let mut j = idx;
            let prev = loop {
                if j == 0 {
                    break None;
                }
                j -= 1;
                let assigned = self
                    .req_md
                    .get(req_list[j])
                    .is_some_and(|md| !md.res.is_empty());
                if assigned {
                    break Some(req_list[j]);
                }
            };

            match prev {
                Some(prev_req) => {
                    let prev_res = self.req_md[prev_req].res[0];
                    trace!("backtrack");
                    self.unassign(req_doc, prev_req);
                    resume = Some(self.next_res(prev_res));
                    idx = j;
                }
                None => {
                    /* No match after checking all combinations. */
                    return false;
                }
            }
        }

        /* Assign remaining unassigned objects to wildcard requirements. */
        for &req in req_list {
            if !is_wildcard(req_doc, req) {
                continue;
            }
            let mut cand = self.first_res(res_doc, res_list, req_doc, req);
            while let Some(c) = cand {
                let free = self.res_md.get(c).is_none_or(|md| !md.assigned);
                if free {
                    let req_children: Vec<NodeId> = req_doc.children(req).to_vec();
                    let res_children: Vec<NodeId> = res_doc.children(c).to_vec();
                    if self.match_value(req_doc, &req_children, res_doc, &res_children) {
                        self.assign(req, c);
                        if let Some(md) = self.req_md.get_mut(req) {
                            md.num_matched += 1;
                        }
                    } else {
                        self.unassign_children(req_doc, req);
                    }
                }
                cand = self.next_res(c);
            }
        }

        true
    }

    fn lowest_match(&self, req_doc: &Document, ids: &[NodeId], mut lowest: Option<NodeId>) -> Option<NodeId> {
        for &id in ids {
            /* Disregard wildcard requirements as they match even with no
             * assigned resource. */
            if is_wildcard(req_doc, id) {
                continue;
            }
            /* Depth-first search required to find the cause of the
             * non-match. */
            let children: Vec<NodeId> = req_doc.children(id).to_vec();
            lowest = self.lowest_match(req_doc, &children, lowest);

            let count = self.req_md.get(id).map_or(0, |md| md.num_matched);
            let lowest_count = lowest
                .and_then(|l| self.req_md.get(l))
                .map_or(u32::MAX, |md| md.num_matched);
            if lowest.is_none() || count < lowest_count {
                lowest = Some(id);
            }
        }
        lowest
    }

    /// Describe the requirement that had the fewest matches.
    pub fn reason(&self, req_doc: &Document) -> String {
        let Some(node) = self.lowest_match(req_doc, req_doc.root(), None) else {
            return "Missing requirement".to_string();
        };
        let md = &self.req_md[node];
        let mut path = md.path.as_str();

        if req_doc.root().len() == 1 {
            /* Single system requirement - shorten path for readability. */
            if let Some(pos) = path.find('/') {
                path = &path[pos + 1..];
            }
        }
        let path = decode_path(path.trim_end_matches('/'));

        match req_doc.scalar(node) {
            /* Return content for simple requirements. */
            Some(content) => format!("Missing {path}: {content}"),
            None => format!("Missing {path}"),
        }
    }

    /// Convert data about matched requirements to `KEY=VALUE` environment
    /// strings.
    pub fn to_env(&self, req_doc: &Document, res_doc: &Document) -> Vec<String> {
        let mut env = Vec::new();
        self.add_env(&mut env, req_doc, res_doc, req_doc.root(), "TELA", true);
        env
    }

    fn add_env(
        &self,
        env: &mut Vec<String>,
        req_doc: &Document,
        res_doc: &Document,
        ids: &[NodeId],
        parent: &str,
        req_side: bool,
    ) {
        for &id in ids {
            self.one_env(env, req_doc, res_doc, id, parent, req_side);
        }
    }

    fn one_env(
        &self,
        env: &mut Vec<String>,
        req_doc: &Document,
        res_doc: &Document,
        id: NodeId,
        parent: &str,
        req_side: bool,
    ) {
        let doc = if req_side { req_doc } else { res_doc };
        let md = if req_side {
            self.req_md.get(id)
        } else {
            self.res_md.get(id)
        };
        let Some(md) = md else { return };

        if !req_side && self.registry.is_object(&md.path) {
            /* Handled via the assigned object. */
            return;
        }

        /* Environment variable prefix for this node. */
        let prefix = match doc.key(id) {
            Some(key) => extend_prefix(parent, key, !md.noupper),
            None => parent.to_string(),
        };

        if req_side && !md.res.is_empty() {
            let wildcard = is_wildcard(doc, id);
            for (i, &res_node) in md.res.iter().enumerate() {
                let one_prefix = if wildcard {
                    format!("{prefix}_{i}")
                } else {
                    prefix.clone()
                };

                /* Emit a variable for each assigned object plus variables
                 * for its contents. */
                if let Some(object_id) = res_doc.key(res_node).and_then(|k| k.split_once(' ')) {
                    env.push(format!("{one_prefix}={}", object_id.1));
                    let res_children: Vec<NodeId> = res_doc.children(res_node).to_vec();
                    self.add_env(env, req_doc, res_doc, &res_children, &one_prefix, false);
                }
            }
        }

        match doc.kind(id) {
            NodeKind::Scalar(content) => {
                if !req_side {
                    env.push(format!("{prefix}={content}"));
                }
            }
            NodeKind::Seq(_) | NodeKind::Map { .. } => {
                let children: Vec<NodeId> = doc.children(id).to_vec();
                self.add_env(env, req_doc, res_doc, &children, &prefix, req_side);
            }
        }
    }

    /// Convert the resource document into the reduced matched-resource
    /// document: unmatched objects are removed, matched objects are renamed
    /// to the requirement-side names and gain an `_id` attribute holding
    /// the resource-side identifier.
    pub fn into_match_doc(self, req_doc: &Document, res_doc: &mut Document) {
        /* Anything that was not matched is not relevant for the test
         * program. */
        let registry = self.registry;
        let res_md = &self.res_md;
        traverse(res_doc, &mut |_doc, iter| {
            let assigned = res_md.get(iter.node).is_some_and(|md| md.assigned);
            if !assigned && registry.is_object(&iter.path) {
                Visit::Delete
            } else {
                Visit::Continue
            }
        });

        /* Rename matched objects to the names expected by the test
         * program, expanding wildcard requirement names. */
        for (req_node, md) in &self.req_md {
            if !registry.is_object(&md.path) {
                continue;
            }
            let Some(req_key) = req_doc.key(req_node) else {
                continue;
            };
            for (i, &res_node) in md.res.iter().enumerate() {
                if !res_doc.node_exists(res_node) {
                    continue;
                }
                let id = res_doc
                    .key(res_node)
                    .and_then(|k| k.split_once(' '))
                    .map(|(_, id)| id.to_string());
                if let Some(id) = id {
                    /* Insert the object ID as first attribute. */
                    let filename = res_doc.node(res_node).filename.clone();
                    let lineno = res_doc.node(res_node).lineno;
                    let scalar = res_doc.alloc(NodeKind::Scalar(id), &filename, lineno);
                    let id_attr = res_doc.alloc(
                        NodeKind::Map {
                            key: "_id".to_string(),
                            value: vec![scalar],
                        },
                        &filename,
                        lineno,
                    );
                    if let Some(children) = res_doc.children_mut(res_node) {
                        children.insert(0, id_attr);
                    }
                }
                res_doc.set_key(res_node, reskey(req_key, i));
            }
        }
    }
}

/// `type id/type id/type => TYPE_ID_TYPE_ID_TYPE`
fn extend_prefix(parent: &str, key: &str, upper: bool) -> String {
    let value = sys_short(key);
    let value = value.strip_suffix(" *").unwrap_or(value);

    let mut component: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if upper {
        component = component.to_ascii_uppercase();
    }

    if parent.is_empty() {
        component
    } else {
        format!("{parent}_{component}")
    }
}

/// Key for an object that matches a requirement with the given key, with
/// the wildcard character replaced by the instance number.
fn reskey(req_key: &str, num: usize) -> String {
    let key = sys_short(req_key);
    match key.strip_suffix('*') {
        Some(stem) => format!("{stem}{num}"),
        None => key.to_string(),
    }
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

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.add("*/disk *", AttrKind::Object, false, false);
        r.add("*/disk */size/", AttrKind::Number, false, false);
        r.add("*/dasd *", AttrKind::Object, false, false);
        r.add("*/dasd */size/", AttrKind::Number, false, false);
        r
    }

    fn run_match(
        registry: &TypeRegistry,
        req: &Document,
        res: &Document,
    ) -> (bool, Vec<String>, String) {
        let mut m = Matcher::new(registry, req, res);
        let matched = m.match_objects(req, req.root(), res, res.root());
        let env = if matched {
            m.to_env(req, res)
        } else {
            Vec::new()
        };
        let reason = if matched {
            String::new()
        } else {
            m.reason(req)
        };
        (matched, env, reason)
    }

    #[test]
    fn env_naming_for_matched_object() {
        let registry = registry();
        let req = doc("system localhost:\n  disk my_d:\n    size: \"1G\"\n");
        let res = doc("system localhost:\n  disk 0.0.100:\n    size: \"2G\"\n");
        let (matched, env, _) = run_match(&registry, &req, &res);
        assert!(matched);
        assert_eq!(
            env,
            vec![
                "TELA_SYSTEM=localhost".to_string(),
                "TELA_SYSTEM_DISK_MY_D=0.0.100".to_string(),
                "TELA_SYSTEM_DISK_MY_D_SIZE=2G".to_string(),
            ]
        );
    }

    #[test]
    fn backtracking_finds_valid_assignment() {
        let registry = registry();
        /* Greedy first-fit would bind d1 to disk a and leave nothing large
         * enough for d2. */
        let req = doc(
            "system localhost:\n  disk d1:\n    size: \">= 1G\"\n  disk d2:\n    size: \">= 2G\"\n",
        );
        let res =
            doc("system localhost:\n  disk a:\n    size: \"1G\"\n  disk b:\n    size: \"2G\"\n");
        let (matched, env, _) = run_match(&registry, &req, &res);
        assert!(matched);
        assert!(env.contains(&"TELA_SYSTEM_DISK_D1=a".to_string()), "{env:?}");
        assert!(env.contains(&"TELA_SYSTEM_DISK_D2=b".to_string()), "{env:?}");
    }

    #[test]
    fn wildcard_enumerates_in_insertion_order() {
        let registry = registry();
        let req = doc("system localhost:\n  disk *:\n");
        let res = doc("system localhost:\n  disk a:\n  disk b:\n");
        let (matched, env, _) = run_match(&registry, &req, &res);
        assert!(matched);
        assert!(env.contains(&"TELA_SYSTEM_DISK_0=a".to_string()), "{env:?}");
        assert!(env.contains(&"TELA_SYSTEM_DISK_1=b".to_string()), "{env:?}");
    }

    #[test]
    fn adding_a_resource_preserves_match() {
        let registry = registry();
        let req = doc("system localhost:\n  disk d1:\n    size: \">= 1G\"\n");
        let res = doc("system localhost:\n  disk a:\n    size: \"2G\"\n");
        assert!(run_match(&registry, &req, &res).0);

        let bigger =
            doc("system localhost:\n  disk a:\n    size: \"2G\"\n  disk z:\n    size: \"8G\"\n");
        assert!(run_match(&registry, &req, &bigger).0);
    }

    #[test]
    fn failed_match_reports_fewest_matches() {
        let registry = registry();
        let req = doc("system localhost:\n  disk d1:\n    size: \">= 9G\"\n");
        let res = doc("system localhost:\n  disk a:\n    size: \"1G\"\n");
        let (matched, _, reason) = run_match(&registry, &req, &res);
        assert!(!matched);
        assert!(reason.starts_with("Missing disk d1"), "{reason}");
    }

    #[test]
    fn attribute_variables_correlate_objects() {
        let registry = registry();
        let req = doc(
            "system localhost:\n  disk d1:\n    size: \"%{s}\"\n  disk d2:\n    size: \"%{s}\"\n",
        );
        let res =
            doc("system localhost:\n  disk a:\n    size: \"1G\"\n  disk b:\n    size: \"2G\"\n");
        let (matched, env, _) = run_match(&registry, &req, &res);
        /* d1 binds %{s} to 1G; d2 must then find another disk with the
         * same size - none exists, but backtracking rebinding d1 to b
         * cannot help either, so the match fails. */
        assert!(!matched, "{env:?}");
    }

    #[test]
    fn match_doc_renames_and_injects_id() {
        let registry = registry();
        let req = doc("system localhost:\n  disk my_d:\n    size: \"1G\"\n");
        let mut res = doc(
            "system localhost:\n  disk 0.0.100:\n    size: \"1G\"\n  disk 0.0.200:\n    size: \"9G\"\n",
        );
        let mut m = Matcher::new(&registry, &req, &res);
        assert!(m.match_objects(&req, req.root(), &res, res.root()));
        m.into_match_doc(&req, &mut res);

        let mut out = Vec::new();
        tela_yaml::write_doc(&res, &mut out, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("disk my_d:\n"), "{text}");
        assert!(text.contains("_id: 0.0.100"), "{text}");
        assert!(!text.contains("0.0.200"), "{text}");
    }

    #[test]
    fn number_scaling() {
        let registry = TypeRegistry::new();
        let req = doc("\">=1gi\"");
        let res = doc("\"1073741824\"");
        let mut m = Matcher::new(&registry, &req, &res);
        assert!(m.match_number(&req, req.root()[0], &res, res.root()[0]));

        let req = doc("\">=1g\"");
        let res = doc("\"999999999\"");
        let mut m = Matcher::new(&registry, &req, &res);
        assert!(!m.match_number(&req, req.root()[0], &res, res.root()[0]));
    }

    #[test]
    fn version_ordering() {
        let registry = TypeRegistry::new();
        let cases = [
            ("<=2.3", "2.3", true),
            ("<=2.3", "2.3.1", false),
            ("<2.3.a", "2.3.b", true),
            ("4.17", "4.17.0-rc1", false),
            ("!=1.2", "1.3", true),
        ];
        for (req_s, res_s, expected) in cases {
            let req = doc(&format!("\"{req_s}\""));
            let res = doc(&format!("\"{res_s}\""));
            let mut m = Matcher::new(&registry, &req, &res);
            assert_eq!(
                m.match_version(&req, req.root()[0], &res, res.root()[0]),
                expected,
                "{req_s} vs {res_s}"
            );
        }
    }
}
