use std::path::Path;

use tela_cli_common::warn_pos;
use tela_yaml::Document;

/// Configuration from the YAML file next to a test executable.
#[derive(Debug, Default)]
pub struct TestConfig {
    /// Number of tests the executable implements, or -1 if unknown.
    pub plan: i32,
    /// Test wants to store large amounts of data in `TELA_TMP`.
    pub large_temp: bool,
    /// Plan mapping of sub-test names to descriptions, if given.
    pub desc: Option<Document>,
}

fn atoi(s: &str) -> i32 {
    let t = s.trim_start();
    let (sign, t) = match t.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, t.strip_prefix('+').unwrap_or(t)),
    };
    let digits: String = t.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<i32>().map_or(0, |v| sign * v)
}

/// Extract the test configuration from a parsed config document.
pub fn parse_config(root: Option<&Document>) -> TestConfig {
    let mut cfg = TestConfig {
        plan: -1,
        large_temp: false,
        desc: None,
    };
    let Some(root) = root else { return cfg };

    let Some(test) = root.get_node("test") else {
        return cfg;
    };

    /*
     * plan
     *   Number of tests implemented by the executable, or a mapping of
     *   test names to descriptions.
     */
    if let Some(plan) = root.get_node("test/plan") {
        let value: Vec<_> = root.children(plan).to_vec();
        match value.first() {
            Some(&head) if root.scalar(head).is_some() => {
                cfg.plan = atoi(root.scalar(head).unwrap_or_default());
            }
            Some(&head) if root.key(head).is_some() => {
                cfg.plan = i32::try_from(value.len()).unwrap_or(i32::MAX);
                let mut desc = Document::new();
                let imported = desc.import_list(root, &value);
                for id in imported {
                    desc.append_root(id);
                }
                cfg.desc = Some(desc);
            }
            Some(&head) => {
                let node = root.node(head);
                warn_pos(
                    &node.filename,
                    node.lineno,
                    "Wrong type, expect either mapping or scalar",
                );
            }
            None => {
                let node = root.node(plan);
                warn_pos(&node.filename, node.lineno, "Plan is defined but empty");
            }
        }
        root.set_handled_deep(plan);
    }

    /*
     * large_temp: 0|1
     *   If 1, test wants to store large amounts of data in TELA_TMP.
     */
    match root.get_scalar("test/large_temp") {
        Ok(Some(v)) => cfg.large_temp = atoi(v) != 0,
        Ok(None) => {}
        Err(issue) => warn_pos(&issue.filename, issue.lineno, &issue.message),
    }

    /* The test section should not contain anything else. */
    for &child in root.children(test) {
        report_unhandled(root, child);
    }

    cfg
}

fn report_unhandled(doc: &Document, id: tela_yaml::NodeId) {
    if doc.handled(id) {
        for &child in doc.children(id) {
            report_unhandled(doc, child);
        }
    } else {
        let node = doc.node(id);
        warn_pos(&node.filename, node.lineno, "Unhandled entry");
    }
}

/// Read the configuration next to a test executable (`<exec>.yaml`).
pub fn read_config(path: &Path) -> TestConfig {
    let parsed = tela_yaml::parse_file(path);
    for issue in &parsed.issues {
        warn_pos(&issue.filename, issue.lineno, &issue.message);
    }
    parse_config(parsed.doc.as_ref())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tela_yaml::parse_str;

    fn cfg(text: &str) -> TestConfig {
        let doc = parse_str("<cfg>", text).doc;
        parse_config(doc.as_ref())
    }

    #[test]
    fn missing_config_defaults() {
        let c = parse_config(None);
        assert_eq!(c.plan, -1);
        assert!(!c.large_temp);
        assert!(c.desc.is_none());
    }

    #[test]
    fn scalar_plan() {
        let c = cfg("test:\n  plan: 3\n");
        assert_eq!(c.plan, 3);
        assert!(c.desc.is_none());
    }

    #[test]
    fn mapping_plan_counts_and_keeps_descriptions() {
        let c = cfg("test:\n  plan:\n    first: checks setup\n    second: checks teardown\n");
        assert_eq!(c.plan, 2);
        let desc = c.desc.unwrap();
        assert_eq!(desc.get_scalar("first"), Ok(Some("checks setup")));
        assert_eq!(desc.get_scalar("second"), Ok(Some("checks teardown")));
    }

    #[test]
    fn large_temp_flag() {
        assert!(cfg("test:\n  plan: 1\n  large_temp: 1\n").large_temp);
        assert!(!cfg("test:\n  plan: 1\n  large_temp: 0\n").large_temp);
    }

    #[test]
    fn non_scalar_large_temp_is_ignored() {
        /* The mapping value produces a warning and no flag change. */
        let c = cfg("test:\n  plan: 1\n  large_temp:\n    nested: 1\n");
        assert!(!c.large_temp);
    }

    #[test]
    fn config_without_test_section() {
        let c = cfg("system localhost:\n  mem: 1G\n");
        assert_eq!(c.plan, -1);
    }
}
