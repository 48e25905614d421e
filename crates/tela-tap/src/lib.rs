#![doc = include_str!("../README.md")]

use std::io::Write;

use tela_record::RecResult;
use tela_yaml::Document;

pub const TAP13_HEADER: &str = "TAP version 13\n";
pub const WARN_PREFIX: &str = "WARNING:";

/// Outcome of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
    Todo,
}

impl TestResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TestResult::Pass => "pass",
            TestResult::Fail => "fail",
            TestResult::Skip => "skip",
            TestResult::Todo => "todo",
        }
    }
}

/// A parsed `ok`/`not ok` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLine {
    pub name: Option<String>,
    /// Test number, or -1 if the line carried none.
    pub num: i32,
    pub result: TestResult,
    pub reason: Option<String>,
}

/// Write the TAP13 header.
pub fn write_header<W: Write>(w: &mut W) -> std::io::Result<()> {
    write!(w, "{TAP13_HEADER}")
}

/// Write a `1..N` plan line. Plans of zero or less are suppressed.
pub fn write_plan<W: Write>(w: &mut W, plan: i32) -> std::io::Result<()> {
    if plan > 0 {
        writeln!(w, "1..{plan}")?;
    }
    Ok(())
}

/// Write a canonical result line.
pub fn write_line<W: Write>(
    w: &mut W,
    num: i32,
    name: &str,
    result: TestResult,
    reason: Option<&str>,
) -> std::io::Result<()> {
    let reason = reason.unwrap_or("");
    match result {
        TestResult::Pass | TestResult::Fail => {
            let lead = if result == TestResult::Pass {
                "ok    "
            } else {
                "not ok"
            };
            write!(w, "{lead} {num} - {name}")?;
            if !reason.is_empty() {
                write!(w, " # {reason}")?;
            }
            writeln!(w)
        }
        TestResult::Skip => writeln!(w, "ok     {num} - {name} # SKIP {reason}"),
        TestResult::Todo => writeln!(w, "not ok {num} - {name} # TODO {reason}"),
    }
}

/// Parse a `1..N` plan line.
pub fn parse_plan(line: &str) -> Option<i32> {
    let rest = line.strip_prefix("1..")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse an `ok`/`not ok` result line into its parts. Lines with an unknown
/// directive are rejected.
pub fn parse_result_line(line: &str) -> Option<ResultLine> {
    let (ok, mut s) = if let Some(rest) = line.strip_prefix("not ok") {
        (false, rest)
    } else if let Some(rest) = line.strip_prefix("ok") {
        (true, rest)
    } else {
        return None;
    };
    s = s.trim_start();

    /* [<number>] */
    let mut num = -1;
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
        num = digits.parse().unwrap_or(-1);
        s = s[digits.len()..].trim_start();
    }

    /* ["-"] */
    if let Some(rest) = s.strip_prefix('-') {
        s = rest.trim_start();
    }

    /* [<description>] ["#" <directive> [<reason>]] */
    let (desc_part, directive_part) = match s.split_once('#') {
        Some((d, r)) => (d, Some(r)),
        None => (s, None),
    };
    let name = {
        let desc = desc_part.trim();
        (!desc.is_empty()).then(|| desc.to_string())
    };

    let mut directive = None;
    let mut reason = None;
    if let Some(rest) = directive_part {
        let rest = rest.trim_start();
        let lower = rest.to_ascii_lowercase();
        if lower.starts_with("skip") || lower.starts_with("todo") {
            let word_end = rest
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(rest.len());
            directive = Some(rest[..word_end].to_string());
            let tail = rest[word_end..].trim();
            if !tail.is_empty() {
                reason = Some(tail.to_string());
            }
        } else {
            /* Assume reason without directive. */
            let tail = rest.trim();
            if !tail.is_empty() {
                reason = Some(tail.to_string());
            }
        }
    }

    let result = match directive.as_deref() {
        None => {
            if ok {
                TestResult::Pass
            } else {
                TestResult::Fail
            }
        }
        Some(d) if d.eq_ignore_ascii_case("skip") => TestResult::Skip,
        Some(d) if d.eq_ignore_ascii_case("todo") => TestResult::Todo,
        Some(_) => return None,
    };

    Some(ResultLine {
        name,
        num,
        result,
        reason,
    })
}

/// Check for a `Bail out!` line.
pub fn parse_bail(line: &str) -> bool {
    line.starts_with("Bail out!")
}

/// Extract the message of a `# WARNING:` diagnostic line.
pub fn parse_warning(line: &str) -> Option<&str> {
    line.strip_prefix("# WARNING:").map(str::trim_start)
}

/// Replace invalid characters in a test name. Valid characters are
/// `[A-Za-z0-9._-]`; a run of invalid characters becomes a single `_`,
/// leading and trailing runs are dropped.
pub fn fix_testname(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            if pending {
                if !out.is_empty() && !out.ends_with('_') {
                    out.push('_');
                }
                pending = false;
            }
            out.push(c);
        } else {
            pending = true;
        }
    }
    out
}

/// Write one result line plus its structured YAML block.
///
/// `testrexec` prefixes the name in the result line (`rexec:name`); `desc`
/// is the plan mapping providing per-test descriptions; `rec` supplies exit
/// status, timing, rusage and captured output.
#[allow(clippy::too_many_arguments)]
pub fn write_result<W: Write>(
    w: &mut W,
    name: &str,
    testexec: &str,
    num: i32,
    result: TestResult,
    reason: Option<&str>,
    rec: Option<&mut RecResult>,
    desc: Option<&Document>,
    testrexec: Option<&str>,
) -> std::io::Result<()> {
    /* Look up the description first so its warning cannot land inside the
     * YAML block below. */
    let desc_text = match desc {
        Some(desc) => match desc.get_scalar(name) {
            Ok(text) => text,
            Err(issue) => {
                tela_cli_common::warn_pos(&issue.filename, issue.lineno, &issue.message);
                None
            }
        },
        None => None,
    };

    let full_name = match testrexec {
        Some(rexec) => format!("{rexec}:{name}"),
        None => name.to_string(),
    };
    write_line(w, num, &full_name, result, reason)?;

    writeln!(w, "  ---")?;
    if let Some(text) = desc_text {
        writeln!(w, "  desc: \"{}\"", tela_yaml::quote(text))?;
    }
    writeln!(w, "  testresult: \"{}\"", result.as_str())?;
    if let Some(reason) = reason {
        writeln!(w, "  reason: \"{reason}\"")?;
    }
    writeln!(w, "  testexec: \"{testexec}\"")?;
    if let Some(rec) = rec {
        tela_record::print_result(w, rec, 2)?;
    }
    writeln!(w, "  ...")
}

/// Write results for every planned test that was not reported yet.
///
/// With no plan, a single result named after `testrexec` is written. With a
/// plan mapping, one result per unhandled entry is written (an entry named
/// exactly like `testrexec` in a single-test plan drops the prefix), and
/// any numeric shortfall is filled with `missing_name_<i>` entries.
#[allow(clippy::too_many_arguments)]
pub fn write_all_results<W: Write>(
    w: &mut W,
    testexec: &str,
    result: TestResult,
    reason: Option<&str>,
    mut rec: Option<&mut RecResult>,
    testrexec: &str,
    desc: Option<&Document>,
    num: i32,
    plan: i32,
) -> std::io::Result<()> {
    /* Log single result with executable name in case of no plan. */
    if plan == -1 {
        return write_result(
            w,
            testrexec,
            testexec,
            num,
            result,
            reason,
            rec.as_deref_mut(),
            desc,
            None,
        );
    }

    let mut i = num;
    if let Some(desc_doc) = desc {
        for &node in desc_doc.root() {
            if desc_doc.handled(node) {
                continue;
            }
            let Some(name) = desc_doc.key(node).map(str::to_string) else {
                continue;
            };

            /* Treat plan with single entry named after exec as simple
             * test. */
            let base = !(plan == 1 && name == testrexec);

            write_result(
                w,
                &name,
                testexec,
                i + 1,
                result,
                reason,
                rec.as_deref_mut(),
                desc,
                base.then_some(testrexec),
            )?;
            desc_doc.mark_handled(node);
            i += 1;
        }
    }

    while i < plan {
        let name = format!("missing_name_{}", i + 1);
        write_result(
            w,
            &name,
            testexec,
            i + 1,
            result,
            reason,
            rec.as_deref_mut(),
            desc,
            Some(testrexec),
        )?;
        i += 1;
    }

    Ok(())
}
