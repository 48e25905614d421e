use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tela_cli_common::{cleanup, context, paths, shell, warn_pos};
use tela_record::{ProcStatus, RecResult, Scope, Stream};
use tela_resource::Resolution;
use tela_tap::TestResult;
use tela_yaml::Document;
use tracing::debug;

use crate::config::read_config;
use crate::runlog::RunLog;

/// Per-test context for one `run` invocation.
struct RunData {
    check_done: bool,
    is_tap13: bool,
    num: i32,
    plan: i32,
    large_temp: bool,
    exec: PathBuf,
    exec_dir: PathBuf,
    rexec: String,
    last_stderr: Option<String>,
    env: Vec<String>,
    desc: Option<Document>,
    matchfile: Option<PathBuf>,
    runlog: RunLog,
}

fn stdout_flush() {
    let _ = std::io::stdout().flush();
}

/// Read `KEY=VALUE` lines (shell double-quote escaped) from a pre-resolved
/// match environment file.
fn read_file_to_env(filename: &str) -> anyhow::Result<Vec<String>> {
    let file = std::fs::File::open(filename)
        .with_context(|| format!("Could not open file '{filename}'"))?;
    let mut env = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        env.push(format!("{key}={}", shell::unescape_double(value)));
    }
    Ok(env)
}

/// Prepare per-test data. Returns the skip reason when the test's resource
/// requirements could not be resolved.
fn prepare_data(
    exec: &str,
    matchenv: Option<&str>,
    matcherr: Option<&str>,
) -> anyhow::Result<(RunData, Option<String>)> {
    let exec_path = paths::abspath(Path::new(exec))
        .with_context(|| format!("Could not determine path to command '{exec}'"))?;
    let exec_dir = exec_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let rexec = paths::relpath(&exec_path.to_string_lossy(), None);

    /* Test configuration lives next to the executable. */
    let reqfile = format!("{}.yaml", exec_path.display());
    let cfg = read_config(Path::new(&reqfile));

    let mut data = RunData {
        check_done: false,
        is_tap13: false,
        num: 0,
        plan: cfg.plan,
        large_temp: cfg.large_temp,
        exec: exec_path,
        exec_dir,
        rexec,
        last_stderr: None,
        env: Vec::new(),
        desc: cfg.desc,
        matchfile: None,
        runlog: RunLog::disabled(),
    };

    /* Get environment variables describing requested resources. */
    let mut reason = None;
    if let Some(err) = matcherr {
        reason = Some(err.to_string());
    } else if let Some(matchenv) = matchenv {
        data.env = read_file_to_env(matchenv)?;
    } else {
        let resfile = tela_resource::get_resource_path().map_err(anyhow::Error::new)?;
        let resolution = tela_resource::resolve(
            &reqfile,
            resfile.as_deref().map(|p| p.to_str().unwrap_or("")),
            true,
            true,
            true,
        )
        .map_err(anyhow::Error::new)?;
        match resolution {
            Resolution::Match { env, matchfile } => {
                data.env = env;
                data.matchfile = matchfile;
            }
            Resolution::NoMatch { reason: r } => reason = Some(r),
        }
    }

    if let Ok(logfile) = std::env::var("TELA_RUNLOG") {
        if !logfile.is_empty() {
            data.runlog = RunLog::open(Path::new(&logfile), &data.exec.to_string_lossy())
                .with_context(|| format!("Could not write to runlog file: {logfile}"))?;
        }
    }

    Ok((data, reason))
}

/// Determine `TELA_OS_ID` and `TELA_OS_VERSION` from the cached `TELA_OS`
/// value or the OS identification script.
fn set_osid() {
    let mut id = String::new();
    let mut version = String::new();

    if let Ok(cached) = std::env::var("TELA_OS") {
        let tokens: Vec<&str> = cached.split_whitespace().collect();
        if let ["os:", "id:", id_v, "version:", version_v] = tokens.as_slice() {
            id = (*id_v).to_string();
            version = (*version_v).to_string();
        }
    }

    if id.is_empty() || version.is_empty() {
        if let Some(output) = paths::internal_cmd("", "os", &[]) {
            for line in output.as_slice().lines().map_while(Result::ok) {
                let line = line.trim();
                if let Some(v) = line.strip_prefix("id:") {
                    id = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("version:") {
                    version = v.trim().to_string();
                }
            }
        }
    }

    if id.is_empty() || version.is_empty() {
        tela_cli_common::warn("Could not determine OS level");
    } else {
        set_env("TELA_OS_ID", &id);
        set_env("TELA_OS_VERSION", &version);
    }
}

fn set_env(key: &str, value: &str) {
    // SAFETY: the run pipeline mutates the environment before spawning the
    // test child and does not run concurrent threads at this point.
    unsafe { std::env::set_var(key, value) };
}

fn setup_env(tmpdir: &Path, data: &RunData) {
    set_osid();
    set_env("TELA_TMP", &tmpdir.to_string_lossy());
    set_env("TELA_EXEC", &data.exec.to_string_lossy());
    for entry in &data.env {
        if let Some((key, value)) = entry.split_once('=') {
            set_env(key, value);
        }
    }
    if let Some(matchfile) = &data.matchfile {
        set_env("TELA_RESOURCE_FILE", &matchfile.to_string_lossy());
    }
}

/// Parse testexec TAP output into canonical form.
fn handle_tap_line(data: &mut RunData, line: &str, stream_name: &str) {
    let exec = data.exec.to_string_lossy().to_string();

    if stream_name != "stdout" {
        /* A harness must only read TAP output from standard output. */
        warn_pos(&exec, 0, line);
    } else if line.starts_with("TAP ") {
        /* Filter out TAP header echo. */
    } else if let Some(num) = tela_tap::parse_plan(line) {
        /* Got a test plan. */
        if data.plan != -1 {
            if data.plan != num {
                warn_pos(
                    &exec,
                    0,
                    &format!(
                        "Plan in TAP output ({num}) does not match expected plan ({})",
                        data.plan
                    ),
                );
            }
        } else {
            print!("{line}");
            data.plan = num;
        }
    } else if let Some(parsed) = tela_tap::parse_result_line(line) {
        /* Got a test result line - convert to canonical form. */
        data.num += 1;
        let name = match parsed.name {
            Some(raw) => {
                let fixed = tela_tap::fix_testname(&raw);
                if fixed != raw {
                    warn_pos(
                        &data.rexec.clone(),
                        0,
                        &format!(
                            "Invalid characters in test name '{raw}': only use 0-9a-zA-Z._-"
                        ),
                    );
                }
                /* Mark the corresponding plan entry as consumed. */
                if let Some(desc) = &data.desc {
                    if let Some(node) = desc.get_node(&fixed) {
                        desc.mark_handled(node);
                    }
                }
                format!("{}:{fixed}", data.rexec)
            }
            None => {
                let num = if parsed.num == -1 { data.num } else { parsed.num };
                format!("{}:{num}", data.rexec)
            }
        };
        let mut out = std::io::stdout();
        let _ = tela_tap::write_line(
            &mut out,
            data.num,
            &name,
            parsed.result,
            parsed.reason.as_deref(),
        );
    } else if tela_tap::parse_bail(line) {
        /* Terminate the test run immediately. */
        let reason = line
            .split_once('!')
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        if reason.is_empty() {
            println!("Bail out! {}", data.rexec);
        } else {
            print!("Bail out! {}: {reason}", data.rexec);
            println!();
        }
        stdout_flush();
        cleanup::run_cleanup();
        std::process::exit(1);
    } else if !line.starts_with(' ') && !line.starts_with('#') {
        /* TAP13 test produced non-TAP13 output. */
        warn_pos(&exec, 0, &format!("Output not in TAP13 format: {line}"));
    } else {
        /* Pass anything else through. */
        print!("{line}");
    }
}

/// Note the last stderr line for use as a skip/todo reason.
fn handle_nontap_line(data: &mut RunData, line: &str, stream_name: &str) {
    if stream_name == "stderr" {
        data.last_stderr = Some(line.to_string());
    }
}

fn run_handler(data: &mut RunData, line: Option<&[u8]>, stream: &Stream) {
    let Some(raw) = line else { return };

    let mut log_line = Vec::with_capacity(stream.name.len() + 2 + raw.len());
    log_line.extend_from_slice(stream.name.as_bytes());
    log_line.extend_from_slice(b": ");
    log_line.extend_from_slice(raw);
    data.runlog.puts(&log_line);

    let text = String::from_utf8_lossy(raw).to_string();

    if !data.check_done {
        if stream.name == "stdout" && text.starts_with("TAP ") {
            data.is_tap13 = true;
        }
        data.check_done = true;
    }

    if data.is_tap13 {
        handle_tap_line(data, &text, &stream.name);
    } else {
        handle_nontap_line(data, &text, &stream.name);
    }
}

fn finish_tap(data: &RunData, res: &RecResult) {
    if let Some(ProcStatus::Signaled(sig)) = res.status {
        warn_pos(
            &data.exec.to_string_lossy(),
            0,
            &format!("Test executable was killed by signal {sig}"),
        );
    }
}

fn finish_nontap(data: &mut RunData, res: &mut RecResult) {
    data.num = 1;

    /* Derive the outcome from the child's exit status. */
    let result = match res.status {
        Some(ProcStatus::Exited(0)) => TestResult::Pass,
        Some(ProcStatus::Exited(2)) => TestResult::Skip,
        Some(ProcStatus::Exited(3)) => TestResult::Todo,
        _ => TestResult::Fail,
    };

    /* Use the last stderr line only for skip and todo reasons. */
    let reason = if matches!(result, TestResult::Skip | TestResult::Todo) {
        data.last_stderr.as_ref().map(|s| s.trim().to_string())
    } else {
        None
    };

    let mut out = std::io::stdout();
    let _ = tela_tap::write_plan(&mut out, data.plan);
    let _ = tela_tap::write_result(
        &mut out,
        &data.rexec,
        &data.exec.to_string_lossy(),
        data.num,
        result,
        reason.as_deref(),
        Some(res),
        data.desc.as_ref(),
        None,
    );
}

fn plan_mismatch(data: &mut RunData, names: Option<&str>) {
    let mut out = std::io::stdout();
    let _ = tela_tap::write_all_results(
        &mut out,
        &data.exec.to_string_lossy(),
        TestResult::Fail,
        None,
        None,
        &data.rexec,
        data.desc.as_ref(),
        data.num,
        data.plan,
    );

    let exec = data.exec.to_string_lossy().to_string();
    match names {
        Some(names) => warn_pos(&exec, 0, &format!("Plan mismatch (missing tests:{names})")),
        None => warn_pos(
            &exec,
            0,
            &format!("Plan mismatch (plan={}, actual={})", data.plan, data.num),
        ),
    }
}

fn skip_test(data: &mut RunData, reason: &str) {
    let max = if data.plan == -1 { 1 } else { data.plan };

    let mut out = std::io::stdout();
    let _ = tela_tap::write_plan(&mut out, max);
    let _ = tela_tap::write_all_results(
        &mut out,
        &data.exec.to_string_lossy(),
        TestResult::Skip,
        Some(reason),
        None,
        &data.rexec,
        data.desc.as_ref(),
        0,
        data.plan,
    );
}

/// Run one test executable and emit its results in canonical TAP13 form.
///
/// TAP-native output is rewritten; any other output is turned into a single
/// synthesised result derived from the exit status (0 pass, 2 skip, 3 todo,
/// anything else fail).
pub fn run(
    exec: &str,
    scope: Option<u32>,
    matchenv: Option<&str>,
    matcherr: Option<&str>,
) -> anyhow::Result<i32> {
    let scope = scope
        .map(Scope::from_bits_truncate)
        .unwrap_or(Scope::ALL);

    context().set_stdout_tap(true);
    let mut out = std::io::stdout();
    let _ = tela_tap::write_header(&mut out);
    stdout_flush();

    let (mut data, skip_reason) = prepare_data(exec, matchenv, matcherr)?;
    if let Some(reason) = skip_reason {
        /* Test cannot run without its resources. */
        skip_test(&mut data, &reason);
        stdout_flush();
        return Ok(0);
    }

    /* Use disk-based /var/tmp instead of memory-based /tmp for tests that
     * intend to store large files. */
    let tmpdir = cleanup::mktempdir(data.large_temp.then(|| Path::new("/var/tmp")))
        .context("Could not create temporary directory")?;
    setup_env(&tmpdir, &data);

    std::env::set_current_dir(&data.exec_dir).context("Could not change directory")?;

    debug!(exec = %data.exec.display(), "running test");
    let exec_path = data.exec.clone();
    let mut res = {
        let mut handler = |line: Option<&[u8]>, stream: &Stream| run_handler(&mut data, line, stream);
        tela_record::record(&exec_path, scope, Some(&mut handler))
            .map_err(|e| anyhow::anyhow!("{e}"))?
    };

    if data.is_tap13 {
        finish_tap(&data, &res);
    } else {
        finish_nontap(&mut data, &mut res);
    }

    /* Report planned tests that never produced a result. */
    if let Some(desc) = data.desc.take() {
        let mut names = String::new();
        for &node in desc.root() {
            if !desc.handled(node) {
                if let Some(key) = desc.key(node) {
                    names.push(' ');
                    names.push_str(key);
                }
            }
        }
        data.desc = Some(desc);
        if !names.is_empty() {
            plan_mismatch(&mut data, Some(&names));
        } else if data.plan != -1 && data.num != data.plan {
            plan_mismatch(&mut data, None);
        }
    } else if data.plan != -1 && data.num != data.plan {
        plan_mismatch(&mut data, None);
    }

    data.runlog.finalize(res.status);
    stdout_flush();

    if let Some(matchfile) = &data.matchfile {
        let _ = std::fs::remove_file(matchfile);
        cleanup::forget_cleanup(matchfile);
    }

    Ok(0)
}

/// Print the combined number of tests implemented by the given test
/// executables.
pub fn count(execs: &[String]) -> anyhow::Result<i32> {
    let mut count = 0;
    for exec in execs {
        /* Filter out directories. */
        if Path::new(exec).is_dir() {
            continue;
        }
        let cfg = read_config(Path::new(&format!("{exec}.yaml")));
        count += if cfg.plan > 0 { cfg.plan } else { 1 };
    }
    println!("{count}");
    Ok(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn env_file_is_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchenv");
        std::fs::write(&path, "TELA_SYSTEM=\"localhost\"\nTELA_X=\"a\\$b\"\nno equals\n")
            .unwrap();
        let env = read_file_to_env(&path.to_string_lossy()).unwrap();
        assert_eq!(env, vec!["TELA_SYSTEM=localhost", "TELA_X=a$b"]);
    }

    #[test]
    fn scope_bits_map_to_recording_scope() {
        assert_eq!(Scope::from_bits_truncate(7), Scope::ALL);
        assert_eq!(Scope::from_bits_truncate(1), Scope::STDOUT);
    }
}
