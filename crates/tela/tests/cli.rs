//! End-to-end tests driving the dispatcher binary.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn tela() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tela"));
    /* Keep host configuration out of the test environment. */
    cmd.env_remove("HOME")
        .env_remove("TELA_RC")
        .env_remove("TELA_RUNLOG")
        .env_remove("TELA_WRITELOG")
        .env_remove("TELA_CACHE")
        .env_remove("TELA_OS")
        .env_remove("TELA_FRAMEWORK")
        .env_remove("TELA_TESTBASE")
        .env_remove("TELA_RESFAIL")
        .env_remove("TELA_NUMDOTS")
        .env_remove("TELA_VERBOSE")
        .env_remove("TELA_DEBUG")
        .env("TELA_PRETTY", "0")
        .env("COLOR", "0");
    cmd
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    let mut perms = fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path.to_string_lossy().to_string()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn fixname_normalises_characters() {
    let output = tela().args(["fixname", "bad name!x"]).output().expect("run");
    assert_eq!(stdout_of(&output), "bad_name_x\n");
    assert!(output.status.success());
}

#[test]
fn eval_number_comparisons() {
    let ok = tela()
        .args(["eval", "number", "1073741824", ">=1gi"])
        .status()
        .expect("run");
    assert_eq!(ok.code(), Some(0));

    let fail = tela()
        .args(["eval", "number", "999999999", ">=1g"])
        .status()
        .expect("run");
    assert_eq!(fail.code(), Some(1));
}

#[test]
fn eval_version_comparisons() {
    let ok = tela()
        .args(["eval", "version", "2.3", "<=2.3"])
        .status()
        .expect("run");
    assert_eq!(ok.code(), Some(0));

    let fail = tela()
        .args(["eval", "version", "2.3.1", "<=2.3"])
        .status()
        .expect("run");
    assert_eq!(fail.code(), Some(1));
}

#[test]
fn eval_unknown_type_lists_known_types() {
    let output = tela().args(["eval", "bogus", "a", "b"]).output().expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Known types:"));
}

#[test]
fn yamlget_prints_matching_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("data.yaml");
    fs::write(&file, "a:\n  b: it's here\n  c:\n    d: deep\n").expect("write");

    let output = tela()
        .args(["yamlget", &file.to_string_lossy(), "a/b/"])
        .output()
        .expect("run");
    assert_eq!(
        stdout_of(&output),
        "YAMLPATH='a/b/' VALUE='it'\\''s here' TYPE='scalar'\n"
    );

    let output = tela()
        .args(["yamlget", &file.to_string_lossy(), "a/*"])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("YAMLPATH='a/b' VALUE='' TYPE='map'"));
    assert!(text.contains("YAMLPATH='a/c' VALUE='' TYPE='map'"));
}

#[test]
fn yamlget_missing_file_fails() {
    let output = tela()
        .args(["yamlget", "/nonexistent.yaml", "a"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Empty or non-existent file"));
}

#[test]
fn yamlscalar_indents_stdin() {
    let mut child = tela()
        .args(["yamlscalar", "-", "4"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"one\ntwo")
        .expect("write");
    let output = child.wait_with_output().expect("wait");
    assert_eq!(stdout_of(&output), "    one\n    two\n");
}

#[test]
fn count_sums_plans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let one = write_script(dir.path(), "one", "exit 0\n");
    fs::write(dir.path().join("one.yaml"), "test:\n  plan: 3\n").expect("write");
    let two = write_script(dir.path(), "two", "exit 0\n");

    let output = tela().args(["count", &one, &two]).output().expect("run");
    assert_eq!(stdout_of(&output), "4\n");
}

#[test]
fn run_tap_native_passthrough() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(
        dir.path(),
        "native",
        "printf 'TAP version 13\\n1..1\\nok 1 - a\\n'\nexit 0\n",
    );

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.starts_with("TAP version 13\n"), "{text}");
    assert!(text.contains("\n1..1\n"), "{text}");
    assert!(text.contains("ok     1 - native:a\n"), "{text}");
    assert!(output.status.success());
}

#[test]
fn run_non_tap_skip_takes_reason_from_stderr() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(
        dir.path(),
        "skipper",
        "echo 'device missing' >&2\nexit 2\n",
    );
    fs::write(dir.path().join("skipper.yaml"), "test:\n  plan: 1\n").expect("write");

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("\n1..1\n"), "{text}");
    assert!(text.contains("ok     1 - skipper # SKIP device missing\n"), "{text}");
    assert!(text.contains("testresult: \"skip\""), "{text}");
    assert!(text.contains("exitcode: 2"), "{text}");
}

#[test]
fn run_non_tap_pass_emits_result_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(dir.path(), "plain", "echo output line\nexit 0\n");

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("ok     1 - plain\n"), "{text}");
    assert!(text.contains("testresult: \"pass\""), "{text}");
    assert!(text.contains("exitcode: 0"), "{text}");
    assert!(text.contains("duration_ms:"), "{text}");
    assert!(text.contains("rusage:"), "{text}");
    assert!(text.contains("output: |"), "{text}");
    assert!(text.contains("stdout: output line"), "{text}");
    assert!(text.contains("  ...\n"), "{text}");
}

#[test]
fn run_reports_plan_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(
        dir.path(),
        "short",
        "printf 'TAP version 13\\n1..3\\nok 1 - a\\nok 2 - b\\n'\nexit 0\n",
    );
    fs::write(dir.path().join("short.yaml"), "test:\n  plan: 3\n").expect("write");

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("ok     1 - short:a\n"), "{text}");
    assert!(text.contains("not ok 3 - short:missing_name_3\n"), "{text}");
    assert!(text.contains("# WARNING:"), "{text}");
    assert!(text.contains("Plan mismatch"), "{text}");
}

#[test]
fn run_bail_out_terminates_with_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(
        dir.path(),
        "bailer",
        "printf 'TAP version 13\\nok 1 - a\\nBail out! disk went away\\nok 2 - b\\n'\n",
    );

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("Bail out! bailer: disk went away"), "{text}");
    assert!(!text.contains("ok 2"), "{text}");
    assert!(!output.status.success());
}

#[test]
fn run_mapped_plan_consumes_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = write_script(
        dir.path(),
        "mapped",
        "printf 'TAP version 13\\n1..2\\nok 1 - first\\n'\nexit 0\n",
    );
    fs::write(
        dir.path().join("mapped.yaml"),
        "test:\n  plan:\n    first: one\n    second: two\n",
    )
    .expect("write");

    let output = tela()
        .env("TELA_TESTBASE", dir.path().canonicalize().expect("canonicalize"))
        .args(["run", &exec])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("ok     1 - mapped:first\n"), "{text}");
    /* The unconsumed plan entry becomes a failing result. */
    assert!(text.contains("not ok 2 - mapped:second\n"), "{text}");
    assert!(text.contains("missing tests: second"), "{text}");
}

#[test]
fn match_emits_sourceable_bindings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let req = dir.path().join("req.yaml");
    let res = dir.path().join("res.yaml");
    fs::write(&req, "system:\n  mem: 4G\n").expect("write");
    fs::write(&res, "system:\n  mem: 4G\n").expect("write");

    let output = tela()
        .args([
            "match",
            &req.to_string_lossy(),
            &res.to_string_lossy(),
            "0",
            "0",
        ])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(output.status.success(), "{text} / {}", stderr_of(&output));
    assert!(text.contains("TELA_SYSTEM=\"localhost\"\n"), "{text}");
    assert!(text.contains("TELA_SYSTEM_MEM=\"4G\"\n"), "{text}");
}

#[test]
fn match_failure_reports_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let req = dir.path().join("req.yaml");
    let res = dir.path().join("res.yaml");
    fs::write(&req, "system:\n  mem: 8G\n").expect("write");
    fs::write(&res, "system:\n  mem: 4G\n").expect("write");

    let output = tela()
        .args(["match", &req.to_string_lossy(), &res.to_string_lossy()])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Missing mem"), "{}", stderr_of(&output));
}

#[test]
fn match_yaml_format_prints_match_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let req = dir.path().join("req.yaml");
    let res = dir.path().join("res.yaml");
    fs::write(&req, "system:\n  mem: 4G\n").expect("write");
    fs::write(&res, "system:\n  mem: 4G\n").expect("write");

    let output = tela()
        .args([
            "match",
            &req.to_string_lossy(),
            &res.to_string_lossy(),
            "0",
            "1",
        ])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.contains("system localhost:"), "{text}");
    assert!(text.contains("mem: 4G"), "{text}");
}

#[test]
fn format_canonicalises_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tap = dir.path().join("in.tap");
    fs::write(
        &tap,
        "TAP version 13\n1..2\nok 1 - a\nnot ok 2 - b # TODO later\n",
    )
    .expect("write");

    let output = tela()
        .args(["format", &tap.to_string_lossy()])
        .output()
        .expect("run");
    let text = stdout_of(&output);
    assert!(text.starts_with("TAP version 13\n"), "{text}");
    assert!(text.contains("1..2\n"), "{text}");
    assert!(text.contains("ok     1 - a\n"), "{text}");
    assert!(text.contains("not ok 2 - b # TODO later\n"), "{text}");
}

#[test]
fn format_writes_canonical_log_copy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tap = dir.path().join("in.tap");
    let log = dir.path().join("copy.tap");
    fs::write(&tap, "1..1\nok 1 - a\n").expect("write");

    let output = tela()
        .env("TELA_WRITELOG", &log)
        .args(["format", &tap.to_string_lossy()])
        .output()
        .expect("run");
    assert!(output.status.success());
    let copy = fs::read_to_string(&log).expect("read log");
    assert!(copy.contains("TAP version 13\n"), "{copy}");
    assert!(copy.contains("ok     1 - a\n"), "{copy}");
}

#[test]
fn format_bail_out_sets_runtime_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tap = dir.path().join("in.tap");
    fs::write(&tap, "1..2\nok 1 - a\nBail out! gone\n").expect("write");

    let output = tela()
        .args(["format", &tap.to_string_lossy()])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Emergency stop: gone"));
}

#[test]
fn monitor_requires_colon_argument() {
    let output = tela().args(["monitor", "nocolon"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_subcommand_is_a_syntax_error() {
    let output = tela().arg("bogus").output().expect("run");
    assert_eq!(output.status.code(), Some(2));
}
