use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::Context as _;
use tela_cli_common::{EXIT_RUNTIME, context};
use tela_tap::TestResult;

use crate::pretty;
use crate::pretty::Stats;

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v.parse::<i32>().unwrap_or(0) != 0,
        _ => default,
    }
}

fn emit_header(log: Option<&mut File>, is_pretty: bool) {
    if let Some(log) = log {
        let _ = tela_tap::write_header(log);
    }
    if !is_pretty {
        let mut out = std::io::stdout();
        let _ = tela_tap::write_header(&mut out);
    }
}

fn emit_plan(log: Option<&mut File>, plan: i32, is_pretty: bool, diag: bool) {
    if let Some(log) = log {
        let _ = tela_tap::write_plan(log, plan);
        if diag {
            log_diag(log);
        }
    }
    if is_pretty {
        pretty::header(plan);
    } else {
        let mut out = std::io::stdout();
        let _ = tela_tap::write_plan(&mut out, plan);
        if diag {
            log_diag(&mut out);
        }
    }
}

/// Write basic system diagnostics data as comment lines.
fn log_diag<W: Write>(w: &mut W) {
    if let Some(output) = tela_cli_common::paths::internal_cmd("", "diag", &[]) {
        for line in output.as_slice().lines().map_while(Result::ok) {
            let _ = writeln!(w, "# {line}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_result(
    log: Option<&mut File>,
    testnum: i32,
    numtests: i32,
    name: &str,
    result: TestResult,
    reason: Option<&str>,
    is_pretty: bool,
) {
    if let Some(log) = log {
        let _ = tela_tap::write_line(log, testnum, name, result, reason);
    }
    if is_pretty {
        pretty::result(name, testnum, numtests, result, reason);
    } else {
        let mut out = std::io::stdout();
        let _ = tela_tap::write_line(&mut out, testnum, name, result, reason);
    }
}

fn emit_bail_out(log: Option<&mut File>, line: &str) {
    if let Some(log) = log {
        let _ = write!(log, "{line}");
    }

    let reason = line
        .split_once('!')
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    if reason.is_empty() {
        eprintln!("Emergency stop!");
    } else {
        eprintln!("Emergency stop: {reason}");
    }
}

/// Reformat a TAP stream from `input` (`-` for stdin) into canonical or
/// human-readable form, collecting statistics along the way.
///
/// `numtests` overrides the stream's own plan; `diag` adds system
/// diagnostics after the plan. `TELA_PRETTY` selects the output format,
/// `TELA_VERBOSE` the verbosity, and `TELA_WRITELOG` an optional file
/// receiving a copy of the canonical stream.
pub fn format(input: &str, numtests: Option<i32>, diag: bool) -> anyhow::Result<i32> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(input).with_context(|| {
            format!("Could not open tapfile '{input}'")
        })?))
    };

    let is_pretty = env_flag("TELA_PRETTY", true);
    let verbose = env_flag("TELA_VERBOSE", false) || context().verbose;

    let mut logfile = None;
    let mut log = match std::env::var("TELA_WRITELOG") {
        Ok(path) if !path.is_empty() => {
            let file = File::create(&path)
                .with_context(|| format!("Could not open logfile '{path}'"))?;
            logfile = Some(path);
            Some(file)
        }
        _ => None,
    };

    let mut stats = Stats::default();
    let mut numtests = numtests.unwrap_or(-1);
    stats.planned = numtests.max(0);
    let mut testnum = 0;
    let mut plan_done = false;
    let mut rc = 0;

    emit_header(log.as_mut(), is_pretty);

    for line in reader.lines() {
        let line = line?;
        let line_nl = format!("{line}\n");
        let mut do_sync = false;

        if line.starts_with("TAP ") {
            /* Filter out TAP header. */
        } else if let Some(num) = tela_tap::parse_plan(&line) {
            /* Use the stream's plan unless one was given. */
            if numtests == -1 {
                numtests = num;
                stats.planned = num;
            }
        } else if let Some(parsed) = tela_tap::parse_result_line(&line) {
            /* Emit the plan lazily to allow parsing of an in-stream
             * plan. */
            if !plan_done {
                emit_plan(log.as_mut(), numtests, is_pretty, diag);
                plan_done = true;
            }

            testnum += 1;
            let name = match parsed.name {
                Some(name) => name,
                None => {
                    let num = if parsed.num == -1 { testnum } else { parsed.num };
                    format!("test{num}")
                }
            };

            emit_result(
                log.as_mut(),
                testnum,
                numtests,
                &name,
                parsed.result,
                parsed.reason.as_deref(),
                is_pretty,
            );

            match parsed.result {
                TestResult::Pass => stats.passed += 1,
                TestResult::Skip => stats.skipped += 1,
                TestResult::Fail | TestResult::Todo => stats.failed += 1,
            }

            /* Sync after each test result line. */
            do_sync = true;
        } else if tela_tap::parse_bail(&line) {
            /* Terminate the run. */
            emit_bail_out(log.as_mut(), &line_nl);
            rc = EXIT_RUNTIME;
            break;
        } else if line == "# tela: query state" {
            if is_pretty && verbose {
                println!("Collecting system state");
            }
        } else {
            /* Pass anything else through. */
            if let Some(log) = log.as_mut() {
                let _ = write!(log, "{line_nl}");
            }

            if let Some(warning) = tela_tap::parse_warning(&line) {
                stats.warnings += 1;
                let _ = std::io::stdout().flush();
                let c = &context().color_stderr;
                eprintln!("{}Warning: {}{}", c.red, warning.trim_end(), c.reset);
            } else if !is_pretty || verbose {
                println!("{line}");
            }

            /* Sync at the end of YAML result blocks. */
            if line == "  ..." {
                do_sync = true;
            }
        }

        /* Make sure data reaches disk. */
        if do_sync {
            if let Some(log) = log.as_mut() {
                let _ = log.sync_data();
            }
        }
    }

    if is_pretty {
        pretty::footer(&stats, logfile.as_deref());
    }

    Ok(rc)
}
