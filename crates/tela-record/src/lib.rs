#![doc = include_str!("../README.md")]

mod inline;
mod result;
mod streams;

pub use inline::InlineRecording;
pub use result::{ProcStatus, RecResult, Rusage};
pub use streams::{LineHandler, Stream, log_streams};

use std::fs::File;
use std::io::{Seek, Write};
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::SystemTime;

bitflags::bitflags! {
    /// Data recording scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Scope: u32 {
        /// Record output to the standard output stream.
        const STDOUT = 1;
        /// Record output to the standard error stream.
        const STDERR = 2;
        /// Record process resource usage.
        const RUSAGE = 4;
    }
}

impl Scope {
    pub const ALL: Scope = Scope::all();
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("could not create temporary file: {0}")]
    TempFile(std::io::Error),
    #[error("could not run command '{cmd}': {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },
    #[error("could not wait on child process: {0}")]
    Wait(std::io::Error),
    #[error("could not redirect output streams: {0}")]
    Redirect(std::io::Error),
}

fn child_file(fd: OwnedFd) -> File {
    File::from(fd)
}

fn wait4(pid: i32) -> Result<(ProcStatus, libc::rusage), RecordError> {
    let mut status: libc::c_int = 0;
    // SAFETY: zeroed rusage is a valid initial value for wait4 to fill in.
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: plain syscall on a pid we spawned; pointers are valid locals.
    let rc = unsafe { libc::wait4(pid, &raw mut status, 0, &raw mut rusage) };
    if rc == -1 {
        return Err(RecordError::Wait(std::io::Error::last_os_error()));
    }

    let status = if libc::WIFEXITED(status) {
        ProcStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        ProcStatus::Signaled(libc::WTERMSIG(status))
    } else {
        ProcStatus::Exited(-1)
    };
    Ok((status, rusage))
}

/// Run `cmd` while recording its output and resource usage.
///
/// Output streams selected by `scope` are captured through pipes; each
/// received line is passed to `handler` and appended to a timestamped
/// temporary log. The returned result holds the child status, timing,
/// resource usage (when in scope) and the rewound log stream.
pub fn record(
    cmd: &Path,
    scope: Scope,
    handler: Option<LineHandler<'_>>,
) -> Result<RecResult, RecordError> {
    let mut log = tempfile::tempfile().map_err(RecordError::TempFile)?;

    let mut command = Command::new(cmd);
    command.stdin(Stdio::inherit());
    command.stdout(if scope.contains(Scope::STDOUT) {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });
    command.stderr(if scope.contains(Scope::STDERR) {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });

    let start_time = SystemTime::now();
    let mut child = command.spawn().map_err(|source| RecordError::Spawn {
        cmd: cmd.display().to_string(),
        source,
    })?;

    let mut streams = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        streams.push(Stream::counted("stderr", child_file(OwnedFd::from(stderr))));
    }
    if let Some(stdout) = child.stdout.take() {
        streams.push(Stream::counted("stdout", child_file(OwnedFd::from(stdout))));
    }

    let stop_time = log_streams(Some(&mut log), streams, handler, Some(start_time));

    let duration = stop_time
        .duration_since(start_time)
        .unwrap_or_default();

    #[allow(clippy::cast_possible_wrap)]
    let (status, rusage) = wait4(child.id() as i32)?;

    let output_size = log.stream_position().unwrap_or(0);
    let _ = log.rewind();

    Ok(RecResult {
        status: Some(status),
        start_time,
        stop_time,
        duration,
        rusage: scope
            .contains(Scope::RUSAGE)
            .then(|| Rusage::from_raw(&rusage)),
        output: scope
            .intersects(Scope::STDOUT | Scope::STDERR)
            .then_some(log),
        output_size,
    })
}

/// Write `result`'s recorded fields as YAML mapping entries indented by
/// `indent` spaces.
pub fn print_result<W: Write>(
    w: &mut W,
    result: &mut RecResult,
    indent: usize,
) -> std::io::Result<()> {
    result::print(w, result, indent)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn records_exit_status_and_output() {
        let mut lines: Vec<(String, Vec<u8>)> = Vec::new();
        let mut handler = |line: Option<&[u8]>, stream: &Stream| {
            if let Some(line) = line {
                lines.push((stream.name.clone(), line.to_vec()));
            }
        };
        let result = record(Path::new("/bin/echo"), Scope::ALL, Some(&mut handler)).unwrap();

        assert_eq!(result.status, Some(ProcStatus::Exited(0)));
        assert!(result.rusage.is_some());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, "stdout");
        assert_eq!(lines[0].1, b"\n");
    }

    #[test]
    fn missing_command_is_a_spawn_error() {
        let err = record(Path::new("/nonexistent/cmd"), Scope::ALL, None).unwrap_err();
        assert!(matches!(err, RecordError::Spawn { .. }));
    }

    #[test]
    fn log_contains_timestamped_lines() {
        let mut result = record(Path::new("/bin/echo"), Scope::ALL, None).unwrap();
        let mut text = String::new();
        result.output.as_mut().unwrap().read_to_string(&mut text).unwrap();
        assert!(text.contains("] stdout: "), "log: {text:?}");
        assert_eq!(u64::try_from(text.len()).unwrap(), result.output_size);
    }
}
