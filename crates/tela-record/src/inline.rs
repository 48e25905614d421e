use std::fs::File;
use std::io::{Seek, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::thread::JoinHandle;
use std::time::SystemTime;

use nix::unistd::pipe;

use crate::result::{RecResult, Rusage};
use crate::streams::{LineHandler, Stream, log_streams};
use crate::{RecordError, Scope};

/// Handler usable from the inline logger thread.
pub type InlineHandler = Box<dyn FnMut(Option<&[u8]>, &Stream) + Send>;

fn cloexec(fd: &OwnedFd) {
    // SAFETY: plain fcntl flag update on a descriptor we own.
    unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
}

fn redirect_into(fd: &OwnedFd, target: libc::c_int) -> Result<(), RecordError> {
    // SAFETY: both descriptors are valid; dup2 atomically replaces target.
    let rc = unsafe { libc::dup2(fd.as_raw_fd(), target) };
    if rc == -1 {
        return Err(RecordError::Redirect(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn getrusage(who: libc::c_int) -> Rusage {
    // SAFETY: zeroed rusage is a valid out parameter.
    let mut raw: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: plain syscall with a valid local out pointer.
    unsafe { libc::getrusage(who, &raw mut raw) };
    Rusage::from_raw(&raw)
}

fn usage_with_children() -> Rusage {
    getrusage(libc::RUSAGE_SELF).add(&getrusage(libc::RUSAGE_CHILDREN))
}

/// An active inline recording of the current process's output streams.
///
/// [`InlineRecording::start`] redirects the process's stdout/stderr into
/// pipes drained by a logger thread and snapshots baseline resource usage;
/// [`InlineRecording::stop`] restores the streams and returns the
/// recording. Note: for inline recording, `maxrss_kb` includes usage from
/// before the recording started.
pub struct InlineRecording {
    scope: Scope,
    start_time: SystemTime,
    rusage_base: Rusage,
    orig_stdout: OwnedFd,
    orig_stderr: OwnedFd,
    stdout_write: Option<OwnedFd>,
    stderr_write: Option<OwnedFd>,
    logger: JoinHandle<(File, SystemTime)>,
}

impl InlineRecording {
    pub fn start(scope: Scope, mut handler: Option<InlineHandler>) -> Result<Self, RecordError> {
        let (stdout_read, stdout_write) = pipe()
            .map_err(std::io::Error::from)
            .map_err(RecordError::Redirect)?;
        let (stderr_read, stderr_write) = pipe()
            .map_err(std::io::Error::from)
            .map_err(RecordError::Redirect)?;
        for fd in [&stdout_read, &stdout_write, &stderr_read, &stderr_write] {
            cloexec(fd);
        }

        let mut log = tempfile::tempfile().map_err(RecordError::TempFile)?;

        let orig_stdout = std::io::stdout()
            .as_fd()
            .try_clone_to_owned()
            .map_err(RecordError::Redirect)?;
        let orig_stderr = std::io::stderr()
            .as_fd()
            .try_clone_to_owned()
            .map_err(RecordError::Redirect)?;

        let start_time = SystemTime::now();
        let rusage_base = usage_with_children();

        let logger = std::thread::spawn(move || {
            let streams = vec![
                Stream::counted("stderr", File::from(stderr_read)),
                Stream::counted("stdout", File::from(stdout_read)),
            ];
            let handler_ref: Option<LineHandler<'_>> = match handler.as_mut() {
                Some(h) => Some(h.as_mut()),
                None => None,
            };
            let stop_time = log_streams(Some(&mut log), streams, handler_ref, Some(start_time));
            (log, stop_time)
        });

        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        if scope.contains(Scope::STDOUT) {
            redirect_into(&stdout_write, libc::STDOUT_FILENO)?;
        }
        if scope.contains(Scope::STDERR) {
            redirect_into(&stderr_write, libc::STDERR_FILENO)?;
        }

        Ok(InlineRecording {
            scope,
            start_time,
            rusage_base,
            orig_stdout,
            orig_stderr,
            stdout_write: Some(stdout_write),
            stderr_write: Some(stderr_write),
            logger,
        })
    }

    /// Restore the output streams, wait for the logger, and return the
    /// recording with the resource-usage delta since start.
    pub fn stop(mut self) -> Result<RecResult, RecordError> {
        let rusage = self
            .scope
            .contains(Scope::RUSAGE)
            .then(|| usage_with_children().sub(&self.rusage_base));

        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        if self.scope.contains(Scope::STDOUT) {
            redirect_into(&self.orig_stdout, libc::STDOUT_FILENO)?;
        }
        if self.scope.contains(Scope::STDERR) {
            redirect_into(&self.orig_stderr, libc::STDERR_FILENO)?;
        }

        /* Closing the write ends lets the logger see EOF. */
        self.stdout_write.take();
        self.stderr_write.take();

        let (mut log, _) = self
            .logger
            .join()
            .map_err(|_| RecordError::Wait(std::io::Error::other("logger thread panicked")))?;

        let stop_time = SystemTime::now();
        let duration = stop_time
            .duration_since(self.start_time)
            .unwrap_or_default();

        let output_size = log.stream_position().unwrap_or(0);
        let _ = log.rewind();

        Ok(RecResult {
            status: None,
            start_time: self.start_time,
            stop_time,
            duration,
            rusage,
            output: self
                .scope
                .intersects(Scope::STDOUT | Scope::STDERR)
                .then_some(log),
            output_size,
        })
    }
}
