use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{SigHandler, Signal, signal};
use tracing::{debug, trace};

/// Handler invoked for every received line. The line includes its trailing
/// newline; a residual line at stream close has none. `None` marks stream
/// close for streams with `onclose` set.
pub type LineHandler<'a> = &'a mut dyn FnMut(Option<&[u8]>, &Stream);

/// A single stream to record.
pub struct Stream {
    /// Name of the stream. An empty name marks a control stream whose lines
    /// are `name:path` requests for inserting new streams.
    pub name: String,
    pub fd: File,
    /// If set, this stream does not count towards the number of open
    /// streams that must close for the recording call to end.
    pub nocount: bool,
    /// If set, the handler is called with `None` when this stream closes.
    pub onclose: bool,
}

impl Stream {
    /// A named stream that keeps the event loop alive until it closes.
    pub fn counted(name: &str, fd: File) -> Self {
        Stream {
            name: name.to_string(),
            fd,
            nocount: false,
            onclose: false,
        }
    }

    /// A control stream accepting `name:path` requests.
    pub fn control(fd: File) -> Self {
        Stream {
            name: String::new(),
            fd,
            nocount: false,
            onclose: false,
        }
    }

    fn is_control(&self) -> bool {
        self.name.is_empty()
    }
}

/* Flag used to indicate that logging should end. */
static LOG_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn log_sig_handler(_signum: nix::libc::c_int) {
    LOG_STOP.store(true, Ordering::Relaxed);
}

struct StreamState {
    partial: Vec<u8>,
    open: bool,
}

fn write_log_line(log: &mut dyn Write, elapsed: Duration, name: &str, line: &[u8]) {
    let nl = line.last() == Some(&b'\n');
    let _ = write!(
        log,
        "[{:4}.{:06}] {}{}: ",
        elapsed.as_secs(),
        elapsed.subsec_micros(),
        name,
        if nl { "" } else { "(nonl)" }
    );
    let _ = log.write_all(line);
    if !nl {
        let _ = writeln!(log);
    }
}

fn handle_line<'a>(
    log: Option<&'a mut dyn Write>,
    stream: &Stream,
    elapsed: Duration,
    handler: &mut Option<LineHandler<'_>>,
    line: &[u8],
) -> Option<&'a mut dyn Write> {
    if let Some(handler) = handler {
        handler(Some(line), stream);
    }
    if let Some(log) = log {
        write_log_line(log, elapsed, &stream.name, line);
        Some(log)
    } else {
        None
    }
}

/// Check whether `fd` has more data ready right now.
fn more_data(fd: &File) -> bool {
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
    matches!(poll(&mut fds, PollTimeout::ZERO), Ok(1))
        && fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN))
}

const BUFLEN: usize = 1024;

/// Read available data from `stream`, splitting complete lines out of the
/// carried-over partial buffer. Returns the number of bytes read (0 means
/// the stream hit EOF) and the complete lines received.
fn drain_stream(stream: &Stream, partial: &mut Vec<u8>) -> (usize, Vec<Vec<u8>>) {
    let mut total = 0;
    let mut lines = Vec::new();
    let mut buf = [0u8; BUFLEN];

    loop {
        let rc = (&stream.fd).read(&mut buf).unwrap_or(0);
        if rc == 0 {
            break;
        }
        total += rc;
        partial.extend_from_slice(&buf[..rc]);

        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            lines.push(partial.drain(..=pos).collect());
        }

        if !more_data(&stream.fd) {
            break;
        }
    }

    (total, lines)
}

/// Handle requests to open new streams sent via control file descriptors.
/// Format of requests must be `<stream name>:<path to stream>`.
fn log_warn<'a>(
    log: Option<&'a mut dyn Write>,
    elapsed: Duration,
    name: &str,
    msg: String,
) -> Option<&'a mut dyn Write> {
    if let Some(log) = log {
        write_log_line(log, elapsed, name, msg.as_bytes());
        Some(log)
    } else {
        None
    }
}

fn handle_control_line<'a>(
    line: &[u8],
    streams: &[Stream],
    log: Option<&'a mut dyn Write>,
    elapsed: Duration,
) -> (Option<&'a mut dyn Write>, Option<Stream>) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();

    let Some((name, path)) = text.split_once(':') else {
        let log = log_warn(log, elapsed, text, "Warning: Missing colon in stream argument".into());
        return (log, None);
    };

    if streams.iter().any(|s| s.name == name) {
        let log = log_warn(
            log,
            elapsed,
            name,
            format!("Warning: Duplicate stream registered '{name}'"),
        );
        return (log, None);
    }

    match File::open(path) {
        Ok(file) => (log, Some(Stream::counted(name, file))),
        Err(err) => {
            let log = log_warn(log, elapsed, name, format!("Could not open file '{path}': {err}"));
            (log, None)
        }
    }
}

/// Receive output generated on the given streams and store it in log
/// format, prefixing each line with the elapsed time since `start_time`.
/// If given, `handler` is called for each line. The loop runs until every
/// counted stream has closed or `SIGUSR1` is received; it returns the stop
/// time.
pub fn log_streams(
    mut log: Option<&mut dyn Write>,
    mut streams: Vec<Stream>,
    mut handler: Option<LineHandler<'_>>,
    start_time: Option<SystemTime>,
) -> SystemTime {
    debug!("starting logging");

    let mut states: Vec<StreamState> = streams
        .iter()
        .map(|_| StreamState {
            partial: Vec::new(),
            open: true,
        })
        .collect();

    /* Count only non-control file descriptors as open. */
    let mut openfd = streams
        .iter()
        .filter(|s| !s.is_control() && !s.nocount)
        .count();

    /* Enable stop via SIGUSR1; restore the previous handler on return. */
    LOG_STOP.store(false, Ordering::Relaxed);
    // SAFETY: handler only touches an atomic flag.
    let old_handler =
        unsafe { signal(Signal::SIGUSR1, SigHandler::Handler(log_sig_handler)) }.ok();

    while openfd > 0 && !LOG_STOP.load(Ordering::Relaxed) {
        let open_idx: Vec<usize> = (0..streams.len()).filter(|&i| states[i].open).collect();
        let mut fds: Vec<PollFd> = open_idx
            .iter()
            .map(|&i| PollFd::new(streams[i].fd.as_fd(), PollFlags::POLLIN))
            .collect();

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => break,
        }

        let now = SystemTime::now();
        let elapsed = start_time
            .and_then(|start| now.duration_since(start).ok())
            .unwrap_or_default();

        let events: Vec<(usize, PollFlags)> = open_idx
            .iter()
            .zip(&fds)
            .filter_map(|(&i, fd)| fd.revents().map(|r| (i, r)))
            .collect();

        for (i, revents) in events {
            trace!(
                fd = streams[i].fd.as_raw_fd(),
                name = %streams[i].name,
                ?revents,
                "poll event"
            );

            let mut eof = false;
            if revents.contains(PollFlags::POLLIN) {
                let mut partial = std::mem::take(&mut states[i].partial);
                let (total, lines) = drain_stream(&streams[i], &mut partial);
                states[i].partial = partial;
                if total == 0 {
                    eof = true;
                }

                if streams[i].is_control() {
                    /* Control data. */
                    for request in lines {
                        let (new_log, stream) =
                            handle_control_line(&request, &streams, log, elapsed);
                        log = new_log;
                        if let Some(stream) = stream {
                            streams.push(stream);
                            states.push(StreamState {
                                partial: Vec::new(),
                                open: true,
                            });
                            openfd += 1;
                        }
                    }
                } else {
                    /* Stream data. */
                    for line in lines {
                        log = handle_line(log, &streams[i], elapsed, &mut handler, &line);
                    }
                }
            } else if !revents.is_empty() {
                /* EOF or POLLERR, POLLHUP or POLLNVAL. */
                eof = true;
            }

            if eof {
                if !states[i].partial.is_empty() {
                    /* Consume pending data (without newline). */
                    let residual = std::mem::take(&mut states[i].partial);
                    log = handle_line(
                        log,
                        &streams[i],
                        elapsed,
                        &mut handler,
                        &residual,
                    );
                }

                /* Send closing event if requested. */
                if streams[i].onclose {
                    if let Some(handler) = &mut handler {
                        handler(None, &streams[i]);
                    }
                }

                /* Stop watching this file descriptor. */
                states[i].open = false;
                if !streams[i].is_control() && !streams[i].nocount {
                    openfd -= 1;
                }
                debug!(name = %streams[i].name, remaining = openfd, "stream closed");
            }
        }
    }

    if let Some(old) = old_handler {
        // SAFETY: restoring the handler that was installed before this call.
        let _ = unsafe { signal(Signal::SIGUSR1, old) };
    }

    debug!("ending logging");
    SystemTime::now()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn pipe_pair() -> (File, File) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        (File::from(read_end), File::from(write_end))
    }

    #[test]
    fn frames_lines_and_residual() {
        let (read_end, mut writer) = pipe_pair();
        writer.write_all(b"abc\nde").unwrap();
        drop(writer);

        let mut lines: Vec<Vec<u8>> = Vec::new();
        let mut handler = |line: Option<&[u8]>, _stream: &Stream| {
            if let Some(line) = line {
                lines.push(line.to_vec());
            }
        };

        let mut log = Vec::new();
        log_streams(
            Some(&mut log),
            vec![Stream::counted("out", read_end)],
            Some(&mut handler),
            Some(SystemTime::now()),
        );

        assert_eq!(lines, vec![b"abc\n".to_vec(), b"de".to_vec()]);
        let text = String::from_utf8(log).unwrap();
        let log_lines: Vec<&str> = text.lines().collect();
        assert_eq!(log_lines.len(), 2);
        assert!(log_lines[0].contains("] out: abc"));
        assert!(log_lines[1].contains("] out(nonl): de"));
    }

    #[test]
    fn onclose_sends_none() {
        let (read_end, writer) = pipe_pair();
        drop(writer);

        let mut closed = false;
        let mut handler = |line: Option<&[u8]>, _stream: &Stream| {
            if line.is_none() {
                closed = true;
            }
        };

        let mut stream = Stream::counted("s", read_end);
        stream.onclose = true;
        log_streams(None, vec![stream], Some(&mut handler), None);
        assert!(closed);
    }

    #[test]
    fn control_stream_inserts_new_streams() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "from file\n").unwrap();

        let (ctl_read, mut ctl_write) = pipe_pair();
        writeln!(ctl_write, "extra:{}", tmp.path().display()).unwrap();
        drop(ctl_write);

        // A counted stream keeps the loop alive while the control request
        // is processed.
        let (keep_read, mut keep_write) = pipe_pair();
        keep_write.write_all(b"keep\n").unwrap();
        drop(keep_write);

        let mut seen: Vec<(String, Vec<u8>)> = Vec::new();
        let mut handler = |line: Option<&[u8]>, stream: &Stream| {
            if let Some(line) = line {
                seen.push((stream.name.clone(), line.to_vec()));
            }
        };

        let mut log = Vec::new();
        log_streams(
            Some(&mut log),
            vec![Stream::control(ctl_read), Stream::counted("keep", keep_read)],
            Some(&mut handler),
            Some(SystemTime::now()),
        );

        assert!(seen.contains(&("extra".to_string(), b"from file\n".to_vec())));
    }

    #[test]
    fn duplicate_control_registration_is_ignored() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "x\n").unwrap();

        let (ctl_read, mut ctl_write) = pipe_pair();
        writeln!(ctl_write, "dup:{}", tmp.path().display()).unwrap();
        writeln!(ctl_write, "dup:{}", tmp.path().display()).unwrap();
        drop(ctl_write);

        let (keep_read, keep_write) = pipe_pair();
        drop(keep_write);

        let mut log = Vec::new();
        log_streams(
            Some(&mut log),
            vec![Stream::control(ctl_read), Stream::counted("keep", keep_read)],
            None,
            None,
        );
        let text = String::from_utf8(log).unwrap();
        assert!(text.contains("Duplicate stream registered"), "{text}");
    }
}
