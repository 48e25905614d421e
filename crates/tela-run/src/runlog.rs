use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use tela_record::ProcStatus;

/// Timestamped per-line log of everything one test run wrote, appended to
/// the file named by `TELA_RUNLOG`.
pub struct RunLog {
    file: Option<File>,
    start: SystemTime,
    exec: String,
}

impl RunLog {
    /// A disabled run-log that swallows all writes.
    pub fn disabled() -> Self {
        RunLog {
            file: None,
            start: SystemTime::now(),
            exec: String::new(),
        }
    }

    /// Open `logfile` for appending so that multiple invocations can share
    /// the same file.
    pub fn open(logfile: &Path, exec: &str) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().append(true).create(true).open(logfile)?;
        let now = SystemTime::now();
        writeln!(
            file,
            "Run-log for {exec} started at {}",
            humantime::format_rfc3339_seconds(now)
        )?;
        Ok(RunLog {
            file: Some(file),
            start: now,
            exec: exec.to_string(),
        })
    }

    /// Write one line, prefixed with the elapsed time. Lines without a
    /// trailing newline are marked `(nonl)`.
    pub fn puts(&mut self, line: &[u8]) {
        let Some(file) = self.file.as_mut() else { return };
        let elapsed = SystemTime::now()
            .duration_since(self.start)
            .unwrap_or_default();
        let nl = line.last() == Some(&b'\n');
        let _ = write!(
            file,
            "[{:4}.{:06}]{}",
            elapsed.as_secs(),
            elapsed.subsec_micros(),
            if nl { " " } else { "(nonl) " }
        );
        let _ = file.write_all(line);
        if !nl {
            let _ = writeln!(file);
        }
        let _ = file.flush();
    }

    pub fn printf(&mut self, text: &str) {
        self.puts(text.as_bytes());
    }

    /// Record the child's exit disposition and the stop banner.
    pub fn finalize(&mut self, status: Option<ProcStatus>) {
        if self.file.is_none() {
            return;
        }
        match status {
            Some(ProcStatus::Exited(code)) => self.printf(&format!("exit with code {code}\n")),
            Some(ProcStatus::Signaled(sig)) => self.printf(&format!("killed by signal {sig}\n")),
            None => {}
        }
        let exec = self.exec.clone();
        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(
                file,
                "Run-log for {exec} stopped at {}\n",
                humantime::format_rfc3339_seconds(SystemTime::now())
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn logs_lines_with_banners() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runlog");
        let mut log = RunLog::open(&path, "/abs/test").unwrap();
        log.puts(b"stdout: hello\n");
        log.puts(b"stderr: partial");
        log.finalize(Some(ProcStatus::Exited(0)));
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Run-log for /abs/test started at "));
        assert!(text.contains("] stdout: hello\n"));
        assert!(text.contains("(nonl) stderr: partial\n"));
        assert!(text.contains("exit with code 0\n"));
        assert!(text.contains("Run-log for /abs/test stopped at "));
    }

    #[test]
    fn appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runlog");
        RunLog::open(&path, "a").unwrap().finalize(None);
        RunLog::open(&path, "b").unwrap().finalize(None);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Run-log for a started"));
        assert!(text.contains("Run-log for b started"));
    }

    #[test]
    fn disabled_log_is_silent() {
        let mut log = RunLog::disabled();
        log.puts(b"ignored\n");
        log.finalize(None);
    }
}
