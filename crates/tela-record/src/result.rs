use std::fs::File;
use std::io::{BufRead, BufReader, Seek, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How the recorded process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Exited(i32),
    Signaled(i32),
}

/// Process resource usage, reduced to the fields reported in result
/// blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rusage {
    pub utime: Duration,
    pub stime: Duration,
    pub maxrss_kb: i64,
    pub minflt: i64,
    pub majflt: i64,
    pub inblock: i64,
    pub outblock: i64,
    pub nvcsw: i64,
    pub nivcsw: i64,
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn timeval_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}

impl Rusage {
    pub fn from_raw(raw: &libc::rusage) -> Self {
        Rusage {
            utime: timeval_duration(raw.ru_utime),
            stime: timeval_duration(raw.ru_stime),
            maxrss_kb: raw.ru_maxrss,
            minflt: raw.ru_minflt,
            majflt: raw.ru_majflt,
            inblock: raw.ru_inblock,
            outblock: raw.ru_oublock,
            nvcsw: raw.ru_nvcsw,
            nivcsw: raw.ru_nivcsw,
        }
    }

    /// Component-wise sum; `maxrss_kb` takes the maximum.
    pub fn add(&self, other: &Rusage) -> Rusage {
        Rusage {
            utime: self.utime + other.utime,
            stime: self.stime + other.stime,
            maxrss_kb: self.maxrss_kb.max(other.maxrss_kb),
            minflt: self.minflt + other.minflt,
            majflt: self.majflt + other.majflt,
            inblock: self.inblock + other.inblock,
            outblock: self.outblock + other.outblock,
            nvcsw: self.nvcsw + other.nvcsw,
            nivcsw: self.nivcsw + other.nivcsw,
        }
    }

    /// Component-wise difference; `maxrss_kb` cannot be subtracted and is
    /// kept.
    pub fn sub(&self, other: &Rusage) -> Rusage {
        Rusage {
            utime: self.utime.saturating_sub(other.utime),
            stime: self.stime.saturating_sub(other.stime),
            maxrss_kb: self.maxrss_kb,
            minflt: self.minflt - other.minflt,
            majflt: self.majflt - other.majflt,
            inblock: self.inblock - other.inblock,
            outblock: self.outblock - other.outblock,
            nvcsw: self.nvcsw - other.nvcsw,
            nivcsw: self.nivcsw - other.nivcsw,
        }
    }
}

/// Outcome of one recording; each field is independently valid.
#[derive(Debug)]
pub struct RecResult {
    pub status: Option<ProcStatus>,
    pub start_time: SystemTime,
    pub stop_time: SystemTime,
    pub duration: Duration,
    pub rusage: Option<Rusage>,
    /// Stream containing timestamped output, rewound for the caller.
    pub output: Option<File>,
    /// Number of output bytes recorded.
    pub output_size: u64,
}

fn write_time<W: Write>(
    w: &mut W,
    label: &str,
    time: SystemTime,
    indent: usize,
) -> std::io::Result<()> {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    writeln!(
        w,
        "{:indent$}{label}{}.{:06} # {}",
        "",
        since_epoch.as_secs(),
        since_epoch.subsec_micros(),
        humantime::format_rfc3339_seconds(time)
    )
}

fn write_duration_ms<W: Write>(
    w: &mut W,
    label: &str,
    duration: Duration,
    indent: usize,
) -> std::io::Result<()> {
    writeln!(
        w,
        "{:indent$}{label}{}.{:03}",
        "",
        duration.as_millis(),
        duration.subsec_micros() % 1000
    )
}

fn write_rusage<W: Write>(w: &mut W, rusage: &Rusage, indent: usize) -> std::io::Result<()> {
    write_duration_ms(w, "utime_ms: ", rusage.utime, indent)?;
    write_duration_ms(w, "stime_ms: ", rusage.stime, indent)?;
    writeln!(w, "{:indent$}maxrss_kb: {}", "", rusage.maxrss_kb)?;
    writeln!(w, "{:indent$}minflt: {}", "", rusage.minflt)?;
    writeln!(w, "{:indent$}majflt: {}", "", rusage.majflt)?;
    writeln!(w, "{:indent$}inblock: {}", "", rusage.inblock)?;
    writeln!(w, "{:indent$}outblock: {}", "", rusage.outblock)?;
    writeln!(w, "{:indent$}nvcsw: {}", "", rusage.nvcsw)?;
    writeln!(w, "{:indent$}nivcsw: {}", "", rusage.nivcsw)
}

/// Write the recorded fields as YAML mapping entries.
pub(crate) fn print<W: Write>(
    w: &mut W,
    result: &mut RecResult,
    indent: usize,
) -> std::io::Result<()> {
    match result.status {
        Some(ProcStatus::Exited(code)) => writeln!(w, "{:indent$}exitcode: {code}", "")?,
        Some(ProcStatus::Signaled(sig)) => writeln!(w, "{:indent$}signal: {sig}", "")?,
        None => {}
    }
    write_time(w, "starttime: ", result.start_time, indent)?;
    write_time(w, "stoptime:  ", result.stop_time, indent)?;
    write_duration_ms(w, "duration_ms: ", result.duration, indent)?;

    if let Some(rusage) = &result.rusage {
        writeln!(w, "{:indent$}rusage:", "")?;
        write_rusage(w, rusage, indent + 2)?;
    }

    let Some(output) = result.output.as_mut() else {
        return Ok(());
    };
    if result.output_size == 0 {
        writeln!(w, "{:indent$}output: \"\"", "")?;
    } else {
        writeln!(w, "{:indent$}output: |", "")?;
        output.rewind()?;
        let mut reader = BufReader::new(output);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            write!(w, "{:width$}", "", width = indent + 2)?;
            w.write_all(&line)?;
            if line.last() != Some(&b'\n') {
                writeln!(w)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn sample_result(output: Option<File>, output_size: u64) -> RecResult {
        let start = UNIX_EPOCH + Duration::new(100, 500);
        RecResult {
            status: Some(ProcStatus::Exited(0)),
            start_time: start,
            stop_time: start + Duration::from_millis(1500),
            duration: Duration::from_millis(1500),
            rusage: None,
            output,
            output_size,
        }
    }

    fn printed(result: &mut RecResult) -> String {
        let mut out = Vec::new();
        print(&mut out, result, 2).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prints_exitcode_and_times() {
        let text = printed(&mut sample_result(None, 0));
        assert!(text.contains("  exitcode: 0\n"));
        assert!(text.contains("  starttime: 100.000000 # "));
        assert!(text.contains("  duration_ms: 1500.000\n"));
    }

    #[test]
    fn prints_signal_for_signaled_status() {
        let mut result = sample_result(None, 0);
        result.status = Some(ProcStatus::Signaled(9));
        let text = printed(&mut result);
        assert!(text.contains("  signal: 9\n"));
        assert!(!text.contains("exitcode"));
    }

    #[test]
    fn empty_output_is_quoted() {
        let file = tempfile::tempfile().unwrap();
        let text = printed(&mut sample_result(Some(file), 0));
        assert!(text.contains("  output: \"\"\n"));
    }

    #[test]
    fn output_block_is_indented() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"one\ntwo\n").unwrap();
        let text = printed(&mut sample_result(Some(file), 8));
        assert!(text.contains("  output: |\n    one\n    two\n"), "{text}");
    }

    #[test]
    fn rusage_add_and_sub() {
        let a = Rusage {
            utime: Duration::from_millis(10),
            maxrss_kb: 100,
            minflt: 5,
            ..Rusage::default()
        };
        let b = Rusage {
            utime: Duration::from_millis(4),
            maxrss_kb: 200,
            minflt: 2,
            ..Rusage::default()
        };
        let sum = a.add(&b);
        assert_eq!(sum.utime, Duration::from_millis(14));
        assert_eq!(sum.maxrss_kb, 200);
        let diff = sum.sub(&b);
        assert_eq!(diff.utime, Duration::from_millis(10));
        assert_eq!(diff.minflt, 5);
    }
}
