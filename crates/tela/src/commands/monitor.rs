use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::time::SystemTime;

use anyhow::Context as _;
use tela_cli_common::SyntaxError;
use tela_record::{Stream, log_streams};

/// Writer that flushes after every write so monitored output reaches its
/// target even when stdout is redirected to a file.
struct LineFlush<W: Write>(W);

impl<W: Write> Write for LineFlush<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.0.write(buf)?;
        self.0.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

/// Collect output from the given `name:path` FIFOs and emit the canonical
/// timestamped log on stdout. Control requests for additional streams are
/// accepted on standard input.
pub fn run(args: &[String]) -> anyhow::Result<i32> {
    if args.is_empty() {
        return Err(SyntaxError("Usage: tela monitor <name>:<path> ...".into()).into());
    }

    let mut streams = Vec::with_capacity(args.len() + 1);
    for arg in args {
        let (name, path) = arg
            .split_once(':')
            .ok_or_else(|| SyntaxError(format!("Missing colon in argument '{arg}'")))?;
        let mut file =
            File::open(path).with_context(|| format!("Could not open file '{path}'"))?;
        /* Only new data is of interest; FIFOs cannot seek, which is fine. */
        let _ = file.seek(SeekFrom::End(0));
        streams.push(Stream::counted(name, file));
    }

    /* Accept control data from standard input. */
    let stdin = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("Could not access standard input")?;
    streams.push(Stream::control(File::from(stdin)));

    let mut out = LineFlush(std::io::stdout());
    log_streams(Some(&mut out), streams, None, Some(SystemTime::now()));

    Ok(0)
}
