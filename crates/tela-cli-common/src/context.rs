use std::io::IsTerminal;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ColorsArg;

pub const WARN_PREFIX: &str = "WARNING:";

/// ANSI codes for controlling colored output on one stream.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub red: &'static str,
    pub green: &'static str,
    pub blue: &'static str,
    pub bold: &'static str,
    pub reset: &'static str,
}

impl Palette {
    const COLOR: Palette = Palette {
        red: "\x1b[31m",
        green: "\x1b[32m",
        blue: "\x1b[34m",
        bold: "\x1b[1m",
        reset: "\x1b[0m",
    };

    const PLAIN: Palette = Palette {
        red: "",
        green: "",
        blue: "",
        bold: "",
        reset: "",
    };
}

/// Process-scoped output configuration, established once at startup.
#[derive(Debug)]
pub struct Context {
    pub color: Palette,
    pub color_stderr: Palette,
    pub verbose: bool,
    pub debug: bool,
    /// Set while stdout carries a TAP stream; warnings are then duplicated
    /// as `# WARNING:` diagnostic lines so a downstream formatter can count
    /// them.
    stdout_is_tap: AtomicBool,
}

static CONTEXT: OnceLock<Context> = OnceLock::new();

fn use_color(colors: Option<ColorsArg>, terminal: bool) -> bool {
    match colors {
        Some(ColorsArg::Off) => false,
        Some(ColorsArg::Force) => true,
        None => match std::env::var("COLOR").ok().as_deref() {
            Some("0") => false,
            Some(v) if !v.is_empty() => true,
            _ => terminal,
        },
    }
}

/// Establish the process context. Later calls are ignored.
pub fn init_context(colors: Option<ColorsArg>, verbose: bool) {
    let verbose = verbose
        || std::env::var("TELA_VERBOSE")
            .ok()
            .is_some_and(|v| v.parse::<i32>().unwrap_or(0) != 0);
    let debug = std::env::var("TELA_DEBUG")
        .ok()
        .is_some_and(|v| v.parse::<i32>().unwrap_or(0) != 0);
    let _ = CONTEXT.set(Context {
        color: if use_color(colors, std::io::stdout().is_terminal()) {
            Palette::COLOR
        } else {
            Palette::PLAIN
        },
        color_stderr: if use_color(colors, std::io::stderr().is_terminal()) {
            Palette::COLOR
        } else {
            Palette::PLAIN
        },
        verbose,
        debug,
        stdout_is_tap: AtomicBool::new(false),
    });
}

/// The process context. Usable before [`init_context`]; output is then
/// uncolored and quiet.
pub fn context() -> &'static Context {
    CONTEXT.get_or_init(|| Context {
        color: Palette::PLAIN,
        color_stderr: Palette::PLAIN,
        verbose: false,
        debug: false,
        stdout_is_tap: AtomicBool::new(false),
    })
}

impl Context {
    pub fn set_stdout_tap(&self, value: bool) {
        self.stdout_is_tap.store(value, Ordering::Relaxed);
    }

    pub fn stdout_is_tap(&self) -> bool {
        self.stdout_is_tap.load(Ordering::Relaxed)
    }

    /// Print `msg` when verbose output was requested.
    pub fn verb(&self, msg: &str) {
        if self.verbose {
            println!("{msg}");
        }
    }
}

fn emit_warning(position: Option<(&str, u32)>, msg: &str) {
    let ctx = context();
    let msg = msg.trim();
    let pos = match position {
        Some((filename, 0)) => format!("{}: ", crate::paths::relpath(filename, None)),
        Some((filename, lineno)) => {
            format!("{}:{lineno}: ", crate::paths::relpath(filename, None))
        }
        None => String::new(),
    };

    if ctx.stdout_is_tap() {
        // TAP-format diagnostics data.
        println!("# {WARN_PREFIX} {pos}{msg}");
    }
    eprintln!(
        "{}{WARN_PREFIX} {pos}{msg}{}",
        ctx.color_stderr.red, ctx.color_stderr.reset
    );
}

/// Print a user-visible warning.
pub fn warn(msg: &str) {
    emit_warning(None, msg);
}

/// Print a user-visible warning associated with a file position. Use line
/// number 0 when no line is known.
pub fn warn_pos(filename: &str, lineno: u32, msg: &str) {
    emit_warning(Some((filename, lineno)), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_defaults_are_quiet() {
        let ctx = context();
        assert!(!ctx.stdout_is_tap());
    }

    #[test]
    fn use_color_rules() {
        assert!(!use_color(Some(ColorsArg::Off), true));
        assert!(use_color(Some(ColorsArg::Force), false));
    }
}
