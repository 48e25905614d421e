#![doc = include_str!("../README.md")]

pub mod cleanup;
pub mod context;
pub mod paths;
pub mod shell;

use bpaf::Bpaf;

pub use context::{Context, context, init_context, warn, warn_pos};

/// Exit code for success.
pub const EXIT_OK: i32 = 0;
/// Exit code for run-time errors (I/O, fork/exec, temp-dir creation).
pub const EXIT_RUNTIME: i32 = 1;
/// Exit code for command-line syntax errors.
pub const EXIT_SYNTAX: i32 = 2;
/// Exit code for test-case failures.
pub const EXIT_TESTCASE: i32 = 3;

/// A malformed command line. Mapped to [`EXIT_SYNTAX`] by the dispatcher.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SyntaxError(pub String);

/// Global options applied to all commands
#[derive(Debug, Clone, Bpaf)]
#[bpaf(generate(cli_global_options))]
pub struct CliGlobalOptions {
    /// Set the formatting mode for markup: "off" prints everything as plain
    /// text, "force" forces ANSI colors even if the console output is
    /// determined to be incompatible
    #[bpaf(long("colors"), argument("off|force"))]
    pub colors: Option<ColorsArg>,

    /// Print additional diagnostics while resolving resources and running
    /// tests
    #[bpaf(short('v'), long("verbose"), switch, fallback(false))]
    pub verbose: bool,

    /// The level of logging. In order, from the most verbose to the least
    /// verbose: debug, info, warn, error.
    #[bpaf(
        long("log-level"),
        argument("none|debug|info|warn|error"),
        fallback(LogLevel::None),
        display_fallback
    )]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorsArg {
    Off,
    Force,
}

impl core::str::FromStr for ColorsArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "force" => Ok(Self::Force),
            _ => Err(format!("expected 'off' or 'force', got '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[default]
    None,
    Debug,
    Info,
    Warn,
    Error,
}

impl core::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "expected 'none', 'debug', 'info', 'warn', or 'error', got '{s}'"
            )),
        }
    }
}

impl core::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bpaf::Parser;

    fn opts() -> bpaf::OptionParser<CliGlobalOptions> {
        cli_global_options().to_options()
    }

    #[test]
    fn defaults() {
        let parsed = opts().run_inner(&[]).unwrap();
        assert!(!parsed.verbose);
        assert_eq!(parsed.log_level, LogLevel::None);
        assert!(parsed.colors.is_none());
    }

    #[test]
    fn verbose_flags() {
        assert!(opts().run_inner(&["-v"]).unwrap().verbose);
        assert!(opts().run_inner(&["--verbose"]).unwrap().verbose);
    }

    #[test]
    fn log_level_parsed() {
        let parsed = opts().run_inner(&["--log-level", "debug"]).unwrap();
        assert_eq!(parsed.log_level, LogLevel::Debug);
        assert!(opts().run_inner(&["--log-level", "trace"]).is_err());
    }

    #[test]
    fn colors_parsed() {
        let parsed = opts().run_inner(&["--colors", "force"]).unwrap();
        assert_eq!(parsed.colors, Some(ColorsArg::Force));
        assert!(opts().run_inner(&["--colors", "auto"]).is_err());
    }
}
