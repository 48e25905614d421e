#![doc = include_str!("../README.md")]

use std::process::ExitCode;

use bpaf::Bpaf;
use tela_cli_common::{CliGlobalOptions, EXIT_RUNTIME, EXIT_SYNTAX, SyntaxError};
use tracing_subscriber::prelude::*;

mod commands;

#[derive(Debug, Clone, Bpaf)]
pub struct RunArgs {
    /// Recording scope bits (1 stdout, 2 stderr, 4 rusage; default all)
    #[bpaf(positional("SCOPE"))]
    pub scope: Option<u32>,

    /// File with pre-resolved KEY=VALUE resource bindings
    #[bpaf(positional("MATCHENV"))]
    pub matchenv: Option<String>,

    /// Pre-computed resolver failure reason
    #[bpaf(positional("MATCHERR"))]
    pub matcherr: Option<String>,
}

#[derive(Debug, Clone, Bpaf)]
pub struct FormatArgs {
    /// TAP stream to reformat, or '-' for standard input
    #[bpaf(positional("TAPFILE"))]
    pub input: String,

    /// Expected number of tests
    #[bpaf(positional("NUMTESTS"))]
    pub numtests: Option<i32>,

    /// Emit system diagnostics after the plan (non-zero enables)
    #[bpaf(positional("DIAG"))]
    pub diag: Option<i32>,
}

#[derive(Debug, Clone, Bpaf)]
pub struct MatchArgs {
    /// Requirements YAML file, or '-' for standard input
    #[bpaf(positional("REQFILE"))]
    pub reqfile: String,

    /// Resources YAML file, or '-' for standard input
    #[bpaf(positional("RESFILE"))]
    pub resfile: Option<String>,

    /// Obtain resource state before matching (non-zero enables)
    #[bpaf(positional("GETSTATE"))]
    pub getstate: Option<i32>,

    /// Output format: 0 KEY=VALUE pairs, 1 YAML
    #[bpaf(positional("FMT"))]
    pub fmt: Option<i32>,
}

#[derive(Debug, Clone, Bpaf)]
pub struct YamlScalarArgs {
    /// Input file, or '-' for standard input
    #[bpaf(positional("FILE"))]
    pub file: String,

    /// Number of spaces to indent
    #[bpaf(positional("INDENT"))]
    pub indent: Option<usize>,

    /// Convert non-printable bytes to \xHH notation (non-zero enables)
    #[bpaf(positional("ESCAPE"))]
    pub escape: Option<i32>,
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version, fallback_to_usage, generate(cli))]
/// Test harness core: run test programs against matched resources and emit
/// canonical TAP13
struct Cli {
    #[bpaf(external(commands))]
    command: Commands,
}

#[derive(Debug, Clone, Bpaf)]
enum Commands {
    #[bpaf(command("count"))]
    /// Print the combined number of tests implemented by test executables
    Count(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(positional("EXEC"))] Vec<String>,
    ),

    #[bpaf(command("run"))]
    /// Run one test executable and emit canonical TAP13 results
    Run(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        /// Path to the test executable
        #[bpaf(positional("EXEC"))]
        String,
        #[bpaf(external(run_args))] RunArgs,
    ),

    #[bpaf(command("monitor"))]
    /// Tail-monitor named FIFOs into the canonical timestamped log
    Monitor(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(positional("NAME:PATH"))] Vec<String>,
    ),

    #[bpaf(command("format"))]
    /// Reformat a TAP stream
    Format(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(external(format_args))] FormatArgs,
    ),

    #[bpaf(command("eval"))]
    /// Evaluate a single typed resource comparison
    Eval(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        /// Comparison type (object, number, version, scalar)
        #[bpaf(positional("TYPE"))]
        String,
        /// Resource value
        #[bpaf(positional("RES"))]
        String,
        /// Requirement value with optional condition
        #[bpaf(positional("REQ"))]
        String,
    ),

    #[bpaf(command("yamlget"))]
    /// Print scalar data from a YAML file by path pattern
    Yamlget(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        /// YAML file to read
        #[bpaf(positional("FILE"))]
        String,
        #[bpaf(positional("PATH"))] Vec<String>,
    ),

    #[bpaf(command("fixname"))]
    /// Print the character-normalised form of a test name
    Fixname(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(positional("NAME"))] String,
    ),

    #[bpaf(command("match"))]
    /// Resolve test requirements against available resources
    Match(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(external(match_args))] MatchArgs,
    ),

    #[bpaf(command("yamlscalar"))]
    /// Emit file contents as an indented YAML block scalar
    Yamlscalar(
        #[bpaf(external(tela_cli_common::cli_global_options), hide_usage)] CliGlobalOptions,
        #[bpaf(external(yaml_scalar_args))] YamlScalarArgs,
    ),

    #[bpaf(command("version"))]
    /// Print version information
    Version,
}

/// Set up tracing from the CLI `--log-level` flag, falling back to the
/// `TELA_LOG` env filter.
fn setup_tracing(global: &CliGlobalOptions) {
    let filter = match global.log_level {
        tela_cli_common::LogLevel::None => {
            match tracing_subscriber::EnvFilter::try_from_env("TELA_LOG") {
                Ok(f) => f,
                Err(_) => return,
            }
        }
        tela_cli_common::LogLevel::Debug => tracing_subscriber::EnvFilter::new("debug"),
        tela_cli_common::LogLevel::Info => tracing_subscriber::EnvFilter::new("info"),
        tela_cli_common::LogLevel::Warn => tracing_subscriber::EnvFilter::new("warn"),
        tela_cli_common::LogLevel::Error => tracing_subscriber::EnvFilter::new("error"),
    };

    tracing_subscriber::registry()
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_indent_lines(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn setup(global: &CliGlobalOptions) {
    setup_tracing(global);
    tela_cli_common::init_context(global.colors, global.verbose);
    tela_cli_common::cleanup::install_fatal_signal_cleanup();
}

fn dispatch(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Count(global, execs) => {
            setup(&global);
            tela_run::count(&execs)
        }
        Commands::Run(global, exec, args) => {
            setup(&global);
            tela_run::run(
                &exec,
                args.scope,
                args.matchenv.as_deref(),
                args.matcherr.as_deref(),
            )
        }
        Commands::Monitor(global, streams) => {
            setup(&global);
            commands::monitor::run(&streams)
        }
        Commands::Format(global, args) => {
            setup(&global);
            tela_run::format(&args.input, args.numtests, args.diag.unwrap_or(0) != 0)
        }
        Commands::Eval(global, type_name, res, req) => {
            setup(&global);
            commands::eval::run(&type_name, &res, &req)
        }
        Commands::Yamlget(global, file, paths) => {
            setup(&global);
            commands::yamlget::run(&file, &paths)
        }
        Commands::Fixname(global, name) => {
            setup(&global);
            println!("{}", tela_tap::fix_testname(&name));
            Ok(0)
        }
        Commands::Match(global, args) => {
            setup(&global);
            commands::match_cmd::run(&args)
        }
        Commands::Yamlscalar(global, args) => {
            setup(&global);
            commands::yamlscalar::run(&args)
        }
        Commands::Version => {
            println!("tela {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let parsed = match cli().run_inner(bpaf::Args::current_args()) {
        Ok(parsed) => parsed,
        Err(failure) => {
            failure.print_message(100);
            let code = if failure.exit_code() == 0 {
                0
            } else {
                EXIT_SYNTAX
            };
            return ExitCode::from(u8::try_from(code).unwrap_or(1));
        }
    };

    let result = dispatch(parsed.command);
    tela_cli_common::cleanup::run_cleanup();

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            let code = if err.downcast_ref::<SyntaxError>().is_some() {
                EXIT_SYNTAX
            } else {
                EXIT_RUNTIME
            };
            eprintln!("Error: {err:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
