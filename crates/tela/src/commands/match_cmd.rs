use std::io::{BufRead, BufReader};
use std::path::Path;

use tela_cli_common::{SyntaxError, context, paths, shell};
use tela_resource::Resolution;

use crate::MatchArgs;

const FMT_ENV: i32 = 0;
const FMT_YAML: i32 = 1;

/// Try to match a requirements file against a resource file. On success
/// the bindings are printed as sourceable `KEY="VALUE"` pairs or as the
/// matched-resource YAML document, depending on the format argument.
pub fn run(args: &MatchArgs) -> anyhow::Result<i32> {
    let reqfile = if args.reqfile == "-" {
        args.reqfile.clone()
    } else {
        paths::abspath(Path::new(&args.reqfile))
            .map_or_else(|| args.reqfile.clone(), |p| p.to_string_lossy().to_string())
    };

    let resfile = match &args.resfile {
        Some(resfile) if !resfile.is_empty() => {
            if reqfile == "-" && resfile == "-" {
                return Err(
                    SyntaxError("Cannot specify both input files as '-'".into()).into(),
                );
            }
            Some(resfile.clone())
        }
        _ => tela_resource::get_resource_path()?.map(|p| p.to_string_lossy().to_string()),
    };

    let getstate = args.getstate.unwrap_or(0) != 0;
    let fmt = args.fmt.unwrap_or(FMT_ENV);

    context().set_stdout_tap(true);
    let resolution = tela_resource::resolve(
        &reqfile,
        resfile.as_deref(),
        true,
        getstate,
        fmt == FMT_YAML,
    )?;

    match resolution {
        Resolution::NoMatch { reason } => {
            eprintln!("{reason}");
            Ok(1)
        }
        Resolution::Match { env, matchfile } => {
            match fmt {
                FMT_ENV => {
                    /* Quote values so the output can be sourced by a
                     * shell. */
                    for entry in &env {
                        if let Some((key, value)) = entry.split_once('=') {
                            println!("{key}=\"{}\"", shell::escape_double(value));
                        }
                    }
                }
                FMT_YAML => {
                    if let Some(matchfile) = &matchfile {
                        let file = std::fs::File::open(matchfile)?;
                        for line in BufReader::new(file).lines() {
                            println!("{}", line?);
                        }
                    }
                }
                _ => {}
            }
            Ok(0)
        }
    }
}
