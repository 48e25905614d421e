use std::io::BufReader;

use anyhow::Context as _;
use tela_yaml::sanitize_scalar;

use crate::YamlScalarArgs;

/// Emit a file (or stdin) as a YAML block scalar at the requested indent,
/// optionally escaping non-printable bytes.
pub fn run(args: &YamlScalarArgs) -> anyhow::Result<i32> {
    let indent = args.indent.unwrap_or(0);
    let escape = args.escape.unwrap_or(0) != 0;
    let mut out = std::io::stdout();

    if args.file == "-" {
        let stdin = std::io::stdin();
        sanitize_scalar(&mut stdin.lock(), &mut out, indent, escape)?;
    } else {
        let file = std::fs::File::open(&args.file)
            .with_context(|| format!("Could not open file '{}'", args.file))?;
        sanitize_scalar(&mut BufReader::new(file), &mut out, indent, escape)?;
    }

    Ok(0)
}
