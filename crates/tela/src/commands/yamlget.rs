use glob_match::glob_match;
use tela_cli_common::{shell, warn_pos};
use tela_yaml::{NodeKind, Visit, decode_path, traverse};

/// Print scalar data from a YAML file for every node whose path matches
/// one of the given patterns. Output is shell-sourceable.
pub fn run(file: &str, patterns: &[String]) -> anyhow::Result<i32> {
    let parsed = tela_yaml::parse_file(file);
    for issue in &parsed.issues {
        warn_pos(&issue.filename, issue.lineno, &issue.message);
    }
    let Some(mut root) = parsed.doc else {
        eprintln!("{file}: Empty or non-existent file");
        return Ok(1);
    };

    for pattern in patterns {
        traverse(&mut root, &mut |doc, iter| {
            if glob_match(pattern, &iter.path) {
                let path = decode_path(&iter.path);
                match doc.kind(iter.node) {
                    NodeKind::Scalar(content) => {
                        println!(
                            "YAMLPATH='{path}' VALUE='{}' TYPE='scalar'",
                            shell::escape_single(content)
                        );
                    }
                    NodeKind::Map { .. } => {
                        println!("YAMLPATH='{path}' VALUE='' TYPE='map'");
                    }
                    NodeKind::Seq(_) => {}
                }
            }
            Visit::Continue
        });
    }

    Ok(0)
}
