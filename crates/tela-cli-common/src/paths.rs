use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// Top-level directory of the test framework installation.
///
/// Taken from `TELA_FRAMEWORK`, falling back to `TELA_BASE` and finally the
/// current directory.
pub fn framework_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TELA_FRAMEWORK") {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("TELA_BASE") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Directory holding the framework's helper scripts.
pub fn libexec_dir(subdir: &str) -> PathBuf {
    let mut dir = framework_dir();
    dir.push("libexec");
    if !subdir.is_empty() {
        dir.push(subdir);
    }
    dir
}

/// Run a libexec helper script and capture its standard output. The script
/// runs with the libexec directory as working directory. Returns `None`
/// if the script could not be started.
pub fn internal_cmd(subdir: &str, cmd: &str, args: &[&str]) -> Option<Vec<u8>> {
    let dir = libexec_dir(subdir);
    let path = dir.join(cmd);

    debug!(script = %path.display(), ?args, "running internal command");
    let output = Command::new(&path)
        .args(args)
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .ok()?;

    Some(output.stdout)
}

/// Return `path` relative to `base`, or to `TELA_TESTBASE` when no base is
/// given. Paths outside the base are returned unchanged.
pub fn relpath(path: &str, base: Option<&str>) -> String {
    let base = match base {
        Some(b) => Some(b.to_string()),
        None => std::env::var("TELA_TESTBASE").ok(),
    };
    if let Some(base) = base {
        if let Some(rest) = path.strip_prefix(&base) {
            return rest.strip_prefix('/').unwrap_or(rest).to_string();
        }
    }
    path.to_string()
}

/// Return the absolute path to `path` without resolving links in the final
/// component.
pub fn abspath(path: &Path) -> Option<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let absdir = std::fs::canonicalize(parent).ok()?;
    Some(match path.file_name() {
        Some(name) => absdir.join(name),
        None => absdir,
    })
}
