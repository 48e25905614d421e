use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nix::sys::signal::{SigHandler, Signal, signal};

static CLEANUP: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Register a temporary path for removal at process end or on a fatal
/// signal.
pub fn add_cleanup(path: &Path) {
    if let Ok(mut list) = CLEANUP.lock() {
        list.push(path.to_path_buf());
    }
}

/// Drop a path from the cleanup registry without removing it.
pub fn forget_cleanup(path: &Path) {
    if let Ok(mut list) = CLEANUP.lock() {
        list.retain(|p| p != path);
    }
}

/// Clear the registry without removing anything. Called in worker processes
/// that inherited the parent's registry state.
pub fn flush_cleanup() {
    if let Ok(mut list) = CLEANUP.lock() {
        list.clear();
    }
}

/// Remove all registered temporary paths.
pub fn run_cleanup() {
    let paths: Vec<PathBuf> = match CLEANUP.lock() {
        Ok(mut list) => list.drain(..).collect(),
        Err(_) => return,
    };
    for path in paths.iter().rev() {
        let _ = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
    }
}

extern "C" fn fatal_handler(signum: nix::libc::c_int) {
    run_cleanup();
    if let Ok(sig) = Signal::try_from(signum) {
        unsafe {
            let _ = signal(sig, SigHandler::SigDfl);
        }
        let _ = nix::sys::signal::raise(sig);
    }
}

/// Install handlers that run the temp-path cleanup and re-raise on fatal
/// signals.
pub fn install_fatal_signal_cleanup() {
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        unsafe {
            let _ = signal(sig, SigHandler::Handler(fatal_handler));
        }
    }
}

/// Create a temporary directory named `tela.*`, preferring `TMPDIR`, then
/// `preferred`, then the system temp directory. The directory is registered
/// for cleanup.
pub fn mktempdir(preferred: Option<&Path>) -> std::io::Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::env::var("TMPDIR") {
        candidates.push(PathBuf::from(dir));
    }
    if let Some(dir) = preferred {
        candidates.push(dir.to_path_buf());
    }
    candidates.push(std::env::temp_dir());
    candidates.push(PathBuf::from("/tmp"));

    let mut last_err = std::io::Error::other("no temporary directory candidates");
    for dir in candidates {
        match tempfile::Builder::new().prefix("tela.").tempdir_in(&dir) {
            Ok(tmp) => {
                let path = tmp.keep();
                add_cleanup(&path);
                return Ok(path);
            }
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

/// Create a temporary file registered for cleanup. Returns the open file
/// and its path.
pub fn mktempfile() -> std::io::Result<(std::fs::File, PathBuf)> {
    let tmp = tempfile::Builder::new().prefix("tela.").tempfile()?;
    let (file, path) = tmp.keep().map_err(|e| e.error)?;
    add_cleanup(&path);
    Ok((file, path))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tempdir_is_created_and_cleaned() {
        let dir = mktempdir(None).unwrap();
        assert!(dir.is_dir());
        assert!(
            dir.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("tela.")
        );
        run_cleanup();
        assert!(!dir.exists());
    }

    #[test]
    fn tempfile_is_registered() {
        let (_file, path) = mktempfile().unwrap();
        assert!(path.exists());
        forget_cleanup(&path);
        std::fs::remove_file(&path).unwrap();
    }
}
