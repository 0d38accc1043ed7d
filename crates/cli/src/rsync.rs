//! Hand-off to the native rsync binary.
//!
//! When the destination is not a configured gateway environment, when the
//! arguments fall outside the supported subset, or when the environment is
//! configured with `rsyncmode: rsync`, the transfer belongs to the real
//! rsync. Since this program is typically installed under the name `rsync`,
//! the lookup must skip `PATH` entries that resolve to the running
//! executable.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Used when no other rsync can be found on `PATH`.
const FALLBACK_RSYNC: &str = "/usr/bin/rsync";

/// Locates the real rsync binary.
///
/// Searches `path_var` in order, skipping empty entries and any candidate
/// that resolves to `self_exe`. Falls back to `/usr/bin/rsync` when the
/// search comes up empty.
pub(crate) fn find_rsync(self_exe: Option<&Path>, path_var: &OsStr) -> PathBuf {
    let own = self_exe.and_then(|path| path.canonicalize().ok());
    for dir in env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join("rsync");
        if !is_executable(&candidate) {
            continue;
        }
        if let Some(own) = &own {
            if candidate.canonicalize().ok().as_ref() == Some(own) {
                continue;
            }
        }
        return candidate;
    }
    PathBuf::from(FALLBACK_RSYNC)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn locate() -> PathBuf {
    let path_var = env::var_os("PATH").unwrap_or_default();
    find_rsync(env::current_exe().ok().as_deref(), &path_var)
}

/// Replaces the current process with the native rsync.
///
/// Returns only when the exec itself fails.
pub(crate) fn exec_native(args: &[OsString]) -> io::Error {
    let program = locate();
    tracing::info!("delegating to {}", program.display());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        Command::new(&program).args(args).exec()
    }

    #[cfg(not(unix))]
    {
        match Command::new(&program).args(args).status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(error) => error,
        }
    }
}

/// Runs the native rsync as a child process, used by `rsyncmode: mixed`.
pub(crate) fn run_native(args: &[OsString]) -> io::Result<std::process::ExitStatus> {
    let program = locate();
    tracing::info!("running {} before gateway sync", program.display());
    Command::new(&program).args(args).status()
}

#[cfg(all(test, unix))]
mod tests {
    use super::find_rsync;
    use std::ffi::OsString;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn install_stub(dir: &Path) -> PathBuf {
        let path = dir.join("rsync");
        fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write stub");
        let mut permissions = fs::metadata(&path).expect("metadata").permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).expect("chmod");
        path
    }

    #[test]
    fn empty_path_falls_back_to_usr_bin() {
        let found = find_rsync(None, &OsString::new());
        assert_eq!(found, PathBuf::from("/usr/bin/rsync"));
    }

    #[test]
    fn finds_first_executable_on_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        fs::create_dir_all(&first).expect("first");
        fs::create_dir_all(&second).expect("second");
        install_stub(&second);

        let path_var =
            std::env::join_paths([first.as_path(), second.as_path()]).expect("join paths");
        let found = find_rsync(None, &path_var);
        assert_eq!(found, second.join("rsync"));
    }

    #[test]
    fn skips_entries_resolving_to_self() {
        let temp = tempfile::tempdir().expect("tempdir");
        let own_dir = temp.path().join("own");
        let real_dir = temp.path().join("real");
        fs::create_dir_all(&own_dir).expect("own");
        fs::create_dir_all(&real_dir).expect("real");
        let own = install_stub(&own_dir);
        install_stub(&real_dir);

        let path_var =
            std::env::join_paths([own_dir.as_path(), real_dir.as_path()]).expect("join paths");
        let found = find_rsync(Some(&own), &path_var);
        assert_eq!(found, real_dir.join("rsync"));
    }

    #[test]
    fn non_executable_candidates_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("bin");
        fs::create_dir_all(&dir).expect("dir");
        fs::write(dir.join("rsync"), "not a program").expect("write");

        let path_var = std::env::join_paths([dir.as_path()]).expect("join paths");
        let found = find_rsync(None, &path_var);
        assert_eq!(found, PathBuf::from("/usr/bin/rsync"));
    }
}
