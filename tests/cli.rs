//! Binary-level behavior: configuration errors, dry runs, and the native
//! rsync fallback.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const CONFIG: &str = "\
environments:
- prefix: exodus
  gwenv: test-env

- prefix: exodus-native
  gwenv: test-env
  rsyncmode: rsync
";

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("subdir")).expect("subdir");
    fs::write(root.join("hello-copy-one"), b"hello\n").expect("write");
    fs::write(root.join("subdir/some-binary"), [0u8, 1, 2, 3]).expect("write");
}

/// Installs a stub rsync on PATH that records its argv and exits 0.
#[cfg(unix)]
fn install_stub_rsync(dir: &Path, log: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let script = format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > {}\nexit 0\n", log.display());
    let path = dir.join("rsync");
    fs::write(&path, script).expect("write stub");
    let mut permissions = fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("chmod");
}

fn exodus_rsync() -> Command {
    Command::cargo_bin("exodus-rsync").expect("binary built")
}

#[test]
fn missing_config_is_a_fatal_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("no-such.conf");

    exodus_rsync()
        .arg("--exodus-conf")
        .arg(&missing)
        .args(["src", "exodus:/dest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config"));
}

#[test]
fn dry_run_succeeds_without_a_gateway() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conf = temp.path().join("exodus-rsync.conf");
    fs::write(&conf, CONFIG).expect("write config");
    let root = temp.path().join("tree");
    write_tree(&root);

    exodus_rsync()
        .arg("--exodus-conf")
        .arg(&conf)
        .arg("--dry-run")
        .arg("-v")
        .arg(format!("{}/", root.display()))
        .arg("exodus:/some/target")
        .assert()
        .success()
        .stderr(predicate::str::contains("nothing published"));
}

#[cfg(unix)]
#[test]
fn unknown_destination_falls_back_to_native_rsync() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conf = temp.path().join("exodus-rsync.conf");
    fs::write(&conf, CONFIG).expect("write config");
    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).expect("bin");
    let log = temp.path().join("rsync-args.txt");
    install_stub_rsync(&bin, &log);

    exodus_rsync()
        .env("PATH", &bin)
        .arg("--exodus-conf")
        .arg(&conf)
        .args(["some-src", "remote-host:/dest"])
        .assert()
        .success();

    let recorded = fs::read_to_string(&log).expect("stub ran");
    assert!(recorded.contains("some-src"));
    assert!(recorded.contains("remote-host:/dest"));
    // The original argv is forwarded untouched, including our own flags.
    assert!(recorded.contains("--exodus-conf"));
}

#[cfg(unix)]
#[test]
fn rsync_mode_execs_native_rsync_with_rebuilt_argv() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conf = temp.path().join("exodus-rsync.conf");
    fs::write(&conf, CONFIG).expect("write config");
    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).expect("bin");
    let log = temp.path().join("rsync-args.txt");
    install_stub_rsync(&bin, &log);

    exodus_rsync()
        .env("PATH", &bin)
        .arg("--exodus-conf")
        .arg(&conf)
        .args(["--delete", "-z", "some-src", "exodus-native:/dest"])
        .assert()
        .success();

    let recorded = fs::read_to_string(&log).expect("stub ran");
    // Reconstructed rsync argv: compatibility flags survive, exodus flags do not.
    assert!(recorded.contains("--delete"));
    assert!(recorded.contains("--compress"));
    assert!(recorded.contains("some-src"));
    assert!(recorded.contains("exodus-native:/dest"));
    assert!(!recorded.contains("--exodus-conf"));
}

#[cfg(unix)]
#[test]
fn unrecognized_flags_fall_back_to_native_rsync() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).expect("bin");
    let log = temp.path().join("rsync-args.txt");
    install_stub_rsync(&bin, &log);

    exodus_rsync()
        .env("PATH", &bin)
        .args(["--block-size=128", "some-src", "some-dest"])
        .assert()
        .success();

    let recorded = fs::read_to_string(&log).expect("stub ran");
    assert!(recorded.contains("--block-size=128"));
}
