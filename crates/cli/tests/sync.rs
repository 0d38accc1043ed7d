//! End-to-end sync scenarios driven through [`exodus_cli::run`] with an
//! in-memory gateway.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::sync::{Arc, Mutex};

use exodus_cli::{GatewayFactory, SyncError};
use exodus_conf::{Config, Environment};
use exodus_gw::{CancelToken, Client, GatewayError, ItemInput, Publish};
use exodus_walk::SyncItem;

const CONFIG: &str = "\
environments:
- prefix: exodus
  gwenv: best-env

- prefix: exodus-mixed
  gwenv: best-env
  rsyncmode: mixed
";

const HELLO_KEY: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

#[derive(Debug, Default)]
struct FakeState {
    /// key -> source path the blob was uploaded from.
    blobs: HashMap<String, String>,
    publishes: Vec<FakePublish>,
}

#[derive(Debug)]
struct FakePublish {
    id: String,
    items: Vec<ItemInput>,
    committed: u32,
}

#[derive(Clone, Default)]
struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    fn seed_publish(&self, id: &str) {
        self.state.lock().expect("state lock").publishes.push(FakePublish {
            id: id.to_string(),
            items: Vec::new(),
            committed: 0,
        });
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("state lock")
    }
}

impl GatewayFactory for FakeGateway {
    fn new_client(
        &self,
        _config: &Config,
        environment: &Environment,
        _cancel: CancelToken,
    ) -> Result<Box<dyn Client>, SyncError> {
        assert_eq!(environment.gwenv, "best-env");
        Ok(Box::new(FakeClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl Client for FakeClient {
    fn ensure_uploaded(
        &self,
        items: &[SyncItem],
        on_uploaded: exodus_gw::ItemCallback<'_>,
        on_existing: exodus_gw::ItemCallback<'_>,
    ) -> Result<(), GatewayError> {
        for item in items {
            let known = {
                let mut state = self.state.lock().expect("state lock");
                if state.blobs.contains_key(&item.key) {
                    true
                } else {
                    state.blobs.insert(
                        item.key.clone(),
                        item.src_path.display().to_string(),
                    );
                    false
                }
            };
            if known {
                on_existing(item)?;
            } else {
                on_uploaded(item)?;
            }
        }
        Ok(())
    }

    fn new_publish(&self) -> Result<Box<dyn Publish>, GatewayError> {
        let mut state = self.state.lock().expect("state lock");
        let index = state.publishes.len();
        state.publishes.push(FakePublish {
            id: "some-publish".to_string(),
            items: Vec::new(),
            committed: 0,
        });
        Ok(Box::new(FakePublishHandle {
            state: Arc::clone(&self.state),
            index,
            id: "some-publish".to_string(),
        }))
    }

    fn get_publish(&self, id: &str) -> Box<dyn Publish> {
        let state = self.state.lock().expect("state lock");
        match state.publishes.iter().position(|publish| publish.id == id) {
            Some(index) => Box::new(FakePublishHandle {
                state: Arc::clone(&self.state),
                index,
                id: id.to_string(),
            }),
            None => Box::new(BrokenPublish { id: id.to_string() }),
        }
    }

    fn whoami(&self) -> Result<serde_json::Value, GatewayError> {
        Ok(serde_json::json!({"whoami": "fake-info"}))
    }
}

struct FakePublishHandle {
    state: Arc<Mutex<FakeState>>,
    index: usize,
    id: String,
}

impl Publish for FakePublishHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_items(&mut self, items: &[ItemInput]) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("state lock");
        let publish = &mut state.publishes[self.index];
        if publish.committed != 0 {
            return Err(GatewayError::Committed {
                id: publish.id.clone(),
            });
        }
        publish.items.extend_from_slice(items);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("state lock");
        state.publishes[self.index].committed += 1;
        Ok(())
    }
}

struct BrokenPublish {
    id: String,
}

impl Publish for BrokenPublish {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_items(&mut self, _items: &[ItemInput]) -> Result<(), GatewayError> {
        Err(GatewayError::Status {
            context: format!("add items to publish {}", self.id),
            status: 404,
        })
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        Err(GatewayError::Status {
            context: format!("commit publish {}", self.id),
            status: 404,
        })
    }
}

struct Scenario {
    _temp: tempfile::TempDir,
    conf_path: std::path::PathBuf,
    root: std::path::PathBuf,
    gateway: FakeGateway,
}

impl Scenario {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let conf_path = temp.path().join("exodus-rsync.conf");
        fs::write(&conf_path, CONFIG).expect("write config");
        let root = temp.path().join("srctrees");
        fs::create_dir_all(&root).expect("srctrees");
        Self {
            _temp: temp,
            conf_path,
            root,
            gateway: FakeGateway::default(),
        }
    }

    fn write_just_files(&self) {
        let tree = self.root.join("just-files");
        fs::create_dir_all(tree.join("subdir")).expect("subdir");
        fs::write(tree.join("hello-copy-one"), b"hello\n").expect("write");
        fs::write(tree.join("hello-copy-two"), b"hello\n").expect("write");
        fs::write(tree.join("subdir/some-binary"), [0u8, 1, 2, 3]).expect("write");
    }

    fn run(&self, args: &[&str]) -> i32 {
        let mut argv: Vec<OsString> = vec![
            OsString::from("rsync"),
            OsString::from("--exodus-conf"),
            self.conf_path.clone().into_os_string(),
        ];
        argv.extend(args.iter().map(OsString::from));
        exodus_cli::run(argv, &self.gateway)
    }

    fn binary_key(&self) -> String {
        exodus_walk::hash_file(&self.root.join("just-files/subdir/some-binary")).expect("hash")
    }
}

/// Builds a URI -> key map, asserting each URI was published exactly once.
fn item_map(publish: &FakePublish) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for item in &publish.items {
        let previous = map.insert(item.web_uri.clone(), item.object_key.clone());
        assert!(
            previous.is_none(),
            "URI published more than once: {}",
            item.web_uri
        );
    }
    map
}

fn expect_map(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(uri, key)| (uri.to_string(), key.to_string()))
        .collect()
}

#[test]
fn typical_sync_uploads_and_commits() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = format!("{}/", scenario.root.join("just-files").display());

    let status = scenario.run(&[&src, "exodus:/some/target"]);
    assert_eq!(status, 0);

    let binary_key = scenario.binary_key();
    let state = scenario.gateway.state();

    // One upload per distinct key; the hello blob comes from either copy.
    let hello_src = &state.blobs[HELLO_KEY];
    assert!(
        hello_src.ends_with("hello-copy-one") || hello_src.ends_with("hello-copy-two"),
        "hello uploaded from unexpected path {hello_src}"
    );
    assert!(state.blobs[&binary_key].ends_with("subdir/some-binary"));

    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];
    assert_eq!(
        item_map(publish),
        expect_map(&[
            ("/some/target/hello-copy-one", HELLO_KEY),
            ("/some/target/hello-copy-two", HELLO_KEY),
            ("/some/target/subdir/some-binary", binary_key.as_str()),
        ])
    );
    assert_eq!(publish.committed, 1);
}

#[test]
fn filter_sync_limits_published_items() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    fs::write(scenario.root.join("some.conf"), b"[config]\n").expect("write");
    let src = format!("{}/", scenario.root.display());

    let status = scenario.run(&[
        "--filter",
        "+ */",
        "--filter",
        "+/ **/hello-copy*",
        "--filter",
        "- *",
        &src,
        "exodus:/some/target",
    ]);
    assert_eq!(status, 0);

    let state = scenario.gateway.state();
    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];
    assert_eq!(
        item_map(publish),
        expect_map(&[
            ("/some/target/just-files/hello-copy-one", HELLO_KEY),
            ("/some/target/just-files/hello-copy-two", HELLO_KEY),
        ])
    );
    assert_eq!(publish.committed, 1);
}

#[cfg(unix)]
#[test]
fn sync_follows_links() {
    use std::os::unix::fs::symlink;

    let scenario = Scenario::new();
    let links = scenario.root.join("links");
    fs::create_dir_all(links.join("subdir")).expect("subdir");
    fs::create_dir_all(links.join("subdir2")).expect("subdir2");
    fs::write(links.join("subdir/regular-file"), b"hello\n").expect("write");
    fs::write(links.join("subdir/rand1"), b"first random payload\n").expect("write");
    fs::write(links.join("subdir/rand2"), b"second random payload\n").expect("write");
    symlink(links.join("subdir/regular-file"), links.join("link-to-regular-file"))
        .expect("file link");
    symlink(links.join("subdir"), links.join("subdir2/dir-link")).expect("dir link");

    let rand1 = exodus_walk::hash_file(&links.join("subdir/rand1")).expect("hash");
    let rand2 = exodus_walk::hash_file(&links.join("subdir/rand2")).expect("hash");

    let src = format!("{}/", links.display());
    let status = scenario.run(&["-vvv", &src, "exodus:/dest"]);
    assert_eq!(status, 0);

    let state = scenario.gateway.state();
    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];
    assert_eq!(
        item_map(publish),
        expect_map(&[
            ("/dest/link-to-regular-file", HELLO_KEY),
            ("/dest/subdir/regular-file", HELLO_KEY),
            ("/dest/subdir/rand1", rand1.as_str()),
            ("/dest/subdir/rand2", rand2.as_str()),
            ("/dest/subdir2/dir-link/regular-file", HELLO_KEY),
            ("/dest/subdir2/dir-link/rand1", rand1.as_str()),
            ("/dest/subdir2/dir-link/rand2", rand2.as_str()),
        ])
    );
    assert_eq!(publish.committed, 1);
}

#[test]
fn no_trailing_slash_repeats_basename() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = scenario.root.join("just-files").display().to_string();

    let status = scenario.run(&["-vvv", &src, "exodus:/dest"]);
    assert_eq!(status, 0);

    let binary_key = scenario.binary_key();
    let state = scenario.gateway.state();
    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];
    assert_eq!(
        item_map(publish),
        expect_map(&[
            ("/dest/just-files/hello-copy-one", HELLO_KEY),
            ("/dest/just-files/hello-copy-two", HELLO_KEY),
            ("/dest/just-files/subdir/some-binary", binary_key.as_str()),
        ])
    );
    assert_eq!(publish.committed, 1);
}

#[test]
fn files_from_implies_relative_paths() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    fs::write(scenario.root.join("some.conf"), b"[config]\n").expect("write");

    let list = scenario.root.parent().expect("parent").join("source-list.txt");
    fs::write(&list, "just-files/subdir/some-binary\nsome.conf\n").expect("write list");

    let src = format!("{}/", scenario.root.display());
    let list_arg = list.display().to_string();
    let status = scenario.run(&["-vvv", "--files-from", &list_arg, &src, "exodus:/dest"]);
    assert_eq!(status, 0);

    let binary_key = scenario.binary_key();
    let conf_key = exodus_walk::hash_file(&scenario.root.join("some.conf")).expect("hash");
    let abs_root = scenario.root.display().to_string();

    let state = scenario.gateway.state();
    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];

    // --relative is implied: the full source path lands under the destination.
    let expected = expect_map(&[
        (
            format!("/dest{abs_root}/just-files/subdir/some-binary").as_str(),
            binary_key.as_str(),
        ),
        (
            format!("/dest{abs_root}/some.conf").as_str(),
            conf_key.as_str(),
        ),
    ]);
    assert_eq!(item_map(publish), expected);
    assert_eq!(publish.committed, 1);
}

#[test]
fn join_publish_adds_items_without_commit() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    scenario.gateway.seed_publish("abc123");
    let src = scenario.root.join("just-files").display().to_string();

    let status = scenario.run(&["-vvv", "--exodus-publish", "abc123", &src, "exodus:/dest"]);
    assert_eq!(status, 0);

    let binary_key = scenario.binary_key();
    let state = scenario.gateway.state();

    // The existing publish was used; nothing new was created or committed.
    assert_eq!(state.publishes.len(), 1);
    let publish = &state.publishes[0];
    assert_eq!(publish.committed, 0);
    assert_eq!(
        item_map(publish),
        expect_map(&[
            ("/dest/just-files/hello-copy-one", HELLO_KEY),
            ("/dest/just-files/hello-copy-two", HELLO_KEY),
            ("/dest/just-files/subdir/some-binary", binary_key.as_str()),
        ])
    );
}

#[test]
fn join_unknown_publish_fails() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = scenario.root.join("just-files").display().to_string();

    let status = scenario.run(&["--exodus-publish", "missing", &src, "exodus:/dest"]);
    assert_ne!(status, 0);

    let state = scenario.gateway.state();
    assert!(state.publishes.is_empty());
}

#[test]
fn second_sync_uploads_nothing_new() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = format!("{}/", scenario.root.join("just-files").display());

    assert_eq!(scenario.run(&[&src, "exodus:/some/target"]), 0);
    let blobs_after_first = scenario.gateway.state().blobs.clone();

    assert_eq!(scenario.run(&[&src, "exodus:/some/target"]), 0);
    let state = scenario.gateway.state();

    // All blobs were already present; the second publish carries the same
    // item set.
    assert_eq!(state.blobs, blobs_after_first);
    assert_eq!(state.publishes.len(), 2);
    assert_eq!(
        item_map(&state.publishes[0]),
        item_map(&state.publishes[1])
    );
    assert_eq!(state.publishes[1].committed, 1);
}

#[test]
fn dry_run_touches_nothing() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = format!("{}/", scenario.root.join("just-files").display());

    let status = scenario.run(&["--dry-run", &src, "exodus:/some/target"]);
    assert_eq!(status, 0);

    let state = scenario.gateway.state();
    assert!(state.blobs.is_empty());
    assert!(state.publishes.is_empty());
}

#[test]
fn missing_source_fails_after_publish_created() {
    let scenario = Scenario::new();
    let src = scenario.root.join("no-such-tree").display().to_string();

    let status = scenario.run(&[&src, "exodus:/dest"]);
    assert_ne!(status, 0);

    // The publish opened before the walk stays open for a retry via
    // --exodus-publish.
    let state = scenario.gateway.state();
    assert_eq!(state.publishes.len(), 1);
    assert_eq!(state.publishes[0].committed, 0);
}

#[test]
fn diag_reports_identity_without_publishing() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = format!("{}/", scenario.root.join("just-files").display());

    let status = scenario.run(&["--exodus-diag", &src, "exodus:/dest"]);
    assert_eq!(status, 0);

    let state = scenario.gateway.state();
    assert!(state.blobs.is_empty());
    assert!(state.publishes.is_empty());
}

#[test]
fn config_error_is_fatal() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    fs::write(&scenario.conf_path, "environments: {not: a list}\n").expect("write");
    let src = format!("{}/", scenario.root.join("just-files").display());

    let status = scenario.run(&[&src, "exodus:/dest"]);
    assert_ne!(status, 0);
    assert!(scenario.gateway.state().publishes.is_empty());
}

#[test]
fn walk_failure_before_publish_when_filter_invalid() {
    let scenario = Scenario::new();
    scenario.write_just_files();
    let src = format!("{}/", scenario.root.join("just-files").display());

    let status = scenario.run(&["--filter", "bogus rule", &src, "exodus:/dest"]);
    assert_ne!(status, 0);

    // Filter compilation happens before any publish is opened.
    let state = scenario.gateway.state();
    assert!(state.publishes.is_empty());
}
