//! The sync orchestrator: walk, upload, publish, commit.

use std::io;
use std::process::ExitStatus;
use std::sync::Mutex;

use thiserror::Error;

use exodus_conf::{ConfError, Config, Environment};
use exodus_filters::{FilterError, FilterSet};
use exodus_gw::{CancelToken, Client, GatewayError, ItemInput};
use exodus_walk::{SyncItem, WalkBuilder, WalkError};

use crate::args::Arguments;
use crate::GatewayFactory;

/// Upper bound on the number of items sent per add-items request.
const ADD_ITEMS_BATCH: usize = 1000;

/// Errors surfaced by a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration could not be loaded or is incomplete.
    #[error(transparent)]
    Config(#[from] ConfError),
    /// The destination matches no configured environment.
    #[error("no environment configured for destination '{dest}'")]
    NoEnvironment {
        /// The destination argument as given.
        dest: String,
    },
    /// A filter rule failed to parse or compile.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// The source walk failed.
    #[error(transparent)]
    Walk(#[from] WalkError),
    /// A gateway operation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The native rsync could not be started.
    #[error("failed to run native rsync: {0}")]
    RsyncSpawn(#[source] io::Error),
    /// The native rsync ran and reported failure.
    #[error("native rsync failed: {status}")]
    RsyncFailed {
        /// Exit status reported by the child process.
        status: ExitStatus,
    },
    /// The run was interrupted.
    #[error("sync cancelled")]
    Cancelled,
}

/// One sync invocation against a selected environment.
pub(crate) struct SyncCommand<'a> {
    pub arguments: &'a Arguments,
    pub config: &'a Config,
    pub gateway: &'a dyn GatewayFactory,
    pub cancel: &'a CancelToken,
}

impl SyncCommand<'_> {
    pub(crate) fn run(&self) -> Result<(), SyncError> {
        let arguments = self.arguments;
        let (environment, dest_path) = self
            .config
            .environment_for(&arguments.dest)
            .ok_or_else(|| SyncError::NoEnvironment {
                dest: arguments.dest.clone(),
            })?;

        let filter = FilterSet::parse(&arguments.ordered_rules)?;
        let mut walk = WalkBuilder::new(arguments.src.as_str())
            .filter(filter)
            .relative(arguments.relative);
        if let Some(list) = &arguments.files_from {
            walk = walk.files_from(list);
        }

        if arguments.dry_run {
            let items = walk.build()?.collect_items()?;
            for item in &items {
                tracing::info!(
                    "would publish {} as {}",
                    item.src_path.display(),
                    join_uri(dest_path, &item.rel_path)
                );
            }
            tracing::info!("dry run: {} items, nothing published", items.len());
            return Ok(());
        }

        let client =
            self.gateway
                .new_client(self.config, environment, self.cancel.clone())?;

        if arguments.diag {
            return diagnose(client.as_ref(), environment);
        }

        let (mut publish, joined) = match &arguments.publish_id {
            Some(id) => {
                tracing::info!("joining publish {id}");
                (client.get_publish(id), true)
            }
            None => {
                let publish = client.new_publish()?;
                tracing::info!("created publish {}", publish.id());
                (publish, false)
            }
        };

        let items = walk.build()?.collect_items()?;
        tracing::info!("gathered {} items from {}", items.len(), arguments.src);

        let staged = Mutex::new(Vec::with_capacity(items.len()));
        let stage = |item: &SyncItem, verb: &str| -> Result<(), GatewayError> {
            if self.cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let web_uri = join_uri(dest_path, &item.rel_path);
            tracing::trace!("{verb}: {web_uri} ({})", item.key);
            staged
                .lock()
                .expect("staging lock poisoned")
                .push(ItemInput {
                    web_uri,
                    object_key: item.key.clone(),
                });
            Ok(())
        };
        client.ensure_uploaded(
            &items,
            &|item| stage(item, "uploaded"),
            &|item| stage(item, "existing"),
        )?;

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let staged = staged.into_inner().expect("staging lock poisoned");
        for batch in staged.chunks(ADD_ITEMS_BATCH) {
            publish.add_items(batch)?;
        }

        if joined {
            tracing::info!(
                "publish {} left open; committing is up to the caller",
                publish.id()
            );
        } else {
            publish.commit()?;
            tracing::info!("committed publish {}", publish.id());
        }

        tracing::info!("published {} items to {}", staged.len(), arguments.dest);
        Ok(())
    }
}

fn diagnose(client: &dyn Client, environment: &Environment) -> Result<(), SyncError> {
    let identity = client.whoami()?;
    let report = serde_json::json!({
        "environment": {
            "prefix": environment.prefix,
            "gwenv": environment.gwenv,
        },
        "whoami": identity,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("diagnostics serialize")
    );
    Ok(())
}

/// Joins a destination path and a relative path, collapsing repeated `/`.
fn join_uri(base: &str, rel: &str) -> String {
    let joined = format!("{base}/{rel}");
    let mut uri = String::with_capacity(joined.len() + 1);
    if !joined.starts_with('/') {
        uri.push('/');
    }
    let mut previous_slash = false;
    for ch in joined.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        uri.push(ch);
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::join_uri;

    #[test]
    fn joins_and_normalizes() {
        assert_eq!(join_uri("/some/target", "file"), "/some/target/file");
        assert_eq!(join_uri("/some/target/", "sub/file"), "/some/target/sub/file");
        assert_eq!(join_uri("/dest", "tmp/src/entry"), "/dest/tmp/src/entry");
        assert_eq!(join_uri("/dest//", "//x"), "/dest/x");
    }

    #[test]
    fn prepends_missing_root() {
        assert_eq!(join_uri("dest", "file"), "/dest/file");
    }
}
