//! HTTP implementation of the gateway [`Client`].

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use exodus_walk::SyncItem;
use serde::Deserialize;

use crate::retry::{with_retries, RetryOn};
use crate::{CancelToken, Client, GatewayError, ItemCallback, Publish, RetryPolicy};

/// Default size of the upload worker pool.
pub const DEFAULT_WORKERS: usize = 4;

/// Timeout applied to control-plane requests.
pub(crate) const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

// Uploads get a generous floor plus one second per MiB of payload.
const UPLOAD_BYTES_PER_SEC: u64 = 1024 * 1024;

fn upload_timeout(length: u64) -> Duration {
    CONTROL_TIMEOUT + Duration::from_secs(length / UPLOAD_BYTES_PER_SEC)
}

/// Configures an [`HttpClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: String,
    environment: String,
    workers: usize,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl ClientBuilder {
    /// Creates a builder for the gateway at `base_url` serving `environment`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            environment: environment.into(),
            workers: DEFAULT_WORKERS,
            policy: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the upload worker pool size.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Installs the cancellation token checked before every request.
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> HttpClient {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        HttpClient {
            shared: Arc::new(Shared {
                agent: ureq::AgentBuilder::new().build(),
                base_url,
                environment: self.environment,
                workers: self.workers,
                policy: self.policy,
                cancel: self.cancel,
                known_keys: Mutex::new(HashSet::new()),
                key_locks: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Gateway client speaking the HTTP wire protocol.
pub struct HttpClient {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) agent: ureq::Agent,
    pub(crate) base_url: String,
    pub(crate) environment: String,
    pub(crate) workers: usize,
    pub(crate) policy: RetryPolicy,
    pub(crate) cancel: CancelToken,
    known_keys: Mutex<HashSet<String>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Deserialize)]
struct PublishState {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    state: Option<String>,
}

impl Shared {
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn is_known(&self, key: &str) -> bool {
        self.known_keys
            .lock()
            .expect("known-keys lock poisoned")
            .contains(key)
    }

    fn mark_known(&self, key: &str) {
        self.known_keys
            .lock()
            .expect("known-keys lock poisoned")
            .insert(key.to_string());
    }

    // The per-key lock serializes uploads of a key process-wide; it is the
    // only lock held across a network request.
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.key_locks
                .lock()
                .expect("key-locks lock poisoned")
                .entry(key.to_string())
                .or_default(),
        )
    }

    fn blob_exists(&self, key: &str) -> Result<bool, GatewayError> {
        let context = format!("check for blob {key}");
        let url = self.url(&format!("/upload/{key}"));
        with_retries(
            &self.policy,
            &self.cancel,
            RetryOn::RetryableStatus,
            &context,
            || match self.agent.head(&url).timeout(CONTROL_TIMEOUT).call() {
                Ok(_) => Ok(true),
                Err(ureq::Error::Status(404, _)) => Ok(false),
                Err(error) => Err(GatewayError::from_ureq(&context, error)),
            },
        )
    }

    fn upload_blob(&self, item: &SyncItem) -> Result<(), GatewayError> {
        let context = format!("upload blob {}", item.key);
        let url = self.url(&format!("/upload/{}", item.key));
        with_retries(
            &self.policy,
            &self.cancel,
            RetryOn::RetryableStatus,
            &context,
            || {
                let file = File::open(&item.src_path)
                    .map_err(|error| GatewayError::source_file(item.src_path.clone(), error))?;
                let length = file
                    .metadata()
                    .map_err(|error| GatewayError::source_file(item.src_path.clone(), error))?
                    .len();
                let request = self
                    .agent
                    .put(&url)
                    .timeout(upload_timeout(length))
                    .set("Content-Type", "application/octet-stream")
                    .set("Content-Length", &length.to_string());
                match request.send(file) {
                    Ok(_) => Ok(()),
                    // 409 means some other writer got there first.
                    Err(ureq::Error::Status(409, _)) => Ok(()),
                    Err(error) => Err(GatewayError::from_ureq(&context, error)),
                }
            },
        )
    }

    fn process_item(
        &self,
        item: &SyncItem,
        on_uploaded: ItemCallback<'_>,
        on_existing: ItemCallback<'_>,
    ) -> Result<(), GatewayError> {
        let lock = self.key_lock(&item.key);
        let _guard = lock.lock().expect("key lock poisoned");

        if self.is_known(&item.key) {
            tracing::trace!("blob {} already handled in this run", item.key);
            return on_existing(item);
        }

        if self.blob_exists(&item.key)? {
            self.mark_known(&item.key);
            tracing::debug!("blob {} already present in gateway", item.key);
            return on_existing(item);
        }

        self.upload_blob(item)?;
        self.mark_known(&item.key);
        tracing::debug!(
            "uploaded blob {} from {}",
            item.key,
            item.src_path.display()
        );
        on_uploaded(item)
    }
}

impl Client for HttpClient {
    fn ensure_uploaded(
        &self,
        items: &[SyncItem],
        on_uploaded: ItemCallback<'_>,
        on_existing: ItemCallback<'_>,
    ) -> Result<(), GatewayError> {
        if items.is_empty() {
            return Ok(());
        }

        let shared = &self.shared;
        let queue = Mutex::new(items.iter());
        let failure: Mutex<Option<GatewayError>> = Mutex::new(None);
        let workers = shared.workers.min(items.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if shared.cancel.is_cancelled()
                        || failure.lock().expect("failure lock poisoned").is_some()
                    {
                        break;
                    }
                    let next = queue.lock().expect("queue lock poisoned").next();
                    let Some(item) = next else { break };
                    if let Err(error) = shared.process_item(item, on_uploaded, on_existing) {
                        failure
                            .lock()
                            .expect("failure lock poisoned")
                            .get_or_insert(error);
                        break;
                    }
                });
            }
        });

        if let Some(error) = failure.into_inner().expect("failure lock poisoned") {
            return Err(error);
        }
        if shared.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        Ok(())
    }

    fn new_publish(&self) -> Result<Box<dyn Publish>, GatewayError> {
        let context = "create publish";
        let url = self.shared.url("/publish");
        let created: PublishState = with_retries(
            &self.shared.policy,
            &self.shared.cancel,
            RetryOn::RetryableStatus,
            context,
            || {
                let response = self
                    .shared
                    .agent
                    .post(&url)
                    .timeout(CONTROL_TIMEOUT)
                    .call()
                    .map_err(|error| GatewayError::from_ureq(context, error))?;
                response
                    .into_json()
                    .map_err(|error| GatewayError::malformed(context, error))
            },
        )?;
        tracing::debug!(
            "created publish {} in environment {}",
            created.id,
            self.shared.environment
        );
        Ok(Box::new(crate::HttpPublish::new(
            Arc::clone(&self.shared),
            created.id,
        )))
    }

    fn get_publish(&self, id: &str) -> Box<dyn Publish> {
        Box::new(crate::HttpPublish::new(
            Arc::clone(&self.shared),
            id.to_string(),
        ))
    }

    fn whoami(&self) -> Result<serde_json::Value, GatewayError> {
        let context = "whoami";
        let url = self.shared.url("/whoami");
        with_retries(
            &self.shared.policy,
            &self.shared.cancel,
            RetryOn::RetryableStatus,
            context,
            || {
                let response = self
                    .shared
                    .agent
                    .get(&url)
                    .timeout(CONTROL_TIMEOUT)
                    .call()
                    .map_err(|error| GatewayError::from_ureq(context, error))?;
                response
                    .into_json()
                    .map_err(|error| GatewayError::malformed(context, error))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::upload_timeout;
    use std::time::Duration;

    #[test]
    fn upload_timeout_scales_with_size() {
        assert_eq!(upload_timeout(0), Duration::from_secs(60));
        assert_eq!(upload_timeout(1024 * 1024), Duration::from_secs(61));
        assert_eq!(
            upload_timeout(100 * 1024 * 1024),
            Duration::from_secs(160)
        );
    }
}
