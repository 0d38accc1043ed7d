#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `exodus_gw` talks to the content-addressed storage gateway. It uploads
//! blobs keyed by SHA-256 (each at most once per process), manages the
//! transactional publish lifecycle, and retries transient failures with
//! exponential backoff.
//!
//! # Design
//!
//! - [`Client`] and [`Publish`] are the seams the orchestrator programs
//!   against; [`HttpClient`] implements them over the gateway's HTTP API
//!   while tests substitute in-memory fakes.
//! - [`Client::ensure_uploaded`] reports through a pair of callbacks so the
//!   caller can distinguish newly-uploaded items from pre-existing ones
//!   without the client knowing anything about publishes.
//! - The client runs a bounded pool of OS threads; there is no async
//!   runtime. A per-key lock table guarantees at most one in-flight upload
//!   per distinct key process-wide.
//!
//! # Wire contract
//!
//! - `PUT /upload/<hex-sha256>` with the raw bytes; 200/201 succeed and 409
//!   means the blob is already present (treated identically).
//! - `POST /publish` returns `{"id": "...", "state": "PENDING"}`.
//! - `POST /publish/<id>` accepts `{"items": [{"web_uri", "object_key"}]}`.
//! - `POST /publish/<id>/commit` transitions the publish to `COMMITTED`.
//! - `GET /whoami` returns the caller-identity attributes as JSON.
//!
//! # Errors
//!
//! Transport failures, 5xx, 408, and 429 are retried; other 4xx responses
//! and malformed bodies surface immediately as [`GatewayError`]. Commit is
//! retried on transport errors only.

use serde::{Deserialize, Serialize};

use exodus_walk::SyncItem;

mod cancel;
mod client;
mod error;
mod publish;
mod retry;

pub use cancel::CancelToken;
pub use client::{ClientBuilder, HttpClient, DEFAULT_WORKERS};
pub use error::GatewayError;
pub use publish::HttpPublish;
pub use retry::RetryPolicy;

/// One publish entry binding a destination URI to a blob.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ItemInput {
    /// Absolute destination path beginning with `/`.
    pub web_uri: String,
    /// Lowercase hex SHA-256 of the blob exposed at `web_uri`.
    pub object_key: String,
}

/// Callback invoked once per item by [`Client::ensure_uploaded`].
///
/// Returning an error aborts processing; the error is surfaced verbatim
/// after in-flight workers drain.
pub type ItemCallback<'a> = &'a (dyn Fn(&SyncItem) -> Result<(), GatewayError> + Sync);

/// Gateway operations used by the sync orchestrator.
pub trait Client: Send + Sync {
    /// Ensures every item's blob is present in gateway storage.
    ///
    /// Items whose key is already known (cached from this process or
    /// reported by a `HEAD` probe) invoke `on_existing`; the rest are
    /// uploaded and invoke `on_uploaded`. Each callback fires exactly once
    /// per item, strictly after the blob is durable, in no particular order
    /// across items.
    fn ensure_uploaded(
        &self,
        items: &[SyncItem],
        on_uploaded: ItemCallback<'_>,
        on_existing: ItemCallback<'_>,
    ) -> Result<(), GatewayError>;

    /// Creates a fresh publish in the open state.
    fn new_publish(&self) -> Result<Box<dyn Publish>, GatewayError>;

    /// Returns a handle to an existing publish.
    ///
    /// The handle never validates the id eagerly; an unknown publish
    /// surfaces on the first [`Publish::add_items`] or [`Publish::commit`]
    /// call, matching the gateway's lazy validation.
    fn get_publish(&self, id: &str) -> Box<dyn Publish>;

    /// Returns the caller-identity attributes reported by the gateway.
    fn whoami(&self) -> Result<serde_json::Value, GatewayError>;
}

/// A transactional publish on the gateway.
pub trait Publish {
    /// The gateway-assigned publish id.
    fn id(&self) -> &str;

    /// Appends a batch of items to the open publish.
    fn add_items(&mut self, items: &[ItemInput]) -> Result<(), GatewayError>;

    /// Commits the publish, making its items atomically visible.
    ///
    /// A second commit on the same handle is an error.
    fn commit(&mut self) -> Result<(), GatewayError>;
}
