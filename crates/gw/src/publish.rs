//! Publish handles over the gateway's HTTP API.

use std::sync::Arc;

use serde::Serialize;

use crate::client::{Shared, CONTROL_TIMEOUT};
use crate::retry::{with_retries, RetryOn};
use crate::{GatewayError, ItemInput, Publish};

#[derive(Serialize)]
struct ItemsBody<'a> {
    items: &'a [ItemInput],
}

/// Handle to a publish on the gateway.
///
/// The handle tracks commit state locally so a second [`Publish::commit`]
/// or a post-commit [`Publish::add_items`] fails without a request. Whether
/// the publish id actually exists is only discovered when the gateway
/// rejects the first operation.
pub struct HttpPublish {
    shared: Arc<Shared>,
    id: String,
    committed: bool,
}

impl HttpPublish {
    pub(crate) fn new(shared: Arc<Shared>, id: String) -> Self {
        Self {
            shared,
            id,
            committed: false,
        }
    }
}

impl Publish for HttpPublish {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_items(&mut self, items: &[ItemInput]) -> Result<(), GatewayError> {
        if self.committed {
            return Err(GatewayError::Committed {
                id: self.id.clone(),
            });
        }
        if items.is_empty() {
            return Ok(());
        }

        let context = format!("add items to publish {}", self.id);
        let url = self.shared.url(&format!("/publish/{}", self.id));
        with_retries(
            &self.shared.policy,
            &self.shared.cancel,
            RetryOn::RetryableStatus,
            &context,
            || {
                self.shared
                    .agent
                    .post(&url)
                    .timeout(CONTROL_TIMEOUT)
                    .send_json(ItemsBody { items })
                    .map_err(|error| GatewayError::from_ureq(&context, error))?;
                Ok(())
            },
        )?;
        tracing::debug!("added {} items to publish {}", items.len(), self.id);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        if self.committed {
            return Err(GatewayError::Committed {
                id: self.id.clone(),
            });
        }

        let context = format!("commit publish {}", self.id);
        let url = self.shared.url(&format!("/publish/{}/commit", self.id));
        let state: serde_json::Value = with_retries(
            &self.shared.policy,
            &self.shared.cancel,
            RetryOn::TransportOnly,
            &context,
            || {
                let response = self
                    .shared
                    .agent
                    .post(&url)
                    .timeout(CONTROL_TIMEOUT)
                    .call()
                    .map_err(|error| GatewayError::from_ureq(&context, error))?;
                response
                    .into_json()
                    .map_err(|error| GatewayError::malformed(&context, error))
            },
        )?;
        self.committed = true;
        tracing::debug!("committed publish {}: {state}", self.id);
        Ok(())
    }
}
