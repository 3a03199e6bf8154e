//! # Aggregator
//!
//! Resolves one client request into a single [`SongList`]: looks up the handler
//! of (provider, request type), splits multi-id requests and concatenates the
//! per-id results.
//!
//! Ids are resolved sequentially in input order. The first failed sub-result
//! becomes the overall result; ids after it are never sent upstream.

use metrics::counter;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::registry::{HandlerRequest, IdMode, ProviderRegistry, Registration};
use crate::core::error::GatewayError;
use crate::core::types::{Quality, SongList};

/// Dispatches requests through an immutable provider registry
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
}

impl Aggregator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Whether (provider, request type) has a registered handler
    pub fn supports(&self, provider: &str, request_type: &str) -> bool {
        self.registry.contains(provider, request_type)
    }

    /// Resolve a request. Never fails: every problem is reported as a failed list.
    #[instrument(skip(self), fields(provider = %provider, request_type = %request_type))]
    pub async fn resolve(&self, provider: &str, request_type: &str, raw_id: &str, quality: Quality) -> SongList {
        let Some(registration) = self.registry.lookup(provider, request_type) else {
            counter!("aggregator_invalid_requests_total").increment(1);
            return SongList::failed(format!(
                "invalid request arguments: unsupported provider '{}' or request type '{}'",
                provider, request_type
            ));
        };

        match registration.id_mode {
            IdMode::Single => {
                if raw_id.trim().is_empty() {
                    return SongList::from_error(&GatewayError::invalid_argument("id", "id is empty"));
                }
                registration
                    .call(HandlerRequest::new(raw_id.trim()).with_quality(quality))
                    .await
            }
            IdMode::Multi { delimiter } => Self::resolve_each(registration, raw_id, delimiter, quality).await,
        }
    }

    async fn resolve_each(registration: &Registration, raw_id: &str, delimiter: char, quality: Quality) -> SongList {
        let mut result = SongList::new();

        for id in raw_id.split(delimiter).map(str::trim) {
            if id.is_empty() {
                return SongList::from_error(&GatewayError::invalid_argument(
                    "id",
                    format!("empty id in '{}'", raw_id),
                ));
            }

            debug!(id = %id, "Resolving id");
            let partial = registration
                .call(HandlerRequest::new(id).with_quality(quality))
                .await;
            if partial.is_failed() {
                return partial;
            }
            result = result.concat(partial);
        }

        result
    }
}
