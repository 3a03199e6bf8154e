//! # Provider Registry
//!
//! Explicit table from (provider, request type) to the handler that serves it.
//!
//! The registry is assembled once at startup with [`RegistryBuilder`] and is
//! immutable afterwards; it is shared by `Arc` and read without locking.
//! Adding a provider means registering its handlers, never touching dispatch.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Quality, SongList};

/// Arguments handed to a handler for one (single) id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRequest {
    pub id: String,
    pub quality: Quality,
}

impl HandlerRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            quality: Quality::default(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// Shared handler signature
pub type Handler = Arc<dyn Fn(HandlerRequest) -> BoxFuture<'static, SongList> + Send + Sync>;

/// How the id field of a request is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// The id field is passed to the handler as is
    Single,
    /// The id field lists several ids; the handler is called once per id
    Multi { delimiter: char },
}

/// Normalized lowercase `provider + request_type`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderToken(String);

impl ProviderToken {
    pub fn new(provider: &str, request_type: &str) -> Self {
        Self(format!("{}{}", provider.trim(), request_type.trim()).to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered handler together with its id interpretation
#[derive(Clone)]
pub struct Registration {
    pub provider: String,
    pub request_type: String,
    pub id_mode: IdMode,
    pub handler: Handler,
}

impl Registration {
    /// Invoke the handler for one id
    pub fn call(&self, request: HandlerRequest) -> BoxFuture<'static, SongList> {
        (self.handler)(request)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("provider", &self.provider)
            .field("request_type", &self.request_type)
            .field("id_mode", &self.id_mode)
            .finish()
    }
}

/// A supported (provider, request type) combination
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SupportedRequest {
    pub provider: String,
    pub request_type: String,
    pub multi_id: bool,
}

/// Builder collecting registrations before the service starts
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<ProviderToken, Registration>,
    errors: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for (provider, request_type).
    ///
    /// Registering the same combination twice is reported by [`build`](Self::build).
    pub fn register<F, Fut>(mut self, provider: &str, request_type: &str, id_mode: IdMode, handler: F) -> Self
    where
        F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SongList> + Send + 'static,
    {
        let token = ProviderToken::new(provider, request_type);
        if provider.trim().is_empty() || request_type.trim().is_empty() {
            self.errors
                .push(format!("empty provider or request type in registration '{}'", token));
            return self;
        }
        if self.entries.contains_key(&token) {
            self.errors.push(format!("duplicate registration for '{}'", token));
            return self;
        }

        let handler: Handler = Arc::new(move |request| Box::pin(handler(request)));
        self.entries.insert(
            token,
            Registration {
                provider: provider.trim().to_ascii_lowercase(),
                request_type: request_type.trim().to_ascii_lowercase(),
                id_mode,
                handler,
            },
        );
        self
    }

    /// Freeze the table. Any registration problem is a startup configuration error.
    pub fn build(self) -> GatewayResult<ProviderRegistry> {
        if !self.errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Invalid provider registry: {}",
                self.errors.join("; ")
            )));
        }

        info!(handlers = self.entries.len(), "Provider registry built");
        Ok(ProviderRegistry {
            entries: self.entries,
        })
    }
}

/// Immutable dispatch table
#[derive(Debug)]
pub struct ProviderRegistry {
    entries: BTreeMap<ProviderToken, Registration>,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up the handler of a combination. Unknown combinations are `None`.
    pub fn lookup(&self, provider: &str, request_type: &str) -> Option<&Registration> {
        self.lookup_token(&ProviderToken::new(provider, request_type))
    }

    pub fn lookup_token(&self, token: &ProviderToken) -> Option<&Registration> {
        self.entries.get(token)
    }

    pub fn contains(&self, provider: &str, request_type: &str) -> bool {
        self.lookup(provider, request_type).is_some()
    }

    /// All registered combinations, ordered by token
    pub fn supported(&self) -> Vec<SupportedRequest> {
        self.entries
            .values()
            .map(|r| SupportedRequest {
                provider: r.provider.clone(),
                request_type: r.request_type.clone(),
                multi_id: matches!(r.id_mode, IdMode::Multi { .. }),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
