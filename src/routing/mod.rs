//! # Routing Module
//!
//! Request dispatch: the explicit provider registry and the aggregator that
//! resolves (provider, request type, ids) through it.

pub mod aggregator;
pub mod registry;

pub use aggregator::Aggregator;
pub use registry::{
    Handler, HandlerRequest, IdMode, ProviderRegistry, ProviderToken, Registration, RegistryBuilder,
    SupportedRequest,
};
