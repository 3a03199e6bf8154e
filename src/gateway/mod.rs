//! # Gateway Module
//!
//! The music service with its response cache, and the HTTP front end serving it.

pub mod server;
pub mod service;

pub use server::{router, shutdown_signal, AppState, GatewayServer, MusicQuery};
pub use service::{MusicRequest, MusicService, ResponseCacheSettings};
