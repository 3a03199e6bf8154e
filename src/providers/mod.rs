//! # Provider Adapters
//!
//! Each adapter turns upstream API answers into normalized [`Song`] records and
//! registers its handlers with the [`RegistryBuilder`]. All upstream traffic
//! goes through the shared [`CachedFetcher`].

pub mod netease;
pub mod xiami;

use std::sync::Arc;

use crate::core::config::UpstreamConfig;
use crate::core::error::GatewayResult;
use crate::core::types::{Song, SongList};
use crate::protocols::CachedFetcher;
use crate::routing::RegistryBuilder;

pub use netease::NeteaseProvider;
pub use xiami::XiamiProvider;

/// Register the handlers of every built-in provider
pub fn register_all(builder: RegistryBuilder, fetcher: &CachedFetcher, upstream: &UpstreamConfig) -> RegistryBuilder {
    let builder = Arc::new(XiamiProvider::new(fetcher.clone(), upstream)).register(builder);
    Arc::new(NeteaseProvider::new(fetcher.clone(), upstream)).register(builder)
}

/// Adapter boundary: errors become failed lists
pub(crate) fn into_song_list(result: GatewayResult<Vec<Song>>) -> SongList {
    match result {
        Ok(songs) => SongList::Ok(songs),
        Err(e) => SongList::from_error(&e),
    }
}
