//! # Cache Key Codec
//!
//! Deterministic mapping from semantic identifiers and raw URLs to short cache
//! keys.
//!
//! Every key is `<prefix><family><payload>`. Family sub-namespaces (`id:`,
//! `url:`, `163eid:`) form a prefix-free set, so keys of different families
//! never collide. Short codes are a hardcoded table: keys written by one
//! process stay readable after a restart.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Provider, RequestType};

/// Sub-namespace of keys derived from (provider, request type, id)
pub const SEMANTIC_FAMILY: &str = "id:";

/// Sub-namespace of keys derived from upstream URLs
pub const URL_FAMILY: &str = "url:";

/// Sub-namespace of Netease encrypted dfsIds
pub const NETEASE_EID_FAMILY: &str = "163eid:";

/// Literal replacements applied to URLs, in priority order.
///
/// Keys stay injective only for URLs built by the provider adapters, which
/// never differ solely in these substrings.
const URL_REPLACEMENTS: &[(&str, &str)] = &[
    ("http://", ""),
    ("www.xiami.com", "xiami"),
    ("/app/android", ""),
    ("/app/iphone", ""),
    ("music.163.com", "163"),
    ("/api", ""),
];

fn provider_code(provider: Provider) -> &'static str {
    match provider {
        Provider::Xiami => "x",
        Provider::Netease => "n",
    }
}

fn request_type_code(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::SongList => "s",
        RequestType::Album => "a",
        RequestType::Collect => "c",
        RequestType::PlayList => "p",
    }
}

/// Single left-to-right pass; at each position the first matching table entry wins.
fn shorten_url(url: &str) -> String {
    let mut result = String::with_capacity(url.len());
    let mut rest = url;

    'scan: while !rest.is_empty() {
        for (from, to) in URL_REPLACEMENTS {
            if let Some(tail) = rest.strip_prefix(from) {
                result.push_str(to);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            result.push(c);
        }
        rest = chars.as_str();
    }

    result
}

/// Builds cache keys under one process-wide namespace prefix
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    prefix: String,
}

impl Default for CacheKeyCodec {
    fn default() -> Self {
        Self::new("mas:")
    }
}

impl CacheKeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of a normalized response: `<prefix>id:<provider>|<type><id>`
    pub fn key_for_semantic_id(&self, provider: &str, request_type: &str, id: &str) -> GatewayResult<String> {
        if id.is_empty() {
            return Err(GatewayError::invalid_argument("id", "id is empty"));
        }
        let provider: Provider = provider.parse()?;
        let request_type: RequestType = request_type.parse()?;

        Ok(self.key_for(provider, request_type, id))
    }

    /// Typed variant of [`key_for_semantic_id`](Self::key_for_semantic_id) for an already validated request
    pub fn key_for(&self, provider: Provider, request_type: RequestType, id: &str) -> String {
        format!(
            "{}{}{}|{}{}",
            self.prefix,
            SEMANTIC_FAMILY,
            provider_code(provider),
            request_type_code(request_type),
            id
        )
    }

    /// Key of a raw upstream body: `<prefix>url:<shortened url>`
    pub fn key_for_url(&self, url: &str) -> GatewayResult<String> {
        if url.is_empty() {
            return Err(GatewayError::invalid_argument("url", "url is empty"));
        }
        Ok(format!("{}{}{}", self.prefix, URL_FAMILY, shorten_url(url)))
    }

    /// Key of a Netease encrypted dfsId: `<prefix>163eid:<dfs id>`
    pub fn key_for_netease_eid(&self, dfs_id: &str) -> GatewayResult<String> {
        if dfs_id.is_empty() {
            return Err(GatewayError::invalid_argument("dfs_id", "dfs id is empty"));
        }
        Ok(format!("{}{}{}", self.prefix, NETEASE_EID_FAMILY, dfs_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_key_format() {
        let codec = CacheKeyCodec::default();
        assert_eq!(
            codec.key_for_semantic_id("xiami", "album", "123").unwrap(),
            "mas:id:x|a123"
        );
        assert_eq!(
            codec.key_for_semantic_id("netease", "playlist", "9").unwrap(),
            "mas:id:n|p9"
        );
    }

    #[test]
    fn test_semantic_key_is_deterministic() {
        let codec = CacheKeyCodec::default();
        let first = codec.key_for_semantic_id("netease", "songlist", "1,2,3").unwrap();
        let second = CacheKeyCodec::default()
            .key_for_semantic_id("netease", "songlist", "1,2,3")
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_semantic_key_rejects_invalid_arguments() {
        let codec = CacheKeyCodec::default();
        for (p, t, id) in [
            ("xiami", "album", ""),
            ("unknownprovider", "album", "1"),
            ("xiami", "video", "1"),
        ] {
            let err = codec.key_for_semantic_id(p, t, id).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidArgument { .. }), "{p} {t} {id}");
        }
    }

    #[test]
    fn test_distinct_semantic_inputs_give_distinct_keys() {
        let codec = CacheKeyCodec::default();
        let mut keys = std::collections::HashSet::new();
        for provider in Provider::ALL {
            for request_type in RequestType::ALL {
                for id in ["1", "12", "123", "1,2"] {
                    assert!(keys.insert(codec.key_for(provider, request_type, id)));
                }
            }
        }
    }

    #[test]
    fn test_url_key_shortening() {
        let codec = CacheKeyCodec::default();
        assert_eq!(
            codec.key_for_url("http://music.163.com/api/album/123").unwrap(),
            "mas:url:163/album/123"
        );
        assert_eq!(
            codec.key_for_url("http://www.xiami.com/app/iphone/song/id/1").unwrap(),
            "mas:url:xiami/song/id/1"
        );
        assert_eq!(
            codec
                .key_for_url("http://api.xiami.com/web?v=2.0&app_key=1&r=song/detail&id=7")
                .unwrap(),
            "mas:url:api.xiami.com/web?v=2.0&app_key=1&r=song/detail&id=7"
        );
    }

    #[test]
    fn test_url_replacement_is_single_pass() {
        // "/ap" + "i" must not be rewritten after an earlier replacement created it.
        assert_eq!(shorten_url("/aphttp://i"), "/api");
        assert_eq!(shorten_url("héllo/api"), "héllo");
    }

    #[test]
    fn test_url_key_rejects_empty() {
        let codec = CacheKeyCodec::default();
        assert!(matches!(
            codec.key_for_url(""),
            Err(GatewayError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_key_families_are_disjoint() {
        let codec = CacheKeyCodec::default();
        let urls = [
            "http://api.xiami.com/web?v=2.0&app_key=1&r=album/detail&id=1",
            "http://music.163.com/api/album/1",
            "http://music.163.com/api/playlist/detail?id=1",
            "http://music.163.com/api/song/detail?ids=[1,2]",
        ];
        for provider in Provider::ALL {
            for request_type in RequestType::ALL {
                let semantic = codec.key_for(provider, request_type, "1");
                assert!(semantic.starts_with("mas:id:"));
                for url in urls {
                    let url_key = codec.key_for_url(url).unwrap();
                    assert_ne!(semantic, url_key);
                    assert!(url_key.starts_with("mas:url:"));
                }
            }
        }
        assert!(codec.key_for_netease_eid("1").unwrap().starts_with("mas:163eid:"));
    }
}
