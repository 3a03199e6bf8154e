//! # Metrics Collection
//!
//! Prometheus export of the counters and gauges recorded with the `metrics`
//! macros across the gateway.
//!
//! ## Recorded metrics
//! - `gateway_requests_total`, `gateway_failed_responses_total`,
//!   `gateway_request_duration_seconds`
//! - `response_cache_hits_total`, `response_cache_misses_total`
//! - `cache_hits_total`, `cache_misses_total`, `cache_errors_total`,
//!   `cache_corruptions_total`
//! - `redis_pool_created`, `redis_pool_reused`, `redis_pool_discarded`,
//!   `redis_pool_idle_connections`
//! - `upstream_requests_total`, `upstream_failures_total`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::core::error::{GatewayError, GatewayResult};

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Renders the Prometheus text exposition
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn builder() -> GatewayResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .add_global_label("service", "music-api-gateway")
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| GatewayError::config(format!("Failed to set histogram buckets: {}", e)))
}

/// Install the global recorder. Fails if one is already installed.
pub fn install_recorder() -> GatewayResult<MetricsHandle> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| GatewayError::config(format!("Failed to install metrics recorder: {}", e)))?;
    Ok(MetricsHandle { handle })
}

/// A recorder that is not installed globally, for tests
pub fn detached_handle() -> GatewayResult<MetricsHandle> {
    let recorder = builder()?.build_recorder();
    Ok(MetricsHandle {
        handle: recorder.handle(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_renders() {
        let handle = detached_handle().unwrap();
        // Nothing is recorded into a detached recorder.
        assert!(!handle.render().contains("gateway_requests_total"));
    }
}
