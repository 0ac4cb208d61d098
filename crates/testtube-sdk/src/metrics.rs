// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Metrics of the remote call layer.

use std::time::Duration;

use testtube_utils::{define_metric_set, metrics::default_buckets_for_network_calls};

/// Label value of read-only calls.
pub const SIMULATE_MODE: &str = "simulate";
/// Label value of signed calls.
pub const SIGNED_MODE: &str = "signed";

/// Label value of the local cache tier.
pub const LOCAL_TIER: &str = "local";
/// Label value of the remote cache tier.
pub const REMOTE_TIER: &str = "remote";

define_metric_set! {
    #[namespace = "testtube"]
    /// Metrics exported by the [`RemoteCallClient`][crate::client::RemoteCallClient].
    pub struct RemoteCallMetrics {
        #[help = "The number of calls that reached the compute network, by mode and outcome"]
        calls_total: IntCounterVec["mode", "outcome"],
        #[help = "The number of calls answered from the throttle store"]
        throttle_hits_total: IntCounter[],
        #[help = "The number of cache lookups, by tier and result"]
        cache_lookups_total: IntCounterVec["tier", "result"],
        #[help = "The number of balance requests that joined a request already in flight"]
        in_flight_joins_total: IntCounter[],
        #[help = "The number of attempts made by retried operations, by operation"]
        retry_attempts_total: IntCounterVec["operation"],
        #[help = "The duration of calls to the compute network, by mode"]
        call_duration_seconds: HistogramVec{
            labels: ["mode"],
            buckets: default_buckets_for_network_calls()
        },
    }
}

impl RemoteCallMetrics {
    pub(crate) fn observe_call(&self, mode: &str, succeeded: bool, duration: Duration) {
        let outcome = if succeeded { "success" } else { "failure" };
        self.calls_total.with_label_values(&[mode, outcome]).inc();
        self.call_duration_seconds
            .with_label_values(&[mode])
            .observe(duration.as_secs_f64());
    }

    pub(crate) fn observe_cache_lookup(&self, tier: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[tier, result])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use testtube_utils::metrics::Registry;

    use super::*;

    #[test]
    fn records_calls_and_lookups() {
        let registry = Registry::default();
        let metrics = RemoteCallMetrics::new(&registry);

        metrics.observe_call(SIMULATE_MODE, true, Duration::from_millis(20));
        metrics.observe_call(SIMULATE_MODE, false, Duration::from_millis(20));
        metrics.observe_cache_lookup(REMOTE_TIER, true);

        assert_eq!(
            metrics
                .calls_total
                .with_label_values(&[SIMULATE_MODE, "success"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .cache_lookups_total
                .with_label_values(&[REMOTE_TIER, "hit"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .call_duration_seconds
                .with_label_values(&[SIMULATE_MODE])
                .get_sample_count(),
            2
        );
        assert!(
            registry
                .gather()
                .iter()
                .any(|family| family.get_name() == "testtube_calls_total")
        );
    }
}
