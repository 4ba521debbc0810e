// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, IntCounter, IntGauge, Registry,
};

/// Latency buckets for queries and item processing, in seconds.
const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10., 30., 60.,
];

/// Metrics of one consensus instance, registered on the instance's own
/// registry so that several instances in one process never collide.
pub struct Metrics {
    pub successful_polls: IntCounter,
    pub unsuccessful_polls: IntCounter,
    pub poll_timeouts: IntCounter,
    pub insufficient_peer_rounds: IntCounter,
    pub items_accepted: IntCounter,
    pub items_rejected: IntCounter,
    pub invalid_items: IntCounter,
    pub current_round: IntGauge,
    pub processing_items: IntGauge,
    pub certificates_emitted: IntCounter,
    pub overlay_messages_dropped: IntCounter,
    pub query_latency: Histogram,
    pub item_processing_time: Histogram,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            successful_polls: register_int_counter_with_registry!(
                "successful_polls",
                "Number of polls that met alpha_preference at the root",
                registry,
            )
            .unwrap(),
            unsuccessful_polls: register_int_counter_with_registry!(
                "unsuccessful_polls",
                "Number of polls below alpha_preference, including timeouts",
                registry,
            )
            .unwrap(),
            poll_timeouts: register_int_counter_with_registry!(
                "poll_timeouts",
                "Number of per-request deadlines that expired",
                registry,
            )
            .unwrap(),
            insufficient_peer_rounds: register_int_counter_with_registry!(
                "insufficient_peer_rounds",
                "Rounds skipped because too few peers were eligible",
                registry,
            )
            .unwrap(),
            items_accepted: register_int_counter_with_registry!(
                "items_accepted",
                "Blocks or vertices accepted",
                registry,
            )
            .unwrap(),
            items_rejected: register_int_counter_with_registry!(
                "items_rejected",
                "Blocks or vertices rejected",
                registry,
            )
            .unwrap(),
            invalid_items: register_int_counter_with_registry!(
                "invalid_items",
                "Items discarded by verification or structural checks",
                registry,
            )
            .unwrap(),
            current_round: register_int_gauge_with_registry!(
                "current_round",
                "The scheduler's poll round",
                registry,
            )
            .unwrap(),
            processing_items: register_int_gauge_with_registry!(
                "processing_items",
                "Items currently in the Processing state",
                registry,
            )
            .unwrap(),
            certificates_emitted: register_int_counter_with_registry!(
                "certificates_emitted",
                "Hybrid certificates produced by the overlay",
                registry,
            )
            .unwrap(),
            overlay_messages_dropped: register_int_counter_with_registry!(
                "overlay_messages_dropped",
                "Overlay messages dropped for phase or validity errors",
                registry,
            )
            .unwrap(),
            query_latency: register_histogram_with_registry!(
                "query_latency",
                "Observed latency of poll queries, in seconds",
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            item_processing_time: register_histogram_with_registry!(
                "item_processing_time",
                "Time items spend in the Processing state, in seconds",
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        })
    }
}

/// Metrics on a throwaway registry.
pub fn test_metrics() -> Arc<Metrics> {
    Metrics::new(&Registry::new())
}
