//! Counters for gossip traffic.
//!
//! Counters are relaxed atomics bumped from any thread; `report` logs the
//! accumulated values and resets them.

use {
    log::info,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// A monotonically increasing counter, reset on every report.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn add_relaxed(&self, v: u64) {
        self.0.fetch_add(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add_relaxed(1);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn clear(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

macro_rules! gossip_stats {
    ($($name:ident),* $(,)?) => {
        #[derive(Default)]
        pub struct GossipStats {
            $(pub $name: Counter,)*
        }

        impl GossipStats {
            /// Log every non-zero counter and reset all of them.
            pub fn report(&self) {
                let values = [$((stringify!($name), self.$name.clear()),)*];
                let summary = values
                    .iter()
                    .filter(|(_, value)| *value != 0)
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                if !summary.is_empty() {
                    info!("gossip-stats {summary}");
                }
            }
        }
    };
}

gossip_stats!(
    packets_received,
    packets_sent,
    packets_dropped_on_send,
    packets_discarded_on_exit,
    packets_malformed,
    packets_failed_sanitize,
    packets_failed_verify,
    values_failed_verify,
    push_messages_received,
    push_values_received,
    push_values_inserted,
    push_values_failed,
    push_messages_sent,
    push_values_sent,
    push_values_skipped_timeout,
    prune_messages_sent,
    prune_messages_received,
    prune_messages_rejected,
    pull_requests_sent,
    pull_requests_received,
    pull_requests_dropped_unhealthy,
    pull_responses_sent,
    pull_response_values_sent,
    pull_response_values_received,
    pull_response_values_inserted,
    pull_response_values_failed,
    pull_response_values_timeout,
    pings_sent,
    pings_received,
    pongs_sent,
    pongs_received,
    pongs_rejected,
    ping_timeouts,
    active_set_rotations,
    table_values_purged,
    table_origins_trimmed,
    values_oversized,
);
