//! Configuration for the gossip protocol.

/// Maximum number of distinct origins retained in the table.
pub const MAX_UNIQUE_ORIGINS: usize = 8192;
/// Number of peers in the push active set.
pub const PUSH_FANOUT: usize = 6;
/// Values older (or newer) than this relative to now are not pushed.
pub const PUSH_MSG_TIMEOUT_MS: u64 = 30_000;
/// Pull responses carrying values older than this are suspect.
pub const PULL_RESPONSE_TIMEOUT_MS: u64 = 15_000;
/// Prune messages signed longer ago than this are rejected.
pub const PRUNE_MSG_TIMEOUT_MS: u64 = 500;
/// How long a pong keeps a peer healthy.
pub const PONG_TTL_MS: u64 = 1_280_000;
/// Minimum delay between two pings to the same peer.
pub const PING_RATE_LIMIT_MS: u64 = 20_000;
/// How long to wait for a pong before marking the peer failed.
pub const PING_TIMEOUT_MS: u64 = 10_000;
/// Capacity of every bounded queue between gossip stages.
pub const GOSSIP_CHANNEL_CAPACITY: usize = 4_096;

/// Policy knobs for a gossip node.
///
/// Every period is expressed in milliseconds of local time, the same unit
/// as value wallclocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipConfig {
    /// Maximum number of peers in the push active set.
    pub active_set_size: usize,

    /// How often the active set is resampled from scratch.
    pub active_set_rotation_period_ms: u64,

    /// Values whose wallclock is further than this from now are not pushed.
    pub push_msg_timeout_ms: u64,

    /// Interval between pull-request rounds.
    pub pull_interval_ms: u64,

    /// Pull-response values older than this, from origins with no contact
    /// info in the table, are dropped and recorded as failed.
    pub pull_response_timeout_ms: u64,

    /// Maximum number of filters sent in a single pull round.
    pub max_pull_requests: usize,

    /// Maximum number of values returned across one batch of pull requests.
    pub max_pull_response_values: usize,

    /// Records not updated within this window are purged.
    pub value_timeout_ms: u64,

    /// How long overwritten hashes and failed pull hashes are remembered.
    pub purged_timeout_ms: u64,

    /// Interval between purge and trim passes over the table.
    pub purge_interval_ms: u64,

    /// Cap on distinct origins held in the table.
    pub max_unique_origins: usize,

    /// How long a pong keeps a peer healthy.
    pub pong_ttl_ms: u64,

    /// Minimum delay between two pings to the same peer.
    pub ping_rate_limit_ms: u64,

    /// Window in which a pong must arrive before the peer is marked failed.
    pub ping_timeout_ms: u64,

    /// Number of peers tracked by the ping cache.
    pub ping_cache_capacity: usize,

    /// Lifetime of a peer's prune filter.
    pub prune_timeout_ms: u64,

    /// How often the local contact info is re-signed with a fresh wallclock.
    /// Must stay below the pull-response timeout, since pull requests are
    /// only served for callers whose contact info is that recent.
    pub refresh_contact_info_interval_ms: u64,

    /// Sleep between iterations of the gossip loop.
    pub gossip_loop_interval_ms: u64,

    /// Sleep between iterations of the ping loop.
    pub ping_loop_interval_ms: u64,

    /// Interval between stats reports.
    pub stats_report_interval_ms: u64,

    /// Capacity of the inbound and outbound packet queues.
    pub channel_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            active_set_size: PUSH_FANOUT,
            active_set_rotation_period_ms: 7_500,
            push_msg_timeout_ms: PUSH_MSG_TIMEOUT_MS,
            pull_interval_ms: 1_000,
            pull_response_timeout_ms: PULL_RESPONSE_TIMEOUT_MS,
            max_pull_requests: 64,
            max_pull_response_values: 2_048,
            value_timeout_ms: 120_000,
            purged_timeout_ms: 30_000,
            purge_interval_ms: 5_000,
            max_unique_origins: MAX_UNIQUE_ORIGINS,
            pong_ttl_ms: PONG_TTL_MS,
            ping_rate_limit_ms: PING_RATE_LIMIT_MS,
            ping_timeout_ms: PING_TIMEOUT_MS,
            ping_cache_capacity: 65_536,
            prune_timeout_ms: 15_000,
            refresh_contact_info_interval_ms: PULL_RESPONSE_TIMEOUT_MS / 2,
            gossip_loop_interval_ms: 100,
            ping_loop_interval_ms: 250,
            stats_report_interval_ms: 2_000,
            channel_capacity: GOSSIP_CHANNEL_CAPACITY,
        }
    }
}

impl GossipConfig {
    /// Create a config suitable for local clusters with shorter periods.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            active_set_rotation_period_ms: 500,
            pull_interval_ms: 100,
            purge_interval_ms: 500,
            ping_rate_limit_ms: 200,
            ping_timeout_ms: 150,
            ping_cache_capacity: 1_024,
            prune_timeout_ms: 1_000,
            refresh_contact_info_interval_ms: 1_000,
            gossip_loop_interval_ms: 20,
            ping_loop_interval_ms: 20,
            stats_report_interval_ms: 500,
            channel_capacity: 1_024,
            ..Self::default()
        }
    }
}
