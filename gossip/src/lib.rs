#![allow(clippy::arithmetic_side_effects)]

//! Cluster gossip for TRv1 nodes.
//!
//! Every node keeps a [`GossipTable`](gossip_table::GossipTable) of signed
//! values keyed by origin and kind, and converges with its peers two ways:
//!
//! * push: new values are forwarded to a small, periodically rotated active
//!   set of peers; receivers prune senders that keep delivering duplicates.
//! * pull: nodes periodically send bloom filters of what they hold and peers
//!   answer with whatever the filter is missing.
//!
//! A ping/pong handshake gates who may be pushed to or served, so a node
//! never sends unsolicited traffic to an address that has not proven it
//! holds the advertised key.
//!
//! [`ClusterInfo`](cluster_info::ClusterInfo) turns packets and timer ticks
//! into packets and never blocks; [`GossipService`](gossip_service::GossipService)
//! drives it from threads.

pub mod active_set;
pub mod channel;
pub mod cluster_info;
pub mod config;
pub mod contact_info;
pub mod error;
pub mod gossip;
pub mod gossip_data;
pub mod gossip_pull;
pub mod gossip_push;
pub mod gossip_service;
pub mod gossip_stats;
pub mod gossip_table;
pub mod gossip_table_shards;
pub mod gossip_value;
pub mod local_cluster;
pub mod ping_pong;
pub mod protocol;
pub mod prune;
