//! Worker threads driving a [`ClusterInfo`].
//!
//! Three threads share the node: `listen` answers inbound packets, `gossip`
//! runs push, pull and purge rounds, and `ping` keeps the liveness cache
//! current. All of them stop once `exit` is set or their queue disconnects.

use {
    crate::{
        channel::{recv_packets, send_packets, PacketBatch, SendMode},
        cluster_info::ClusterInfo,
        error::{GossipError, Result},
    },
    crossbeam_channel::{Receiver, Sender},
    log::{debug, info},
    solana_time_utils::timestamp,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, sleep, Builder, JoinHandle},
        time::{Duration, Instant},
    },
};

const LISTEN_RECV_TIMEOUT: Duration = Duration::from_millis(100);
/// Inbound packets coalesced into one call to `handle_packets`.
const MAX_PACKETS_PER_BATCH: usize = 1_024;

pub struct GossipService {
    thread_hdls: Vec<JoinHandle<()>>,
}

impl GossipService {
    /// Spawns the node's threads. Inbound packets arrive on `receiver` keyed
    /// by source address; outbound packets leave on `sender` keyed by
    /// destination.
    pub fn new(
        cluster_info: &Arc<ClusterInfo>,
        receiver: Receiver<PacketBatch>,
        sender: Sender<PacketBatch>,
        exit: Arc<AtomicBool>,
    ) -> Result<Self> {
        debug!(
            "gossip service {} listening on {}",
            cluster_info.id(),
            cluster_info.gossip_addr()
        );
        let t_listen = Builder::new().name("trv1GossipLstn".to_string()).spawn({
            let cluster_info = cluster_info.clone();
            let sender = sender.clone();
            let exit = exit.clone();
            move || run_listen(&cluster_info, &receiver, &sender, &exit)
        })?;
        let t_gossip = Builder::new().name("trv1Gossip".to_string()).spawn({
            let cluster_info = cluster_info.clone();
            let sender = sender.clone();
            let exit = exit.clone();
            move || {
                let interval = Duration::from_millis(cluster_info.config().gossip_loop_interval_ms);
                run_periodic(&cluster_info, &sender, &exit, interval, ClusterInfo::run_gossip_round);
                cluster_info.stats.report();
            }
        })?;
        let t_ping = Builder::new().name("trv1GossipPing".to_string()).spawn({
            let cluster_info = cluster_info.clone();
            move || {
                let interval = Duration::from_millis(cluster_info.config().ping_loop_interval_ms);
                run_periodic(&cluster_info, &sender, &exit, interval, ClusterInfo::run_ping_round);
            }
        })?;
        Ok(Self {
            thread_hdls: vec![t_listen, t_gossip, t_ping],
        })
    }

    pub fn join(self) -> thread::Result<()> {
        for thread_hdl in self.thread_hdls {
            thread_hdl.join()?;
        }
        Ok(())
    }
}

// Returns false once the outbound queue is gone.
fn send_outbound(cluster_info: &ClusterInfo, sender: &Sender<PacketBatch>, packets: PacketBatch) -> bool {
    match send_packets(sender, packets, SendMode::Try, &cluster_info.stats) {
        Ok(()) | Err(GossipError::ChannelFull) => true,
        Err(err) => {
            info!("gossip {} outbound: {err}", cluster_info.id());
            false
        }
    }
}

fn run_listen(
    cluster_info: &ClusterInfo,
    receiver: &Receiver<PacketBatch>,
    sender: &Sender<PacketBatch>,
    exit: &AtomicBool,
) {
    while !exit.load(Ordering::Relaxed) {
        let packets = match recv_packets(receiver, LISTEN_RECV_TIMEOUT, MAX_PACKETS_PER_BATCH) {
            Ok(Some(packets)) => packets,
            Ok(None) => continue,
            Err(err) => {
                info!("gossip {} inbound: {err}", cluster_info.id());
                break;
            }
        };
        let replies = cluster_info.handle_packets(timestamp(), packets);
        if !send_outbound(cluster_info, sender, replies) {
            break;
        }
    }
    let discarded: usize = receiver.try_iter().map(|packets| packets.len()).sum();
    if discarded > 0 {
        debug!("gossip {} discarded {discarded} packets on exit", cluster_info.id());
    }
    cluster_info
        .stats
        .packets_discarded_on_exit
        .add_relaxed(discarded as u64);
}

fn run_periodic<F>(
    cluster_info: &ClusterInfo,
    sender: &Sender<PacketBatch>,
    exit: &AtomicBool,
    interval: Duration,
    round: F,
) where
    F: Fn(&ClusterInfo, u64) -> PacketBatch,
{
    while !exit.load(Ordering::Relaxed) {
        let start = Instant::now();
        let packets = round(cluster_info, timestamp());
        if !send_outbound(cluster_info, sender, packets) {
            break;
        }
        sleep(interval.saturating_sub(start.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{channel::bounded_packet_channel, config::GossipConfig, contact_info::ContactInfo},
        solana_keypair::Keypair,
        solana_signer::Signer,
        std::net::SocketAddr,
    };

    fn new_cluster_info() -> Arc<ClusterInfo> {
        let keypair = Arc::new(Keypair::new());
        let contact_info = ContactInfo::new_localhost(&keypair.pubkey(), 8000, timestamp());
        Arc::new(ClusterInfo::new(contact_info, keypair, GossipConfig::dev_default()).unwrap())
    }

    #[test]
    fn test_service_exit() {
        let cluster_info = new_cluster_info();
        let (inbound_sender, inbound_receiver) = bounded_packet_channel(16);
        let (outbound_sender, _outbound_receiver) = bounded_packet_channel(16);
        let exit = Arc::new(AtomicBool::new(false));
        let service =
            GossipService::new(&cluster_info, inbound_receiver, outbound_sender, exit.clone())
                .unwrap();
        sleep(Duration::from_millis(50));
        exit.store(true, Ordering::Relaxed);
        service.join().unwrap();
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert!(inbound_sender.send(vec![(from, vec![0u8])]).is_err());
    }

    #[test]
    fn test_listen_discards_queued_packets_on_exit() {
        let cluster_info = new_cluster_info();
        let (inbound_sender, inbound_receiver) = bounded_packet_channel(16);
        let (outbound_sender, outbound_receiver) = bounded_packet_channel(16);
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        inbound_sender
            .send(vec![(from, vec![1]), (from, vec![2])])
            .unwrap();
        inbound_sender.send(vec![(from, vec![3])]).unwrap();
        let exit = AtomicBool::new(true);
        run_listen(&cluster_info, &inbound_receiver, &outbound_sender, &exit);
        assert_eq!(cluster_info.stats.packets_discarded_on_exit.get(), 3);
        assert_eq!(cluster_info.stats.packets_received.get(), 0);
        assert!(outbound_receiver.is_empty());
    }

    #[test]
    fn test_listen_stops_when_outbound_disconnects() {
        let cluster_info = new_cluster_info();
        let (inbound_sender, inbound_receiver) = bounded_packet_channel(16);
        let (outbound_sender, outbound_receiver) = bounded_packet_channel(16);
        drop(outbound_receiver);
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let keypair = Keypair::new();
        let ping = crate::ping_pong::Ping::new([7u8; 32], &keypair);
        let packet = crate::protocol::Protocol::PingMessage(ping).to_packet().unwrap();
        inbound_sender.send(vec![(from, packet)]).unwrap();
        let exit = AtomicBool::new(false);
        // Returns once the pong cannot be sent.
        run_listen(&cluster_info, &inbound_receiver, &outbound_sender, &exit);
        assert_eq!(cluster_info.stats.pongs_sent.get(), 1);
    }
}
