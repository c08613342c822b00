//! Bounded packet queues between the transport and the gossip workers.

use {
    crate::{
        error::{GossipError, Result},
        gossip_stats::GossipStats,
    },
    crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError},
    std::{net::SocketAddr, time::Duration},
};

/// A datagram and its peer address: the destination on the way out, the
/// source on the way in.
pub type Packet = (SocketAddr, Vec<u8>);
pub type PacketBatch = Vec<Packet>;

pub fn bounded_packet_channel(capacity: usize) -> (Sender<PacketBatch>, Receiver<PacketBatch>) {
    crossbeam_channel::bounded(capacity)
}

/// How [`send_packets`] behaves when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    /// Wait for capacity.
    Block,
    /// Drop the batch immediately.
    Try,
    /// Wait up to the given duration, then drop.
    Timeout(Duration),
}

/// Queues a batch. Dropped batches are counted and reported as
/// [`GossipError::ChannelFull`]; a disconnected receiver is
/// [`GossipError::ChannelClosed`].
pub fn send_packets(
    sender: &Sender<PacketBatch>,
    packets: PacketBatch,
    mode: SendMode,
    stats: &GossipStats,
) -> Result<()> {
    if packets.is_empty() {
        return Ok(());
    }
    let num_packets = packets.len() as u64;
    let dropped = match mode {
        SendMode::Block => match sender.send(packets) {
            Ok(()) => false,
            Err(_) => return Err(GossipError::ChannelClosed),
        },
        SendMode::Try => match sender.try_send(packets) {
            Ok(()) => false,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => return Err(GossipError::ChannelClosed),
        },
        SendMode::Timeout(timeout) => match sender.send_timeout(packets, timeout) {
            Ok(()) => false,
            Err(SendTimeoutError::Timeout(_)) => true,
            Err(SendTimeoutError::Disconnected(_)) => return Err(GossipError::ChannelClosed),
        },
    };
    if dropped {
        stats.packets_dropped_on_send.add_relaxed(num_packets);
        return Err(GossipError::ChannelFull);
    }
    stats.packets_sent.add_relaxed(num_packets);
    Ok(())
}

/// Waits up to `timeout` for a batch, then greedily appends whatever else is
/// already queued, up to `max_packets`. Returns `Ok(None)` on timeout.
pub fn recv_packets(
    receiver: &Receiver<PacketBatch>,
    timeout: Duration,
    max_packets: usize,
) -> Result<Option<PacketBatch>> {
    let mut packets = match receiver.recv_timeout(timeout) {
        Ok(packets) => packets,
        Err(RecvTimeoutError::Timeout) => return Ok(None),
        Err(RecvTimeoutError::Disconnected) => return Err(GossipError::ChannelClosed),
    };
    while packets.len() < max_packets {
        match receiver.try_recv() {
            Ok(more) => packets.extend(more),
            Err(_) => break,
        }
    }
    Ok(Some(packets))
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    fn new_packets(count: usize) -> PacketBatch {
        let addr: SocketAddr = "127.0.0.1:8001".parse().unwrap();
        (0..count).map(|k| (addr, vec![k as u8])).collect()
    }

    #[test]
    fn test_send_modes() {
        let stats = GossipStats::default();
        let (sender, receiver) = bounded_packet_channel(1);
        send_packets(&sender, new_packets(3), SendMode::Try, &stats).unwrap();
        assert_matches!(
            send_packets(&sender, new_packets(2), SendMode::Try, &stats),
            Err(GossipError::ChannelFull)
        );
        assert_matches!(
            send_packets(
                &sender,
                new_packets(1),
                SendMode::Timeout(Duration::from_millis(5)),
                &stats
            ),
            Err(GossipError::ChannelFull)
        );
        assert_eq!(stats.packets_sent.get(), 3);
        assert_eq!(stats.packets_dropped_on_send.get(), 3);
        assert_eq!(receiver.recv().unwrap().len(), 3);
        // Empty batches are not queued.
        send_packets(&sender, vec![], SendMode::Block, &stats).unwrap();
        assert!(receiver.is_empty());
        drop(receiver);
        assert_matches!(
            send_packets(&sender, new_packets(1), SendMode::Block, &stats),
            Err(GossipError::ChannelClosed)
        );
    }

    #[test]
    fn test_recv_packets() {
        let stats = GossipStats::default();
        let (sender, receiver) = bounded_packet_channel(8);
        let timeout = Duration::from_millis(5);
        assert_matches!(recv_packets(&receiver, timeout, 16), Ok(None));
        for _ in 0..3 {
            send_packets(&sender, new_packets(4), SendMode::Block, &stats).unwrap();
        }
        // Coalesces until the limit is reached.
        let packets = recv_packets(&receiver, timeout, 6).unwrap().unwrap();
        assert_eq!(packets.len(), 8);
        let packets = recv_packets(&receiver, timeout, 6).unwrap().unwrap();
        assert_eq!(packets.len(), 4);
        drop(sender);
        assert_matches!(
            recv_packets(&receiver, timeout, 16),
            Err(GossipError::ChannelClosed)
        );
    }
}
