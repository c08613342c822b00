//! An in-process cluster: every node runs a full [`GossipService`] and a
//! router thread stands in for the network, handing each outbound packet to
//! the destination node's inbound queue with the sender's gossip address as
//! the source.

use {
    crate::{
        channel::{bounded_packet_channel, recv_packets, PacketBatch},
        cluster_info::ClusterInfo,
        config::GossipConfig,
        contact_info::ContactInfo,
        error::{GossipError, Result},
        gossip_service::GossipService,
    },
    crossbeam_channel::{Receiver, Sender, TrySendError},
    log::{info, trace},
    solana_keypair::Keypair,
    solana_signer::Signer,
    solana_time_utils::timestamp,
    std::{
        collections::HashMap,
        fmt,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, sleep, Builder, JoinHandle},
        time::{Duration, Instant},
    },
};

/// Ports reserved per node; a contact info advertises several sockets above
/// its gossip port.
const PORT_STRIDE: u16 = 10;
const ROUTER_RECV_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_PACKETS_PER_ROUTE: usize = 1_024;
const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Routes = HashMap<SocketAddr, Sender<PacketBatch>>;

pub struct LocalCluster {
    nodes: Vec<Arc<ClusterInfo>>,
    services: Vec<GossipService>,
    routers: Vec<JoinHandle<()>>,
    exit: Arc<AtomicBool>,
}

impl fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCluster")
            .field("nodes", &self.nodes)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl LocalCluster {
    /// Starts `num_nodes` nodes on localhost. The first node is the
    /// entrypoint every other node bootstraps from.
    pub fn start(num_nodes: usize, base_port: u16, config: &GossipConfig) -> Result<Self> {
        let now = timestamp();
        let mut nodes = Vec::with_capacity(num_nodes);
        let mut routes = Routes::with_capacity(num_nodes);
        let mut queues = Vec::with_capacity(num_nodes);
        for k in 0..num_nodes {
            let keypair = Arc::new(Keypair::new());
            let port = u16::try_from(k)
                .ok()
                .and_then(|k| k.checked_mul(PORT_STRIDE))
                .and_then(|offset| base_port.checked_add(offset))
                .ok_or(GossipError::InvalidGossipAddress(keypair.pubkey()))?;
            let contact_info = ContactInfo::new_localhost(&keypair.pubkey(), port, now);
            let node = Arc::new(ClusterInfo::new(contact_info, keypair, config.clone())?);
            let (inbound_sender, inbound_receiver) = bounded_packet_channel(config.channel_capacity);
            let (outbound_sender, outbound_receiver) =
                bounded_packet_channel(config.channel_capacity);
            routes.insert(node.gossip_addr(), inbound_sender);
            queues.push((inbound_receiver, outbound_sender, outbound_receiver));
            nodes.push(node);
        }
        if let Some(entrypoint) = nodes.first().map(|node| node.gossip_addr()) {
            for node in nodes.iter().skip(1) {
                node.set_entrypoints(vec![entrypoint]);
            }
        }
        let routes = Arc::new(routes);
        let mut cluster = Self {
            nodes: Vec::with_capacity(num_nodes),
            services: Vec::with_capacity(num_nodes),
            routers: Vec::with_capacity(num_nodes),
            exit: Arc::new(AtomicBool::new(false)),
        };
        for (node, (inbound_receiver, outbound_sender, outbound_receiver)) in
            nodes.into_iter().zip(queues)
        {
            if let Err(err) = cluster.spawn_node(
                node,
                inbound_receiver,
                outbound_sender,
                outbound_receiver,
                &routes,
            ) {
                // Stop whatever was already spawned.
                cluster.exit.store(true, Ordering::Relaxed);
                return Err(err);
            }
        }
        info!(
            "local cluster of {num_nodes} nodes started, entrypoint {:?}",
            cluster.nodes.first().map(|node| node.gossip_addr())
        );
        Ok(cluster)
    }

    fn spawn_node(
        &mut self,
        node: Arc<ClusterInfo>,
        inbound_receiver: Receiver<PacketBatch>,
        outbound_sender: Sender<PacketBatch>,
        outbound_receiver: Receiver<PacketBatch>,
        routes: &Arc<Routes>,
    ) -> Result<()> {
        let service = GossipService::new(&node, inbound_receiver, outbound_sender, self.exit.clone())?;
        self.services.push(service);
        let router = Builder::new().name("trv1GossipRtr".to_string()).spawn({
            let node = node.clone();
            let routes = routes.clone();
            let exit = self.exit.clone();
            move || run_router(&node, &outbound_receiver, &routes, &exit)
        })?;
        self.routers.push(router);
        self.nodes.push(node);
        Ok(())
    }

    pub fn nodes(&self) -> &[Arc<ClusterInfo>] {
        &self.nodes
    }

    /// True once every node knows the contact info of every other node.
    pub fn is_converged(&self) -> bool {
        let num_nodes = self.nodes.len();
        self.nodes.iter().all(|node| node.num_nodes() == num_nodes)
    }

    /// Polls until the cluster converges. Returns how long it took, or
    /// `None` if `timeout` ran out first.
    pub fn wait_for_convergence(&self, timeout: Duration) -> Option<Duration> {
        let start = Instant::now();
        loop {
            if self.is_converged() {
                return Some(start.elapsed());
            }
            if start.elapsed() >= timeout {
                return None;
            }
            sleep(CONVERGENCE_POLL_INTERVAL);
        }
    }

    pub fn shutdown(self) -> thread::Result<()> {
        self.exit.store(true, Ordering::Relaxed);
        for service in self.services {
            service.join()?;
        }
        for router in self.routers {
            router.join()?;
        }
        Ok(())
    }
}

fn run_router(node: &ClusterInfo, receiver: &Receiver<PacketBatch>, routes: &Routes, exit: &AtomicBool) {
    let source = node.gossip_addr();
    while !exit.load(Ordering::Relaxed) {
        let packets = match recv_packets(receiver, ROUTER_RECV_TIMEOUT, MAX_PACKETS_PER_ROUTE) {
            Ok(Some(packets)) => packets,
            Ok(None) => continue,
            Err(_) => break,
        };
        let mut batches = HashMap::<SocketAddr, PacketBatch>::new();
        for (destination, bytes) in packets {
            batches.entry(destination).or_default().push((source, bytes));
        }
        for (destination, batch) in batches {
            let num_packets = batch.len() as u64;
            let Some(route) = routes.get(&destination) else {
                trace!("{source}: no route to {destination}");
                node.stats.packets_dropped_on_send.add_relaxed(num_packets);
                continue;
            };
            match route.try_send(batch) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    node.stats.packets_dropped_on_send.add_relaxed(num_packets);
                }
                // The destination already stopped.
                Err(TrySendError::Disconnected(_)) => (),
            }
        }
    }
}
