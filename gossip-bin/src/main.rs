//! Spins up a local gossip cluster and reports how long it takes to converge.

use {
    clap::{crate_description, crate_name, value_t_or_exit, App, Arg, ArgMatches},
    log::{error, info},
    std::{process::exit, time::Duration},
    trv1_gossip::{config::GossipConfig, local_cluster::LocalCluster},
};

fn parse_matches() -> ArgMatches<'static> {
    App::new(crate_name!())
        .about(crate_description!())
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("num_nodes")
                .long("num-nodes")
                .short("n")
                .value_name("NUM")
                .takes_value(true)
                .default_value("10")
                .help("Number of nodes in the cluster"),
        )
        .arg(
            Arg::with_name("base_port")
                .long("base-port")
                .value_name("PORT")
                .takes_value(true)
                .default_value("8000")
                .help("Gossip port of the entrypoint; later nodes count up from it"),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .value_name("SECS")
                .takes_value(true)
                .default_value("60")
                .help("Give up if the cluster has not converged after this many seconds"),
        )
        .arg(
            Arg::with_name("push_fanout")
                .long("push-fanout")
                .value_name("NUM")
                .takes_value(true)
                .help("Number of peers each node pushes to"),
        )
        .arg(
            Arg::with_name("pull_interval_ms")
                .long("pull-interval-ms")
                .value_name("MILLIS")
                .takes_value(true)
                .help("Interval between pull rounds"),
        )
        .arg(
            Arg::with_name("gossip_loop_interval_ms")
                .long("gossip-loop-interval-ms")
                .value_name("MILLIS")
                .takes_value(true)
                .help("Sleep between iterations of the gossip loop"),
        )
        .get_matches()
}

fn gossip_config(matches: &ArgMatches) -> GossipConfig {
    let mut config = GossipConfig::default();
    if matches.is_present("push_fanout") {
        config.active_set_size = value_t_or_exit!(matches, "push_fanout", usize);
    }
    if matches.is_present("pull_interval_ms") {
        config.pull_interval_ms = value_t_or_exit!(matches, "pull_interval_ms", u64);
    }
    if matches.is_present("gossip_loop_interval_ms") {
        config.gossip_loop_interval_ms = value_t_or_exit!(matches, "gossip_loop_interval_ms", u64);
    }
    config
}

fn main() {
    trv1_logger::setup_with_default("info");
    let matches = parse_matches();
    let num_nodes = value_t_or_exit!(matches, "num_nodes", usize);
    let base_port = value_t_or_exit!(matches, "base_port", u16);
    let timeout = Duration::from_secs(value_t_or_exit!(matches, "timeout", u64));
    let config = gossip_config(&matches);

    let cluster = match LocalCluster::start(num_nodes, base_port, &config) {
        Ok(cluster) => cluster,
        Err(err) => {
            error!("failed to start cluster: {err}");
            exit(1);
        }
    };
    let converged = cluster.wait_for_convergence(timeout);
    match converged {
        Some(elapsed) => println!("{num_nodes} nodes converged in {elapsed:?}"),
        None => println!("{num_nodes} nodes did not converge within {timeout:?}"),
    }
    println!(
        "{:<46} {:<21} {:>6} {:>8} {:>6}",
        "Identity", "Gossip", "Nodes", "Values", "Peers"
    );
    for node in cluster.nodes() {
        println!(
            "{:<46} {:<21} {:>6} {:>8} {:>6}",
            node.id().to_string(),
            node.gossip_addr().to_string(),
            node.num_nodes(),
            node.gossip.table.read().len(),
            node.gossip.push.active_set().read().len(),
        );
    }
    if cluster.shutdown().is_err() {
        error!("a gossip thread panicked");
        exit(1);
    }
    info!("cluster shut down");
    if converged.is_none() {
        exit(1);
    }
}
