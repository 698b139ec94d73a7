//! Tokennet Simulator CLI
//!
//! Runs a deterministic token-passing simulation, takes a global snapshot
//! mid-run, and prints the reconciled result. Single-threaded tick loop,
//! reproducible when the same seed is used; snapshot retrieval happens on
//! a separate blocking collector thread, exercising the same API a real
//! caller would use.
//!
//! # Example
//!
//! ```bash
//! # 5-node ring, fixed seed
//! tokennet-sim --nodes 5 --seed 42
//!
//! # Fully connected topology with heavier traffic
//! tokennet-sim --nodes 4 --topology full --transfers 50
//! ```

use clap::{Parser, ValueEnum};
use std::sync::mpsc;
use std::thread;
use tokennet_simulation::{SimulationConfig, SimulationRunner};
use tokennet_types::NodeId;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Topology {
    /// Unidirectional ring: n0 -> n1 -> ... -> n0.
    Ring,
    /// Every ordered pair of nodes gets a link.
    Full,
}

/// Tokennet Simulator
///
/// Deterministic discrete-time simulation of a token-passing network with
/// Chandy-Lamport global snapshots.
#[derive(Parser, Debug)]
#[command(name = "tokennet-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of nodes
    #[arg(short = 'n', long, default_value = "5")]
    nodes: usize,

    /// Starting token balance per node
    #[arg(short = 't', long, default_value = "100")]
    tokens: u64,

    /// Transfers to inject before the snapshot
    #[arg(long, default_value = "20")]
    transfers: u64,

    /// Topology shape
    #[arg(long, value_enum, default_value = "ring")]
    topology: Topology,

    /// Random seed for reproducible results. When omitted, a random seed
    /// is used.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tokennet_simulation=info")),
        )
        .init();

    let args = Args::parse();
    if args.nodes < 2 {
        eprintln!("need at least 2 nodes");
        std::process::exit(1);
    }
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(
        nodes = args.nodes,
        tokens = args.tokens,
        transfers = args.transfers,
        topology = ?args.topology,
        seed,
        "starting simulation"
    );

    let mut sim = SimulationRunner::new(SimulationConfig::default(), seed);
    let names: Vec<NodeId> = (0..args.nodes).map(|i| NodeId::from(format!("n{i}"))).collect();
    if let Err(e) = build_topology(&mut sim, &names, args.topology, args.tokens) {
        eprintln!("topology error: {e}");
        std::process::exit(1);
    }

    let total_before = sim.total_tokens();

    // Traffic phase: inject transfers along existing links, one per tick.
    for round in 0..args.transfers {
        let src = &names[(round as usize) % names.len()];
        let dest = &names[((round as usize) + 1) % names.len()];
        let amount = round % 7 + 1;
        if let Err(e) = sim.inject_transfer(src, dest, amount) {
            eprintln!("injection error: {e}");
            std::process::exit(1);
        }
        sim.tick();
    }

    // Let the warm-up traffic settle, then put fresh transfers in flight
    // for the snapshot to catch. None of them target the originator:
    // the originator closes its inbound channels the instant it records,
    // so a token already heading its way can fall outside the cut.
    while !sim.is_quiescent() {
        sim.tick();
    }
    for i in 0..names.len() - 1 {
        let amount = (i as u64) % 7 + 1;
        if let Err(e) = sim.inject_transfer(&names[i], &names[i + 1], amount) {
            eprintln!("injection error: {e}");
            std::process::exit(1);
        }
    }

    // Snapshot phase: originate at n0 and block for the result on a
    // second thread while this one keeps ticking.
    let origin = names[0].clone();
    let snapshot = match sim.start_snapshot(&origin) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("snapshot error: {e}");
            std::process::exit(1);
        }
    };

    let collector = sim.collector();
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let state = collector.collect(snapshot);
        let _ = tx.send(state);
    });

    let state = loop {
        sim.tick();
        match rx.try_recv() {
            Ok(state) => break state,
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => unreachable!("collector thread died"),
        }
        if sim.time() > 1_000_000 {
            eprintln!("snapshot did not complete");
            std::process::exit(1);
        }
    };
    waiter.join().expect("collector thread");

    // Drain remaining traffic.
    while !sim.is_quiescent() {
        sim.tick();
    }

    println!("\n=== Snapshot {} (tick {}) ===", state.id, sim.time());
    for (node, balance) in &state.balances {
        println!("  {node:>6}  {balance} tokens");
    }
    if state.messages.is_empty() {
        println!("  no in-transit messages");
    } else {
        for msg in &state.messages {
            println!("  in transit: {} -> {}  {} tokens", msg.src, msg.dest, msg.amount);
        }
    }
    println!(
        "  cut total: {} (network held {} before the snapshot)",
        state.total_tokens(),
        total_before
    );

    let stats = sim.stats();
    println!("\n=== Run statistics ===");
    println!("  ticks:              {}", stats.ticks);
    println!("  transfers injected: {}", stats.transfers_injected);
    println!("  messages delivered: {}", stats.messages_delivered);
    println!("    tokens:           {}", stats.tokens_delivered);
    println!("    markers:          {}", stats.markers_delivered);
    println!("  snapshots:          {} started, {} completed", stats.snapshots_started, stats.snapshots_completed);
}

fn build_topology(
    sim: &mut SimulationRunner,
    names: &[NodeId],
    topology: Topology,
    tokens: u64,
) -> Result<(), tokennet_types::TopologyError> {
    for name in names {
        sim.add_node(name.clone(), tokens)?;
    }
    match topology {
        Topology::Ring => {
            for i in 0..names.len() {
                sim.add_link(names[i].clone(), names[(i + 1) % names.len()].clone())?;
            }
        }
        Topology::Full => {
            for src in names {
                for dest in names {
                    if src != dest {
                        sim.add_link(src.clone(), dest.clone())?;
                    }
                }
            }
        }
    }
    Ok(())
}
