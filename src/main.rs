use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::lookup_host;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, warn, Level};

use meshchat::messaging::transport::UdpTransport;
use meshchat::node::node::Node;
use meshchat::node::node_config::{NodeConfig, DEFAULT_PORT, DEFAULT_SERVER};
use meshchat::node::node_driver::run_node;
use meshchat::node::node_events::{NodeEvent, NodeEventNotifier};

/// Chat with peers in a decentralized UDP mesh.
///
/// Type 'msg <peer id> <text>' to send to a single peer, 'msg <text>' or 'all <text>' to send to
///  all known peers, and 'ids' to refresh the list of known peers.
#[derive(Parser, Debug)]
#[command(name = "meshchat")]
struct Args {
    /// local address for the node's UDP socket
    #[arg(long, default_value_t = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))]
    bind: SocketAddr,

    /// registry server as host:port
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,

    /// log dropped messages and retries
    #[arg(short, long)]
    verbose: bool,

    /// log every datagram
    #[arg(long)]
    very_verbose: bool,
}

fn init_logging(args: &Args) {
    let level = if args.very_verbose {
        Level::TRACE
    }
    else if args.verbose {
        Level::DEBUG
    }
    else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let server_addr = lookup_host(&args.server).await?
        .next()
        .ok_or_else(|| anyhow!("registry server {} does not resolve to an address", args.server))?;

    let mut config = NodeConfig::new(server_addr);
    config.self_addr = args.bind;
    let config = Arc::new(config);

    let event_notifier = Arc::new(NodeEventNotifier::new());
    tokio::spawn(print_events(event_notifier.subscribe()));

    let (local_input, local_input_recv) = mpsc::channel(16);
    tokio::spawn(read_local_input(local_input));

    let transport = Arc::new(UdpTransport::bind(config.self_addr).await?);
    let node = Node::new(config, event_notifier);

    let result = run_node(node, transport, local_input_recv).await;
    if let Err(e) = &result {
        error!("shutting down: {}", e);
    }
    result
}

async fn read_local_input(local_input: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if local_input.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("error reading local input: {}", e);
                break;
            }
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<NodeEvent>) {
    loop {
        match events.recv().await {
            Ok(evt) => print_event(evt),
            Err(RecvError::Lagged(num_skipped)) => warn!("skipped {} events", num_skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(evt: NodeEvent) {
    match evt {
        NodeEvent::Registered(myself) => {
            println!("registered as peer {}", myself);
        }
        NodeEvent::MessageReceived(data) => {
            println!("{}: {}", data.from, data.body);
        }
        NodeEvent::MessageRelayed(data) => {
            println!("relaying from {} to {}: {}", data.from, data.to, data.body);
        }
        NodeEvent::PeerRegistry(data) => {
            let recently_seen = data.recently_seen.iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            println!("recently seen: {}", recently_seen);
            for (peer, addr) in data.known {
                println!("  {} at {}", peer, addr);
            }
        }
        NodeEvent::ErrorReceived(data) => {
            println!("error from {}: {}", data.from, data.body);
        }
        NodeEvent::DeliveryFailed(data) => {
            println!("message {} could not be delivered to {}", data.message_id, data.recipient);
        }
    }
}
