use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::messaging::transport::{Transport, MAX_DATAGRAM_SIZE};
use crate::node::node::Node;
use crate::util::random::Random;

/// Runs a node on a transport until a fatal error occurs: a socket error while waiting or
///  receiving, or failure to register. Sending a single datagram may fail without affecting the
///  node.
///
/// Registration is sent on startup. After that, the loop waits for whichever comes first: a line
///  of local input, an incoming datagram, the socket becoming writable while there is something
///  to send, or the poll interval passing. Every wakeup is followed by one tick of the node, so
///  retries happen even when nothing else is going on.
pub async fn run_node<T: Transport, R: Random>(
    mut node: Node<R>,
    transport: Arc<T>,
    mut local_input: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    info!("starting node on {:?}", transport.local_addr()?);

    node.register(Instant::now());

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let mut local_input_open = true;
    let poll_interval = node.config().poll_interval;

    loop {
        select! {
            line = local_input.recv(), if local_input_open => {
                match line {
                    Some(line) => node.on_local_line(line),
                    None => {
                        debug!("local input closed");
                        local_input_open = false;
                    }
                }
            }
            received = transport.recv_from(&mut buf) => {
                let (len, from) = received?;
                if len >= buf.len() {
                    warn!(?from, "dropped datagram - exceeds {} bytes", MAX_DATAGRAM_SIZE - 1);
                }
                else {
                    node.on_datagram(&buf[..len], from);
                }
            }
            writable = transport.writable(), if node.has_outbound() => {
                writable?;
                if let Some(datagrams) = node.next_datagrams() {
                    for (to, datagram) in datagrams {
                        if let Err(e) = transport.send_to(to, &datagram).await {
                            warn!(?to, "failed to send datagram: {}", e);
                        }
                    }
                }
            }
            _ = sleep(poll_interval) => {}
        }

        node.tick(Instant::now())?;
    }
}
