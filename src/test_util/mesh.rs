use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::messaging::message::{Message, MessageId, Protocol, ViewLog};
use crate::messaging::peer_id::PeerId;
use crate::node::node::Node;
use crate::node::node_config::NodeConfig;
use crate::node::node_events::{NodeEvent, NodeEventNotifier};
use crate::test_util::peers::{test_addr, test_peer};
use crate::util::random::{Random, RngRandom};

/// the registry server's number, i.e. its port
pub const TEST_SERVER: u16 = 999;

/// guards against floods that do not die out
const MAX_ROUNDS: usize = 1000;

/// Nodes that exchange datagrams in memory rather than through sockets. Node `n` has the
///  address [test_addr]`(n)`, and the registry server's part is played by the test.
pub struct TestMesh<R: Random = RngRandom> {
    nodes: BTreeMap<u16, Node<R>>,
    events: BTreeMap<u16, broadcast::Receiver<NodeEvent>>,
    server_inbox: Vec<(SocketAddr, Message)>,
    now: Instant,
}
impl <R: Random> Default for TestMesh<R> {
    fn default() -> Self {
        TestMesh::new()
    }
}
impl <R: Random> TestMesh<R> {
    pub fn new() -> TestMesh<R> {
        TestMesh {
            nodes: Default::default(),
            events: Default::default(),
            server_inbox: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Adds a node, which immediately asks the registry server for registration
    pub fn add_node(&mut self, number: u16) {
        let mut config = NodeConfig::new(test_addr(TEST_SERVER));
        config.self_addr = test_addr(number);

        let notifier = Arc::new(NodeEventNotifier::new());
        self.events.insert(number, notifier.subscribe());

        let mut node = Node::new_with_random(Arc::new(config), notifier);
        node.register(self.now);
        self.nodes.insert(number, node);
    }

    pub fn node(&self, number: u16) -> &Node<R> {
        &self.nodes[&number]
    }

    pub fn advance_time(&mut self, duration: Duration) {
        self.now += duration;
    }

    /// Everything sent to the registry server so far, with the sender's address
    pub fn server_inbox(&self) -> &[(SocketAddr, Message)] {
        &self.server_inbox
    }

    /// Answers the node's registration request with its number as the peer id, and sends it a
    ///  registry snapshot with the given peers.
    pub fn register(&mut self, number: u16, known_peers: &[u16]) -> anyhow::Result<()> {
        self.run()?;

        let request = self.server_inbox.iter()
            .rev()
            .find(|(addr, msg)| *addr == test_addr(number) && msg.protocol == Protocol::RegistrationRequest)
            .map(|(_, msg)| msg.clone())
            .ok_or_else(|| anyhow!("no registration request from node {}", number))?;

        let response = Message {
            source: PeerId::SERVER,
            destination: test_peer(number),
            protocol: Protocol::RegistrationResponse,
            hop_count: 1,
            message_id: request.message_id,
            view_log: ViewLog::new(),
            body: "ACK".to_string(),
        };
        self.deliver(test_addr(TEST_SERVER), test_addr(number), &response.to_bytes());

        let entries = known_peers.iter()
            .map(|&n| format!("{}={}@{}", test_peer(n), test_addr(n).ip(), n))
            .collect::<Vec<_>>()
            .join(",");
        let snapshot = Message {
            source: PeerId::SERVER,
            destination: test_peer(number),
            protocol: Protocol::CurrentPeerRegistry,
            hop_count: 1,
            message_id: MessageId::FIRST,
            view_log: ViewLog::new(),
            body: format!("seen=and{}", entries),
        };
        self.deliver(test_addr(TEST_SERVER), test_addr(number), &snapshot.to_bytes());

        self.run()
    }

    pub fn command(&mut self, number: u16, line: &str) {
        if let Some(node) = self.nodes.get_mut(&number) {
            node.on_local_line(line.to_string());
        }
    }

    pub fn drain_events(&mut self, number: u16) -> Vec<NodeEvent> {
        let mut result = Vec::new();
        if let Some(events) = self.events.get_mut(&number) {
            while let Ok(evt) = events.try_recv() {
                result.push(evt);
            }
        }
        result
    }

    /// Lets all nodes process and exchange messages until there is nothing left to do at the
    ///  current point in time
    pub fn run(&mut self) -> anyhow::Result<()> {
        for _ in 0..MAX_ROUNDS {
            let mut busy = false;

            let numbers = self.nodes.keys().copied().collect::<Vec<_>>();
            for number in numbers {
                let mut datagrams = Vec::new();
                if let Some(node) = self.nodes.get_mut(&number) {
                    busy |= node.has_work();
                    node.tick(self.now)?;
                    while let Some(d) = node.next_datagrams() {
                        datagrams.extend(d);
                    }
                }

                for (to, buf) in datagrams {
                    busy = true;
                    self.deliver(test_addr(number), to, &buf);
                }
            }

            if !busy {
                return Ok(());
            }
        }
        Err(anyhow!("mesh did not settle after {} rounds", MAX_ROUNDS))
    }

    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, buf: &[u8]) {
        if to == test_addr(TEST_SERVER) {
            if let Ok(message) = Message::try_deser(buf) {
                self.server_inbox.push((from, message));
            }
            return;
        }

        // datagrams to addresses nobody listens on are lost
        if let Some(node) = self.nodes.get_mut(&to.port()) {
            node.on_datagram(buf, from);
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_register() {
        let mut mesh: TestMesh = TestMesh::new();
        mesh.add_node(1);
        mesh.add_node(2);
        mesh.register(1, &[1, 2]).unwrap();

        assert_eq!(mesh.server_inbox().len(), 2);
        assert_eq!(mesh.node(1).myself(), Some(test_peer(1)));
        assert_eq!(mesh.node(1).registry().known_peers(), vec![test_peer(2)]);
        assert!(mesh.node(1).pending_sends().is_empty());
        assert_eq!(mesh.node(2).myself(), None);

        let events = mesh.drain_events(1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], NodeEvent::Registered(test_peer(1)));
    }

    #[test]
    fn test_registration_retries_reach_server() {
        let mut mesh: TestMesh = TestMesh::new();
        mesh.add_node(1);
        mesh.run().unwrap();
        mesh.advance_time(Duration::from_secs(3));
        mesh.run().unwrap();

        assert_eq!(mesh.server_inbox().len(), 2);
        assert_eq!(mesh.server_inbox()[0], mesh.server_inbox()[1]);
    }
}
