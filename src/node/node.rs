use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::messaging::message::{sanitize_body, Message, MessageId, Protocol, ViewLog};
use crate::messaging::peer_id::PeerId;
use crate::node::forward_router::{DataTarget, ForwardRouter};
use crate::node::local_command::LocalCommand;
use crate::node::node_config::NodeConfig;
use crate::node::node_events::{ErrorReceivedData, MessageReceivedData, NodeEvent, NodeEventNotifier, PeerRegistryData};
use crate::node::peer_registry::{PeerRegistry, RegistrySnapshot};
use crate::node::pending_sends::{Outbound, OutboundQueue, PendingSends, SendKind};
use crate::util::random::{Random, RngRandom};

const REGISTRATION_BODY: &str = "register";
const PEER_REGISTRY_REQUEST_BODY: &str = "get map";

/// A decoded message waiting to be dispatched
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message: Message,
    /// set for confirmations from a relay whose id was resolved from its address on receipt:
    ///  the view log was replaced with the relay's id, and the confirmation belongs to the router
    pub forward_tagged: bool,
}

/// A mesh chat node's complete state, driven by the reactor: datagrams and local input go in,
///  [Node::tick] makes progress, and datagrams come out when the socket is writable.
///
/// All processing happens on the reactor's task, so there is no locking.
pub struct Node<R: Random = RngRandom> {
    config: Arc<NodeConfig>,
    event_notifier: Arc<NodeEventNotifier>,

    /// assigned by the registry server
    myself: Option<PeerId>,
    next_message_id: MessageId,

    registry: PeerRegistry,
    pending: PendingSends,
    router: ForwardRouter<R>,

    inbound: VecDeque<InboundMessage>,
    local_commands: VecDeque<String>,
    outbound: OutboundQueue,
}
impl Node<RngRandom> {
    pub fn new(config: Arc<NodeConfig>, event_notifier: Arc<NodeEventNotifier>) -> Node<RngRandom> {
        Node::new_with_random(config, event_notifier)
    }
}
impl <R: Random> Node<R> {
    pub fn new_with_random(config: Arc<NodeConfig>, event_notifier: Arc<NodeEventNotifier>) -> Node<R> {
        Node {
            registry: PeerRegistry::new(config.server_addr),
            pending: PendingSends::new(config.clone(), event_notifier.clone()),
            router: ForwardRouter::new_with_random(config.clone(), event_notifier.clone()),
            config,
            event_notifier,
            myself: None,
            next_message_id: MessageId::FIRST,
            inbound: Default::default(),
            local_commands: Default::default(),
            outbound: OutboundQueue::new(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn myself(&self) -> Option<PeerId> {
        self.myself
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn pending_sends(&self) -> &PendingSends {
        &self.pending
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// true if there is anything left to do without new input or the passing of time
    pub fn has_work(&self) -> bool {
        !self.inbound.is_empty() || !self.local_commands.is_empty() || self.has_outbound()
    }

    fn new_message_id(&mut self) -> MessageId {
        let result = self.next_message_id;
        self.next_message_id = result.next();
        result
    }

    /// Queues the registration request to the registry server. Its response assigns this node
    ///  its id.
    pub fn register(&mut self, now: Instant) {
        let message = Message {
            source: PeerId::UNREGISTERED,
            destination: PeerId::SERVER,
            protocol: Protocol::RegistrationRequest,
            hop_count: 1,
            message_id: self.new_message_id(),
            view_log: ViewLog::new(),
            body: REGISTRATION_BODY.to_string(),
        };
        info!(server = ?self.config.server_addr, "registering");
        self.send_to_server(message, now);
    }

    fn send_to_server(&mut self, message: Message, now: Instant) {
        let outbound = Outbound {
            message,
            recipients: vec![PeerId::SERVER],
            kind: SendKind::Direct,
        };
        self.pending.track(&outbound, now);
        self.outbound.push(outbound);
    }

    pub fn on_local_line(&mut self, line: String) {
        trace!(%line, "local input");
        self.local_commands.push_back(line);
    }

    pub fn on_datagram(&mut self, buf: &[u8], sender: SocketAddr) {
        let mut message = match Message::try_deser(buf) {
            Ok(message) => message,
            Err(e) => {
                warn!(?sender, "dropped message - format mismatch: {}", e);
                return;
            }
        };
        trace!(?sender, ?message, "received");

        let mut forward_tagged = false;
        if !self.registry.is_known(&message.source) {
            match self.registry.peer_for_addr(sender) {
                Some(relay) if message.protocol == Protocol::DataConfirmation => {
                    debug!(?relay, "confirmation relayed by a known peer");
                    message.view_log = ViewLog::of(relay);
                    forward_tagged = true;
                }
                // confirmations are never answered, so there is nothing to remember them for
                _ if message.protocol.is_confirmation() => {}
                _ => {
                    self.registry.remember_unknown(message.source, message.message_id, sender);
                }
            }
        }

        self.inbound.push_back(InboundMessage {
            message,
            forward_tagged,
        });
    }

    /// The next queued send, encoded per recipient. Recipients without a known address are
    ///  skipped.
    pub fn next_datagrams(&mut self) -> Option<Vec<(SocketAddr, BytesMut)>> {
        let outbound = self.outbound.try_pop()?;

        let mut result = Vec::with_capacity(outbound.recipients.len());
        for &recipient in &outbound.recipients {
            match self.registry.resolve(&recipient, outbound.message.message_id) {
                Some(addr) => {
                    let message = outbound.message_for(recipient);
                    trace!(?addr, ?message, "sending");
                    result.push((addr, message.to_bytes()));
                }
                None => {
                    warn!(?recipient, message_id = ?outbound.message.message_id, "no address for recipient - not sending");
                }
            }
        }
        Some(result)
    }

    /// One step of processing: at most one inbound message and one local command, followed by
    ///  retry handling. The only error is failure to register, which is fatal.
    pub fn tick(&mut self, now: Instant) -> anyhow::Result<()> {
        if let Some(inbound) = self.inbound.pop_front() {
            self.dispatch(inbound, now);
        }
        if let Some(line) = self.local_commands.pop_front() {
            self.on_local_command(&line, now);
        }

        let retransmissions = self.pending.sweep(now, self.myself.is_some())?;
        for outbound in retransmissions {
            self.outbound.push(outbound);
        }
        Ok(())
    }

    fn dispatch(&mut self, inbound: InboundMessage, now: Instant) {
        let for_me = !inbound.forward_tagged && Some(inbound.message.destination) == self.myself;
        if for_me || inbound.message.protocol == Protocol::RegistrationResponse {
            self.on_message_for_me(inbound.message);
        }
        else {
            self.router.on_message(self.myself, inbound, &self.registry, &mut self.pending, &mut self.outbound, now);
        }
    }

    fn on_message_for_me(&mut self, message: Message) {
        if message.protocol.is_confirmation() {
            self.pending.on_confirmation(message.source, message.message_id);
        }

        match message.protocol {
            Protocol::Data | Protocol::SerialBroadcast => {
                self.event_notifier.send_event(NodeEvent::MessageReceived(MessageReceivedData {
                    from: message.source,
                    to: message.destination,
                    body: message.body.clone(),
                }));
                self.router.acknowledge(&message, &mut self.outbound);
            }
            Protocol::RegistrationResponse => {
                info!(myself = ?message.destination, "registered");
                self.myself = Some(message.destination);
                self.event_notifier.send_event(NodeEvent::Registered(message.destination));
            }
            Protocol::CurrentPeerRegistry => {
                match RegistrySnapshot::parse(&message.body) {
                    Ok(snapshot) => {
                        self.registry.replace(snapshot, self.myself);
                        self.event_notifier.send_event(NodeEvent::PeerRegistry(PeerRegistryData {
                            recently_seen: self.registry.recently_seen().to_vec(),
                            known: self.registry.known_peer_addrs(),
                        }));
                    }
                    Err(e) => {
                        warn!(body = ?message.body, "ignoring malformed peer registry: {}", e);
                    }
                }
            }
            Protocol::Error => {
                warn!(from = ?message.source, body = ?message.body, "error message received");
                self.event_notifier.send_event(NodeEvent::ErrorReceived(ErrorReceivedData {
                    from: message.source,
                    body: message.body,
                }));
            }
            Protocol::DataConfirmation | Protocol::SerialBroadcastConfirmation => {}
            Protocol::RegistrationRequest | Protocol::RequestPeerRegistry => {
                debug!(from = ?message.source, "ignoring {:?} - this is not the registry server", message.protocol);
            }
        }
    }

    fn on_local_command(&mut self, line: &str, now: Instant) {
        match LocalCommand::parse(line) {
            LocalCommand::SendToPeer { peer, text } => self.send_data(DataTarget::Peer(peer), &text, now),
            LocalCommand::Broadcast { text } => self.send_data(DataTarget::AllPeers, &text, now),
            LocalCommand::RequestPeers => self.request_peer_registry(now),
            LocalCommand::Blank => {}
            LocalCommand::Invalid(line) => {
                warn!(%line, "invalid input - expected 'msg <peer id> <text>', 'msg <text>', 'all <text>' or 'ids'");
            }
        }
    }

    fn send_data(&mut self, target: DataTarget, text: &str, now: Instant) {
        let myself = match self.myself {
            Some(myself) => myself,
            None => {
                warn!("not registered yet - cannot send messages");
                return;
            }
        };

        let message_id = self.new_message_id();
        if let Err(e) = self.router.send_data(myself, message_id, target, sanitize_body(text), &self.registry, &mut self.pending, &mut self.outbound, now) {
            warn!(?target, "not sending message: {}", e);
        }
    }

    fn request_peer_registry(&mut self, now: Instant) {
        let myself = match self.myself {
            Some(myself) => myself,
            None => {
                warn!("not registered yet - cannot request the peer registry");
                return;
            }
        };

        let message = Message {
            source: myself,
            destination: PeerId::SERVER,
            protocol: Protocol::RequestPeerRegistry,
            hop_count: 1,
            message_id: self.new_message_id(),
            view_log: ViewLog::new(),
            body: PEER_REGISTRY_REQUEST_BODY.to_string(),
        };
        self.send_to_server(message, now);
    }
}
