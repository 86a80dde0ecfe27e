use std::marker::PhantomData;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::messaging::message::{Message, MessageId, Protocol, ViewLog};
use crate::messaging::peer_id::PeerId;
use crate::node::node::InboundMessage;
use crate::node::node_config::NodeConfig;
use crate::node::node_events::{MessageReceivedData, NodeEvent, NodeEventNotifier};
use crate::node::peer_registry::PeerRegistry;
use crate::node::pending_sends::{Outbound, OutboundQueue, PendingSends, SendKind};
use crate::util::random::{pick_random, Random, RngRandom};

/// Who a locally originated data message is for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataTarget {
    Peer(PeerId),
    AllPeers,
}

/// Routing of messages that are not for this node, and of locally originated data messages.
///
/// Messages for other peers are acknowledged to whoever sent them and then passed on, either
///  directly to their destination if that is a known peer, or flooded to a few random peers. Each
///  message carries a view log of the peers it visited, and a hop count limiting its lifetime.
pub struct ForwardRouter<R: Random> {
    config: Arc<NodeConfig>,
    event_notifier: Arc<NodeEventNotifier>,
    pd: PhantomData<R>,
}
impl ForwardRouter<RngRandom> {
    pub fn new(config: Arc<NodeConfig>, event_notifier: Arc<NodeEventNotifier>) -> ForwardRouter<RngRandom> {
        ForwardRouter::new_with_random(config, event_notifier)
    }
}
impl <R: Random> ForwardRouter<R> {
    pub fn new_with_random(config: Arc<NodeConfig>, event_notifier: Arc<NodeEventNotifier>) -> ForwardRouter<R> {
        ForwardRouter {
            config,
            event_notifier,
            pd: PhantomData::default(),
        }
    }

    /// Queues the acknowledgment for a received message. It goes to the message's source, which
    ///  is resolved when the acknowledgment is actually sent.
    pub fn acknowledge(&self, message: &Message, outbound: &mut OutboundQueue) {
        match message.acknowledgment() {
            Some(ack) => {
                outbound.push(Outbound {
                    message: ack,
                    recipients: vec![message.source],
                    kind: SendKind::Direct,
                });
            }
            None => {
                debug!("{:?} messages are not acknowledged", message.protocol);
            }
        }
    }

    pub fn on_message(
        &self,
        myself: Option<PeerId>,
        inbound: InboundMessage,
        registry: &PeerRegistry,
        pending: &mut PendingSends,
        outbound: &mut OutboundQueue,
        now: Instant,
    ) {
        let mut message = inbound.message;

        if message.protocol == Protocol::DataConfirmation {
            // A confirmation from a next hop we forwarded to. If the sender was resolved by its
            //  address on receipt, the view log holds its id, otherwise it is the source.
            let responder = if inbound.forward_tagged {
                message.view_log.single_peer()
            }
            else {
                Some(message.source)
            };

            match responder {
                Some(responder) => {
                    pending.on_forward_confirmation(responder, message.message_id);
                }
                None => {
                    warn!(view_log = ?message.view_log, "forwarded confirmation without a responder - ignoring");
                }
            }
            return;
        }

        let myself = match myself {
            Some(myself) => myself,
            None => {
                warn!(from = ?message.source, to = ?message.destination, "not registered yet - dropping message for another peer");
                return;
            }
        };

        if message.protocol.confirmation().is_none() {
            warn!(from = ?message.source, to = ?message.destination, "dropped {:?} message for another peer - not forwardable", message.protocol);
            return;
        }

        self.event_notifier.send_event(NodeEvent::MessageRelayed(MessageReceivedData {
            from: message.source,
            to: message.destination,
            body: message.body.clone(),
        }));

        self.acknowledge(&message, outbound);

        if message.hop_count == 0 {
            warn!(from = ?message.source, to = ?message.destination, body = ?message.body, "dropped message - hop count exceeded");
            return;
        }
        if message.view_log.contains(&myself) {
            warn!(from = ?message.source, to = ?message.destination, body = ?message.body, "dropped message - peer revisited");
            return;
        }

        message.view_log.push(myself);
        message.hop_count -= 1;

        let candidates = registry.known_peers().into_iter()
            .filter(|p| !message.view_log.contains(p))
            .collect::<Vec<_>>();

        let next_hops = if candidates.contains(&message.destination) {
            vec![message.destination]
        }
        else {
            pick_random::<R, _>(candidates, self.config.flood_fan_out)
        };

        if next_hops.is_empty() {
            warn!(from = ?message.source, to = ?message.destination, view_log = ?message.view_log, "dropped message - no peer left to forward to");
            return;
        }

        debug!(to = ?message.destination, ?next_hops, hop_count = message.hop_count, "forwarding message");
        let forwarded = Outbound {
            message,
            recipients: next_hops,
            kind: SendKind::Forward,
        };
        pending.track(&forwarded, now);
        outbound.push(forwarded);
    }

    /// Queues a data message originating at this node:
    ///
    /// * to a known peer: directly, with a hop count of 1
    /// * to a peer whose address is not known: flooded to a few random peers with the full hop
    ///    count, expecting them to pass it on
    /// * to all peers: a broadcast to every known peer
    #[allow(clippy::too_many_arguments)]
    pub fn send_data(
        &self,
        myself: PeerId,
        message_id: MessageId,
        target: DataTarget,
        body: String,
        registry: &PeerRegistry,
        pending: &mut PendingSends,
        outbound: &mut OutboundQueue,
        now: Instant,
    ) -> anyhow::Result<()> {
        let to_send = match target {
            DataTarget::Peer(peer) if peer == myself => {
                return Err(anyhow::anyhow!("cannot send a message to myself"));
            }
            DataTarget::Peer(peer) if peer.is_server() => {
                return Err(anyhow::anyhow!("{} is the registry server, not a peer", peer));
            }
            DataTarget::Peer(peer) if registry.is_known(&peer) => {
                Outbound {
                    message: Message {
                        source: myself,
                        destination: peer,
                        protocol: Protocol::Data,
                        hop_count: 1,
                        message_id,
                        view_log: ViewLog::new(),
                        body,
                    },
                    recipients: vec![peer],
                    kind: SendKind::Direct,
                }
            }
            DataTarget::Peer(peer) => {
                debug!(?peer, "peer address unknown - flooding");
                Outbound {
                    message: Message {
                        source: myself,
                        destination: peer,
                        protocol: Protocol::Data,
                        hop_count: self.config.flood_hop_count,
                        message_id,
                        view_log: ViewLog::of(myself),
                        body,
                    },
                    recipients: pick_random::<R, _>(registry.known_peers(), self.config.flood_fan_out),
                    kind: SendKind::Forward,
                }
            }
            DataTarget::AllPeers => {
                Outbound {
                    message: Message {
                        source: myself,
                        // placeholder: broadcasts are addressed per recipient
                        destination: PeerId::UNREGISTERED,
                        protocol: Protocol::SerialBroadcast,
                        hop_count: 1,
                        message_id,
                        view_log: ViewLog::new(),
                        body,
                    },
                    recipients: registry.known_peers(),
                    kind: SendKind::Broadcast,
                }
            }
        };

        if to_send.recipients.is_empty() {
            warn!(?message_id, "no known peers to send to - use 'ids' to refresh the peer registry");
        }

        pending.track(&to_send, now);
        outbound.push(to_send);
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use tokio::sync::broadcast;

    use super::*;
    use crate::node::peer_registry::RegistrySnapshot;
    use crate::test_util::message::test_message;
    use crate::test_util::peers::{test_addr, test_peer};
    use crate::util::random::{MockRandom, MOCK_RANDOM_MUTEX};

    const MYSELF: u16 = 7;

    struct Fixture {
        router: ForwardRouter<MockRandom>,
        registry: PeerRegistry,
        pending: PendingSends,
        outbound: OutboundQueue,
        events: broadcast::Receiver<NodeEvent>,
    }
    impl Fixture {
        fn new(known_peers: &[u16]) -> Fixture {
            let config = Arc::new(NodeConfig::new(test_addr(999)));
            let notifier = Arc::new(NodeEventNotifier::new());
            let events = notifier.subscribe();

            let mut registry = PeerRegistry::new(test_addr(999));
            registry.replace(RegistrySnapshot {
                recently_seen: vec![],
                peers: known_peers.iter().map(|&n| (test_peer(n), test_addr(n))).collect(),
            }, Some(test_peer(MYSELF)));

            Fixture {
                router: ForwardRouter::new_with_random(config.clone(), notifier.clone()),
                registry,
                pending: PendingSends::new(config, notifier),
                outbound: OutboundQueue::new(),
                events,
            }
        }

        fn on_message(&mut self, message: Message, forward_tagged: bool) {
            let inbound = InboundMessage {
                message,
                forward_tagged,
            };
            self.router.on_message(Some(test_peer(MYSELF)), inbound, &self.registry, &mut self.pending, &mut self.outbound, Instant::now());
        }

        fn send_data(&mut self, target: DataTarget) -> anyhow::Result<()> {
            self.router.send_data(test_peer(MYSELF), MessageId::new(100).unwrap(), target, "hello".to_string(), &self.registry, &mut self.pending, &mut self.outbound, Instant::now())
        }

        fn drain_outbound(&mut self) -> Vec<Outbound> {
            let mut result = Vec::new();
            while let Some(o) = self.outbound.try_pop() {
                result.push(o);
            }
            result
        }
    }

    fn with_hops(mut message: Message, hop_count: u8, view_log: &str) -> Message {
        message.hop_count = hop_count;
        message.view_log = view_log.parse().unwrap();
        message
    }

    fn expect_ack(outbound: &Outbound, message: &Message) {
        assert_eq!(outbound, &Outbound {
            message: message.acknowledgment().unwrap(),
            recipients: vec![message.source],
            kind: SendKind::Direct,
        });
    }

    /// data message with hop count 1 for a known peer: forwarded directly, acknowledged to the sender
    #[test]
    fn test_forward_to_known_destination() {
        let mut fixture = Fixture::new(&[1, 2, 3, 4, 5]);
        let received = with_hops(test_message(1, 5, Protocol::Data, 123), 1, "001");
        fixture.on_message(received.clone(), false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 2);
        expect_ack(&sent[0], &received);
        assert_eq!(sent[0].message.destination, test_peer(1));

        assert_eq!(sent[1], Outbound {
            message: with_hops(test_message(1, 5, Protocol::Data, 123), 0, "001,007"),
            recipients: vec![test_peer(5)],
            kind: SendKind::Forward,
        });

        assert_eq!(fixture.pending.len(), 1);
        let p = fixture.pending.iter().next().unwrap();
        assert_eq!(p.kind, SendKind::Forward);
        assert_eq!(p.outstanding, vec![test_peer(5)]);

        assert_eq!(fixture.events.try_recv().unwrap(), NodeEvent::MessageRelayed(MessageReceivedData {
            from: test_peer(1),
            to: test_peer(5),
            body: received.body.clone(),
        }));
    }

    #[test]
    fn test_hop_count_exhausted() {
        let mut fixture = Fixture::new(&[1, 2, 5]);
        let received = with_hops(test_message(1, 5, Protocol::Data, 123), 0, "001,002");
        fixture.on_message(received.clone(), false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        expect_ack(&sent[0], &received);
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_loop_detected() {
        let mut fixture = Fixture::new(&[1, 2, 5]);
        let received = with_hops(test_message(1, 5, Protocol::Data, 123), 5, "001,007,002");
        fixture.on_message(received.clone(), false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        expect_ack(&sent[0], &received);
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_known_destination_already_visited_is_flooded_around() {
        let mut fixture = Fixture::new(&[1, 2, 5]);
        let received = with_hops(test_message(1, 5, Protocol::Data, 123), 5, "001,005");
        fixture.on_message(received, false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].recipients, vec![test_peer(2)]);
        assert_eq!(sent[1].message.view_log.to_string(), "001,005,007");
        assert_eq!(sent[1].message.hop_count, 4);
    }

    #[test]
    fn test_flood_excludes_view_log() {
        let _lock = MOCK_RANDOM_MUTEX.lock();
        let ctx = MockRandom::gen_usize_range_context();
        ctx.expect().returning(|range| range.start);

        let mut fixture = Fixture::new(&[1, 2, 3, 4, 5, 6]);
        let received = with_hops(test_message(1, 42, Protocol::Data, 123), 8, "001,002,004");
        fixture.on_message(received, false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 2);
        // candidates are 3, 5 and 6 - no sampling needed
        assert_eq!(sent[1].recipients, vec![test_peer(3), test_peer(5), test_peer(6)]);
        for r in &sent[1].recipients {
            assert!(!sent[1].message.view_log.contains(r));
        }
    }

    #[test]
    fn test_flood_samples_random_peers() {
        let _lock = MOCK_RANDOM_MUTEX.lock();
        let ctx = MockRandom::gen_usize_range_context();
        ctx.expect().returning(|range| range.end - 1);

        let mut fixture = Fixture::new(&[1, 2, 3, 4, 5, 6]);
        let received = with_hops(test_message(1, 42, Protocol::Data, 123), 8, "001");
        fixture.on_message(received, false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent[1].recipients, vec![test_peer(6), test_peer(5), test_peer(4)]);
        assert_eq!(fixture.pending.iter().next().unwrap().outstanding, vec![test_peer(6), test_peer(5), test_peer(4)]);
    }

    #[test]
    fn test_no_next_hop() {
        let mut fixture = Fixture::new(&[1]);
        let received = with_hops(test_message(1, 42, Protocol::Data, 123), 8, "001");
        fixture.on_message(received, false);

        assert_eq!(fixture.drain_outbound().len(), 1);
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_broadcast_is_forwarded_with_broadcast_confirmation() {
        let mut fixture = Fixture::new(&[1, 2]);
        let received = with_hops(test_message(1, 42, Protocol::SerialBroadcast, 123), 1, "");
        fixture.on_message(received, false);

        let sent = fixture.drain_outbound();
        assert_eq!(sent[0].message.protocol, Protocol::SerialBroadcastConfirmation);
        assert_eq!(sent[1].message.view_log.to_string(), "007");
        // the source is not in the view log of a broadcast
        assert_eq!(sent[1].recipients, vec![test_peer(1), test_peer(2)]);
    }

    #[test]
    fn test_forward_confirmation_by_view_log() {
        let mut fixture = Fixture::new(&[1, 2, 5]);
        fixture.on_message(with_hops(test_message(1, 42, Protocol::Data, 123), 8, "001"), false);
        fixture.drain_outbound();
        assert_eq!(fixture.pending.iter().next().unwrap().outstanding, vec![test_peer(2), test_peer(5)]);

        // confirmation from 5, whose source is the unknown destination
        fixture.on_message(with_hops(test_message(42, 1, Protocol::DataConfirmation, 123), 1, "005"), true);
        assert_eq!(fixture.pending.iter().next().unwrap().outstanding, vec![test_peer(2)]);

        // wrong message id
        fixture.on_message(with_hops(test_message(42, 1, Protocol::DataConfirmation, 124), 1, "002"), true);
        assert_eq!(fixture.pending.len(), 1);

        fixture.on_message(with_hops(test_message(42, 1, Protocol::DataConfirmation, 123), 1, "002"), true);
        assert!(fixture.pending.is_empty());

        // confirmations are never acknowledged or forwarded
        assert!(fixture.drain_outbound().is_empty());
    }

    #[test]
    fn test_forward_confirmation_by_known_source() {
        let mut fixture = Fixture::new(&[1, 5]);
        fixture.on_message(with_hops(test_message(1, 5, Protocol::Data, 123), 3, "001"), false);
        fixture.drain_outbound();
        assert_eq!(fixture.pending.len(), 1);

        // the destination confirms on behalf of the original sender
        fixture.on_message(with_hops(test_message(5, 1, Protocol::DataConfirmation, 123), 1, "001,007"), false);
        assert!(fixture.pending.is_empty());
        assert!(fixture.drain_outbound().is_empty());
    }

    #[test]
    fn test_confirmation_does_not_match_direct_sends() {
        let mut fixture = Fixture::new(&[5]);
        fixture.send_data(DataTarget::Peer(test_peer(5))).unwrap();
        fixture.drain_outbound();

        fixture.on_message(with_hops(test_message(5, 7, Protocol::DataConfirmation, 100), 1, "005"), true);
        assert_eq!(fixture.pending.len(), 1);
    }

    #[test]
    fn test_non_forwardable_protocols_are_dropped() {
        let mut fixture = Fixture::new(&[1, 5]);
        fixture.on_message(test_message(1, 5, Protocol::SerialBroadcastConfirmation, 123), false);
        fixture.on_message(test_message(1, 5, Protocol::Error, 123), false);
        fixture.on_message(test_message(1, 5, Protocol::CurrentPeerRegistry, 123), false);

        assert!(fixture.drain_outbound().is_empty());
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_not_registered() {
        let mut fixture = Fixture::new(&[1, 5]);
        let inbound = InboundMessage {
            message: test_message(1, 5, Protocol::Data, 123),
            forward_tagged: false,
        };
        fixture.router.on_message(None, inbound, &fixture.registry, &mut fixture.pending, &mut fixture.outbound, Instant::now());
        assert!(fixture.drain_outbound().is_empty());
    }

    #[test]
    fn test_send_direct() {
        let mut fixture = Fixture::new(&[1, 5]);
        fixture.send_data(DataTarget::Peer(test_peer(5))).unwrap();

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SendKind::Direct);
        assert_eq!(sent[0].recipients, vec![test_peer(5)]);
        assert_eq!(&sent[0].message.to_bytes()[..], b"SRC:007;DST:005;PNUM:3;HCT:1;MNUM:100;VL:;MESG:hello");
        assert_eq!(fixture.pending.len(), 1);
    }

    /// unknown destination: a directed flood to at most three random peers
    #[test]
    fn test_send_directed_flood() {
        let _lock = MOCK_RANDOM_MUTEX.lock();
        let ctx = MockRandom::gen_usize_range_context();
        ctx.expect().returning(|range| range.start);

        let mut fixture = Fixture::new(&[1, 2, 3, 4, 5]);
        fixture.send_data(DataTarget::Peer(test_peer(42))).unwrap();

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SendKind::Forward);
        assert_eq!(sent[0].recipients, vec![test_peer(1), test_peer(2), test_peer(3)]);
        assert_eq!(&sent[0].message.to_bytes()[..], b"SRC:007;DST:042;PNUM:3;HCT:9;MNUM:100;VL:007;MESG:hello");

        let p = fixture.pending.iter().next().unwrap();
        assert_eq!(p.kind, SendKind::Forward);
        assert_eq!(p.outstanding, sent[0].recipients);
    }

    #[test]
    fn test_send_directed_flood_without_peers() {
        let mut fixture = Fixture::new(&[]);
        fixture.send_data(DataTarget::Peer(test_peer(42))).unwrap();

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SendKind::Forward);
        assert!(sent[0].recipients.is_empty());
        assert_eq!(sent[0].message.hop_count, 9);
        assert_eq!(sent[0].message.view_log, ViewLog::of(test_peer(MYSELF)));
        assert!(fixture.pending.is_empty());
    }

    #[test]
    fn test_send_broadcast() {
        let mut fixture = Fixture::new(&[1, 2, 3, 4, 5]);
        fixture.send_data(DataTarget::AllPeers).unwrap();

        let sent = fixture.drain_outbound();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SendKind::Broadcast);
        assert_eq!(sent[0].message.protocol, Protocol::SerialBroadcast);
        assert_eq!(sent[0].message.hop_count, 1);
        assert_eq!(sent[0].recipients, (1..=5).map(test_peer).collect::<Vec<_>>());
        assert_eq!(&sent[0].message_for(test_peer(3)).to_bytes()[..], b"SRC:007;DST:003;PNUM:7;HCT:1;MNUM:100;VL:;MESG:hello");
    }

    #[test]
    fn test_send_to_invalid_targets() {
        let mut fixture = Fixture::new(&[1]);
        assert!(fixture.send_data(DataTarget::Peer(test_peer(MYSELF))).is_err());
        assert!(fixture.send_data(DataTarget::Peer(PeerId::SERVER)).is_err());
        assert!(fixture.drain_outbound().is_empty());
        assert!(fixture.pending.is_empty());
    }
}
