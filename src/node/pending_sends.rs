use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::messaging::message::{Message, MessageId};
use crate::messaging::peer_id::PeerId;
use crate::node::node_config::NodeConfig;
use crate::node::node_events::{DeliveryFailedData, NodeEvent, NodeEventNotifier};

/// How a send is addressed, which determines both the wire format per recipient and the way its
///  acknowledgments are matched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendKind {
    Direct,
    Broadcast,
    /// forwarded on behalf of some other peer, or flooded towards a peer of unknown address.
    ///  Acknowledgments come from the next hop rather than the destination.
    Forward,
}

/// A message queued for transmission to one or more peers
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outbound {
    pub message: Message,
    pub recipients: Vec<PeerId>,
    pub kind: SendKind,
}
impl Outbound {
    /// The message as it goes to a given recipient: direct and broadcast messages are addressed
    ///  to the recipient, forwarded messages keep their final destination.
    pub fn message_for(&self, recipient: PeerId) -> Message {
        match self.kind {
            SendKind::Forward => self.message.clone(),
            SendKind::Direct | SendKind::Broadcast => self.message.with_destination(recipient),
        }
    }
}

/// Sends waiting for the socket to become writable, in FIFO order
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<Outbound>,
}
impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        Default::default()
    }

    pub fn push(&mut self, outbound: Outbound) {
        self.queue.push_back(outbound);
    }

    pub fn try_pop(&mut self) -> Option<Outbound> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}


/// A send awaiting acknowledgment from some of its recipients
#[derive(Clone, Debug)]
pub struct PendingSend {
    pub message: Message,
    /// recipients that did not acknowledge yet, in the order they were addressed
    pub outstanding: Vec<PeerId>,
    /// starts at 1 for the initial transmission
    pub retries: u32,
    pub last_sent: Instant,
    pub kind: SendKind,
}


/// Tracks sends that need acknowledgment, retransmitting them periodically and giving up
///  eventually.
pub struct PendingSends {
    config: Arc<NodeConfig>,
    event_notifier: Arc<NodeEventNotifier>,
    /// in order of creation
    pending: Vec<PendingSend>,
}
impl PendingSends {
    pub fn new(config: Arc<NodeConfig>, event_notifier: Arc<NodeEventNotifier>) -> PendingSends {
        PendingSends {
            config,
            event_notifier,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=&PendingSend> {
        self.pending.iter()
    }

    /// Start tracking an outbound send that was just queued for transmission
    pub fn track(&mut self, outbound: &Outbound, now: Instant) {
        if outbound.recipients.is_empty() {
            debug!("not tracking {:?} - no recipients", outbound.message.message_id);
            return;
        }

        trace!(message_id = ?outbound.message.message_id, kind = ?outbound.kind, recipients = ?outbound.recipients, "tracking send");
        self.pending.push(PendingSend {
            message: outbound.message.clone(),
            outstanding: outbound.recipients.clone(),
            retries: 1,
            last_sent: now,
            kind: outbound.kind,
        });
    }

    /// A confirmation for a direct or broadcast send (or registration / registry request),
    ///  identified by the confirming peer's id as the message's source.
    pub fn on_confirmation(&mut self, responder: PeerId, message_id: MessageId) -> bool {
        self.confirm(responder, message_id, |kind| kind != SendKind::Forward)
    }

    /// A confirmation from the next hop of a forwarded send
    pub fn on_forward_confirmation(&mut self, responder: PeerId, message_id: MessageId) -> bool {
        self.confirm(responder, message_id, |kind| kind == SendKind::Forward)
    }

    fn confirm(&mut self, responder: PeerId, message_id: MessageId, kind_matches: impl Fn(SendKind) -> bool) -> bool {
        let mut matched = false;

        for p in self.pending.iter_mut()
            .filter(|p| kind_matches(p.kind) && p.message.message_id == message_id)
        {
            if let Some(idx) = p.outstanding.iter().position(|r| *r == responder) {
                p.outstanding.remove(idx);
                matched = true;
            }
        }

        if matched {
            debug!(?responder, ?message_id, "confirmation received");
            self.pending.retain(|p| !p.outstanding.is_empty());
        }
        else {
            debug!(?responder, ?message_id, "confirmation does not match any pending send - ignoring");
        }
        matched
    }

    /// Periodic retry handling, returning the sends to retransmit.
    ///
    /// Sends are visited in the order they were created, stopping at the first one that was
    ///  (re)sent less than the retry interval ago. Sends that exhausted their retries are
    ///  reported as failed for every peer that did not acknowledge, and dropped. Giving up while
    ///  this node is not `registered` is fatal.
    pub fn sweep(&mut self, now: Instant, registered: bool) -> anyhow::Result<Vec<Outbound>> {
        let mut retransmissions = Vec::new();

        let mut idx = 0;
        while idx < self.pending.len() {
            let p = &mut self.pending[idx];
            if now.saturating_duration_since(p.last_sent) < self.config.retry_interval {
                break;
            }
            p.last_sent = now;

            if p.retries > self.config.max_retries {
                let p = self.pending.remove(idx);
                for &recipient in &p.outstanding {
                    warn!(?recipient, message_id = ?p.message.message_id, "giving up sending");
                    self.event_notifier.send_event(NodeEvent::DeliveryFailed(DeliveryFailedData {
                        recipient,
                        message_id: p.message.message_id,
                    }));
                }

                if !registered {
                    error!("no registration response from the registry server");
                    return Err(anyhow!("failed to register"));
                }
                continue;
            }

            debug!(message_id = ?p.message.message_id, retries = p.retries, recipients = ?p.outstanding, "retransmitting");
            retransmissions.push(Outbound {
                message: p.message.clone(),
                recipients: p.outstanding.clone(),
                kind: p.kind,
            });
            p.retries += 1;
            idx += 1;
        }

        Ok(retransmissions)
    }
}
