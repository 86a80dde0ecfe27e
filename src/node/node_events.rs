use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::trace;

use crate::messaging::message::MessageId;
use crate::messaging::peer_id::PeerId;

/// Things a user of the node gets to see. The node itself never prints, it reports events and
///  leaves the rendering to whoever subscribes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeEvent {
    Registered(PeerId),
    /// a data or broadcast message addressed to this node
    MessageReceived(MessageReceivedData),
    /// a message passing through this node on its way somewhere else
    MessageRelayed(MessageReceivedData),
    PeerRegistry(PeerRegistryData),
    ErrorReceived(ErrorReceivedData),
    DeliveryFailed(DeliveryFailedData),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageReceivedData {
    pub from: PeerId,
    pub to: PeerId,
    pub body: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerRegistryData {
    pub recently_seen: Vec<PeerId>,
    /// known peers without the registry server
    pub known: Vec<(PeerId, SocketAddr)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorReceivedData {
    pub from: PeerId,
    pub body: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeliveryFailedData {
    pub recipient: PeerId,
    pub message_id: MessageId,
}


pub struct NodeEventNotifier {
    sender: broadcast::Sender<NodeEvent>,
}
impl NodeEventNotifier {
    pub fn new() -> NodeEventNotifier {
        let (sender, _) = broadcast::channel(128);

        NodeEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: NodeEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
impl Default for NodeEventNotifier {
    fn default() -> Self {
        NodeEventNotifier::new()
    }
}
