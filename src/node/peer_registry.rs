use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use anyhow::anyhow;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::messaging::message::MessageId;
use crate::messaging::peer_id::PeerId;

/// A peer address snapshot as distributed by the registry server, i.e. the parsed body of a
///  `CurrentPeerRegistry` message:
///
/// `seen=<id>,<id>,...and<id>=<host>@<port>,<id>=<host>@<port>,...`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistrySnapshot {
    pub recently_seen: Vec<PeerId>,
    pub peers: Vec<(PeerId, SocketAddr)>,
}
impl RegistrySnapshot {
    pub fn parse(body: &str) -> anyhow::Result<RegistrySnapshot> {
        let (seen, entries) = body.split_once("and")
            .ok_or_else(|| anyhow!("registry snapshot without 'and' separator"))?;
        let seen = seen.strip_prefix("seen=")
            .ok_or_else(|| anyhow!("registry snapshot does not start with 'seen='"))?;

        let mut recently_seen = Vec::new();
        for id in seen.split(',').filter(|s| !s.is_empty()) {
            recently_seen.push(id.parse()?);
        }

        let mut peers = Vec::new();
        for entry in entries.split(',').filter(|s| !s.is_empty()) {
            peers.push(Self::parse_entry(entry)?);
        }

        Ok(RegistrySnapshot {
            recently_seen,
            peers,
        })
    }

    fn parse_entry(entry: &str) -> anyhow::Result<(PeerId, SocketAddr)> {
        let (id, addr) = entry.split_once('=')
            .ok_or_else(|| anyhow!("registry entry {:?} is not of the form id=host@port", entry))?;
        let (host, port) = addr.split_once('@')
            .ok_or_else(|| anyhow!("registry entry {:?} is not of the form id=host@port", entry))?;

        let id = id.parse()?;
        let port: u16 = port.parse()?;

        // snapshots are parsed on the node's event loop, so there is no name lookup here
        let ip: IpAddr = host.parse()
            .map_err(|_| anyhow!("host {:?} in registry entry {:?} is not an IP address", host, entry))?;
        Ok((id, SocketAddr::new(ip, port)))
    }
}


/// The node's view of where peers are: the registry as received from the server, plus
///  provisional addresses of peers that sent us something before they showed up in the registry.
#[derive(Debug)]
pub struct PeerRegistry {
    server_addr: SocketAddr,
    peers: BTreeMap<PeerId, SocketAddr>,
    /// address a packet from an unregistered peer came from, for sending a reply to that packet
    unknown_peers: FxHashMap<(PeerId, MessageId), SocketAddr>,
    /// display only
    recently_seen: Vec<PeerId>,
}
impl PeerRegistry {
    pub fn new(server_addr: SocketAddr) -> PeerRegistry {
        let mut peers = BTreeMap::new();
        peers.insert(PeerId::SERVER, server_addr);

        PeerRegistry {
            server_addr,
            peers,
            unknown_peers: Default::default(),
            recently_seen: Vec::new(),
        }
    }

    pub fn lookup(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.peers.get(peer).copied()
    }

    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// all peers in the registry except the registry server, ordered by id
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.peers.keys()
            .filter(|p| !p.is_server())
            .copied()
            .collect()
    }

    pub fn known_peer_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers.iter()
            .filter(|(p, _)| !p.is_server())
            .map(|(&p, &a)| (p, a))
            .collect()
    }

    /// the known peer (other than the server) registered with a given address
    pub fn peer_for_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.peers.iter()
            .find(|(p, a)| **a == addr && !p.is_server())
            .map(|(&p, _)| p)
    }

    pub fn recently_seen(&self) -> &[PeerId] {
        &self.recently_seen
    }

    /// Replaces the registry wholesale. The server entry survives, and the local node's own
    ///  entry is dropped.
    pub fn replace(&mut self, snapshot: RegistrySnapshot, myself: Option<PeerId>) {
        let mut peers = snapshot.peers.into_iter()
            .collect::<BTreeMap<_, _>>();
        peers.insert(PeerId::SERVER, self.server_addr);
        if let Some(myself) = myself {
            peers.remove(&myself);
        }

        debug!("replacing peer registry with {} entries", peers.len());
        self.peers = peers;
        self.recently_seen = snapshot.recently_seen;
    }

    pub fn remember_unknown(&mut self, peer: PeerId, message_id: MessageId, addr: SocketAddr) {
        trace!(?peer, ?message_id, ?addr, "remembering address of unregistered peer");
        self.unknown_peers.insert((peer, message_id), addr);
    }

    /// NB: consumes the entry - it is there to answer a single message
    pub fn resolve_unknown(&mut self, peer: &PeerId, message_id: MessageId) -> Option<SocketAddr> {
        self.unknown_peers.remove(&(*peer, message_id))
    }

    /// registry first, falling back to the address a message with this id came from
    pub fn resolve(&mut self, peer: &PeerId, message_id: MessageId) -> Option<SocketAddr> {
        self.lookup(peer)
            .or_else(|| self.resolve_unknown(peer, message_id))
    }
}
