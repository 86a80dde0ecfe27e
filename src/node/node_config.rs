use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 63683;
pub const DEFAULT_SERVER: &str = "steel.isi.edu:63682";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// local address the node's single UDP socket is bound to
    pub self_addr: SocketAddr,
    /// well-known address of the registry server, reachable under the reserved id 999
    pub server_addr: SocketAddr,

    /// upper bound for the reactor's wait between ticks, so retries happen even when idle
    pub poll_interval: Duration,
    /// minimum time between two transmissions of a message that awaits acknowledgment
    pub retry_interval: Duration,
    /// number of retransmissions before giving up
    pub max_retries: u32,

    /// number of random peers a flooded message is sent to
    pub flood_fan_out: usize,
    /// initial hop count of a message flooded towards a peer whose address is unknown
    pub flood_hop_count: u8,
}

impl NodeConfig {
    pub fn new(server_addr: SocketAddr) -> NodeConfig {
        NodeConfig {
            self_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT).into(),
            server_addr,
            poll_interval: Duration::from_secs(3),
            retry_interval: Duration::from_secs(3),
            max_retries: 4,
            flood_fan_out: 3,
            flood_hop_count: 9,
        }
    }
}
