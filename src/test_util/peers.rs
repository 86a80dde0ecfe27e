use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::messaging::peer_id::PeerId;

/// The peer with a given number as its id, e.g. `test_peer(7)` is peer `007`
pub fn test_peer(number: u16) -> PeerId {
    format!("{:03}", number % 1000).parse()
        .expect("three digits are a valid peer id")
}

/// A localhost address with the number as its port, matching [test_peer] for the same number
pub fn test_addr(number: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, number))
}
