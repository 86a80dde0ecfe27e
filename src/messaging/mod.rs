pub mod message;
pub mod peer_id;
pub mod transport;
