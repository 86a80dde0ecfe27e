//! Utilities for testing node functionality: fixed peer ids and addresses, canned messages, and
//!  an in-memory mesh of nodes.
//!
//! They are part of the crate's regular (non-#[cfg(test)]) code so applications built on top of
//!  the node can use them in their own tests.

pub mod mesh;
pub mod message;
pub mod peers;
