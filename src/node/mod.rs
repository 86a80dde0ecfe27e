pub mod forward_router;
pub mod local_command;
pub mod node;
pub mod node_config;
pub mod node_driver;
pub mod node_events;
pub mod peer_registry;
pub mod pending_sends;
