use crate::messaging::message::{Message, MessageId, Protocol, ViewLog};
use crate::test_util::peers::test_peer;

/// A message with hop count 1, an empty view log and the body `hello`
pub fn test_message(source: u16, destination: u16, protocol: Protocol, message_id: u16) -> Message {
    Message {
        source: test_peer(source),
        destination: test_peer(destination),
        protocol,
        hop_count: 1,
        message_id: MessageId::new(message_id)
            .expect("test message ids have three digits"),
        view_log: ViewLog::new(),
        body: "hello".to_string(),
    }
}
