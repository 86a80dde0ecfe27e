use std::fmt::{Debug, Display, Formatter, Write};
use std::str::FromStr;

use anyhow::anyhow;
use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::messaging::peer_id::PeerId;

/// body of every acknowledgment
pub const ACK_BODY: &str = "ACK";

/// user-entered bodies are truncated to this many characters
pub const MAX_BODY_LEN: usize = 200;

/// characters that would break the wire format if they occurred in a body
const RESERVED_BODY_CHARS: [char; 4] = ['\'', '"', ';', ':'];

const KEY_SOURCE: &str = "SRC";
const KEY_DESTINATION: &str = "DST";
const KEY_PROTOCOL: &str = "PNUM";
const KEY_HOP_COUNT: &str = "HCT";
const KEY_MESSAGE_ID: &str = "MNUM";
const KEY_VIEW_LOG: &str = "VL";
const KEY_BODY: &str = "MESG";


#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Protocol {
    Error = 0,
    RegistrationRequest = 1,
    RegistrationResponse = 2,
    Data = 3,
    DataConfirmation = 4,
    RequestPeerRegistry = 5,
    CurrentPeerRegistry = 6,
    SerialBroadcast = 7,
    SerialBroadcastConfirmation = 8,
}
impl Protocol {
    /// Messages of these protocols confirm a previous send, retiring the corresponding pending
    ///  send on the receiving side
    pub fn is_confirmation(self) -> bool {
        matches!(self,
            Protocol::RegistrationResponse
            | Protocol::DataConfirmation
            | Protocol::CurrentPeerRegistry
            | Protocol::SerialBroadcastConfirmation
        )
    }

    /// The protocol an acknowledgment of this protocol carries, i.e. the protocol number
    ///  incremented by one. Only requests have a counterpart.
    pub fn confirmation(self) -> Option<Protocol> {
        match self {
            Protocol::RegistrationRequest => Some(Protocol::RegistrationResponse),
            Protocol::Data => Some(Protocol::DataConfirmation),
            Protocol::RequestPeerRegistry => Some(Protocol::CurrentPeerRegistry),
            Protocol::SerialBroadcast => Some(Protocol::SerialBroadcastConfirmation),
            _ => None,
        }
    }
}


/// Message ids are rendered with exactly three digits on the wire. Locally generated ids are in
///  the range 100..=999, wrapping around.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageId(u16);
impl MessageId {
    pub const FIRST: MessageId = MessageId(100);
    const MAX: u16 = 999;

    pub fn new(value: u16) -> anyhow::Result<MessageId> {
        if value > Self::MAX {
            return Err(anyhow!("message id {} does not fit into three digits", value));
        }
        Ok(MessageId(value))
    }

    pub fn next(self) -> MessageId {
        if self.0 >= Self::MAX {
            Self::FIRST
        }
        else {
            MessageId(self.0 + 1)
        }
    }
}
impl FromStr for MessageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_digits(s, 3, KEY_MESSAGE_ID)?;
        MessageId::new(value)
    }
}
impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}
impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{:03}", self.0)
    }
}


/// The peers a message instance has already visited, in the order it visited them. Entries are
///  kept verbatim: anything that is a sequence of digits is accepted on the wire, and the
///  message must re-encode to exactly what was received.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ViewLog(Vec<String>);
impl ViewLog {
    pub fn new() -> ViewLog {
        ViewLog(Vec::new())
    }

    pub fn of(peer: PeerId) -> ViewLog {
        ViewLog(vec![peer.to_string()])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.0.iter().any(|e| e == peer.as_str())
    }

    pub fn push(&mut self, peer: PeerId) {
        self.0.push(peer.to_string());
    }

    /// The peer if the view log consists of exactly one valid peer id. Confirmations from a
    ///  relay carry the relay's id this way once the receiver resolved it.
    pub fn single_peer(&self) -> Option<PeerId> {
        match self.0.as_slice() {
            [only] => only.parse().ok(),
            _ => None,
        }
    }
}
impl FromStr for ViewLog {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(ViewLog::new());
        }

        let mut entries = Vec::new();
        for entry in s.split(',') {
            if entry.is_empty() || !entry.bytes().all(|b| b.is_ascii_digit()) {
                return Err(anyhow!("invalid view log entry {:?} in {:?}", entry, s));
            }
            entries.push(entry.to_string());
        }
        Ok(ViewLog(entries))
    }
}
impl Display for ViewLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(","))
    }
}
impl Debug for ViewLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}


/// A protocol message with its seven fixed fields.
///
/// NB: Only view log and hop count change while a message is forwarded, all other fields are
///  fixed once the message is created
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub source: PeerId,
    pub destination: PeerId,
    pub protocol: Protocol,
    /// single digit, i.e. 0..=9
    pub hop_count: u8,
    pub message_id: MessageId,
    pub view_log: ViewLog,
    pub body: String,
}

impl Message {
    pub fn ser(&self, buf: &mut BytesMut) {
        let protocol: u8 = self.protocol.into();

        // writing to a BytesMut does not fail
        let _ = write!(buf, "{}:{};{}:{};{}:{};{}:{};{}:{};{}:{};{}:{}",
            KEY_SOURCE, self.source,
            KEY_DESTINATION, self.destination,
            KEY_PROTOCOL, protocol,
            KEY_HOP_COUNT, self.hop_count,
            KEY_MESSAGE_ID, self.message_id,
            KEY_VIEW_LOG, self.view_log,
            KEY_BODY, self.body,
        );
    }

    pub fn try_deser(buf: &[u8]) -> anyhow::Result<Message> {
        let s = std::str::from_utf8(buf)?;
        let mut rest = s;

        let source = take_field(&mut rest, KEY_SOURCE)?.parse()?;
        let destination = take_field(&mut rest, KEY_DESTINATION)?.parse()?;

        let protocol = parse_digits(take_field(&mut rest, KEY_PROTOCOL)?, 1, KEY_PROTOCOL)?;
        let protocol = Protocol::try_from(protocol as u8)
            .map_err(|_| anyhow!("unknown protocol number {}", protocol))?;

        let hop_count = parse_digits(take_field(&mut rest, KEY_HOP_COUNT)?, 1, KEY_HOP_COUNT)? as u8;
        let message_id = take_field(&mut rest, KEY_MESSAGE_ID)?.parse()?;
        let view_log = take_field(&mut rest, KEY_VIEW_LOG)?.parse()?;

        // the body is the remainder, delimiters and all
        let body = rest.strip_prefix(KEY_BODY)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| anyhow!("missing field {}", KEY_BODY))?;

        Ok(Message {
            source,
            destination,
            protocol,
            hop_count,
            message_id,
            view_log,
            body: body.to_string(),
        })
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf
    }

    pub fn with_destination(&self, destination: PeerId) -> Message {
        Message {
            destination,
            ..self.clone()
        }
    }

    /// The acknowledgment for this message, going back to its source: source and destination
    ///  are swapped, the protocol number is incremented and the hop count is reset. Message id
    ///  and view log are kept so the receiver can match it.
    pub fn acknowledgment(&self) -> Option<Message> {
        let protocol = self.protocol.confirmation()?;
        Some(Message {
            source: self.destination,
            destination: self.source,
            protocol,
            hop_count: 1,
            message_id: self.message_id,
            view_log: self.view_log.clone(),
            body: ACK_BODY.to_string(),
        })
    }
}

/// strips the field's `KEY:` prefix and returns the value up to the next `;`
fn take_field<'a>(rest: &mut &'a str, key: &str) -> anyhow::Result<&'a str> {
    let with_value = rest.strip_prefix(key)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| anyhow!("missing field {}", key))?;

    let (value, remainder) = with_value.split_once(';')
        .ok_or_else(|| anyhow!("field {} is not terminated", key))?;
    *rest = remainder;
    Ok(value)
}

fn parse_digits(value: &str, len: usize, key: &str) -> anyhow::Result<u16> {
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("field {} must have exactly {} digit(s), was {:?}", key, len, value));
    }
    Ok(value.parse()?)
}

/// Removes characters that would break the wire format and truncates to [MAX_BODY_LEN] characters
pub fn sanitize_body(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| !RESERVED_BODY_CHARS.contains(c))
        .take(MAX_BODY_LEN)
        .collect()
}
