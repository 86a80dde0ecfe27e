use crate::messaging::peer_id::PeerId;

/// A line of user input, parsed. The command word is case insensitive:
///
/// * `msg <peer id> <text>` sends to a single peer
/// * `msg <text>` and `all <text>` send to all known peers
/// * `ids` requests the current peer registry from the registry server
///
/// Blank lines are ignored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LocalCommand {
    SendToPeer { peer: PeerId, text: String },
    Broadcast { text: String },
    RequestPeers,
    Blank,
    Invalid(String),
}

impl LocalCommand {
    pub fn parse(line: &str) -> LocalCommand {
        let line = line.trim();
        if line.is_empty() {
            return LocalCommand::Blank;
        }
        let (command, rest) = split_first_word(line);

        match command.to_ascii_lowercase().as_str() {
            "ids" if rest.is_empty() => LocalCommand::RequestPeers,
            "all" => LocalCommand::Broadcast { text: rest.to_string() },
            "msg" => {
                let (first, text) = split_first_word(rest);
                match first.parse::<PeerId>() {
                    Ok(peer) if !text.is_empty() => LocalCommand::SendToPeer { peer, text: text.to_string() },
                    _ => LocalCommand::Broadcast { text: rest.to_string() },
                }
            }
            _ => LocalCommand::Invalid(line.to_string()),
        }
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (s, ""),
    }
}
