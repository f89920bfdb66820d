//! Duplex channel wire format.
//!
//! Server → channel frames are plain text markers; the only channel → server
//! frame the protocol understands is an announcement `hash:<token>`.

use super::token::PairingToken;

/// Prefix of a pairing announcement sent by a channel.
pub const ANNOUNCE_PREFIX: &str = "hash:";

/// Frames pushed from the server to a desktop channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Liveness acknowledgement sent on open.
    Connected,
    /// The announced token is now bound to this channel.
    BindAck,
    /// The pending registration completed.
    Registered,
    /// Login completed; carries the freshly minted session token.
    LoggedIn(String),
}

impl ServerMessage {
    pub fn to_wire(&self) -> String {
        match self {
            Self::Connected => "connected".to_string(),
            Self::BindAck => "x_hash".to_string(),
            Self::Registered => ".registered".to_string(),
            Self::LoggedIn(session_token) => format!(".logged{session_token}"),
        }
    }

    /// Short label for logs; never includes the session token.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::BindAck => "bind_ack",
            Self::Registered => "registered",
            Self::LoggedIn(_) => "logged_in",
        }
    }
}

/// Parse a channel frame. Anything other than a non-empty announcement is
/// protocol-irrelevant and yields `None`.
pub fn parse_announcement(payload: &str) -> Option<PairingToken> {
    let token = payload.strip_prefix(ANNOUNCE_PREFIX)?.trim();
    if token.is_empty() {
        return None;
    }
    Some(PairingToken::from_client(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_markers_are_stable() {
        assert_eq!(ServerMessage::Connected.to_wire(), "connected");
        assert_eq!(ServerMessage::BindAck.to_wire(), "x_hash");
        assert_eq!(ServerMessage::Registered.to_wire(), ".registered");
        assert_eq!(
            ServerMessage::LoggedIn("abc123".into()).to_wire(),
            ".loggedabc123"
        );
    }

    #[test]
    fn announcement_is_parsed() {
        let token = parse_announcement("hash:deadbeef").unwrap();
        assert_eq!(token.as_str(), "deadbeef");
    }

    #[test]
    fn other_frames_are_ignored() {
        assert!(parse_announcement("hello").is_none());
        assert!(parse_announcement("hash:").is_none());
        assert!(parse_announcement("hash:   ").is_none());
        assert!(parse_announcement("HASH:deadbeef").is_none());
        assert!(parse_announcement(" hash:deadbeef").is_none());
    }
}
