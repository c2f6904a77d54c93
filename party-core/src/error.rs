//! Error taxonomy surfaced to the UI layer.

use crate::room::RoomCodeError;

/// Identity/network failures reported by the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The derived address is already taken (room code collision on create).
    #[error("room address already in use")]
    RoomUnavailable,
    /// No peer is registered at the requested address.
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("network failure")]
    Network,
    #[error("signaling server unavailable")]
    SignalingServer,
    #[error("identity error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartyError {
    #[error("screen capture is not supported")]
    CaptureUnsupported,
    #[error("screen capture was denied")]
    CaptureDenied,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("connection to host lost")]
    HostLost,
    #[error("invalid room code: {0}")]
    InvalidRoomCode(#[from] RoomCodeError),
    #[error("not connected to a party")]
    NotConnected,
    #[error("a party is already active")]
    AlreadyActive,
    #[error("failed to encode message: {0}")]
    Wire(String),
}

impl PartyError {
    /// Text for the user. Each identity failure gets its own wording.
    pub fn user_message(&self) -> String {
        match self {
            PartyError::CaptureUnsupported => {
                "Screen sharing isn't supported here, so you can't host a party.".into()
            }
            PartyError::CaptureDenied => {
                "Screen sharing was cancelled or blocked. Allow it to host a party.".into()
            }
            PartyError::Identity(IdentityError::RoomUnavailable) => {
                "That room code is already in use. Try creating the party again.".into()
            }
            PartyError::Identity(IdentityError::PeerUnreachable) => {
                "No party found with that code. Check the code and try again.".into()
            }
            PartyError::Identity(IdentityError::Network) => {
                "Network error. Check your connection and try again.".into()
            }
            PartyError::Identity(IdentityError::SignalingServer) => {
                "The connection service is unavailable right now. Try again shortly.".into()
            }
            PartyError::Identity(IdentityError::Other(detail)) => {
                format!("Connection failed: {}", detail)
            }
            PartyError::HostLost => "The host ended the party or the connection dropped.".into(),
            PartyError::InvalidRoomCode(e) => format!("Invalid room code: {}", e),
            PartyError::NotConnected => "You're not in a party.".into(),
            PartyError::AlreadyActive => "Leave the current party first.".into(),
            PartyError::Wire(_) => "Message could not be sent.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_errors_have_distinct_messages() {
        let kinds = [
            IdentityError::RoomUnavailable,
            IdentityError::PeerUnreachable,
            IdentityError::Network,
            IdentityError::SignalingServer,
        ];
        let mut msgs: Vec<String> = kinds
            .iter()
            .cloned()
            .map(|k| PartyError::from(k).user_message())
            .collect();
        msgs.sort();
        msgs.dedup();
        assert_eq!(msgs.len(), kinds.len());
    }
}
