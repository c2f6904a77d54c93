//! Relay rules for the host-centric star: who may send what, and fan-out to guests.

use crate::core::Action;
use crate::protocol::Body;
use crate::room::PeerAddress;
use crate::session::Peer;

/// What to do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Apply locally and forward to every other guest.
    ApplyAndRelay,
    /// Apply locally only.
    Apply,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender has no open channel with us (or is not our host).
    UnknownSender,
    /// A guest sent a type only the host may originate.
    HostOnly,
    /// QueueVote whose voter is not the sending peer.
    VoterMismatch,
}

/// Routing at the host for a message from guest `from`.
pub fn route_at_host(from: &PeerAddress, known: bool, body: &Body) -> Route {
    if !known {
        return Route::Drop(DropReason::UnknownSender);
    }
    if !body.is_relayable() {
        return Route::Drop(DropReason::HostOnly);
    }
    if let Body::QueueVote { voter, .. } = body {
        if voter != from {
            return Route::Drop(DropReason::VoterMismatch);
        }
    }
    Route::ApplyAndRelay
}

/// Routing at a guest. Only the host talks to a guest, and guests never relay.
pub fn route_at_guest(from: &PeerAddress, host: Option<&PeerAddress>) -> Route {
    match host {
        Some(h) if h == from => Route::Apply,
        _ => Route::Drop(DropReason::UnknownSender),
    }
}

/// One Send per peer, skipping `exclude` (the original sender, so it never gets an echo).
pub fn fan_out<'a>(
    peers: impl IntoIterator<Item = &'a Peer>,
    exclude: Option<&PeerAddress>,
    frame: &[u8],
) -> Vec<Action> {
    peers
        .into_iter()
        .filter(|p| Some(&p.peer_id) != exclude)
        .map(|p| Action::Send(p.peer_id.clone(), frame.to_vec()))
        .collect()
}
