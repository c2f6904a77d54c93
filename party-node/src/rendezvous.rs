//! Rendezvous client abstraction.
//!
//! The rendezvous service is a black box that maps peer addresses to live
//! peers and carries data channels and media calls between them. Commands are
//! non-blocking; everything that happens later (channel open, inbound data,
//! remote streams, failures) arrives on the registration's event channel.

use std::sync::Arc;

use party_core::{IdentityError, PeerAddress};
use tokio::sync::mpsc;

use crate::bitrate::VideoSender;
use crate::media::MediaStream;

/// Events from the rendezvous service, in delivery order.
#[derive(Debug)]
pub enum EndpointEvent {
    /// Reliable ordered data channel with the peer is open.
    ChannelOpen(PeerAddress),
    /// One frame received over a data channel.
    Data(PeerAddress, Vec<u8>),
    ChannelClosed(PeerAddress),
    ChannelError(PeerAddress, String),
    /// The peer is calling us for a media stream.
    IncomingCall(PeerAddress),
    /// A call we placed was answered with this stream.
    RemoteStream(PeerAddress, MediaStream),
    /// Identity-level failure (unreachable peer, network, signaling server).
    Error(IdentityError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no open channel to {0}")]
    NotConnected(PeerAddress),
    #[error("endpoint destroyed")]
    Destroyed,
}

/// Our registered identity on the rendezvous service.
pub trait Endpoint: Send + Sync {
    fn address(&self) -> &PeerAddress;
    /// Open a data channel. Completes with `ChannelOpen` or `Error`.
    fn connect(&self, remote: &PeerAddress);
    fn send(&self, remote: &PeerAddress, frame: Vec<u8>) -> Result<(), TransportError>;
    /// Call `remote` to receive its stream. Completes with `RemoteStream`.
    fn call(&self, remote: &PeerAddress);
    /// Answer an inbound call with `stream`. Returns the call's video sender, if any.
    fn answer(&self, remote: &PeerAddress, stream: &MediaStream) -> Option<Arc<dyn VideoSender>>;
    /// Close the data channel and any call with `remote`. Closing twice is harmless.
    fn disconnect(&self, remote: &PeerAddress);
    /// Release the identity and every connection. Idempotent.
    fn destroy(&self);
}

pub struct Registration {
    pub endpoint: Arc<dyn Endpoint>,
    pub events: mpsc::UnboundedReceiver<EndpointEvent>,
}

pub trait Rendezvous: Send + Sync {
    /// Claim `address`. Fails with `RoomUnavailable` if it is taken.
    fn register(&self, address: &PeerAddress) -> Result<Registration, IdentityError>;
}
