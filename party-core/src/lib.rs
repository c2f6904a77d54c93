//! Watch-party session protocol.
//! Host-driven: no I/O; the driver passes events and receives actions.

pub mod chat;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod room;
pub mod session;
pub mod wire;

pub use chat::{ActiveReaction, REACTION_TTL};
pub use config::Config;
pub use self::core::{Action, MessageError, PartyCore};
pub use error::{IdentityError, PartyError};
pub use protocol::{Body, MediaType, Message, QueueCandidate, QueueItem, Role, Vote};
pub use room::{derive_address, PeerAddress, RoomCode, RoomCodeError};
pub use session::{Peer, Status};
pub use uuid::Uuid;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
