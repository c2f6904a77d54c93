//! Room identity: human-shareable room codes and the peer addresses derived from them.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Room code alphabet. Excludes glyphs that are easy to confuse when read aloud or
/// copied by hand (0/O, 1/I/L).
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Number of characters in a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Namespace prefix prepended to every peer address on the rendezvous service.
pub const DEFAULT_ADDRESS_PREFIX: &str = "watchparty-";

const GUEST_MARKER: &str = "guest-";
const GUEST_SUFFIX_LEN: usize = 8;
const SHORT_ID_LEN: usize = 4;

/// Six-character room code. Always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random room code.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        RoomCode(random_chars(rng, ROOM_CODE_LEN))
    }

    /// Parse user input. Surrounding whitespace is ignored and the code is
    /// normalized to uppercase, so joins are case-insensitive.
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let code = input.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(RoomCodeError::Length(len));
        }
        if let Some(c) = code
            .chars()
            .find(|c| !c.is_ascii() || !ROOM_CODE_ALPHABET.contains(&(*c as u8)))
        {
            return Err(RoomCodeError::InvalidChar(c));
        }
        Ok(RoomCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomCode::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("room code must be {ROOM_CODE_LEN} characters, got {0}")]
    Length(usize),
    #[error("invalid character {0:?} in room code")]
    InvalidChar(char),
}

/// Address of a peer on the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        PeerAddress(address.into())
    }

    /// Host address for a room: prefix + code. Deterministic, so a guest can reach
    /// the host from the code alone.
    pub fn for_room(prefix: &str, code: &RoomCode) -> Self {
        PeerAddress(format!("{}{}", prefix, code.as_str()))
    }

    /// Random guest address under the same namespace.
    pub fn random_guest(prefix: &str) -> Self {
        let suffix = random_chars(&mut rand::thread_rng(), GUEST_SUFFIX_LEN);
        PeerAddress(format!("{}{}{}", prefix, GUEST_MARKER, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last few characters of the address, used in display names.
    pub fn short_id(&self) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(SHORT_ID_LEN - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.0[start..]
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a user-entered code and derive the host address for it.
pub fn derive_address(prefix: &str, code: &str) -> Result<PeerAddress, RoomCodeError> {
    let code = RoomCode::parse(code)?;
    Ok(PeerAddress::for_room(prefix, &code))
}

fn random_chars<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}
