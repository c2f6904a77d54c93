//! Watch-party wire protocol: message taxonomy and the queue items it carries.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::PeerAddress;

/// Which side of the star a participant sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single peer's opinion of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    Down,
    Up,
}

impl Vote {
    pub fn value(self) -> i32 {
        match self {
            Vote::Down => -1,
            Vote::Up => 1,
        }
    }
}

/// Search result the UI may offer for queueing. Not yet part of any queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCandidate {
    pub tmdb_id: u64,
    pub media_type: MediaType,
    pub title: String,
    pub poster: Option<String>,
    pub year: Option<u16>,
}

/// Replicated watch-queue entry. `votes` is keyed by voter address so a repeat
/// vote replaces the earlier one instead of adding to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub tmdb_id: u64,
    pub media_type: MediaType,
    pub title: String,
    pub poster: Option<String>,
    pub year: Option<u16>,
    pub added_by: String,
    pub votes: BTreeMap<PeerAddress, Vote>,
    pub timestamp: u64,
}

impl QueueItem {
    pub fn from_candidate(candidate: QueueCandidate, added_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tmdb_id: candidate.tmdb_id,
            media_type: candidate.media_type,
            title: candidate.title,
            poster: candidate.poster,
            year: candidate.year,
            added_by: added_by.into(),
            votes: BTreeMap::new(),
            timestamp: now_millis(),
        }
    }

    /// Sum of all vote values.
    pub fn score(&self) -> i32 {
        self.votes.values().map(|v| v.value()).sum()
    }
}

/// Envelope shared by every message: unique id and send time (ms since UNIX epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub timestamp: u64,
    pub body: Body,
}

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Chat {
        sender: String,
        sender_role: Role,
        text: String,
    },
    /// Host-authored notice. Never relayed beyond one hop.
    System {
        text: String,
    },
    /// Ephemeral reaction. `offset` is the horizontal display position in percent.
    Reaction {
        emoji: String,
        sender: String,
        offset: u8,
    },
    QueueAdd {
        item: QueueItem,
    },
    QueueVote {
        item_id: Uuid,
        vote: Vote,
        voter: PeerAddress,
    },
    QueueRemove {
        item_id: Uuid,
    },
    /// Full queue snapshot, sent by the host to a guest whose channel just opened.
    QueueSync {
        queue: Vec<QueueItem>,
    },
}

impl Body {
    /// Whether the host re-broadcasts this type when a guest sends it.
    /// System and QueueSync are host-originated only.
    pub fn is_relayable(&self) -> bool {
        !matches!(self, Body::System { .. } | Body::QueueSync { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Body::Chat { .. } => "chat",
            Body::System { .. } => "system",
            Body::Reaction { .. } => "reaction",
            Body::QueueAdd { .. } => "queue-add",
            Body::QueueVote { .. } => "queue-vote",
            Body::QueueRemove { .. } => "queue-remove",
            Body::QueueSync { .. } => "queue-sync",
        }
    }
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now_millis(),
            body,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Body::System { text: text.into() })
    }
}

/// Milliseconds since the UNIX epoch (0 if the clock is before it).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
