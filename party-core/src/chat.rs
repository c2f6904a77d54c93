//! Ephemeral chat log and on-screen reactions. Nothing here is persisted or replayed.

use std::time::{Duration, Instant};

use rand::Rng;
use uuid::Uuid;

use crate::protocol::{Body, Message};

/// How long a received reaction stays on screen.
pub const REACTION_TTL: Duration = Duration::from_secs(3);

const OFFSET_RANGE: std::ops::RangeInclusive<u8> = 10..=90;

/// Chat and System messages in arrival order.
#[derive(Debug, Default, Clone)]
pub struct ChatLog {
    messages: Vec<Message>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a Chat or System message. Other bodies and repeated ids are ignored.
    pub fn push(&mut self, msg: Message) -> bool {
        if !matches!(msg.body, Body::Chat { .. } | Body::System { .. }) {
            return false;
        }
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.messages.push(msg);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// A reaction currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReaction {
    pub id: Uuid,
    pub emoji: String,
    pub sender: String,
    pub offset: u8,
    pub received_at: Instant,
}

/// Reactions the receiver is still showing. Expiry is receiver-side only.
#[derive(Debug, Clone)]
pub struct ReactionBoard {
    ttl: Duration,
    active: Vec<ActiveReaction>,
}

impl ReactionBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: Vec::new(),
        }
    }

    /// Record a Reaction message received (or sent) at `now`.
    pub fn push(&mut self, msg: &Message, now: Instant) -> bool {
        let Body::Reaction {
            emoji,
            sender,
            offset,
        } = &msg.body
        else {
            return false;
        };
        if self.active.iter().any(|r| r.id == msg.id) {
            return false;
        }
        self.active.push(ActiveReaction {
            id: msg.id,
            emoji: emoji.clone(),
            sender: sender.clone(),
            offset: *offset,
            received_at: now,
        });
        true
    }

    /// Drop reactions older than the TTL. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.active.len();
        let ttl = self.ttl;
        self.active
            .retain(|r| now.saturating_duration_since(r.received_at) < ttl);
        before - self.active.len()
    }

    pub fn active(&self) -> &[ActiveReaction] {
        &self.active
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

impl Default for ReactionBoard {
    fn default() -> Self {
        Self::new(REACTION_TTL)
    }
}

/// Random horizontal offset (percent) for a new reaction.
pub fn random_offset() -> u8 {
    rand::thread_rng().gen_range(OFFSET_RANGE)
}
