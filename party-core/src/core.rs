//! Host-driven API: PartyCore receives events from the driver, returns actions.

use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{self, ActiveReaction, ChatLog, ReactionBoard};
use crate::config::Config;
use crate::error::{IdentityError, PartyError};
use crate::protocol::{Body, Message, QueueCandidate, QueueItem, Role, Vote};
use crate::queue::WatchQueue;
use crate::relay::{self, Route};
use crate::room::{PeerAddress, RoomCode};
use crate::session::{Peer, Session, Status};
use crate::wire;

/// Action for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send one frame over the data channel to a peer.
    Send(PeerAddress, Vec<u8>),
    /// Host: answer a guest's media call with the local stream.
    AnswerCall(PeerAddress),
    /// Guest: call the host to receive its stream.
    RequestStream(PeerAddress),
    /// Close the data channel and media call with one peer.
    Disconnect(PeerAddress),
    /// Stop local media and destroy the identity.
    Teardown,
}

/// Main coordinator. The driver passes events; the core returns actions.
pub struct PartyCore {
    config: Config,
    session: Session,
    /// Connected guests (host only).
    peers: Vec<Peer>,
    queue: WatchQueue,
    chat: ChatLog,
    reactions: ReactionBoard,
}

impl PartyCore {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let reactions = ReactionBoard::new(config.reaction_ttl);
        Self {
            config,
            session: Session::new(),
            peers: Vec::new(),
            queue: WatchQueue::new(),
            chat: ChatLog::new(),
            reactions,
        }
    }

    /// Start hosting under a fresh random code. Returns the code and our address.
    pub fn begin_create(&mut self) -> Result<(RoomCode, PeerAddress), PartyError> {
        let code = RoomCode::generate();
        let address = self.begin_create_with_code(code.clone())?;
        Ok((code, address))
    }

    /// Start hosting under `code`. The driver registers the returned address,
    /// acquires capture, then calls `complete_create` (or `fail`).
    pub fn begin_create_with_code(&mut self, code: RoomCode) -> Result<PeerAddress, PartyError> {
        let address = PeerAddress::for_room(&self.config.address_prefix, &code);
        self.session.begin_create(code, address.clone())?;
        self.reset_state();
        Ok(address)
    }

    /// Creating → Connected once identity and capture are both ready.
    pub fn complete_create(&mut self) -> bool {
        if self.session.status() != Status::Creating || !self.session.connect() {
            return false;
        }
        if let Some(code) = self.session.room_code() {
            info!(room = %code, "party created");
            let text = format!("Party created. Share code {} to invite friends.", code);
            self.chat.push(Message::system(text));
        }
        true
    }

    /// Start joining. Returns the host address to connect to and our own address to register.
    pub fn begin_join(&mut self, code: &str) -> Result<(PeerAddress, PeerAddress), PartyError> {
        let code = RoomCode::parse(code)?;
        let host = PeerAddress::for_room(&self.config.address_prefix, &code);
        let local = PeerAddress::random_guest(&self.config.address_prefix);
        self.session
            .begin_join(code, host.clone(), local.clone())?;
        self.reset_state();
        Ok((host, local))
    }

    /// End the current attempt with an error. Returns release actions on first teardown only.
    pub fn fail(&mut self, err: PartyError) -> Vec<Action> {
        warn!(error = %err, status = ?self.session.status(), "party failed");
        let actions = self.release_actions();
        let release = self.session.fail(err);
        self.reset_state();
        if release {
            actions
        } else {
            Vec::new()
        }
    }

    /// Identity-level failure from the rendezvous service. Terminal for the attempt.
    pub fn on_identity_error(&mut self, err: IdentityError) -> Vec<Action> {
        self.fail(err.into())
    }

    /// Idempotent teardown back to Idle.
    pub fn leave(&mut self) -> Vec<Action> {
        let actions = self.release_actions();
        let release = self.session.leave();
        self.reset_state();
        if release {
            info!("left party");
            actions
        } else {
            Vec::new()
        }
    }

    /// Data channel to `peer` opened.
    pub fn on_channel_open(&mut self, peer: PeerAddress) -> Vec<Action> {
        match (self.session.role(), self.session.status()) {
            (Some(Role::Host), Status::Connected) => self.admit_guest(peer),
            (Some(Role::Guest), Status::Joining)
                if self.session.host_address() == Some(&peer) =>
            {
                self.session.connect();
                info!(host = %peer, "joined party");
                self.chat.push(Message::system("Connected to the party."));
                vec![Action::RequestStream(peer)]
            }
            _ if self.session.host_address() == Some(&peer) => Vec::new(),
            _ => {
                debug!(peer = %peer, "rejecting unexpected channel");
                vec![Action::Disconnect(peer)]
            }
        }
    }

    fn admit_guest(&mut self, peer: PeerAddress) -> Vec<Action> {
        if self.peers.iter().any(|p| p.peer_id == peer) {
            return Vec::new();
        }
        self.peers.push(Peer::guest(peer.clone()));
        info!(peer = %peer, guests = self.peers.len(), "guest joined");

        // Late joiners catch up through this one snapshot; nothing else is replayed.
        let mut actions = self.queue_sync(&peer);
        actions.extend(self.announce(format!("{} joined the party.", guest_name(&peer))));
        actions
    }

    /// The host's whole queue, addressed to one peer.
    fn queue_sync(&self, peer: &PeerAddress) -> Vec<Action> {
        let sync = Message::new(Body::QueueSync {
            queue: self.queue.items().to_vec(),
        });
        match wire::encode_frame(&sync) {
            Ok(frame) => vec![Action::Send(peer.clone(), frame)],
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to encode queue sync");
                Vec::new()
            }
        }
    }

    /// Data channel to `peer` closed or errored.
    pub fn on_channel_closed(&mut self, peer: &PeerAddress) -> Vec<Action> {
        match self.session.role() {
            Some(Role::Host) => {
                let Some(pos) = self.peers.iter().position(|p| &p.peer_id == peer) else {
                    return Vec::new();
                };
                self.peers.remove(pos);
                info!(peer = %peer, guests = self.peers.len(), "guest left");
                let mut actions = vec![Action::Disconnect(peer.clone())];
                actions.extend(self.announce(format!("{} left the party.", guest_name(peer))));
                actions
            }
            Some(Role::Guest) if self.session.host_address() == Some(peer) => {
                self.fail(PartyError::HostLost)
            }
            _ => Vec::new(),
        }
    }

    /// Inbound media call. Only the host answers, and only known guests.
    pub fn on_incoming_call(&mut self, peer: &PeerAddress) -> Vec<Action> {
        let known = self.peers.iter().any(|p| &p.peer_id == peer);
        if self.session.role() == Some(Role::Host) && self.session.is_connected() && known {
            vec![Action::AnswerCall(peer.clone())]
        } else {
            debug!(peer = %peer, "ignoring media call");
            Vec::new()
        }
    }

    /// Process one received frame: route, apply, and relay if we are the host.
    pub fn on_message_received(
        &mut self,
        from: &PeerAddress,
        bytes: &[u8],
    ) -> Result<Vec<Action>, MessageError> {
        if !self.session.is_connected() {
            return Ok(Vec::new());
        }
        let (msg, consumed) = wire::decode_frame(bytes)?;

        let route = match self.session.role() {
            Some(Role::Host) => {
                let known = self.peers.iter().any(|p| &p.peer_id == from);
                relay::route_at_host(from, known, &msg.body)
            }
            Some(Role::Guest) => relay::route_at_guest(from, self.session.host_address()),
            None => Route::Drop(relay::DropReason::UnknownSender),
        };

        match route {
            Route::Drop(reason) => {
                warn!(peer = %from, kind = msg.body.kind(), ?reason, "dropping message");
                Ok(Vec::new())
            }
            Route::Apply => {
                self.apply(msg);
                Ok(Vec::new())
            }
            Route::ApplyAndRelay => {
                if let Body::QueueAdd { item } = &msg.body {
                    // Title already held under another id: the sender adopts ours.
                    if !self.queue.add(item.clone()) {
                        debug!(peer = %from, "queue add conflicts with host copy, resyncing");
                        return Ok(self.queue_sync(from));
                    }
                    return Ok(relay::fan_out(&self.peers, Some(from), &bytes[..consumed]));
                }
                let actions = relay::fan_out(&self.peers, Some(from), &bytes[..consumed]);
                debug!(
                    peer = %from,
                    kind = msg.body.kind(),
                    relayed_to = actions.len(),
                    "relaying message"
                );
                self.apply(msg);
                Ok(actions)
            }
        }
    }

    /// Expire reactions. Returns true if any were removed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.reactions.prune(now) > 0
    }

    pub fn send_chat(&mut self, text: &str) -> Result<Vec<Action>, PartyError> {
        let role = self.connected_role()?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let msg = Message::new(Body::Chat {
            sender: self.display_name(),
            sender_role: role,
            text: text.to_string(),
        });
        self.publish(msg)
    }

    pub fn send_reaction(&mut self, emoji: &str) -> Result<Vec<Action>, PartyError> {
        self.connected_role()?;
        let msg = Message::new(Body::Reaction {
            emoji: emoji.to_string(),
            sender: self.display_name(),
            offset: chat::random_offset(),
        });
        self.publish(msg)
    }

    /// Queue a title. No-op if the same `(tmdb_id, media_type)` is already queued.
    pub fn add_to_queue(&mut self, candidate: QueueCandidate) -> Result<Vec<Action>, PartyError> {
        self.connected_role()?;
        if self
            .queue
            .contains_title(candidate.tmdb_id, candidate.media_type)
        {
            debug!(tmdb_id = candidate.tmdb_id, "title already queued");
            return Ok(Vec::new());
        }
        let item = QueueItem::from_candidate(candidate, self.display_name());
        self.publish(Message::new(Body::QueueAdd { item }))
    }

    /// Set our vote on an item, replacing any earlier vote.
    pub fn vote_on_queue(&mut self, item_id: Uuid, vote: Vote) -> Result<Vec<Action>, PartyError> {
        self.connected_role()?;
        let voter = self
            .session
            .local_address()
            .cloned()
            .ok_or(PartyError::NotConnected)?;
        if self.queue.get(item_id).is_none() {
            return Ok(Vec::new());
        }
        self.publish(Message::new(Body::QueueVote {
            item_id,
            vote,
            voter,
        }))
    }

    /// Remove an item. Any participant may remove any item.
    pub fn remove_from_queue(&mut self, item_id: Uuid) -> Result<Vec<Action>, PartyError> {
        self.connected_role()?;
        if self.queue.get(item_id).is_none() {
            return Ok(Vec::new());
        }
        self.publish(Message::new(Body::QueueRemove { item_id }))
    }

    /// "Host" for the host, "Guest XXXX" for a guest.
    pub fn display_name(&self) -> String {
        match (self.session.role(), self.session.local_address()) {
            (Some(Role::Guest), Some(addr)) => guest_name(addr),
            _ => "Host".to_string(),
        }
    }

    pub fn status(&self) -> Status {
        self.session.status()
    }

    pub fn role(&self) -> Option<Role> {
        self.session.role()
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.session.room_code()
    }

    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.session.local_address()
    }

    pub fn host_address(&self) -> Option<&PeerAddress> {
        self.session.host_address()
    }

    pub fn error(&self) -> Option<&PartyError> {
        self.session.error()
    }

    /// Connected guests (empty on a guest: guests hold no peer records).
    pub fn participants(&self) -> &[Peer] {
        &self.peers
    }

    pub fn messages(&self) -> &[Message] {
        self.chat.messages()
    }

    pub fn reactions(&self) -> &[ActiveReaction] {
        self.reactions.active()
    }

    /// Queue in display order (score descending, ties by insertion).
    pub fn queue(&self) -> Vec<QueueItem> {
        self.queue.ranked()
    }

    fn connected_role(&self) -> Result<Role, PartyError> {
        match self.session.role() {
            Some(role) if self.session.is_connected() => Ok(role),
            _ => Err(PartyError::NotConnected),
        }
    }

    /// Send a locally authored message outward, then apply it here.
    fn publish(&mut self, msg: Message) -> Result<Vec<Action>, PartyError> {
        let frame = wire::encode_frame(&msg).map_err(|e| PartyError::Wire(e.to_string()))?;
        let actions = match self.session.role() {
            Some(Role::Host) => relay::fan_out(&self.peers, None, &frame),
            Some(Role::Guest) => self
                .session
                .host_address()
                .map(|h| vec![Action::Send(h.clone(), frame)])
                .unwrap_or_default(),
            None => Vec::new(),
        };
        self.apply(msg);
        Ok(actions)
    }

    /// Host-authored System message: shown locally and sent to every guest.
    fn announce(&mut self, text: String) -> Vec<Action> {
        let msg = Message::system(text);
        let actions = match wire::encode_frame(&msg) {
            Ok(frame) => relay::fan_out(&self.peers, None, &frame),
            Err(e) => {
                warn!(error = %e, "failed to encode system message");
                Vec::new()
            }
        };
        self.chat.push(msg);
        actions
    }

    fn apply(&mut self, msg: Message) {
        match msg.body {
            Body::Chat { .. } | Body::System { .. } => {
                self.chat.push(msg);
            }
            Body::Reaction { .. } => {
                self.reactions.push(&msg, Instant::now());
            }
            Body::QueueAdd { item } => {
                if !self.queue.add(item) {
                    debug!("duplicate queue add ignored");
                }
            }
            Body::QueueVote {
                item_id,
                vote,
                voter,
            } => {
                if !self.queue.vote(item_id, &voter, vote) {
                    debug!(item = %item_id, "vote for unknown item ignored");
                }
            }
            Body::QueueRemove { item_id } => {
                self.queue.remove(item_id);
            }
            Body::QueueSync { queue } => {
                self.queue.replace(queue);
            }
        }
    }

    /// Close every connection we hold, then tear down.
    fn release_actions(&self) -> Vec<Action> {
        let mut actions: Vec<Action> = match self.session.role() {
            Some(Role::Host) => self
                .peers
                .iter()
                .map(|p| Action::Disconnect(p.peer_id.clone()))
                .collect(),
            Some(Role::Guest) => self
                .session
                .host_address()
                .map(|h| vec![Action::Disconnect(h.clone())])
                .unwrap_or_default(),
            None => Vec::new(),
        };
        actions.push(Action::Teardown);
        actions
    }

    fn reset_state(&mut self) {
        self.peers.clear();
        self.queue.clear();
        self.chat.clear();
        self.reactions.clear();
    }
}

impl Default for PartyCore {
    fn default() -> Self {
        Self::new()
    }
}

fn guest_name(addr: &PeerAddress) -> String {
    format!("Guest {}", addr.short_id())
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    DecodeFailed(#[from] wire::FrameDecodeError),
}
