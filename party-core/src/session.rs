//! Session state machine
//!
//! `Idle → Creating|Joining → Connected → Idle` on the normal path and
//! `Creating|Joining → Error → Idle` on failure. Role and room code are only
//! assigned or cleared by these transitions.

use crate::error::PartyError;
use crate::protocol::{now_millis, Role};
use crate::room::{PeerAddress, RoomCode};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    /// Identity registration and capture in progress
    Creating,
    /// Waiting for the data channel to the host to open
    Joining,
    Connected,
    /// Attempt failed; needs an explicit retry or leave
    Error,
}

/// A connected guest, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub peer_id: PeerAddress,
    pub role: Role,
    /// ms since UNIX epoch
    pub joined_at: u64,
}

impl Peer {
    pub fn guest(peer_id: PeerAddress) -> Self {
        Self {
            peer_id,
            role: Role::Guest,
            joined_at: now_millis(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    status: Status,
    role: Option<Role>,
    room_code: Option<RoomCode>,
    local_address: Option<PeerAddress>,
    /// Host's address. Equal to `local_address` when hosting.
    host_address: Option<PeerAddress>,
    error: Option<PartyError>,
    /// One-shot teardown guard: true once resources have been released.
    cleaned_up: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
            role: None,
            room_code: None,
            local_address: None,
            host_address: None,
            error: None,
            cleaned_up: true,
        }
    }

    fn ensure_can_start(&self) -> Result<(), PartyError> {
        match self.status {
            Status::Idle | Status::Error => Ok(()),
            _ => Err(PartyError::AlreadyActive),
        }
    }

    /// Idle|Error → Creating as host of `code`.
    pub fn begin_create(&mut self, code: RoomCode, local: PeerAddress) -> Result<(), PartyError> {
        self.ensure_can_start()?;
        self.status = Status::Creating;
        self.role = Some(Role::Host);
        self.room_code = Some(code);
        self.host_address = Some(local.clone());
        self.local_address = Some(local);
        self.error = None;
        self.cleaned_up = false;
        Ok(())
    }

    /// Idle|Error → Joining the host at `host`.
    pub fn begin_join(
        &mut self,
        code: RoomCode,
        host: PeerAddress,
        local: PeerAddress,
    ) -> Result<(), PartyError> {
        self.ensure_can_start()?;
        self.status = Status::Joining;
        self.role = Some(Role::Guest);
        self.room_code = Some(code);
        self.host_address = Some(host);
        self.local_address = Some(local);
        self.error = None;
        self.cleaned_up = false;
        Ok(())
    }

    /// Creating|Joining → Connected. Returns false if not in a pending state.
    pub fn connect(&mut self) -> bool {
        match self.status {
            Status::Creating | Status::Joining => {
                self.status = Status::Connected;
                true
            }
            _ => false,
        }
    }

    /// Enter Error, clearing role and code. Returns true if resources still
    /// need releasing (first teardown for this attempt).
    pub fn fail(&mut self, err: PartyError) -> bool {
        let release = !self.cleaned_up;
        self.cleaned_up = true;
        self.status = Status::Error;
        self.role = None;
        self.room_code = None;
        self.local_address = None;
        self.host_address = None;
        self.error = Some(err);
        release
    }

    /// Reset to Idle. Returns true if resources still need releasing.
    /// Safe to call any number of times.
    pub fn leave(&mut self) -> bool {
        let release = !self.cleaned_up;
        self.cleaned_up = true;
        self.status = Status::Idle;
        self.role = None;
        self.room_code = None;
        self.local_address = None;
        self.host_address = None;
        self.error = None;
        release
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room_code.as_ref()
    }

    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.local_address.as_ref()
    }

    pub fn host_address(&self) -> Option<&PeerAddress> {
        self.host_address.as_ref()
    }

    pub fn error(&self) -> Option<&PartyError> {
        self.error.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.status == Status::Connected
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
