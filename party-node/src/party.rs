//! Async driver for one participant.
//!
//! `Party` owns the rendezvous endpoint and the local media, pumps endpoint
//! events into `PartyCore` and executes the actions it returns. The core sits
//! behind one `tokio::sync::Mutex`, so every handler is an atomic
//! read-modify-write. Background tasks carry the epoch they were spawned in
//! and go quiet once a teardown has moved the epoch on.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use party_core::{
    Action, ActiveReaction, IdentityError, Message, PartyCore, PartyError, Peer, QueueCandidate,
    QueueItem, Role, RoomCode, Status, Uuid, Vote,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bitrate::BitrateController;
use crate::config::Config;
use crate::media::{
    CaptureError, DisplayCapture, LocalStream, MediaAdapter, MediaStream, MediaTrack,
    SurfaceFactory,
};
use crate::rendezvous::{Endpoint, EndpointEvent, Rendezvous};

/// How often expired reactions are pruned.
const REACTION_TICK: Duration = Duration::from_millis(250);

/// Everything the UI layer observes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: Status,
    pub role: Option<Role>,
    pub room_code: Option<RoomCode>,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub participants: Vec<Peer>,
    pub messages: Vec<Message>,
    pub reactions: Vec<ActiveReaction>,
    /// Display order.
    pub queue: Vec<QueueItem>,
    pub error: Option<PartyError>,
    pub can_host: bool,
}

impl Snapshot {
    fn idle(can_host: bool) -> Self {
        Self {
            status: Status::Idle,
            role: None,
            room_code: None,
            local_stream: None,
            remote_stream: None,
            participants: Vec::new(),
            messages: Vec::new(),
            reactions: Vec::new(),
            queue: Vec::new(),
            error: None,
            can_host,
        }
    }
}

struct State {
    core: PartyCore,
    /// Bumped on every start and teardown.
    epoch: u64,
    endpoint: Option<Arc<dyn Endpoint>>,
    local_stream: Option<LocalStream>,
    remote_stream: Option<MediaStream>,
    join_waiter: Option<oneshot::Sender<Result<(), PartyError>>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    rendezvous: Arc<dyn Rendezvous>,
    capture: Arc<dyn DisplayCapture>,
    surfaces: Arc<dyn SurfaceFactory>,
    media: MediaAdapter,
    bitrate: BitrateController,
    state: Mutex<State>,
    snapshot: watch::Sender<Snapshot>,
}

/// Cheap to clone; all clones drive the same participant.
#[derive(Clone)]
pub struct Party {
    shared: Arc<Shared>,
}

impl Party {
    pub fn new(
        config: &Config,
        rendezvous: Arc<dyn Rendezvous>,
        capture: Arc<dyn DisplayCapture>,
        surfaces: Arc<dyn SurfaceFactory>,
    ) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::idle(capture.is_supported()));
        let state = State {
            core: PartyCore::with_config(config.core()),
            epoch: 0,
            endpoint: None,
            local_stream: None,
            remote_stream: None,
            join_waiter: None,
            tasks: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                rendezvous,
                capture,
                surfaces,
                media: MediaAdapter::new(config.media()),
                bitrate: BitrateController::new(config.bitrate()),
                state: Mutex::new(state),
                snapshot,
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn can_host(&self) -> bool {
        self.shared.capture.is_supported()
    }

    /// Host a new party under a random room code.
    pub async fn create_party(&self) -> Result<RoomCode, PartyError> {
        self.create_party_with_code(RoomCode::generate()).await
    }

    /// Host a party under `code`: register the identity, then capture the
    /// screen. Either failure tears down and leaves status at Error.
    pub async fn create_party_with_code(&self, code: RoomCode) -> Result<RoomCode, PartyError> {
        if !self.can_host() {
            return Err(PartyError::CaptureUnsupported);
        }
        let mut st = self.shared.state.lock().await;
        let address = st.core.begin_create_with_code(code.clone())?;
        st.epoch += 1;
        let epoch = st.epoch;
        self.publish(&st);

        let registration = match self.shared.rendezvous.register(&address) {
            Ok(r) => r,
            Err(e) => return Err(self.abort_start(&mut st, e.into())),
        };
        st.endpoint = Some(registration.endpoint);

        let local = match self
            .shared
            .media
            .acquire(self.shared.capture.as_ref(), self.shared.surfaces.as_ref())
        {
            Ok(local) => local,
            Err(e) => {
                if let CaptureError::Failed(detail) = &e {
                    warn!(%detail, "screen capture failed");
                }
                return Err(self.abort_start(&mut st, capture_error(e)));
            }
        };
        if let Some(source) = local.source_track() {
            let watcher = self.spawn_source_watcher(epoch, source);
            st.tasks.push(watcher);
        }
        st.local_stream = Some(local);

        let pump = self.spawn_pump(epoch, registration.events);
        let ticker = self.spawn_ticker(epoch);
        st.tasks.extend([pump, ticker]);
        st.core.complete_create();
        self.publish(&st);
        Ok(code)
    }

    /// Join the party hosted under `code` (case-insensitive). Resolves once
    /// the data channel to the host is open, or with the error that ended the
    /// attempt. There is no timeout.
    pub async fn join_party(&self, code: &str) -> Result<(), PartyError> {
        let joined = {
            let mut st = self.shared.state.lock().await;
            let (host, local) = st.core.begin_join(code)?;
            st.epoch += 1;
            let epoch = st.epoch;
            self.publish(&st);

            let registration = match self.shared.rendezvous.register(&local) {
                Ok(r) => r,
                Err(e) => return Err(self.abort_start(&mut st, e.into())),
            };
            let (tx, rx) = oneshot::channel();
            st.join_waiter = Some(tx);
            let pump = self.spawn_pump(epoch, registration.events);
            let ticker = self.spawn_ticker(epoch);
            st.tasks.extend([pump, ticker]);
            registration.endpoint.connect(&host);
            st.endpoint = Some(registration.endpoint);
            info!(room = %code.trim().to_uppercase(), host = %host, "joining party");
            rx
        };
        joined.await.unwrap_or(Err(PartyError::NotConnected))
    }

    /// Tear everything down and return to Idle. Safe to call repeatedly.
    pub async fn leave_party(&self) {
        let mut st = self.shared.state.lock().await;
        let actions = st.core.leave();
        self.execute(&mut st, actions);
        self.settle_join(&mut st);
        self.publish(&st);
    }

    pub async fn send_message(&self, text: &str) -> Result<(), PartyError> {
        self.user_op(|core| core.send_chat(text)).await
    }

    pub async fn send_reaction(&self, emoji: &str) -> Result<(), PartyError> {
        self.user_op(|core| core.send_reaction(emoji)).await
    }

    pub async fn add_to_queue(&self, candidate: QueueCandidate) -> Result<(), PartyError> {
        self.user_op(|core| core.add_to_queue(candidate)).await
    }

    pub async fn vote_on_queue(&self, item_id: Uuid, vote: Vote) -> Result<(), PartyError> {
        self.user_op(|core| core.vote_on_queue(item_id, vote)).await
    }

    pub async fn remove_from_queue(&self, item_id: Uuid) -> Result<(), PartyError> {
        self.user_op(|core| core.remove_from_queue(item_id)).await
    }

    async fn user_op<F>(&self, op: F) -> Result<(), PartyError>
    where
        F: FnOnce(&mut PartyCore) -> Result<Vec<Action>, PartyError>,
    {
        let mut st = self.shared.state.lock().await;
        let actions = op(&mut st.core)?;
        self.execute(&mut st, actions);
        self.publish(&st);
        Ok(())
    }

    /// Fail a create/join that has not reached Connected. Returns the error for the caller.
    fn abort_start(&self, st: &mut State, err: PartyError) -> PartyError {
        let actions = st.core.fail(err.clone());
        self.execute(st, actions);
        self.settle_join(st);
        self.publish(st);
        err
    }

    /// Feed one endpoint event to the core. Returns false once the event
    /// belongs to a session that has since been torn down.
    async fn handle_event(&self, epoch: u64, event: EndpointEvent) -> bool {
        let mut st = self.shared.state.lock().await;
        if st.epoch != epoch {
            return false;
        }
        let actions = match event {
            EndpointEvent::ChannelOpen(peer) => st.core.on_channel_open(peer),
            EndpointEvent::Data(peer, bytes) => match st.core.on_message_received(&peer, &bytes) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(peer = %peer, error = %e, len = bytes.len(), "dropping frame");
                    Vec::new()
                }
            },
            EndpointEvent::ChannelClosed(peer) => st.core.on_channel_closed(&peer),
            EndpointEvent::ChannelError(peer, reason) => {
                debug!(peer = %peer, %reason, "channel error");
                st.core.on_channel_closed(&peer)
            }
            EndpointEvent::IncomingCall(peer) => st.core.on_incoming_call(&peer),
            EndpointEvent::RemoteStream(peer, stream) => {
                if st.core.role() == Some(Role::Guest) && st.core.host_address() == Some(&peer) {
                    info!(host = %peer, "receiving host stream");
                    st.remote_stream = Some(stream);
                }
                Vec::new()
            }
            EndpointEvent::Error(err) => on_endpoint_error(&mut st.core, err),
        };
        self.execute(&mut st, actions);
        self.settle_join(&mut st);
        self.publish(&st);
        true
    }

    fn execute(&self, st: &mut State, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(peer, frame) => {
                    if let Some(endpoint) = &st.endpoint {
                        if let Err(e) = endpoint.send(&peer, frame) {
                            debug!(peer = %peer, error = %e, "send failed");
                        }
                    }
                }
                Action::AnswerCall(peer) => {
                    let sender = match (&st.endpoint, &st.local_stream) {
                        (Some(endpoint), Some(local)) => endpoint.answer(&peer, local.stream()),
                        _ => None,
                    };
                    if let Some(sender) = sender {
                        let controller = self.shared.bitrate.clone();
                        let task = tokio::spawn(async move {
                            let outcome = controller.tune(sender.as_ref()).await;
                            debug!(peer = %peer, ?outcome, "bitrate tuning finished");
                        });
                        st.tasks.retain(|t| !t.is_finished());
                        st.tasks.push(task);
                    }
                }
                Action::RequestStream(host) => {
                    if let Some(endpoint) = &st.endpoint {
                        endpoint.call(&host);
                    }
                }
                Action::Disconnect(peer) => {
                    if let Some(endpoint) = &st.endpoint {
                        endpoint.disconnect(&peer);
                    }
                }
                Action::Teardown => self.teardown(st),
            }
        }
    }

    fn teardown(&self, st: &mut State) {
        if let Some(local) = st.local_stream.take() {
            local.stop();
        }
        st.remote_stream = None;
        if let Some(endpoint) = st.endpoint.take() {
            endpoint.destroy();
        }
        st.epoch += 1;
        for task in st.tasks.drain(..) {
            task.abort();
        }
        debug!(epoch = st.epoch, "session resources released");
    }

    /// Resolve a pending `join_party` once the attempt has an outcome.
    fn settle_join(&self, st: &mut State) {
        if st.join_waiter.is_none() {
            return;
        }
        let outcome = match st.core.status() {
            Status::Connected => Ok(()),
            Status::Error => Err(st.core.error().cloned().unwrap_or(PartyError::NotConnected)),
            Status::Idle => Err(PartyError::NotConnected),
            Status::Creating | Status::Joining => return,
        };
        if let Some(tx) = st.join_waiter.take() {
            let _ = tx.send(outcome);
        }
    }

    fn publish(&self, st: &State) {
        let core = &st.core;
        self.shared.snapshot.send_replace(Snapshot {
            status: core.status(),
            role: core.role(),
            room_code: core.room_code().cloned(),
            local_stream: st.local_stream.as_ref().map(|l| l.stream().clone()),
            remote_stream: st.remote_stream.clone(),
            participants: core.participants().to_vec(),
            messages: core.messages().to_vec(),
            reactions: core.reactions().to_vec(),
            queue: core.queue(),
            error: core.error().cloned(),
            can_host: self.can_host(),
        });
    }

    fn spawn_pump(
        &self,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<EndpointEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(party) = Party::from_weak(&weak) else {
                    break;
                };
                if !party.handle_event(epoch, event).await {
                    break;
                }
            }
        })
    }

    fn spawn_ticker(&self, epoch: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REACTION_TICK);
            loop {
                interval.tick().await;
                let Some(party) = Party::from_weak(&weak) else {
                    break;
                };
                let mut st = party.shared.state.lock().await;
                if st.epoch != epoch {
                    break;
                }
                if st.core.tick(Instant::now()) {
                    party.publish(&st);
                }
            }
        })
    }

    /// Leave automatically when the shared screen stops (e.g. the platform's
    /// "stop sharing" control).
    fn spawn_source_watcher(&self, epoch: u64, source: Arc<dyn MediaTrack>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let mut ended = source.ended();
        tokio::spawn(async move {
            let source_ended = ended.wait_for(|e| *e).await.is_ok();
            if !source_ended {
                return;
            }
            let Some(party) = Party::from_weak(&weak) else {
                return;
            };
            let mut st = party.shared.state.lock().await;
            if st.epoch != epoch {
                return;
            }
            info!(track = source.id(), "capture source ended, leaving party");
            let actions = st.core.leave();
            party.execute(&mut st, actions);
            party.publish(&st);
        })
    }
}

fn capture_error(e: CaptureError) -> PartyError {
    match e {
        CaptureError::Unsupported => PartyError::CaptureUnsupported,
        CaptureError::Denied | CaptureError::Failed(_) => PartyError::CaptureDenied,
    }
}

fn on_endpoint_error(core: &mut PartyCore, err: IdentityError) -> Vec<Action> {
    match core.status() {
        Status::Idle | Status::Error => {
            debug!(error = %err, "identity error after teardown");
            Vec::new()
        }
        _ => core.on_identity_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackRendezvous;
    use crate::media::Dimensions;
    use crate::synthetic::{SyntheticCapture, SyntheticSurfaceFactory};

    fn party(capture: SyntheticCapture) -> Party {
        Party::new(
            &Config::default(),
            Arc::new(LoopbackRendezvous::new()),
            Arc::new(capture),
            Arc::new(SyntheticSurfaceFactory::default()),
        )
    }

    #[tokio::test]
    async fn starts_idle() {
        let p = party(SyntheticCapture::new(Dimensions::new(1280, 720)));
        let snap = p.snapshot();
        assert_eq!(snap.status, Status::Idle);
        assert!(snap.can_host);
        assert!(snap.local_stream.is_none());
    }

    #[tokio::test]
    async fn unsupported_capture_refuses_without_state_change() {
        let p = party(SyntheticCapture::unsupported());
        assert!(!p.snapshot().can_host);
        assert_eq!(p.create_party().await, Err(PartyError::CaptureUnsupported));
        assert_eq!(p.snapshot().status, Status::Idle);
    }

    #[tokio::test]
    async fn invalid_code_rejected_before_registration() {
        let p = party(SyntheticCapture::new(Dimensions::new(1280, 720)));
        assert!(matches!(
            p.join_party("O0O0O0").await,
            Err(PartyError::InvalidRoomCode(_))
        ));
        assert_eq!(p.snapshot().status, Status::Idle);
    }

    #[tokio::test]
    async fn operations_need_a_party() {
        let p = party(SyntheticCapture::new(Dimensions::new(1280, 720)));
        assert_eq!(p.send_message("hi").await, Err(PartyError::NotConnected));
        p.leave_party().await;
        assert_eq!(p.snapshot().status, Status::Idle);
    }
}
