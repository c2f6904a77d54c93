//! In-process rendezvous hub. Endpoints registered on the same hub reach each
//! other directly through channels; used for local runs and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use party_core::{IdentityError, PeerAddress};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bitrate::{EncodingParameters, SendParameters, VideoSender};
use crate::media::MediaStream;
use crate::rendezvous::{Endpoint, EndpointEvent, Registration, Rendezvous, TransportError};

struct Slot {
    events: mpsc::UnboundedSender<EndpointEvent>,
    links: HashSet<PeerAddress>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerAddress, Slot>,
    /// When set, registrations fail with this error.
    outage: Option<IdentityError>,
    /// Video senders of answered calls, keyed by (caller-side answerer, callee).
    senders: HashMap<(PeerAddress, PeerAddress), Arc<LoopbackSender>>,
}

impl Hub {
    fn emit(&self, to: &PeerAddress, event: EndpointEvent) {
        if let Some(slot) = self.endpoints.get(to) {
            let _ = slot.events.send(event);
        }
    }

    fn linked(&self, a: &PeerAddress, b: &PeerAddress) -> bool {
        self.endpoints
            .get(a)
            .map(|s| s.links.contains(b))
            .unwrap_or(false)
    }

    fn unlink(&mut self, a: &PeerAddress, b: &PeerAddress) -> bool {
        let removed = self
            .endpoints
            .get_mut(a)
            .map(|s| s.links.remove(b))
            .unwrap_or(false);
        if let Some(s) = self.endpoints.get_mut(b) {
            s.links.remove(a);
        }
        self.senders.remove(&(a.clone(), b.clone()));
        self.senders.remove(&(b.clone(), a.clone()));
        removed
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct LoopbackRendezvous {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make new registrations fail with `err`; `None` restores service.
    pub fn set_outage(&self, err: Option<IdentityError>) {
        lock(&self.hub).outage = err;
    }

    pub fn is_registered(&self, address: &PeerAddress) -> bool {
        lock(&self.hub).endpoints.contains_key(address)
    }

    /// Number of open channels `address` has.
    pub fn link_count(&self, address: &PeerAddress) -> usize {
        lock(&self.hub)
            .endpoints
            .get(address)
            .map(|s| s.links.len())
            .unwrap_or(0)
    }

    /// Drop the channel between two peers the way a network failure would:
    /// both sides get `ChannelError`.
    pub fn sever(&self, a: &PeerAddress, b: &PeerAddress) {
        let mut hub = lock(&self.hub);
        if hub.unlink(a, b) {
            hub.emit(a, EndpointEvent::ChannelError(b.clone(), "link severed".into()));
            hub.emit(b, EndpointEvent::ChannelError(a.clone(), "link severed".into()));
        }
    }

    /// Parameters last applied to the video sender `from` uses toward `to`.
    pub fn sender_parameters(&self, from: &PeerAddress, to: &PeerAddress) -> Option<SendParameters> {
        lock(&self.hub)
            .senders
            .get(&(from.clone(), to.clone()))
            .map(|s| s.parameters())
    }
}

impl Rendezvous for LoopbackRendezvous {
    fn register(&self, address: &PeerAddress) -> Result<Registration, IdentityError> {
        let mut hub = lock(&self.hub);
        if let Some(err) = &hub.outage {
            return Err(err.clone());
        }
        if hub.endpoints.contains_key(address) {
            return Err(IdentityError::RoomUnavailable);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        hub.endpoints.insert(
            address.clone(),
            Slot {
                events: tx,
                links: HashSet::new(),
            },
        );
        debug!(address = %address, "loopback endpoint registered");
        Ok(Registration {
            endpoint: Arc::new(LoopbackEndpoint {
                address: address.clone(),
                hub: self.hub.clone(),
            }),
            events: rx,
        })
    }
}

struct LoopbackEndpoint {
    address: PeerAddress,
    hub: Arc<Mutex<Hub>>,
}

impl Endpoint for LoopbackEndpoint {
    fn address(&self) -> &PeerAddress {
        &self.address
    }

    fn connect(&self, remote: &PeerAddress) {
        let mut hub = lock(&self.hub);
        if !hub.endpoints.contains_key(&self.address) {
            return;
        }
        if !hub.endpoints.contains_key(remote) {
            hub.emit(
                &self.address,
                EndpointEvent::Error(IdentityError::PeerUnreachable),
            );
            return;
        }
        for (a, b) in [(&self.address, remote), (remote, &self.address)] {
            if let Some(slot) = hub.endpoints.get_mut(a) {
                slot.links.insert(b.clone());
            }
        }
        hub.emit(remote, EndpointEvent::ChannelOpen(self.address.clone()));
        hub.emit(&self.address, EndpointEvent::ChannelOpen(remote.clone()));
    }

    fn send(&self, remote: &PeerAddress, frame: Vec<u8>) -> Result<(), TransportError> {
        let hub = lock(&self.hub);
        if !hub.endpoints.contains_key(&self.address) {
            return Err(TransportError::Destroyed);
        }
        if !hub.linked(&self.address, remote) {
            return Err(TransportError::NotConnected(remote.clone()));
        }
        hub.emit(remote, EndpointEvent::Data(self.address.clone(), frame));
        Ok(())
    }

    fn call(&self, remote: &PeerAddress) {
        let hub = lock(&self.hub);
        if hub.linked(&self.address, remote) {
            hub.emit(remote, EndpointEvent::IncomingCall(self.address.clone()));
        }
    }

    fn answer(&self, remote: &PeerAddress, stream: &MediaStream) -> Option<Arc<dyn VideoSender>> {
        let mut hub = lock(&self.hub);
        if !hub.linked(&self.address, remote) {
            return None;
        }
        hub.emit(
            remote,
            EndpointEvent::RemoteStream(self.address.clone(), stream.clone()),
        );
        stream.video_track()?;
        let sender = Arc::new(LoopbackSender::negotiated());
        hub.senders
            .insert((self.address.clone(), remote.clone()), sender.clone());
        Some(sender)
    }

    fn disconnect(&self, remote: &PeerAddress) {
        let mut hub = lock(&self.hub);
        if hub.unlink(&self.address, remote) {
            hub.emit(remote, EndpointEvent::ChannelClosed(self.address.clone()));
        }
    }

    fn destroy(&self) {
        let mut hub = lock(&self.hub);
        let Some(slot) = hub.endpoints.remove(&self.address) else {
            return;
        };
        for remote in slot.links {
            hub.unlink(&self.address, &remote);
            hub.emit(&remote, EndpointEvent::ChannelClosed(self.address.clone()));
        }
        debug!(address = %self.address, "loopback endpoint destroyed");
    }
}

/// Sender whose negotiation completes as soon as the call is answered.
struct LoopbackSender {
    params: Mutex<SendParameters>,
}

impl LoopbackSender {
    fn negotiated() -> Self {
        Self {
            params: Mutex::new(SendParameters {
                encodings: vec![EncodingParameters::default()],
            }),
        }
    }
}

impl VideoSender for LoopbackSender {
    fn parameters(&self) -> SendParameters {
        self.params
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn set_parameters(&self, params: SendParameters) -> Result<(), String> {
        let mut current = self.params.lock().map_err(|e| e.to_string())?;
        *current = params;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::new(s)
    }

    #[tokio::test]
    async fn duplicate_registration_is_room_unavailable() {
        let rv = LoopbackRendezvous::new();
        let _host = rv.register(&addr("watchparty-B7K4XQ")).unwrap();
        assert_eq!(
            rv.register(&addr("watchparty-B7K4XQ")).err(),
            Some(IdentityError::RoomUnavailable)
        );
    }

    #[tokio::test]
    async fn outage_fails_registration() {
        let rv = LoopbackRendezvous::new();
        rv.set_outage(Some(IdentityError::SignalingServer));
        assert_eq!(
            rv.register(&addr("a")).err(),
            Some(IdentityError::SignalingServer)
        );
        rv.set_outage(None);
        assert!(rv.register(&addr("a")).is_ok());
    }

    #[tokio::test]
    async fn connect_to_missing_peer_reports_unreachable() {
        let rv = LoopbackRendezvous::new();
        let mut g = rv.register(&addr("g")).unwrap();
        g.endpoint.connect(&addr("nobody"));
        assert!(matches!(
            g.events.recv().await,
            Some(EndpointEvent::Error(IdentityError::PeerUnreachable))
        ));
    }

    #[tokio::test]
    async fn channel_carries_frames_both_ways() {
        let rv = LoopbackRendezvous::new();
        let mut h = rv.register(&addr("h")).unwrap();
        let mut g = rv.register(&addr("g")).unwrap();
        assert!(g.endpoint.send(&addr("h"), vec![1]).is_err());

        g.endpoint.connect(&addr("h"));
        assert!(matches!(h.events.recv().await, Some(EndpointEvent::ChannelOpen(p)) if p == addr("g")));
        assert!(matches!(g.events.recv().await, Some(EndpointEvent::ChannelOpen(p)) if p == addr("h")));

        g.endpoint.send(&addr("h"), vec![1, 2, 3]).unwrap();
        match h.events.recv().await {
            Some(EndpointEvent::Data(from, bytes)) => {
                assert_eq!(from, addr("g"));
                assert_eq!(bytes, vec![1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn destroy_closes_links_and_is_idempotent() {
        let rv = LoopbackRendezvous::new();
        let mut h = rv.register(&addr("h")).unwrap();
        let g = rv.register(&addr("g")).unwrap();
        g.endpoint.connect(&addr("h"));
        let _ = h.events.recv().await;

        h.endpoint.destroy();
        h.endpoint.destroy();
        assert!(!rv.is_registered(&addr("h")));
        assert_eq!(rv.link_count(&addr("g")), 0);
        assert_eq!(
            g.endpoint.send(&addr("h"), vec![0]),
            Err(TransportError::NotConnected(addr("h")))
        );
    }
}
