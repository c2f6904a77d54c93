//! Watch-party node: tokio driver around `party_core`.
//! Rendezvous transport, screen capture with downscaling, bitrate capping,
//! title search, and the `Party` handle the UI layer talks to.

pub mod bitrate;
pub mod config;
pub mod loopback;
pub mod media;
pub mod party;
pub mod rendezvous;
pub mod search;
pub mod synthetic;

pub use bitrate::{BitrateConfig, BitrateController, TuneOutcome, VideoSender};
pub use config::Config;
pub use loopback::LoopbackRendezvous;
pub use media::{
    Dimensions, DisplayCapture, LocalStream, MediaAdapter, MediaConfig, MediaStream, MediaTrack,
    SurfaceFactory,
};
pub use party::{Party, Snapshot};
pub use rendezvous::{Endpoint, EndpointEvent, Registration, Rendezvous, TransportError};
pub use search::{MovieSearch, SearchConfig, SearchError};
