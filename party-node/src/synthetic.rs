//! Synthetic media backend for headless runs and tests: tracks that report a
//! fixed size, a capture source with scriptable permission outcomes, and a
//! surface that counts frames instead of drawing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::media::{
    CaptureConstraints, CaptureError, ContentHint, Dimensions, DisplayCapture, FrameSurface,
    MediaStream, MediaTrack, SurfaceFactory, TrackKind,
};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    dimensions: Option<Dimensions>,
    hint: Mutex<ContentHint>,
    ended: watch::Sender<bool>,
}

impl SyntheticTrack {
    fn new(kind: TrackKind, dimensions: Option<Dimensions>) -> Arc<Self> {
        let (ended, _) = watch::channel(false);
        let n = NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id: format!("synthetic-{:?}-{}", kind, n).to_lowercase(),
            kind,
            dimensions,
            hint: Mutex::new(ContentHint::None),
            ended,
        })
    }

    pub fn video(dimensions: Dimensions) -> Arc<Self> {
        Self::new(TrackKind::Video, Some(dimensions))
    }

    pub fn audio() -> Arc<Self> {
        Self::new(TrackKind::Audio, None)
    }

    /// Simulate the source ending on its own (e.g. the platform's "stop sharing" button).
    pub fn end(&self) {
        self.ended.send_replace(true);
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn is_live(&self) -> bool {
        !*self.ended.borrow()
    }

    fn stop(&self) {
        self.end();
    }

    fn content_hint(&self) -> ContentHint {
        self.hint.lock().map(|h| *h).unwrap_or(ContentHint::None)
    }

    fn set_content_hint(&self, hint: ContentHint) {
        if let Ok(mut h) = self.hint.lock() {
            *h = hint;
        }
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Granted,
    Denied,
    Unsupported,
}

/// Capture source producing one synthetic video track (and optionally audio).
pub struct SyntheticCapture {
    dimensions: Dimensions,
    audio: bool,
    permission: Permission,
    last_video: Mutex<Option<Arc<SyntheticTrack>>>,
}

impl SyntheticCapture {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            audio: false,
            permission: Permission::Granted,
            last_video: Mutex::new(None),
        }
    }

    pub fn with_audio(mut self) -> Self {
        self.audio = true;
        self
    }

    /// The user dismisses the permission prompt.
    pub fn denied() -> Self {
        Self {
            permission: Permission::Denied,
            ..Self::new(Dimensions::new(1920, 1080))
        }
    }

    pub fn unsupported() -> Self {
        Self {
            permission: Permission::Unsupported,
            ..Self::new(Dimensions::new(1920, 1080))
        }
    }

    /// Video track handed out by the most recent successful request.
    pub fn last_video(&self) -> Option<Arc<SyntheticTrack>> {
        self.last_video.lock().ok().and_then(|v| v.clone())
    }
}

impl DisplayCapture for SyntheticCapture {
    fn is_supported(&self) -> bool {
        self.permission != Permission::Unsupported
    }

    fn request(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        match self.permission {
            Permission::Unsupported => return Err(CaptureError::Unsupported),
            Permission::Denied => return Err(CaptureError::Denied),
            Permission::Granted => {}
        }
        let video = SyntheticTrack::video(self.dimensions);
        if let Ok(mut last) = self.last_video.lock() {
            *last = Some(video.clone());
        }
        let mut tracks: Vec<Arc<dyn MediaTrack>> = vec![video];
        if self.audio && constraints.audio {
            tracks.push(SyntheticTrack::audio());
        }
        Ok(MediaStream::new(tracks))
    }
}

/// Surface that records draws. Frame counts are shared across every surface
/// made by one factory.
pub struct SyntheticSurface {
    size: Dimensions,
    frames: Arc<AtomicU64>,
}

impl FrameSurface for SyntheticSurface {
    fn resize(&mut self, size: Dimensions) {
        self.size = size;
    }

    fn draw(&mut self, _source: &dyn MediaTrack) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn capture(&self, _frame_rate: u32) -> Arc<dyn MediaTrack> {
        SyntheticTrack::video(self.size)
    }
}

#[derive(Default, Clone)]
pub struct SyntheticSurfaceFactory {
    frames: Arc<AtomicU64>,
}

impl SyntheticSurfaceFactory {
    pub fn frames_drawn(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl SurfaceFactory for SyntheticSurfaceFactory {
    fn create(&self) -> Box<dyn FrameSurface> {
        Box::new(SyntheticSurface {
            size: Dimensions::new(0, 0),
            frames: self.frames.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_flag_propagates() {
        let track = SyntheticTrack::video(Dimensions::new(640, 480));
        let rx = track.ended();
        assert!(track.is_live());
        assert_eq!(track.content_hint(), ContentHint::None);
        track.stop();
        assert!(!track.is_live());
        assert!(*rx.borrow());
        // Stopping twice is harmless.
        track.stop();
    }

    #[test]
    fn audio_only_when_requested() {
        let capture = SyntheticCapture::new(Dimensions::new(640, 480)).with_audio();
        let with = capture.request(&CaptureConstraints::default()).unwrap();
        assert_eq!(with.tracks().len(), 2);
        let no_audio = CaptureConstraints {
            audio: false,
            ..CaptureConstraints::default()
        };
        assert_eq!(capture.request(&no_audio).unwrap().tracks().len(), 1);
    }
}
