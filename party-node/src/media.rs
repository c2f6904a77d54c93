//! Media adapter: screen capture, client-side downscaling through an offscreen
//! render loop, and single-call teardown of everything the capture owns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Encoder hint. `Motion` favours framerate over sharpness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentHint {
    None,
    Motion,
    Detail,
}

/// One audio or video track from the platform media stack.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    /// Current frame size; `None` for audio or if unknown.
    fn dimensions(&self) -> Option<Dimensions>;
    /// False once the track has ended, whether stopped locally or by the source.
    fn is_live(&self) -> bool;
    /// Stop the track. Stopping an ended track is a no-op.
    fn stop(&self);
    fn content_hint(&self) -> ContentHint;
    fn set_content_hint(&self, hint: ContentHint);
    /// Flips to `true` when the track ends.
    fn ended(&self) -> watch::Receiver<bool>;
}

/// Ordered set of tracks travelling together.
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.id(), t.kind())))
            .finish()
    }
}

/// What we ask the platform for. Browsers treat these as hints at best.
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub ideal: Dimensions,
    pub frame_rate: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal: Dimensions::new(3840, 2160),
            frame_rate: 60,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("display capture unsupported")]
    Unsupported,
    #[error("display capture denied")]
    Denied,
    #[error("display capture failed: {0}")]
    Failed(String),
}

/// Screen-share source.
pub trait DisplayCapture: Send + Sync {
    /// Whether the runtime can capture the screen at all (drives `can_host`).
    fn is_supported(&self) -> bool;
    fn request(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError>;
}

/// Offscreen drawing surface that can be captured as a video track.
pub trait FrameSurface: Send + 'static {
    fn resize(&mut self, size: Dimensions);
    /// Draw the source's current frame scaled to the surface size.
    fn draw(&mut self, source: &dyn MediaTrack);
    fn capture(&self, frame_rate: u32) -> Arc<dyn MediaTrack>;
}

pub trait SurfaceFactory: Send + Sync {
    fn create(&self) -> Box<dyn FrameSurface>;
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Largest outbound frame; bigger sources are downscaled.
    pub ceiling: Dimensions,
    /// Framerate of the derived stream.
    pub frame_rate: u32,
    pub constraints: CaptureConstraints,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ceiling: Dimensions::new(1280, 720),
            frame_rate: 30,
            constraints: CaptureConstraints::default(),
        }
    }
}

/// Largest aspect-preserving size that fits `ceiling`, rounded down to even
/// dimensions for the encoder. `None` when `source` already fits.
pub fn fit_within(source: Dimensions, ceiling: Dimensions) -> Option<Dimensions> {
    if source.width <= ceiling.width && source.height <= ceiling.height {
        return None;
    }
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (cw, ch) = (ceiling.width as u64, ceiling.height as u64);
    // Integer cross-multiplication avoids float rounding at exact ratios.
    let (w, h) = if cw * sh <= ch * sw {
        (cw, sh * cw / sw)
    } else {
        (sw * ch / sh, ch)
    };
    let even = |v: u64| ((v as u32) & !1).max(2);
    Some(Dimensions::new(even(w), even(h)))
}

fn frame_period(frame_rate: u32) -> Duration {
    Duration::from_secs(1) / frame_rate.max(1)
}

/// Per-frame redraw task. Checks the cancel flag and source liveness on every
/// tick so it stops within one frame of teardown.
pub struct RenderLoop {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    pub fn spawn(
        mut surface: Box<dyn FrameSurface>,
        source: Arc<dyn MediaTrack>,
        frame_rate: u32,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period(frame_rate));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frames: u64 = 0;
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) || !source.is_live() {
                    break;
                }
                surface.draw(source.as_ref());
                frames += 1;
            }
            debug!(source = source.id(), frames, "render loop stopped");
        });
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Downscaled stream plus what it was made from. `stop()` halts the redraw
/// loop, the derived tracks and the original capture in one go, so the
/// platform's "sharing your screen" indicator does not linger.
pub struct DerivedStream {
    pub stream: MediaStream,
    pub origin_track: Arc<dyn MediaTrack>,
    pub render_loop: RenderLoop,
}

impl DerivedStream {
    pub fn stop(&self) {
        self.render_loop.cancel();
        self.stream.stop_all();
        self.origin_track.stop();
    }
}

/// The host's single outbound stream.
pub enum LocalStream {
    Original(MediaStream),
    Derived(DerivedStream),
}

impl LocalStream {
    pub fn stream(&self) -> &MediaStream {
        match self {
            LocalStream::Original(s) => s,
            LocalStream::Derived(d) => &d.stream,
        }
    }

    /// Track whose end means the user stopped sharing.
    pub fn source_track(&self) -> Option<Arc<dyn MediaTrack>> {
        match self {
            LocalStream::Original(s) => s.video_track().cloned(),
            LocalStream::Derived(d) => Some(d.origin_track.clone()),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, LocalStream::Derived(_))
    }

    pub fn stop(&self) {
        match self {
            LocalStream::Original(s) => s.stop_all(),
            LocalStream::Derived(d) => d.stop(),
        }
    }
}

pub struct MediaAdapter {
    config: MediaConfig,
}

impl MediaAdapter {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Capture the screen and downscale it if needed. Must run inside a tokio runtime
    /// (the render loop is spawned onto it).
    pub fn acquire(
        &self,
        capture: &dyn DisplayCapture,
        surfaces: &dyn SurfaceFactory,
    ) -> Result<LocalStream, CaptureError> {
        if !capture.is_supported() {
            return Err(CaptureError::Unsupported);
        }
        let original = capture.request(&self.config.constraints)?;
        Ok(self.adapt(original, surfaces))
    }

    /// Derive a downscaled stream when the source exceeds the ceiling;
    /// otherwise pass it through untouched.
    pub fn adapt(&self, original: MediaStream, surfaces: &dyn SurfaceFactory) -> LocalStream {
        let Some(video) = original.video_track().cloned() else {
            return LocalStream::Original(original);
        };
        let target = video
            .dimensions()
            .and_then(|d| fit_within(d, self.config.ceiling));
        let Some(target) = target else {
            video.set_content_hint(ContentHint::Motion);
            return LocalStream::Original(original);
        };

        let mut surface = surfaces.create();
        surface.resize(target);
        let derived_video = surface.capture(self.config.frame_rate);
        derived_video.set_content_hint(ContentHint::Motion);

        let mut tracks = vec![derived_video];
        tracks.extend(original.audio_tracks().cloned());

        info!(
            source = ?video.dimensions(),
            target = %target,
            fps = self.config.frame_rate,
            "downscaling capture"
        );
        let render_loop = RenderLoop::spawn(surface, video.clone(), self.config.frame_rate);
        LocalStream::Derived(DerivedStream {
            stream: MediaStream::new(tracks),
            origin_track: video,
            render_loop,
        })
    }
}

impl Default for MediaAdapter {
    fn default() -> Self {
        Self::new(MediaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticCapture, SyntheticSurfaceFactory, SyntheticTrack};

    #[test]
    fn fit_within_preserves_aspect() {
        let ceiling = Dimensions::new(1280, 720);
        assert_eq!(
            fit_within(Dimensions::new(2560, 1440), ceiling),
            Some(Dimensions::new(1280, 720))
        );
        assert_eq!(
            fit_within(Dimensions::new(1920, 1200), ceiling),
            Some(Dimensions::new(1152, 720))
        );
        // 3440x1440 ultrawide: width-bound, height rounded down to even.
        assert_eq!(
            fit_within(Dimensions::new(3440, 1440), ceiling),
            Some(Dimensions::new(1280, 534))
        );
        // Tall portrait source exceeding only the height.
        assert_eq!(
            fit_within(Dimensions::new(1080, 1920), ceiling),
            Some(Dimensions::new(404, 720))
        );
    }

    #[test]
    fn fit_within_leaves_small_sources() {
        let ceiling = Dimensions::new(1280, 720);
        assert_eq!(fit_within(Dimensions::new(1280, 720), ceiling), None);
        assert_eq!(fit_within(Dimensions::new(800, 600), ceiling), None);
    }

    #[tokio::test]
    async fn small_capture_is_not_derived() {
        let capture = SyntheticCapture::new(Dimensions::new(1280, 720));
        let adapter = MediaAdapter::default();
        let local = adapter
            .acquire(&capture, &SyntheticSurfaceFactory::default())
            .unwrap();
        assert!(!local.is_derived());
        let video = local.stream().video_track().unwrap().clone();
        assert_eq!(video.dimensions(), Some(Dimensions::new(1280, 720)));
        assert_eq!(video.content_hint(), ContentHint::Motion);
        assert_eq!(
            capture.last_video().map(|t| t.content_hint()),
            Some(ContentHint::Motion)
        );
    }

    #[tokio::test]
    async fn large_capture_is_downscaled_and_keeps_audio() {
        let capture = SyntheticCapture::new(Dimensions::new(2560, 1440)).with_audio();
        let adapter = MediaAdapter::default();
        let surfaces = SyntheticSurfaceFactory::default();
        let local = adapter.acquire(&capture, &surfaces).unwrap();
        assert!(local.is_derived());
        let stream = local.stream();
        let video = stream.video_track().unwrap();
        assert_eq!(video.dimensions(), Some(Dimensions::new(1280, 720)));
        assert_eq!(video.content_hint(), ContentHint::Motion);
        assert_eq!(stream.audio_tracks().count(), 1);
        let origin = local.source_track().unwrap();
        assert_eq!(origin.dimensions(), Some(Dimensions::new(2560, 1440)));
        local.stop();
    }

    #[tokio::test]
    async fn stop_halts_loop_and_origin() {
        let capture = SyntheticCapture::new(Dimensions::new(3840, 2160)).with_audio();
        let surfaces = SyntheticSurfaceFactory::default();
        let local = MediaAdapter::default()
            .acquire(&capture, &surfaces)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(surfaces.frames_drawn() > 0);

        local.stop();
        let LocalStream::Derived(derived) = &local else {
            panic!("expected derived stream");
        };
        assert!(!derived.origin_track.is_live());
        assert!(derived.stream.tracks().iter().all(|t| !t.is_live()));
        for _ in 0..50 {
            if derived.render_loop.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(derived.render_loop.is_finished());
        let drawn = surfaces.frames_drawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(surfaces.frames_drawn(), drawn);
    }

    #[tokio::test]
    async fn render_loop_exits_when_source_ends() {
        let source = SyntheticTrack::video(Dimensions::new(2560, 1440));
        let surfaces = SyntheticSurfaceFactory::default();
        let lp = RenderLoop::spawn(surfaces.create(), source.clone(), 60);
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.end();
        for _ in 0..50 {
            if lp.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(lp.is_finished());
    }

    #[test]
    fn unsupported_capture_is_refused() {
        let capture = SyntheticCapture::unsupported();
        let err = MediaAdapter::default()
            .acquire(&capture, &SyntheticSurfaceFactory::default())
            .err();
        assert_eq!(err, Some(CaptureError::Unsupported));
    }

    #[test]
    fn denied_capture_is_reported() {
        let capture = SyntheticCapture::denied();
        let err = MediaAdapter::default()
            .acquire(&capture, &SyntheticSurfaceFactory::default())
            .err();
        assert_eq!(err, Some(CaptureError::Denied));
    }
}
