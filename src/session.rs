//! The detection session: authentication, threshold, history and the frame pipeline.
//!
//! Phases move `Idle → Ready → Detecting → Rendered` for image uploads and
//! camera stills, and `AwaitingNextFrame → Detecting → Rendered → ...` for
//! streams. Any failure returns the session to `Idle`, keeps the error for
//! display and leaves history untouched.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::auth::CredentialStore;
use crate::config::AppConfig;
use crate::detect::Detector;
use crate::error::{validate_threshold, DetectError};
use crate::frame::{Frame, FrameResult, SourceKind};
use crate::history::{HistoryEntry, HistoryKind, HistoryStore};
use crate::ingest::{CameraSource, FrameSource, ImageSource};

pub const DEFAULT_THRESHOLD: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A frame is prepared and waits for an explicit detection trigger.
    Ready,
    Detecting,
    Rendered,
    /// Between frames of a stream.
    AwaitingNextFrame,
}

/// Totals of one `stream` run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamSummary {
    pub frames: u64,
    pub detections: u64,
    /// Detections per label.
    pub per_label: BTreeMap<String, u64>,
}

pub struct Session {
    detector: Detector,
    history: HistoryStore,
    threshold: f32,
    display_name: Option<String>,
    /// Identity restored on logout when login is disabled.
    guest: Option<String>,
    phase: Phase,
    pending: Option<Frame>,
    current: Option<FrameResult>,
    last_error: Option<DetectError>,
}

impl Session {
    /// Unauthenticated session with an empty history of `history_capacity` entries.
    pub fn new(detector: Detector, history_capacity: usize) -> Self {
        Self {
            detector,
            history: HistoryStore::new(history_capacity),
            threshold: DEFAULT_THRESHOLD,
            display_name: None,
            guest: None,
            phase: Phase::Idle,
            pending: None,
            current: None,
            last_error: None,
        }
    }

    /// Session configured from `config`. Without `login_required` it starts
    /// authenticated as the configured guest.
    pub fn start(detector: Detector, config: &AppConfig) -> Result<Self, DetectError> {
        let mut session = Self::new(detector, config.history_capacity);
        session.threshold = validate_threshold(config.confidence)?;
        if !config.login_required {
            log::info!("login disabled; session authenticated as {}", config.guest_name);
            session.display_name = Some(config.guest_name.clone());
            session.guest = Some(config.guest_name.clone());
        }
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Check credentials; on success the session is authenticated as the user's display name.
    pub fn login(
        &mut self,
        store: &CredentialStore,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        match store.verify(username, password)? {
            Some(display_name) => {
                log::info!("login: {} ({})", username, display_name);
                self.display_name = Some(display_name);
                Ok(true)
            }
            None => {
                log::warn!("login rejected for {}", username);
                Ok(false)
            }
        }
    }

    /// Drop authentication and every per-session artefact, history included.
    ///
    /// With login disabled the session falls back to the guest identity, so
    /// the next operation starts from a fresh, still usable session.
    pub fn logout(&mut self) {
        if let Some(name) = self.display_name.take() {
            log::info!("logout: {}", name);
        }
        self.history.clear();
        self.pending = None;
        self.current = None;
        self.last_error = None;
        self.phase = Phase::Idle;
        if let Some(guest) = &self.guest {
            log::info!("login disabled; session authenticated as {}", guest);
            self.display_name = Some(guest.clone());
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.display_name.is_some()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    // ------------------------------------------------------------------
    // Settings and state
    // ------------------------------------------------------------------

    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), DetectError> {
        match validate_threshold(threshold) {
            Ok(threshold) => {
                self.threshold = threshold;
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Most recent detection output.
    pub fn current(&self) -> Option<&FrameResult> {
        self.current.as_ref()
    }

    /// Frame waiting in `Ready`.
    pub fn pending_frame(&self) -> Option<&Frame> {
        self.pending.as_ref()
    }

    /// Error of the last failed operation, for display.
    pub fn last_error(&self) -> Option<&DetectError> {
        self.last_error.as_ref()
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    /// Take the frame from an image source and wait for `run_detection`.
    pub fn prepare_image(&mut self, mut source: ImageSource) -> Result<&Frame, DetectError> {
        self.begin()?;
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.fail(DetectError::NoFrameAvailable)),
            Err(err) => return Err(self.fail(err)),
        };
        log::debug!("session: {:?} -> Ready ({}x{})", self.phase, frame.width(), frame.height());
        self.phase = Phase::Ready;
        let pending: &Frame = self.pending.insert(frame);
        Ok(pending)
    }

    /// Detect on the prepared frame and record the result in history.
    pub fn run_detection(&mut self) -> Result<&FrameResult, DetectError> {
        self.begin()?;
        let frame = match (self.phase, self.pending.take()) {
            (Phase::Ready, Some(frame)) => frame,
            _ => return Err(self.fail(DetectError::NoFrameAvailable)),
        };
        self.detect_frame(&frame, SourceKind::Image, Some(HistoryKind::Image))
    }

    /// Snapshot a camera frame, detect and record it in history.
    pub fn capture_still(&mut self, mut source: CameraSource) -> Result<&FrameResult, DetectError> {
        self.begin()?;
        if !source.is_still() {
            return Err(self.fail(DetectError::invalid(
                "capture_still needs a still camera source",
            )));
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.fail(DetectError::NoFrameAvailable)),
            Err(err) => return Err(self.fail(err)),
        };
        self.detect_frame(&frame, SourceKind::Camera, Some(HistoryKind::Camera))
    }

    /// Detect every frame of a video or polling camera source until it ends.
    ///
    /// The threshold is captured once at the start. Results are handed to
    /// `on_frame` and never recorded in history.
    pub fn stream<S, F>(
        &mut self,
        source: &mut S,
        mut on_frame: F,
    ) -> Result<StreamSummary, DetectError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&FrameResult),
    {
        self.begin()?;
        if source.kind() == SourceKind::Image || source.retains_history() {
            return Err(self.fail(DetectError::invalid(format!(
                "{} sources cannot be streamed",
                if source.kind() == SourceKind::Image { "image" } else { "still camera" }
            ))));
        }

        let threshold = self.threshold;
        let kind = source.kind();
        let mut summary = StreamSummary::default();
        self.phase = Phase::AwaitingNextFrame;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => return Err(self.fail(err)),
            };
            self.phase = Phase::Detecting;
            let result = match self.detector.detect(&frame, kind, threshold) {
                Ok(result) => result,
                Err(err) => return Err(self.fail(err)),
            };
            self.phase = Phase::Rendered;

            summary.frames += 1;
            summary.detections += result.detections().len() as u64;
            for detection in result.detections() {
                *summary.per_label.entry(detection.label().to_string()).or_default() += 1;
            }
            on_frame(&result);
            self.current = Some(result);
            self.phase = Phase::AwaitingNextFrame;
        }

        log::info!(
            "{} stream ended: {} frames, {} detections",
            kind,
            summary.frames,
            summary.detections
        );
        self.phase = Phase::Idle;
        Ok(summary)
    }

    fn detect_frame(
        &mut self,
        frame: &Frame,
        kind: SourceKind,
        record: Option<HistoryKind>,
    ) -> Result<&FrameResult, DetectError> {
        self.phase = Phase::Detecting;
        let result = match self.detector.detect(frame, kind, self.threshold) {
            Ok(result) => result,
            Err(err) => return Err(self.fail(err)),
        };
        if let Some(history_kind) = record {
            let sequence = self.history.append(HistoryEntry::capture(history_kind, &result));
            log::debug!(
                "history #{}: {} detections from {}",
                sequence,
                result.detections().len(),
                kind
            );
        }
        self.phase = Phase::Rendered;
        let current: &FrameResult = self.current.insert(result);
        Ok(current)
    }

    /// Start of every pipeline operation: forget the previous error and require a login.
    fn begin(&mut self) -> Result<(), DetectError> {
        self.last_error = None;
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(self.fail(DetectError::NotAuthenticated))
        }
    }

    fn fail(&mut self, err: DetectError) -> DetectError {
        log::debug!("session: {:?} -> Idle ({})", self.phase, err);
        self.phase = Phase::Idle;
        self.pending = None;
        self.last_error = Some(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawBox, ScriptedBackend};
    use crate::frame::BoundingBox;
    use crate::labels::LabelMap;

    fn session() -> Session {
        let backend = ScriptedBackend::new(
            LabelMap::new(["Scab"]),
            vec![RawBox::new(0, 0.9, BoundingBox::new(1.0, 1.0, 5.0, 5.0))],
        );
        Session::start(Detector::from_backend(Box::new(backend)), &AppConfig::default()).unwrap()
    }

    fn image() -> ImageSource {
        ImageSource::from_frame(Frame::from_rgb(8, 8, vec![0u8; 192]).unwrap())
    }

    #[test]
    fn guest_session_runs_image_detection() {
        let mut session = session();
        assert_eq!(session.display_name(), Some("Admin"));
        session.prepare_image(image()).unwrap();
        assert_eq!(session.phase(), Phase::Ready);
        let labels = session.run_detection().unwrap().labels().len();
        assert_eq!(labels, 1);
        assert_eq!(session.phase(), Phase::Rendered);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn run_without_prepared_frame_fails() {
        let mut session = session();
        let err = session.run_detection().unwrap_err();
        assert_eq!(err, DetectError::NoFrameAvailable);
        assert_eq!(session.last_error(), Some(&DetectError::NoFrameAvailable));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn logged_out_session_rejects_detection() {
        let store = CredentialStore::in_memory().unwrap();
        store.seed_defaults().unwrap();
        let config = AppConfig {
            login_required: true,
            ..AppConfig::default()
        };
        let mut session = Session::start(session().detector, &config).unwrap();
        assert!(!session.is_authenticated());
        assert!(session.login(&store, "user1", "pass1").unwrap());
        session.prepare_image(image()).unwrap();
        session.run_detection().unwrap();

        session.logout();
        assert!(session.history().is_empty());
        assert!(!session.is_authenticated());
        let err = session.prepare_image(image()).unwrap_err();
        assert_eq!(err, DetectError::NotAuthenticated);
    }

    #[test]
    fn guest_logout_clears_history_and_stays_usable() {
        let mut session = session();
        session.prepare_image(image()).unwrap();
        session.run_detection().unwrap();
        assert_eq!(session.history().len(), 1);

        session.logout();
        assert!(session.history().is_empty());
        assert!(session.current().is_none());
        assert_eq!(session.display_name(), Some("Admin"));
        session.prepare_image(image()).unwrap();
        assert_eq!(session.phase(), Phase::Ready);
        assert!(session.history().is_empty());
    }

    #[test]
    fn bad_threshold_keeps_previous_value() {
        let mut session = session();
        assert!(session.set_threshold(1.2).is_err());
        assert_eq!(session.threshold(), 0.25);
        session.set_threshold(0.5).unwrap();
        assert_eq!(session.threshold(), 0.5);
    }
}
