use std::path::Path;

use anyhow::Result;
use image::RgbImage;
use tempfile::tempdir;

use guava_scan::config::AppConfig;
use guava_scan::detect::{CallCounter, ModelBackend};
use guava_scan::{
    BackendKind, BoundingBox, CameraConfig, CameraSource, CredentialStore, DetectError, Detector,
    DetectorOptions, Frame, HistoryKind, ImageSource, LabelMap, Phase, RawBox, RunFlag,
    ScriptedBackend, Session, Upload, VideoConfig, VideoSource,
};

fn guava_backend() -> ScriptedBackend {
    ScriptedBackend::new(
        LabelMap::new(["Phytophthora", "Scab"]),
        vec![
            RawBox::new(1, 0.81, BoundingBox::new(20.0, 20.0, 120.0, 100.0)),
            RawBox::new(0, 0.30, BoundingBox::new(140.0, 60.0, 200.0, 150.0)),
        ],
    )
}

fn session_with(backend: ScriptedBackend) -> (Session, CallCounter) {
    let calls = backend.call_counter();
    let detector = Detector::from_backend(Box::new(backend));
    let session = Session::start(detector, &AppConfig::default()).expect("session");
    (session, calls)
}

fn write_png(path: &Path) -> Result<()> {
    RgbImage::from_pixel(240, 180, image::Rgb([90, 140, 60])).save(path)?;
    Ok(())
}

fn image_a(dir: &Path) -> Result<ImageSource> {
    let path = dir.join("image_a.png");
    write_png(&path)?;
    Ok(ImageSource::from_upload(Upload::from_path(&path)?)?)
}

fn still_camera() -> CameraSource {
    CameraSource::still(CameraConfig {
        device: "stub://orchard".to_string(),
        width: 64,
        height: 48,
        target_fps: 10,
    })
    .expect("stub camera")
}

#[test]
fn threshold_selects_which_labels_appear() -> Result<()> {
    let dir = tempdir()?;
    let (mut session, _) = session_with(guava_backend());

    session.set_threshold(0.25)?;
    session.prepare_image(image_a(dir.path())?)?;
    let result = session.run_detection()?;
    assert_eq!(result.labels(), vec!["Scab", "Phytophthora"]);
    assert_ne!(result.annotated_frame(), result.raw_frame());

    session.set_threshold(0.5)?;
    session.prepare_image(image_a(dir.path())?)?;
    let result = session.run_detection()?;
    assert_eq!(result.labels(), vec!["Scab"]);
    assert!(result.detections().iter().all(|d| d.confidence() >= 0.5));

    assert_eq!(session.history().len(), 2);
    Ok(())
}

#[test]
fn threshold_holds_when_backend_ignores_it() -> Result<()> {
    let (mut session, _) = session_with(guava_backend().ignoring_threshold());
    session.set_threshold(0.5)?;
    let mut video = VideoSource::open(VideoConfig::new("stub://clip?frames=3"))?;
    let mut seen = Vec::new();
    session.stream(&mut video, |result| {
        seen.extend(result.detections().iter().map(|d| d.confidence()));
    })?;
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|&c| c >= 0.5));
    Ok(())
}

#[test]
fn history_records_only_images_and_stills_newest_first() -> Result<()> {
    let dir = tempdir()?;
    let (mut session, _) = session_with(guava_backend());

    for _ in 0..3 {
        session.prepare_image(image_a(dir.path())?)?;
        session.run_detection()?;
    }
    session.capture_still(still_camera())?;
    let mut video = VideoSource::open(VideoConfig::new("stub://clip?frames=10"))?;
    session.stream(&mut video, |_| {})?;

    let history = session.history();
    assert_eq!(history.len(), 4);
    let first: Vec<(u64, HistoryKind)> = history
        .list_recent()
        .iter()
        .map(|e| (e.sequence(), e.kind()))
        .collect();
    let second: Vec<(u64, HistoryKind)> = history
        .list_recent()
        .iter()
        .map(|e| (e.sequence(), e.kind()))
        .collect();
    assert_eq!(first, second);
    assert_eq!(first[0], (4, HistoryKind::Camera));
    assert_eq!(first[3], (1, HistoryKind::Image));
    for entry in history.list_recent() {
        assert_eq!(entry.detections().len(), 2);
    }

    session.logout();
    assert!(session.history().is_empty());
    Ok(())
}

#[test]
fn streaming_fifty_frames_leaves_history_unchanged() -> Result<()> {
    let dir = tempdir()?;
    let (mut session, calls) = session_with(guava_backend());
    session.prepare_image(image_a(dir.path())?)?;
    session.run_detection()?;

    let mut video = VideoSource::open(VideoConfig::new("stub://video_1?frames=50"))?;
    let mut frames = 0;
    let summary = session.stream(&mut video, |_| frames += 1)?;

    assert_eq!(frames, 50);
    assert_eq!(summary.frames, 50);
    assert_eq!(summary.detections, 100);
    assert_eq!(summary.per_label["Scab"], 50);
    assert_eq!(calls.get(), 51);
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.phase(), Phase::Idle);
    Ok(())
}

#[test]
fn missing_default_image_never_reaches_detection() -> Result<()> {
    let (mut session, calls) = session_with(guava_backend());
    let source = ImageSource::new(None, Some(Path::new("/nonexistent/images/jambu1.jpg")))?;
    assert!(!source.has_frame());

    let err = session.prepare_image(source).unwrap_err();
    assert_eq!(err, DetectError::NoFrameAvailable);
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(session.run_detection().unwrap_err(), DetectError::NoFrameAvailable);
    assert_eq!(calls.get(), 0);
    assert!(session.history().is_empty());
    Ok(())
}

#[test]
fn missing_model_fails_every_detection_without_inference() -> Result<()> {
    let dir = tempdir()?;
    let model = dir.path().join("weights/best.onnx");
    let err = Detector::load(&model, BackendKind::Scripted, &DetectorOptions::default()).err();
    assert!(matches!(err, Some(DetectError::ModelUnavailable(_))));

    let detector = Detector::open(&model, BackendKind::Scripted, &DetectorOptions::default());
    let mut session = Session::start(detector, &AppConfig::default())?;
    for _ in 0..3 {
        session.prepare_image(image_a(dir.path())?)?;
        let err = session.run_detection().unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable(_)));
        assert!(matches!(session.last_error(), Some(DetectError::ModelUnavailable(_))));
        assert_eq!(session.phase(), Phase::Idle);
    }
    assert!(session.history().is_empty());
    Ok(())
}

#[test]
fn invalid_threshold_never_invokes_the_model() -> Result<()> {
    let (mut session, calls) = session_with(guava_backend());
    for bad in [-0.01, 1.01, f32::NAN] {
        let err = session.set_threshold(bad).unwrap_err();
        assert!(matches!(err, DetectError::InvalidArgument(_)));
    }
    assert_eq!(session.threshold(), 0.25);

    let backend = guava_backend();
    let direct_calls = backend.call_counter();
    let mut detector = Detector::from_backend(Box::new(backend));
    let frame = Frame::from_rgb(4, 4, vec![0u8; 48])?;
    let err = detector
        .detect(&frame, guava_scan::SourceKind::Image, 2.0)
        .unwrap_err();
    assert!(matches!(err, DetectError::InvalidArgument(_)));
    assert_eq!(direct_calls.get(), 0);
    assert_eq!(calls.get(), 0);
    Ok(())
}

#[test]
fn camera_polling_stops_when_flag_cleared() -> Result<()> {
    let (mut session, _) = session_with(guava_backend());
    let flag = RunFlag::new();
    let mut camera = CameraSource::polling(
        CameraConfig {
            device: "stub://orchard".to_string(),
            width: 64,
            height: 48,
            target_fps: 10,
        },
        flag.clone(),
    )?;
    let mut seen = 0;
    let summary = session.stream(&mut camera, |_| {
        seen += 1;
        if seen == 5 {
            flag.stop();
        }
    })?;
    assert_eq!(summary.frames, 5);
    assert_eq!(camera.frames_captured(), 5);
    assert!(session.history().is_empty());
    Ok(())
}

#[test]
fn image_sources_cannot_be_streamed() -> Result<()> {
    let dir = tempdir()?;
    let (mut session, calls) = session_with(guava_backend());
    let mut source = image_a(dir.path())?;
    let err = session.stream(&mut source, |_| {}).unwrap_err();
    assert!(matches!(err, DetectError::InvalidArgument(_)));
    assert_eq!(calls.get(), 0);
    Ok(())
}

struct BrokenModel {
    labels: LabelMap,
}

impl ModelBackend for BrokenModel {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn class_names(&self) -> &LabelMap {
        &self.labels
    }

    fn predict(&mut self, _frame: &Frame, _confidence: f32) -> Result<Vec<RawBox>> {
        Err(anyhow::anyhow!("tensor shape mismatch"))
    }
}

#[test]
fn inference_failure_returns_to_idle_without_history() -> Result<()> {
    let dir = tempdir()?;
    let detector = Detector::from_backend(Box::new(BrokenModel {
        labels: LabelMap::default(),
    }));
    let mut session = Session::start(detector, &AppConfig::default())?;
    session.prepare_image(image_a(dir.path())?)?;
    let err = session.run_detection().unwrap_err();
    assert!(matches!(err, DetectError::Inference(ref msg) if msg.contains("tensor shape")));
    assert_eq!(session.phase(), Phase::Idle);
    assert!(session.history().is_empty());
    assert!(session.current().is_none());
    Ok(())
}

#[test]
fn login_gates_detection_and_bounded_history_evicts() -> Result<()> {
    let dir = tempdir()?;
    let store = CredentialStore::in_memory()?;
    store.seed_defaults()?;

    let mut session = Session::new(Detector::from_backend(Box::new(guava_backend())), 2);
    let err = session.prepare_image(image_a(dir.path())?).unwrap_err();
    assert_eq!(err, DetectError::NotAuthenticated);

    assert!(!session.login(&store, "admin", "wrong")?);
    assert!(session.login(&store, "admin", "123")?);
    assert_eq!(session.display_name(), Some("Admin"));

    for _ in 0..3 {
        session.capture_still(still_camera())?;
    }
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history().evicted(), 1);
    let sequences: Vec<u64> = session
        .history()
        .list_recent()
        .iter()
        .map(|e| e.sequence())
        .collect();
    assert_eq!(sequences, vec![3, 2]);
    Ok(())
}
