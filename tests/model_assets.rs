use std::collections::HashMap;

use anyhow::Result;
use image::RgbImage;
use tempfile::tempdir;

use guava_scan::config::AppConfig;
use guava_scan::report::{self, DetectionRow, LegendRow};
use guava_scan::{
    BackendKind, Detector, DetectorOptions, ImageSource, LabelDescriptions, Session, VideoSource,
};

const MODEL_JSON: &str = r#"{
    "labels": ["Healthy", "Phytophthora", "Scab"],
    "boxes": [
        { "class_id": 2, "confidence": 0.81, "x1": 4, "y1": 4, "x2": 30, "y2": 30 },
        { "class_id": 1, "confidence": 0.30, "x1": 10, "y1": 12, "x2": 40, "y2": 36 }
    ]
}"#;

#[test]
fn configured_assets_drive_a_full_session() -> Result<()> {
    let dir = tempdir()?;
    std::fs::create_dir_all(dir.path().join("weights"))?;
    std::fs::create_dir_all(dir.path().join("images"))?;
    std::fs::write(dir.path().join("weights/best.json"), MODEL_JSON)?;
    RgbImage::from_pixel(48, 40, image::Rgb([120, 160, 80]))
        .save(dir.path().join("images/jambu1.png"))?;

    let config_path = dir.path().join("guava.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            assets_dir = "{}"
            default_image = "images/jambu1.png"

            [model]
            path = "weights/best.json"
            backend = "scripted"
            "#,
            dir.path().display()
        ),
    )?;
    let cfg = AppConfig::load_from(Some(&config_path))?;

    let detector = Detector::load(&cfg.model.path, cfg.model.backend, &cfg.detector_options())?;
    let mut session = Session::start(detector, &cfg)?;
    session.prepare_image(ImageSource::from_default(&cfg.default_image))?;
    let result = session.run_detection()?;

    let rows = report::detection_rows(result);
    assert_eq!(
        rows,
        vec![
            DetectionRow {
                label: "Scab".into(),
                confidence: "0.81".into()
            },
            DetectionRow {
                label: "Phytophthora".into(),
                confidence: "0.30".into()
            },
        ]
    );
    Ok(())
}

#[test]
fn legend_lists_model_labels_with_descriptions() -> Result<()> {
    let dir = tempdir()?;
    let model = dir.path().join("best.json");
    std::fs::write(&model, MODEL_JSON)?;
    let detector = Detector::load(&model, BackendKind::Scripted, &DetectorOptions::default())?;

    let mut descriptions = HashMap::new();
    descriptions.insert("Scab".to_string(), "Raised corky spots on the fruit.".to_string());
    let rows: Vec<LegendRow> = detector
        .legend(&LabelDescriptions::from_map(descriptions))
        .iter()
        .map(LegendRow::from)
        .collect();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].label, "Scab");
    assert_eq!(rows[2].description, "Raised corky spots on the fruit.");
    assert_eq!(rows[0].description, "");
    assert!(report::legend_table(&rows).contains("Phytophthora"));
    Ok(())
}

#[test]
fn frame_directory_streams_through_session() -> Result<()> {
    let dir = tempdir()?;
    let model = dir.path().join("best.json");
    std::fs::write(&model, MODEL_JSON)?;
    let frames = dir.path().join("clip");
    std::fs::create_dir_all(&frames)?;
    for i in 0..4 {
        RgbImage::from_pixel(48, 40, image::Rgb([i * 10, 100, 50]))
            .save(frames.join(format!("{:03}.png", i)))?;
    }

    let detector = Detector::load(&model, BackendKind::Scripted, &DetectorOptions::default())?;
    let mut session = Session::start(detector, &AppConfig::default())?;
    session.set_threshold(0.5)?;
    let mut video = VideoSource::open(AppConfig::default().video(&frames.display().to_string()))?;
    let summary = session.stream(&mut video, |result| {
        assert_eq!(result.labels(), vec!["Scab"]);
    })?;
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.detections, 4);
    assert!(session.history().is_empty());
    Ok(())
}
