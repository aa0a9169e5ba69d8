//! Application configuration: defaults, optional config file, environment overrides.
//!
//! The config file is named by `GUAVA_SCAN_CONFIG`; `.toml` files are parsed as
//! TOML, anything else as JSON. Relative paths resolve against `assets_dir`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::detect::{BackendKind, DetectorOptions};
use crate::error::validate_threshold;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::ingest::{CameraConfig, VideoConfig};
use crate::labels::LabelMap;

pub const CONFIG_ENV: &str = "GUAVA_SCAN_CONFIG";

const DEFAULT_IMAGE: &str = "images/jambu1.jpg";
const DEFAULT_DETECT_IMAGE: &str = "images/detectedimage1.png";
const DEFAULT_LABEL_DESCRIPTIONS: &str = "labels.json";
const DEFAULT_DB_PATH: &str = "users.db";
const DEFAULT_GUEST_NAME: &str = "Admin";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_MODEL_PATH: &str = "weights/best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 320;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_TITLE: &str = "Deteksi Penyakit Jambu Biji menggunakan YOLOv11";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    assets_dir: Option<PathBuf>,
    default_image: Option<PathBuf>,
    default_detect_image: Option<PathBuf>,
    videos: Option<BTreeMap<String, String>>,
    label_descriptions: Option<PathBuf>,
    db_path: Option<String>,
    login_required: Option<bool>,
    guest_name: Option<String>,
    confidence: Option<f32>,
    history_capacity: Option<usize>,
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    theme: Option<ThemeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    backend: Option<BackendKind>,
    input_size: Option<u32>,
    iou: Option<f32>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ThemeConfigFile {
    title: Option<String>,
    dark_mode: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub assets_dir: PathBuf,
    pub default_image: PathBuf,
    /// Sample output shown on the home view.
    pub default_detect_image: PathBuf,
    /// Preset name → clip location.
    pub videos: BTreeMap<String, String>,
    pub label_descriptions: PathBuf,
    pub db_path: String,
    pub login_required: bool,
    /// Identity used when login is not required.
    pub guest_name: String,
    pub confidence: f32,
    pub history_capacity: usize,
    pub model: ModelSettings,
    pub camera: CameraConfig,
    pub theme: ThemeSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub backend: BackendKind,
    pub input_size: u32,
    pub iou_threshold: f32,
    /// Overrides the model's own class names when non-empty.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ThemeSettings {
    pub title: String,
    pub dark_mode: bool,
}

impl ThemeSettings {
    /// Title banner for terminal output. Styled only when `styled` is set.
    pub fn banner(&self, styled: bool) -> String {
        if !styled {
            return self.title.clone();
        }
        // Bright white on black, or black on light grey.
        let sgr = if self.dark_mode { "1;97;40" } else { "1;30;47" };
        format!("\x1b[{}m {} \x1b[0m", sgr, self.title)
    }

    pub fn mode_name(&self) -> &'static str {
        if self.dark_mode {
            "dark"
        } else {
            "light"
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// Load from `GUAVA_SCAN_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit config file (if any) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        cfg.resolve_paths();
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let theme = file.theme.unwrap_or_default();
        let camera_defaults = CameraConfig::default();

        Self {
            assets_dir: file.assets_dir.unwrap_or_else(|| PathBuf::from(".")),
            default_image: file
                .default_image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE)),
            default_detect_image: file
                .default_detect_image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECT_IMAGE)),
            videos: file.videos.unwrap_or_else(default_videos),
            label_descriptions: file
                .label_descriptions
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABEL_DESCRIPTIONS)),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            login_required: file.login_required.unwrap_or(false),
            guest_name: file
                .guest_name
                .unwrap_or_else(|| DEFAULT_GUEST_NAME.to_string()),
            confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            history_capacity: file.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
            model: ModelSettings {
                path: model.path.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                backend: model.backend.unwrap_or(BackendKind::Tract),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                iou_threshold: model.iou.unwrap_or(DEFAULT_IOU),
                labels: model.labels.unwrap_or_default(),
            },
            camera: CameraConfig {
                device: camera.device.unwrap_or(camera_defaults.device),
                width: camera.width.unwrap_or(camera_defaults.width),
                height: camera.height.unwrap_or(camera_defaults.height),
                target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
            },
            theme: ThemeSettings {
                title: theme.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                dark_mode: theme.dark_mode.unwrap_or(false),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("GUAVA_SCAN_MODEL") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = env_value("GUAVA_SCAN_BACKEND") {
            self.model.backend = backend
                .parse()
                .context("GUAVA_SCAN_BACKEND must be 'tract' or 'scripted'")?;
        }
        if let Some(confidence) = env_value("GUAVA_SCAN_CONFIDENCE") {
            self.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("GUAVA_SCAN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(db_path) = env_value("GUAVA_SCAN_DB") {
            self.db_path = db_path;
        }
        if let Some(capacity) = env_value("GUAVA_SCAN_HISTORY_CAPACITY") {
            self.history_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("GUAVA_SCAN_HISTORY_CAPACITY must be a positive integer"))?;
        }
        if let Some(login) = env_value("GUAVA_SCAN_LOGIN") {
            self.login_required = parse_bool(&login)
                .ok_or_else(|| anyhow!("GUAVA_SCAN_LOGIN must be 1/0/true/false"))?;
        }
        if let Some(device) = env_value("GUAVA_SCAN_CAMERA") {
            self.camera.device = device;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_threshold(self.confidence).context("invalid confidence")?;
        if self.history_capacity == 0 {
            return Err(anyhow!("history_capacity must be greater than zero"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model.input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.model.iou_threshold) {
            return Err(anyhow!(
                "model.iou must be within [0, 1], got {}",
                self.model.iou_threshold
            ));
        }
        if self.guest_name.trim().is_empty() {
            return Err(anyhow!("guest_name must not be empty"));
        }
        Ok(())
    }

    fn resolve_paths(&mut self) {
        let base = self.assets_dir.clone();
        for path in [
            &mut self.default_image,
            &mut self.default_detect_image,
            &mut self.label_descriptions,
            &mut self.model.path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        for location in self.videos.values_mut() {
            if !location.contains("://") && Path::new(location.as_str()).is_relative() {
                *location = base.join(location.as_str()).display().to_string();
            }
        }
        if !self.db_path.starts_with("file:")
            && self.db_path != ":memory:"
            && Path::new(&self.db_path).is_relative()
        {
            self.db_path = base.join(&self.db_path).display().to_string();
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.model.input_size,
            iou_threshold: self.model.iou_threshold,
            class_names: (!self.model.labels.is_empty())
                .then(|| LabelMap::new(self.model.labels.iter().cloned())),
        }
    }

    /// Resolve a preset name (`video_1`, ...) or pass a location through.
    pub fn video(&self, name_or_path: &str) -> VideoConfig {
        match self.videos.get(name_or_path) {
            Some(path) => VideoConfig::named(name_or_path, path.clone()),
            None => VideoConfig::new(name_or_path),
        }
    }
}

fn default_videos() -> BTreeMap<String, String> {
    (1..=3)
        .map(|i| (format!("video_{}", i), format!("videos/video_{}.mp4", i)))
        .collect()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
