//! Class labels, human-readable descriptions and the label legend.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::annotate::palette_color;

/// Label returned for class ids the model does not name.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Ordered class names, indexed by model class id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Placeholder names (`class_0`, `class_1`, ...) for models without metadata.
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("class_{}", i)))
    }

    pub fn get(&self, class_id: usize) -> &str {
        self.names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }
}

/// Label → explanation lookup, consumed read-only.
#[derive(Clone, Debug, Default)]
pub struct LabelDescriptions {
    entries: HashMap<String, String>,
}

impl LabelDescriptions {
    pub fn from_map(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Load a JSON object of `{"label": "description"}`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read label descriptions {}: {}", path.display(), e))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid label descriptions {}: {}", path.display(), e))?;
        Ok(Self { entries })
    }

    /// Like `load`, but a missing or broken file yields an empty lookup.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(descriptions) => descriptions,
            Err(err) => {
                log::warn!("label descriptions unavailable: {}", err);
                Self::default()
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LegendEntry {
    pub class_id: usize,
    pub label: String,
    /// Box colour used by the annotator, `#rrggbb`.
    pub color: String,
    pub description: Option<String>,
}

/// Build the legend shown next to annotated frames.
pub fn legend(labels: &LabelMap, descriptions: &LabelDescriptions) -> Vec<LegendEntry> {
    labels
        .iter()
        .map(|(class_id, label)| {
            let [r, g, b] = palette_color(class_id).0;
            LegendEntry {
                class_id,
                label: label.to_string(),
                color: format!("#{:02x}{:02x}{:02x}", r, g, b),
                description: descriptions.get(label).map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unknown_class_falls_back() {
        let labels = LabelMap::new(["Phytophthora", "Scab"]);
        assert_eq!(labels.get(1), "Scab");
        assert_eq!(labels.get(7), UNKNOWN_LABEL);
    }

    #[test]
    fn descriptions_load_from_json() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"Scab": "Corky lesions on the fruit skin."}}"#)?;
        let descriptions = LabelDescriptions::load(file.path())?;
        assert_eq!(descriptions.get("Scab"), Some("Corky lesions on the fruit skin."));
        assert_eq!(descriptions.get("Healthy"), None);
        Ok(())
    }

    #[test]
    fn missing_descriptions_are_empty() {
        let descriptions = LabelDescriptions::load_or_empty(Path::new("/nonexistent/labels.json"));
        assert!(descriptions.is_empty());
    }

    #[test]
    fn legend_pairs_labels_with_colors_and_descriptions() {
        let labels = LabelMap::new(["Phytophthora", "Scab"]);
        let mut map = HashMap::new();
        map.insert("Scab".to_string(), "Corky lesions.".to_string());
        let entries = legend(&labels, &LabelDescriptions::from_map(map));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].label, "Scab");
        assert_eq!(entries[1].description.as_deref(), Some("Corky lesions."));
        assert!(entries[0].color.starts_with('#'));
        assert_ne!(entries[0].color, entries[1].color);
    }
}
