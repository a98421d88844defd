use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Review settings.
/// Stored as JSON; every field falls back to its default when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Playback tick interval in milliseconds (~10 decode cycles per second)
    #[serde(rename = "tickIntervalMs")]
    pub tick_interval_ms: u64,
    /// Fixed output raster size, shared by every stream
    #[serde(rename = "outputWidth")]
    pub output_width: u32,
    #[serde(rename = "outputHeight")]
    pub output_height: u32,
    /// Video file expected inside each stream subdirectory
    #[serde(rename = "videoFileName")]
    pub video_file_name: String,
    /// Ground-truth records, relative to the stream subdirectory
    #[serde(rename = "groundTruthPath")]
    pub ground_truth_path: String,
    /// Detector records, relative to the stream subdirectory
    #[serde(rename = "detectorPath")]
    pub detector_path: String,
    /// Per-stream offsets file at the folder root
    #[serde(rename = "offsetsFileName")]
    pub offsets_file_name: String,
    pub overlay: OverlayStyle,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            output_width: 360,
            output_height: 360,
            video_file_name: "vdo.avi".into(),
            ground_truth_path: "gt/gt.txt".into(),
            detector_path: "det/det.txt".into(),
            offsets_file_name: "offsets.txt".into(),
            overlay: OverlayStyle::default(),
        }
    }
}

impl ReviewSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// How annotation boxes are drawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// RGB
    pub color: [u8; 3],
    /// Outline thickness in source pixels
    pub thickness: u32,
    /// Glyph scale (1 = 8px)
    #[serde(rename = "labelScale")]
    pub label_scale: u32,
    /// Gap between label baseline and box top
    #[serde(rename = "labelGap")]
    pub label_gap: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
            label_scale: 1,
            label_gap: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = ReviewSettings::default();
        assert_eq!(s.tick_interval(), Duration::from_millis(100));
        assert_eq!((s.output_width, s.output_height), (360, 360));
        assert_eq!(s.video_file_name, "vdo.avi");
        assert_eq!(s.overlay.color, [0, 255, 0]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: ReviewSettings =
            serde_json::from_str(r#"{"outputWidth": 640, "overlay": {"thickness": 3}}"#).unwrap();
        assert_eq!(s.output_width, 640);
        assert_eq!(s.output_height, 360);
        assert_eq!(s.overlay.thickness, 3);
        assert_eq!(s.overlay.label_gap, 5);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = ReviewSettings::default();
        s.tick_interval_ms = 40;
        s.save(&path).unwrap();
        assert_eq!(ReviewSettings::load(&path).unwrap(), s);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let s = ReviewSettings::load_or_default(Path::new("/nonexistent/camsync.json")).unwrap();
        assert_eq!(s, ReviewSettings::default());
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ReviewSettings::load(&path), Err(SettingsError::Parse(_))));
    }
}
