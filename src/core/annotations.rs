//! Per-frame bounding-box records for one stream.
//!
//! Record files are comma-separated, one box per line:
//! `frame, id, left, top, width, height[, ...]`. Trailing fields (confidence,
//! world coordinates) are ignored. Lines that do not parse are skipped.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Minimum number of fields a record line must carry.
const MIN_RECORD_FIELDS: usize = 6;

/// One annotated object on one frame, in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub object_id: i64,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(object_id: i64, left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { object_id, left, top, width, height }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Which of a stream's two annotation stores is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationSource {
    #[default]
    GroundTruth,
    Detector,
}

impl std::str::FromStr for AnnotationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gt" | "ground-truth" | "groundtruth" => Ok(Self::GroundTruth),
            "det" | "detector" => Ok(Self::Detector),
            other => Err(format!("unknown annotation source '{other}'")),
        }
    }
}

/// Immutable index of boxes keyed by local frame.
///
/// Boxes within a frame keep file order, which is also the draw order.
/// Object ids are not required to be unique within a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationStore {
    frames: HashMap<u64, Vec<BoundingBox>>,
}

impl AnnotationStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from record lines. Malformed lines are skipped.
    pub fn from_records<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut frames: HashMap<u64, Vec<BoundingBox>> = HashMap::new();
        for (line_no, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            match parse_record(line) {
                Some((frame, bbox)) => frames.entry(frame).or_default().push(bbox),
                None => log::debug!("Skipping malformed annotation record at line {}", line_no + 1),
            }
        }
        Self { frames }
    }

    /// Load a record file. A missing file yields an empty store; so does an
    /// unreadable one, with a warning.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            return Self::empty();
        }
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let store = Self::from_records(text.lines());
                log::debug!(
                    "Loaded {} annotated frames from {}",
                    store.frame_count(),
                    path.display()
                );
                store
            }
            Err(e) => {
                log::warn!("Cannot read annotations {}: {e}", path.display());
                Self::empty()
            }
        }
    }

    /// Boxes for `frame` in insertion order; empty if none.
    pub fn lookup(&self, frame: u64) -> &[BoundingBox] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of frames that carry at least one box.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn box_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Parse one `frame,id,left,top,width,height,...` line.
fn parse_record(line: &str) -> Option<(u64, BoundingBox)> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() < MIN_RECORD_FIELDS {
        return None;
    }
    let frame = fields[0].parse::<u64>().ok()?;
    let object_id = fields[1].parse::<i64>().ok()?;
    let left = fields[2].parse::<f64>().ok()?;
    let top = fields[3].parse::<f64>().ok()?;
    let width = fields[4].parse::<f64>().ok()?;
    let height = fields[5].parse::<f64>().ok()?;
    Some((frame, BoundingBox::new(object_id, left, top, width, height)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_by_frame_in_file_order() {
        let store = AnnotationStore::from_records([
            "1,7,10,20,30,40,1,-1,-1,-1",
            "2,3,0,0,5,5,1,-1,-1,-1",
            "1,2,50,60,10,10,1,-1,-1,-1",
        ]);
        assert_eq!(store.frame_count(), 2);
        let ids: Vec<i64> = store.lookup(1).iter().map(|b| b.object_id).collect();
        assert_eq!(ids, vec![7, 2]);
        assert_eq!(store.lookup(2)[0], BoundingBox::new(3, 0.0, 0.0, 5.0, 5.0));
    }

    #[test]
    fn test_short_line_skipped() {
        let store = AnnotationStore::from_records(["4,1,10,10,20,20", "5,1,10"]);
        assert_eq!(store.frame_count(), 1);
        assert_eq!(store.lookup(4).len(), 1);
        assert!(store.lookup(5).is_empty());
    }

    #[test]
    fn test_non_numeric_and_negative_frames_skipped() {
        let store = AnnotationStore::from_records([
            "frame,id,left,top,width,height",
            "-1,1,0,0,1,1",
            "3,x,0,0,1,1",
            "3,1,0.5,1.5,2.25,4",
        ]);
        assert_eq!(store.box_count(), 1);
        assert_eq!(store.lookup(3)[0], BoundingBox::new(1, 0.5, 1.5, 2.25, 4.0));
    }

    #[test]
    fn test_duplicate_ids_kept() {
        let store = AnnotationStore::from_records(["0,9,0,0,1,1", "0,9,2,2,1,1"]);
        assert_eq!(store.lookup(0).len(), 2);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = AnnotationStore::load(Path::new("/nonexistent/camsync/gt.txt"));
        assert!(store.is_empty());
        assert!(store.lookup(0).is_empty());
    }

    #[test]
    fn test_annotation_source_from_str() {
        assert_eq!("det".parse::<AnnotationSource>(), Ok(AnnotationSource::Detector));
        assert_eq!("GT".parse::<AnnotationSource>(), Ok(AnnotationSource::GroundTruth));
        assert!("tracker".parse::<AnnotationSource>().is_err());
    }
}
