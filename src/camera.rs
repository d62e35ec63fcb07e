//! Logical camera configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ingest::SourceId;

/// Supervisor-assigned logical camera identifier.
pub type CameraId = u64;

/// A configured view onto a physical source.
///
/// Changing any field of a running camera replaces its worker; configs are never
/// mutated in place under a live worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub source: SourceId,
    pub model_name: String,
    /// Labels to keep. Empty keeps every detection.
    #[serde(default)]
    pub target_classes: BTreeSet<String>,
    #[serde(default)]
    pub face_detection_enabled: bool,
}

impl CameraConfig {
    pub fn new(source: SourceId, model_name: impl Into<String>) -> Self {
        Self {
            source,
            model_name: model_name.into(),
            target_classes: BTreeSet::new(),
            face_detection_enabled: false,
        }
    }

    pub fn with_target_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_face_detection(mut self, enabled: bool) -> Self {
        self.face_detection_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_without_face_flag_defaults_to_disabled() {
        let json = r#"{"source": 0, "model_name": "yolov8n.pt", "target_classes": ["person"]}"#;
        let cfg: CameraConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.source, SourceId::Device(0));
        assert!(!cfg.face_detection_enabled);
        assert!(cfg.target_classes.contains("person"));
    }

    #[test]
    fn uri_sources_serialize_as_strings() {
        let cfg = CameraConfig::new(SourceId::Uri("rtsp://cam/1".into()), "stub")
            .with_face_detection(true);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["source"], "rtsp://cam/1");
        assert_eq!(json["face_detection_enabled"], true);
        assert_eq!(json["target_classes"], serde_json::json!([]));
    }
}
