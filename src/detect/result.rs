use std::collections::BTreeSet;

/// Axis-aligned box in normalized (0..1) frame coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Build a box, clamping it into the unit square.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            w: w.clamp(0.0, 1.0 - x),
            h: h.clamp(0.0, 1.0 - y),
        }
    }

    /// Box from pixel corners of a `width` x `height` frame.
    pub fn from_pixels(left: u32, top: u32, right: u32, bottom: u32, width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        Self::new(
            left as f32 / width,
            top as f32 / height,
            right.saturating_sub(left) as f32 / width,
            bottom.saturating_sub(top) as f32 / height,
        )
    }

    /// Inclusive pixel corners (left, top, right, bottom) inside a frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let left = (self.x * width as f32).round().clamp(0.0, max_x);
        let top = (self.y * height as f32).round().clamp(0.0, max_y);
        let right = ((self.x + self.w) * width as f32).round().clamp(left, max_x);
        let bottom = ((self.y + self.h) * height as f32).round().clamp(top, max_y);
        (left as u32, top as u32, right as u32, bottom as u32)
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One labelled detection, independent of the model that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

/// Keep detections whose label is in `target_classes`; an empty set keeps all.
///
/// Overlapping matches are all kept.
pub fn filter_detections(
    detections: Vec<Detection>,
    target_classes: &BTreeSet<String>,
) -> Vec<Detection> {
    if target_classes.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|detection| target_classes.contains(&detection.label))
        .collect()
}
