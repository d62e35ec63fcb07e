use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const DEFAULT_PIXEL_THRESHOLD: u8 = 32;
const DEFAULT_MIN_CHANGED_FRACTION: f32 = 0.002;

/// Frame-difference backend.
///
/// Compares each frame with the previous one and reports the bounding region of
/// changed pixels as a single `motion` detection.
pub struct MotionBackend {
    previous: Option<Frame>,
    pixel_threshold: u8,
    min_changed_fraction: f32,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            previous: None,
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            min_changed_fraction: DEFAULT_MIN_CHANGED_FRACTION,
        }
    }

    pub fn with_thresholds(pixel_threshold: u8, min_changed_fraction: f32) -> Self {
        Self {
            pixel_threshold,
            min_changed_fraction,
            ..Self::new()
        }
    }

    fn changed_region(&self, previous: &Frame, current: &Frame) -> Option<Detection> {
        let width = current.width() as usize;
        let channels = current.channels().max(1) as usize;
        let mut changed = 0usize;
        let mut bounds: Option<(u32, u32, u32, u32)> = None;

        let pixels = current
            .as_bytes()
            .chunks_exact(channels)
            .zip(previous.as_bytes().chunks_exact(channels));
        for (index, (now, before)) in pixels.enumerate() {
            let moved = now
                .iter()
                .zip(before)
                .any(|(a, b)| a.abs_diff(*b) > self.pixel_threshold);
            if !moved {
                continue;
            }
            changed += 1;
            let x = (index % width) as u32;
            let y = (index / width) as u32;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x), b.max(y)),
            });
        }

        let total = (current.width() as usize * current.height() as usize).max(1);
        let fraction = changed as f32 / total as f32;
        if fraction < self.min_changed_fraction {
            return None;
        }
        let (left, top, right, bottom) = bounds?;
        Some(Detection::new(
            "motion",
            (0.5 + fraction).min(1.0),
            BoundingBox::from_pixels(
                left,
                top,
                right + 1,
                bottom + 1,
                current.width(),
                current.height(),
            ),
        ))
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDetector for MotionBackend {
    fn name(&self) -> &str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections = match &self.previous {
            Some(previous) if previous.shape() == frame.shape() => self
                .changed_region(previous, frame)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        };
        self.previous = Some(frame.clone());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_block(fill: u8, block: Option<(u32, u32)>) -> Frame {
        let (width, height) = (10u32, 10u32);
        let mut data = vec![fill; (width * height * 3) as usize];
        if let Some((bx, by)) = block {
            for y in by..by + 2 {
                for x in bx..bx + 2 {
                    let offset = ((y * width + x) * 3) as usize;
                    data[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        Frame::from_rgb(width, height, data).unwrap()
    }

    #[test]
    fn first_frame_reports_nothing() -> Result<()> {
        let mut backend = MotionBackend::new();
        assert!(backend.detect(&frame_with_block(0, None))?.is_empty());
        Ok(())
    }

    #[test]
    fn changed_block_is_boxed() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&frame_with_block(0, None))?;
        let detections = backend.detect(&frame_with_block(0, Some((4, 6))))?;
        assert_eq!(detections.len(), 1);
        let motion = &detections[0];
        assert_eq!(motion.label, "motion");
        assert_eq!(motion.bbox.to_pixels(10, 10), (4, 6, 6, 8));
        Ok(())
    }

    #[test]
    fn identical_frames_report_nothing() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&frame_with_block(10, Some((1, 1))))?;
        assert!(backend.detect(&frame_with_block(10, Some((1, 1))))?.is_empty());
        Ok(())
    }

    #[test]
    fn small_changes_stay_below_threshold() -> Result<()> {
        let mut backend = MotionBackend::with_thresholds(32, 0.002);
        backend.detect(&frame_with_block(10, None))?;
        assert!(backend.detect(&frame_with_block(20, None))?.is_empty());
        Ok(())
    }
}
