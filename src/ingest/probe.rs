//! Best-effort enumeration of local capture devices.

use std::path::Path;

use super::SourceId;

const MAX_PROBED_DEVICES: u32 = 10;

/// Device indices 0..10 whose video node exists (and opens, with V4L2 support).
pub fn list_available_sources() -> Vec<SourceId> {
    (0..MAX_PROBED_DEVICES)
        .filter(|index| device_responds(&format!("/dev/video{}", index)))
        .map(SourceId::Device)
        .collect()
}

#[cfg(feature = "capture-v4l2")]
fn device_responds(path: &str) -> bool {
    Path::new(path).exists() && super::v4l2::probe(path)
}

#[cfg(not(feature = "capture-v4l2"))]
fn device_responds(path: &str) -> bool {
    Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probed_sources_are_device_indices() {
        for source in list_available_sources() {
            assert!(matches!(source, SourceId::Device(index) if index < MAX_PROBED_DEVICES));
        }
    }
}
