//! Frame types shared by every pipeline stage.
//!
//! - `Frame`: owned, contiguous pixel buffer. Annotated output is always a `Frame`,
//!   never a borrow into a shared channel.
//! - `FrameShape` / `ElementType`: what a reader needs to rebuild a frame from raw bytes.
//! - `FrameDescriptor`: notification payload published alongside each frame write.

use anyhow::{anyhow, Result};

/// Default shared buffer size: one 1440p RGB frame.
pub const MAX_FRAME_BYTES: usize = 2560 * 1440 * 3;

/// Pixel element type of a frame buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ElementType {
    #[default]
    U8,
}

impl ElementType {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
        }
    }
}

/// Frame geometry in (height, width, channels) order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameShape {
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    pub fn rgb(width: u32, height: u32) -> Self {
        Self::new(height, width, 3)
    }

    /// Byte length of a frame with this shape, `None` on overflow.
    pub fn byte_len(&self, element: ElementType) -> Option<usize> {
        (self.height as usize)
            .checked_mul(self.width as usize)?
            .checked_mul(self.channels as usize)?
            .checked_mul(element.size_bytes())
    }
}

/// Metadata describing the frame currently held by a shared buffer.
///
/// `token` is the buffer generation the descriptor was issued for. A reader must
/// present it back to the channel; once a newer frame has been written the token no
/// longer matches and the descriptor is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub shape: FrameShape,
    pub element: ElementType,
    pub token: u64,
}

impl FrameDescriptor {
    pub fn byte_len(&self) -> usize {
        self.shape.byte_len(self.element).unwrap_or(usize::MAX)
    }
}

/// Owned frame with a contiguous row-major pixel layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    shape: FrameShape,
    element: ElementType,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap `data`, validating that its length matches the shape.
    pub fn new(shape: FrameShape, element: ElementType, data: Vec<u8>) -> Result<Self> {
        let expected = shape
            .byte_len(element)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            shape,
            element,
            data,
        })
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(FrameShape::rgb(width, height), ElementType::U8, data)
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn channels(&self) -> u32 {
        self.shape.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
