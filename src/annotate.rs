//! Box and label drawing on a worker's private frame copy.

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

pub const OBJECT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Background behind label text.
pub const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

const LINE_WIDTH: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const LABEL_CHAR_WIDTH: i32 = GLYPH_WIDTH + 1;
const LABEL_HEIGHT: i32 = GLYPH_HEIGHT + 2;

/// Draw object and face boxes onto an owned frame and hand it back.
///
/// Frames that are not 3-channel RGB are returned untouched.
pub fn annotate(frame: Frame, detections: &[Detection], faces: &[BoundingBox]) -> Result<Frame> {
    if frame.channels() != 3 || (detections.is_empty() && faces.is_empty()) {
        return Ok(frame);
    }
    let width = frame.width();
    let height = frame.height();
    let mut image: RgbImage = ImageBuffer::from_raw(width, height, frame.into_bytes())
        .ok_or_else(|| anyhow!("frame does not fit a {}x{} RGB image", width, height))?;
    draw_detections(&mut image, detections);
    draw_faces(&mut image, faces);
    Frame::from_rgb(width, height, image.into_raw())
}

/// Green box per detection, labelled `"<label> <confidence>%"`.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        let (left, top, right, bottom) = detection.bbox.to_pixels(image.width(), image.height());
        let bounds = Rect {
            left: left as i32,
            top: top as i32,
            right: right as i32,
            bottom: bottom as i32,
        };
        draw_rectangle(image, bounds, OBJECT_COLOR);
        let text = format!("{} {:.0}%", detection.label, detection.confidence * 100.0);
        draw_label(image, bounds, &text);
    }
}

/// Blue box per face.
pub fn draw_faces(image: &mut RgbImage, faces: &[BoundingBox]) {
    for face in faces {
        let (left, top, right, bottom) = face.to_pixels(image.width(), image.height());
        let bounds = Rect {
            left: left as i32,
            top: top as i32,
            right: right as i32,
            bottom: bottom as i32,
        };
        draw_rectangle(image, bounds, FACE_COLOR);
    }
}

/// Inclusive pixel rectangle.
#[derive(Clone, Copy, Debug)]
struct Rect {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl Rect {
    fn is_empty(&self) -> bool {
        self.left > self.right || self.top > self.bottom
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// Tab sits above the box; when the box touches the top edge it moves inside,
/// below the border, and is cut to the box interior.
fn draw_label(image: &mut RgbImage, bounds: Rect, text: &str) {
    let tab_width = text.chars().count() as i32 * LABEL_CHAR_WIDTH + 1;
    let tab = if bounds.top >= LABEL_HEIGHT {
        Rect {
            left: bounds.left,
            top: bounds.top - LABEL_HEIGHT,
            right: bounds.left + tab_width - 1,
            bottom: bounds.top - 1,
        }
    } else {
        let left = bounds.left + LINE_WIDTH;
        let top = bounds.top + LINE_WIDTH;
        Rect {
            left,
            top,
            right: (left + tab_width - 1).min(bounds.right - LINE_WIDTH),
            bottom: (top + LABEL_HEIGHT - 1).min(bounds.bottom - LINE_WIDTH),
        }
    };
    if tab.is_empty() {
        return;
    }
    fill_rect(image, tab, LABEL_BACKGROUND);
    draw_text(image, tab.left + 1, tab.top + 1, text, OBJECT_COLOR, tab);
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>, clip: Rect) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = x + col;
                    if clip.contains(px, py) && px >= 0 && py >= 0 && px < width && py < height {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        x += LABEL_CHAR_WIDTH;
    }
}

fn draw_rectangle(image: &mut RgbImage, bounds: Rect, color: Rgb<u8>) {
    for inset in 0..LINE_WIDTH {
        let (l, t, r, b) = (
            bounds.left + inset,
            bounds.top + inset,
            bounds.right - inset,
            bounds.bottom - inset,
        );
        if l > r || t > b {
            break;
        }
        fill_rect(image, Rect { left: l, top: t, right: r, bottom: t }, color);
        fill_rect(image, Rect { left: l, top: b, right: r, bottom: b }, color);
        fill_rect(image, Rect { left: l, top: t, right: l, bottom: b }, color);
        fill_rect(image, Rect { left: r, top: t, right: r, bottom: b }, color);
    }
}

fn fill_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    if rect.is_empty() || rect.right < 0 || rect.bottom < 0 || rect.left > max_x || rect.top > max_y {
        return;
    }
    for y in rect.top.max(0)..=rect.bottom.min(max_y) {
        for x in rect.left.max(0)..=rect.right.min(max_x) {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// 5x7 bitmap rows, most significant of the low five bits is the leftmost column.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        _ => return None,
    };
    Some(rows)
}
