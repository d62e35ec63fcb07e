//! Stream and file capture backend (feature: capture-ffmpeg).
//!
//! Anything FFmpeg can open as an input works here: `rtsp://`, `http://` and
//! `udp://` streams as well as local video files. Decoded frames are scaled to
//! RGB24; end of input is reported as end of stream once the decoder is flushed.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{CapturedFrame, PixelFormat};

pub struct FfmpegSource {
    location: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<Scaler>,
    frame_count: u64,
    flushed: bool,
}

struct Scaler {
    context: ffmpeg::software::scaling::Context,
    format: ffmpeg::util::format::pixel::Pixel,
    width: u32,
    height: u32,
}

impl FfmpegSource {
    pub fn open(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video stream", location))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location: location.to_string(),
            input,
            stream_index,
            decoder,
            scaler: None,
            frame_count: 0,
            flushed: false,
        })
    }

    /// Decode the next frame. `Ok(None)` once the input is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame = self.convert(&decoded)?;
                self.frame_count += 1;
                return Ok(Some(frame));
            }
            if self.flushed {
                log::info!("FfmpegSource: {} ended", self.location);
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .context("send packet to ffmpeg decoder")?;
                    }
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<CapturedFrame> {
        let stale = self.scaler.as_ref().map_or(true, |scaler| {
            scaler.format != decoded.format()
                || scaler.width != decoded.width()
                || scaler.height != decoded.height()
        });
        if stale {
            let context = ffmpeg::software::scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                ffmpeg::util::format::pixel::Pixel::RGB24,
                decoded.width(),
                decoded.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;
            self.scaler = Some(Scaler {
                context,
                format: decoded.format(),
                width: decoded.width(),
                height: decoded.height(),
            });
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg scaler missing"))?;

        let mut rgb = ffmpeg::frame::Video::empty();
        scaler
            .context
            .run(decoded, &mut rgb)
            .context("scale frame to RGB")?;
        Ok(CapturedFrame {
            data: packed_rows(&rgb)?,
            width: rgb.width(),
            height: rgb.height(),
            format: PixelFormat::Rgb24,
        })
    }
}

/// Copy plane 0 without its row padding.
fn packed_rows(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let row_bytes = frame.width() as usize * 3;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);
    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .context("ffmpeg frame is shorter than its dimensions");
    }
    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}
