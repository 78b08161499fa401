//! Colour frames and pixel conversions.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Byte order of the three interleaved channels in [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A captured colour frame, 3 bytes per pixel.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Interleaved pixel data (width * height * 3 bytes), in `order`.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap interleaved pixel data, checking that it covers `width × height` pixels.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength { expected, actual: data.len() });
        }
        Ok(Self {
            data,
            width,
            height,
            order,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        })
    }

    /// Frame holding a single solid colour, given in RGB.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = std::iter::repeat(rgb)
            .take((width as usize) * (height as usize))
            .flatten()
            .collect();
        Self {
            data,
            width,
            height,
            order: ChannelOrder::Rgb,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    /// Shrink both dimensions by an integer `factor` using bilinear filtering.
    ///
    /// Channel order is preserved. Dimensions never drop below one pixel.
    pub fn downscale(&self, factor: u32) -> Result<Frame, FrameError> {
        if factor <= 1 {
            return Ok(self.clone());
        }
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        let resized = imageops::resize(&self.as_buffer()?, width, height, FilterType::Triangle);

        Ok(Frame {
            data: resized.into_raw(),
            width,
            height,
            order: self.order,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// RGB image of this frame, swapping channels if the frame is BGR.
    pub fn to_rgb(&self) -> Result<RgbImage, FrameError> {
        let mut image = self.as_buffer()?;
        if self.order == ChannelOrder::Bgr {
            swap_red_blue(&mut image);
        }
        Ok(image)
    }

    /// Raw bytes as an image buffer, ignoring channel order.
    fn as_buffer(&self) -> Result<RgbImage, FrameError> {
        let expected = (self.width as usize) * (self.height as usize) * 3;
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width as usize) * (height as usize) * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }

    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    ]
}

/// Swap the first and third byte of every 3-byte pixel (RGB <-> BGR) in place.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
