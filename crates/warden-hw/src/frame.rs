//! Frame type and colour handling: YUYV conversion, channel order, downscale.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Byte order of the three colour channels in [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A captured three-channel camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed pixels, `width * height * 3` bytes in `order`.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = packed_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            order,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Copy into an RGB image, swapping channels when the frame is BGR.
    pub fn to_rgb(&self) -> RgbImage {
        let mut data = self.data.clone();
        if self.order == ChannelOrder::Bgr {
            swap_red_blue(&mut data);
        }
        // Length is checked in `new`; fall back to a blank image if a caller
        // mutated `data` afterwards.
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// RGB copy resized by `scale`, the form a detector expects.
    pub fn normalized(&self, scale: f32) -> RgbImage {
        downscale(&self.to_rgb(), scale)
    }
}

fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Convert packed YUYV (4:2:2) to packed RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(packed_len(width, height));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Swap the first and third byte of every pixel (RGB <-> BGR) in place.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Resize by a uniform factor with bilinear filtering. A factor of 1.0 (or
/// anything that would collapse a dimension to zero) returns a copy.
pub fn downscale(image: &RgbImage, scale: f32) -> RgbImage {
    let w = (image.width() as f32 * scale).round() as u32;
    let h = (image.height() as f32 * scale).round() as u32;
    if w == 0 || h == 0 || (w == image.width() && h == image.height()) {
        return image.clone();
    }
    imageops::resize(image, w, h, FilterType::Triangle)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
