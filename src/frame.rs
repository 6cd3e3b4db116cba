//! # Frame Module
//!
//! Pixel buffers passed between sources, transforms and sinks, along with the handful of image
//! operations the viewers need: resizing, grayscale conversion and side-by-side concatenation.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::str::FromStr;

use derive_more::Display;
use image::imageops::{self, FilterType};
use image::{GenericImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};

use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Width and height of a frame in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display(fmt = "{}x{}", width, height)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// A single image from a capture source.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Single channel, 8 bit
    Gray(GrayImage),

    /// Three channel, 8 bit
    Color(RgbImage),
}

/// Pixel formats a camera can be asked to stream in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion JPEG, each buffer is a complete JPEG image
    Mjpg,

    /// Packed 4:2:2 YUV, `Y0 U Y1 V` per pair of pixels
    Yuyv,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this size.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl FromStr for Size {
    type Err = Error;

    /// Parse a size written as `WIDTHxHEIGHT`, e.g. `640x480`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSize(s.to_string());

        let mut parts = s.trim().splitn(2, |c: char| c == 'x' || c == 'X');
        let width = parts.next().ok_or_else(invalid)?.parse::<u32>().map_err(|_| invalid())?;
        let height = parts.next().ok_or_else(invalid)?.parse::<u32>().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Size::new(width, height))
    }
}

impl Frame {

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        match self {
            Frame::Gray(i) => i.width(),
            Frame::Color(i) => i.width(),
        }
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        match self {
            Frame::Gray(i) => i.height(),
            Frame::Color(i) => i.height(),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    /// Number of channels per pixel, 1 for grayscale and 3 for colour.
    pub fn channels(&self) -> u8 {
        match self {
            Frame::Gray(_) => 1,
            Frame::Color(_) => 3,
        }
    }

    pub fn is_gray(&self) -> bool {
        matches!(self, Frame::Gray(_))
    }

    /// Resize the frame to exactly `size`, ignoring the aspect ratio.
    pub fn resize(&self, size: Size) -> Frame {
        if self.size() == size {
            return self.clone();
        }

        match self {
            Frame::Gray(i) => Frame::Gray(
                imageops::resize(i, size.width, size.height, FilterType::Triangle)
            ),
            Frame::Color(i) => Frame::Color(
                imageops::resize(i, size.width, size.height, FilterType::Triangle)
            ),
        }
    }

    /// Convert the frame to a single channel luma frame.
    pub fn to_gray(&self) -> Frame {
        match self {
            Frame::Gray(i) => Frame::Gray(i.clone()),
            Frame::Color(i) => Frame::Gray(imageops::grayscale(i)),
        }
    }

    /// Get the frame as a three channel image, replicating luma for grayscale frames.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Frame::Gray(i) => RgbImage::from_fn(i.width(), i.height(), |x, y| {
                let l = i.get_pixel(x, y)[0];
                Rgb([l, l, l])
            }),
            Frame::Color(i) => i.clone(),
        }
    }

    /// Place `left` and `right` next to each other in a single frame.
    ///
    /// Both frames must have the same height. If only one of them is colour the other is
    /// promoted to colour as well.
    pub fn hstack(left: &Frame, right: &Frame) -> Result<Frame> {
        if left.height() != right.height() {
            return Err(Error::SizeMismatch {
                expected: Size::new(right.width(), left.height()),
                actual: right.size(),
            });
        }

        let width = left.width() + right.width();
        let height = left.height();

        match (left, right) {
            (Frame::Gray(l), Frame::Gray(r)) => {
                let mut out = GrayImage::new(width, height);
                out.copy_from(l, 0, 0).map_err(Error::ImageConversionError)?;
                out.copy_from(r, l.width(), 0).map_err(Error::ImageConversionError)?;
                Ok(Frame::Gray(out))
            },
            _ => {
                let (l, r) = (left.to_rgb(), right.to_rgb());
                let mut out = RgbImage::new(width, height);
                out.copy_from(&l, 0, 0).map_err(Error::ImageConversionError)?;
                out.copy_from(&r, l.width(), 0).map_err(Error::ImageConversionError)?;
                Ok(Frame::Color(out))
            }
        }
    }

    /// Convert the frame into a `0RGB` packed buffer, as used by window surfaces.
    pub fn to_0rgb(&self) -> Vec<u32> {
        match self {
            Frame::Gray(i) => i
                .pixels()
                .map(|Luma([l])| {
                    let l = *l as u32;
                    (l << 16) | (l << 8) | l
                })
                .collect(),
            Frame::Color(i) => i
                .pixels()
                .map(|Rgb([r, g, b])| ((*r as u32) << 16) | ((*g as u32) << 8) | *b as u32)
                .collect(),
        }
    }
}

impl PixelFormat {

    /// Get the pixel format matching a V4L2 FourCC code, if it is supported.
    pub fn from_fourcc(fourcc: &[u8]) -> Option<Self> {
        match fourcc {
            b"MJPG" => Some(PixelFormat::Mjpg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None
        }
    }

    pub fn fourcc(&self) -> &'static [u8] {
        match self {
            PixelFormat::Mjpg => b"MJPG",
            PixelFormat::Yuyv => b"YUYV",
        }
    }

    /// Decode a raw camera buffer of the given resolution into a colour frame.
    pub fn decode(&self, data: &[u8], size: Size) -> Result<Frame> {
        match self {
            PixelFormat::Mjpg => {
                let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                    .map_err(Error::ImageConversionError)?;
                Ok(Frame::Color(img.to_rgb8()))
            },
            PixelFormat::Yuyv => yuyv_to_rgb(data, size).map(Frame::Color)
        }
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Convert a packed YUYV buffer into an RGB image using BT.601 coefficients.
fn yuyv_to_rgb(data: &[u8], size: Size) -> Result<RgbImage> {
    if size.width % 2 != 0 || data.len() < size.area() * 2 {
        return Err(Error::CameraCaptureError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("YUYV buffer of {} bytes is too short for {}", data.len(), size)
        )));
    }

    let mut rgb = Vec::with_capacity(size.area() * 3);

    for chunk in data[..size.area() * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(size.width, size.height, rgb)
        .ok_or_else(|| Error::ImageFormatError(String::from("YUYV")))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    let clamp = |x: f32| x.round().max(0.0).min(255.0) as u8;

    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
