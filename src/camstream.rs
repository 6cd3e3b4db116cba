//! # Camera Stream Module
//!
//! This module provides a camera stream trait which gives a uniform API over V4L2 devices, video
//! files and synthetic test patterns.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use image::{Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::frame::{Frame, Size};
#[cfg(feature = "v4l2")]
use crate::frame::PixelFormat;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Prefix of synthetic source identifiers, e.g. `stub://1280x720`.
pub const SYNTHETIC_PREFIX: &str = "stub://";

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait CamStream {
    /// Capture a frame from the camera stream.
    ///
    /// A failed capture is not fatal, the stream may produce a frame on the next call.
    fn capture(&mut self) -> Result<Frame>;

    /// The size of the frames the stream produces before any resizing.
    fn native_size(&self) -> Size;

    /// The native frame rate of the stream, if the backend knows it.
    fn native_fps(&self) -> Option<f64> {
        None
    }
}

impl<C: CamStream + ?Sized> CamStream for Box<C> {
    fn capture(&mut self) -> Result<Frame> {
        (**self).capture()
    }

    fn native_size(&self) -> Size {
        (**self).native_size()
    }

    fn native_fps(&self) -> Option<f64> {
        (**self).native_fps()
    }
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Where a camera stream gets its frames from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// A V4L2 device node such as `/dev/video0`
    Device(PathBuf),

    /// A video file on disk
    File(PathBuf),

    /// A generated moving pattern of the given size
    Synthetic(Size),
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// A stream producing a deterministic moving gradient.
///
/// The first `warmup` captures fail, as real devices often do while starting up. Once `limit`
/// frames have been produced every further capture fails.
pub struct SyntheticCamStream {
    size: Size,
    warmup: u64,
    limit: Option<u64>,
    attempts: u64,
    produced: u64,
}

#[cfg(feature = "v4l2")]
pub struct V4l2CamStream {
    camera: rscam::Camera,

    format: PixelFormat,

    resolution: Size,

    fps: f64,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FromStr for Source {
    type Err = Error;

    /// Parse a source identifier.
    ///
    /// - `N` (an integer) is the device `/dev/videoN`
    /// - anything under `/dev/` is a device
    /// - `stub://WxH` is a synthetic source
    /// - anything else is treated as a video file
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.starts_with(SYNTHETIC_PREFIX) {
            return Ok(Source::Synthetic(s[SYNTHETIC_PREFIX.len()..].parse()?));
        }

        if let Ok(index) = s.parse::<u32>() {
            return Ok(Source::Device(PathBuf::from(format!("/dev/video{}", index))));
        }

        let path = PathBuf::from(s);
        if path.starts_with("/dev") {
            Ok(Source::Device(path))
        }
        else {
            Ok(Source::File(path))
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Device(p) | Source::File(p) => write!(f, "{}", p.display()),
            Source::Synthetic(size) => write!(f, "{}{}", SYNTHETIC_PREFIX, size),
        }
    }
}

impl SyntheticCamStream {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            warmup: 0,
            limit: None,
            attempts: 0,
            produced: 0,
        }
    }

    /// Fail the first `warmup` captures.
    pub fn with_warmup(mut self, warmup: u64) -> Self {
        self.warmup = warmup;

        self
    }

    /// Stop producing frames after `limit` successful captures.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);

        self
    }

    /// Number of frames produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl CamStream for SyntheticCamStream {
    fn capture(&mut self) -> Result<Frame> {
        self.attempts += 1;

        if self.attempts <= self.warmup {
            return Err(Error::CameraCaptureError(io::Error::new(
                io::ErrorKind::WouldBlock,
                "synthetic source warming up"
            )));
        }

        if self.limit.map_or(false, |l| self.produced >= l) {
            return Err(Error::CameraCaptureError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "synthetic source exhausted"
            )));
        }

        let t = self.produced;
        self.produced += 1;

        Ok(Frame::Color(RgbImage::from_fn(self.size.width, self.size.height, |x, y| {
            Rgb([
                ((x as u64 + t) % 256) as u8,
                ((y as u64 + t) % 256) as u8,
                ((x as u64 ^ y as u64) % 256) as u8,
            ])
        })))
    }

    fn native_size(&self) -> Size {
        self.size
    }

    fn native_fps(&self) -> Option<f64> {
        None
    }
}

#[cfg(feature = "v4l2")]
impl V4l2CamStream {

    /// Open and start the device at `path`.
    ///
    /// This function can fail if the underlying V4L2 construction fails.
    pub(crate) fn open(path: &std::path::Path, config: &rscam::Config<'_>) -> Result<Self> {
        let format = PixelFormat::from_fourcc(config.format).ok_or_else(|| {
            Error::ImageFormatError(String::from_utf8_lossy(config.format).into_owned())
        })?;

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::CamStreamBuildError(format!("Invalid device path {:?}", path)))?;

        let mut camera = rscam::Camera::new(path_str)
            .map_err(|e| Error::CamStreamBuildError(format!("{}: {}", path_str, e)))?;

        camera.start(config).map_err(Error::CamStartError)?;

        let (num, den) = config.interval;
        let fps = if num == 0 { 0.0 } else { den as f64 / num as f64 };

        log::debug!(
            "Started {} as {} at {}x{}",
            path_str,
            String::from_utf8_lossy(config.format),
            config.resolution.0,
            config.resolution.1
        );

        Ok(Self {
            camera,
            format,
            resolution: Size::new(config.resolution.0, config.resolution.1),
            fps,
        })
    }
}

#[cfg(feature = "v4l2")]
impl CamStream for V4l2CamStream {

    /// Capture an image from the camera.
    fn capture(&mut self) -> Result<Frame> {
        // Get the frame from the camera
        let rscam_frame = self.camera.capture()
            .map_err(Error::CameraCaptureError)?;

        let size = Size::new(rscam_frame.resolution.0, rscam_frame.resolution.1);

        self.format.decode(&rscam_frame, size)
    }

    fn native_size(&self) -> Size {
        self.resolution
    }

    fn native_fps(&self) -> Option<f64> {
        if self.fps > 0.0 {
            Some(self.fps)
        }
        else {
            None
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn parse_sources() {
        assert_eq!(
            "1".parse::<Source>().unwrap(),
            Source::Device(PathBuf::from("/dev/video1"))
        );
        assert_eq!(
            "/dev/video4".parse::<Source>().unwrap(),
            Source::Device(PathBuf::from("/dev/video4"))
        );
        assert_eq!(
            "stereoL.mp4".parse::<Source>().unwrap(),
            Source::File(PathBuf::from("stereoL.mp4"))
        );
        assert_eq!(
            "stub://1280x720".parse::<Source>().unwrap(),
            Source::Synthetic(Size::new(1280, 720))
        );
        assert!("stub://wide".parse::<Source>().is_err());
        assert_eq!(Source::Synthetic(Size::new(8, 6)).to_string(), "stub://8x6");
    }

    #[test]
    fn synthetic_warmup_and_limit() {
        let mut s = SyntheticCamStream::new(Size::new(8, 6))
            .with_warmup(2)
            .with_limit(3);

        assert!(s.capture().is_err());
        assert!(s.capture().is_err());

        for _ in 0..3 {
            let f = s.capture().unwrap();
            assert_eq!(f.size(), Size::new(8, 6));
        }

        assert!(s.capture().is_err());
        assert_eq!(s.produced(), 3);
    }

    #[test]
    fn synthetic_frames_move() {
        let mut s = SyntheticCamStream::new(Size::new(4, 4));
        let a = s.capture().unwrap();
        let b = s.capture().unwrap();
        assert_ne!(a, b);
    }
}
