//! # `CamStreamBuilder` implementation
//!
//! This module implements the builders for camera stream and rectifier objects.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;

use serde_any;
use serde::de::DeserializeOwned;

use crate::camstream::{CamStream, Source, SyntheticCamStream};
use crate::error::{Error, Result};
use crate::frame::{PixelFormat, Size};
use crate::rectification::{StereoRectifParams, StereoRectifier};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// V4L2 "progressive" field order, same as `rscam::FIELD_NONE`.
pub const FIELD_NONE: u32 = 1;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Provides common methods for enabling rectification of images by a builder.
pub trait Rectifiable: Sized {
    /// The parameters to be used, must be deserialisable.
    type Params: DeserializeOwned;

    fn rectif_params(self, params: Self::Params) -> Self;

    /// Load the rectification parameters from a file.
    ///
    /// The file type will be guessed at runtime, any file type supported by
    /// [`serde_any`](https://docs.rs/serde_any/0.5.0/serde_any/) is supported, but it must be
    /// deserialisable into `Self::Params`.
    fn rectif_params_from_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        // Check the file exitsts
        if !path.as_ref().exists() {
            return Err(Error::FileNotFound(path.as_ref().to_path_buf()));
        }

        // Load the parameters from the file, guessing which format they're in using serde_any
        let p = serde_any::from_file(path).map_err(Error::DeserialisationError)?;

        Ok(self.rectif_params(p))
    }
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Builds a [`CamStream`] for any [`Source`].
///
/// The capture settings only apply to V4L2 devices, files and synthetic sources produce frames
/// at their own size and rate.
#[derive(Clone, Debug)]
pub struct CamStreamBuilder {
    source: Option<Source>,

    interval: (u32, u32),
    resolution: (u32, u32),
    format: PixelFormat,
    field: u32,
    num_buffers: u32,
}

/// Builds a [`StereoRectifier`] for frames of a given size.
pub struct StereoRectifierBuilder {
    size: Size,

    rectif_params: Option<StereoRectifParams>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for CamStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CamStreamBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            interval: (1, 30),
            resolution: (640, 480),
            format: PixelFormat::Mjpg,
            field: FIELD_NONE,
            num_buffers: 2,
        }
    }

    /// Specify the source of the stream.
    ///
    /// # Returns
    /// - `self` if the source is synthetic or its path exists, `Err` otherwise
    pub fn source(mut self, source: Source) -> Result<Self> {
        match &source {
            Source::Device(p) | Source::File(p) if !p.exists() => {
                return Err(Error::FileNotFound(p.clone()));
            },
            _ => ()
        }

        self.source = Some(source);

        Ok(self)
    }

    /// Set the interval of the camera.
    ///
    /// V4L2 uses intervals rather than framerates, default value is `(1, 30)`.
    pub fn interval(mut self, interval: (u32, u32)) -> Self {
        self.interval = interval;

        self
    }

    /// Set the resolution of the camera.
    ///
    /// Default value is `(640, 480)`.
    pub fn resolution(mut self, resolution: (u32, u32)) -> Self {
        self.resolution = resolution;

        self
    }

    /// Set the format of the images.
    ///
    /// Uses the FourCC notation, default value is `b"MJPG"`.
    pub fn format(mut self, format: &[u8]) -> Result<Self> {
        self.format = PixelFormat::from_fourcc(format)
            .ok_or_else(|| Error::ImageFormatError(String::from_utf8_lossy(format).into_owned()))?;

        Ok(self)
    }

    /// Set the storage method for interlaced video.
    ///
    /// Possible values are the V4L2 field orders, default is [`FIELD_NONE`].
    pub fn field(mut self, field: u32) -> Self {
        self.field = field;

        self
    }

    /// Set the number of buffers in the queue for this camera.
    ///
    /// Default value is 2.
    pub fn num_buffers(mut self, num_buffers: u32) -> Self {
        self.num_buffers = num_buffers;

        self
    }

    /// Build the camera stream object.
    ///
    /// This function can fail if the underlying backend fails to open the source, or if the
    /// backend for the source was not compiled in.
    pub fn build(self) -> Result<Box<dyn CamStream>> {
        let source = self.source
            .clone()
            .ok_or_else(|| Error::CamStreamBuildError(String::from("Missing camera source")))?;

        match source {
            Source::Synthetic(size) => {
                log::debug!("Using synthetic source at {}", size);
                Ok(Box::new(SyntheticCamStream::new(size)))
            },
            Source::Device(path) => self.build_device(&path),
            Source::File(path) => build_file(&path)
        }
    }

    #[cfg(feature = "v4l2")]
    fn build_device(&self, path: &Path) -> Result<Box<dyn CamStream>> {
        let config = rscam::Config {
            interval: self.interval,
            resolution: self.resolution,
            format: self.format.fourcc(),
            field: self.field,
            nbuffers: self.num_buffers,
        };

        Ok(Box::new(crate::camstream::V4l2CamStream::open(path, &config)?))
    }

    #[cfg(not(feature = "v4l2"))]
    fn build_device(&self, _path: &Path) -> Result<Box<dyn CamStream>> {
        Err(Error::BackendUnavailable("v4l2"))
    }
}

impl StereoRectifierBuilder {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            rectif_params: None,
        }
    }

    /// Build the rectifier, precomputing the sampling maps for both cameras.
    pub fn build(self) -> Result<StereoRectifier> {
        let params = self.rectif_params.ok_or(Error::MissingCalibration)?;

        StereoRectifier::new(&params, self.size)
    }
}

impl Rectifiable for StereoRectifierBuilder {
    type Params = StereoRectifParams;

    fn rectif_params(mut self, params: Self::Params) -> Self {
        self.rectif_params = Some(params);

        self
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

#[cfg(feature = "ffmpeg")]
fn build_file(path: &Path) -> Result<Box<dyn CamStream>> {
    Ok(Box::new(crate::ffmpeg::FileCamStream::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn build_file(_path: &Path) -> Result<Box<dyn CamStream>> {
    Err(Error::BackendUnavailable("ffmpeg"))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Write;

    /// Test that synthetic streams can be built and produce frames
    #[test]
    fn test_synthetic() {
        let mut stream = CamStreamBuilder::new()
            .source(Source::Synthetic(Size::new(32, 24)))
            .expect("Cannot use synthetic source")
            .build()
            .expect("Cannot build synthetic stream");

        assert_eq!(stream.native_size(), Size::new(32, 24));
        assert_eq!(stream.capture().unwrap().size(), Size::new(32, 24));
    }

    /// Test that missing paths are rejected up front
    #[test]
    fn test_missing_path() {
        let err = CamStreamBuilder::new()
            .source(Source::Device("/dev/definitely-not-a-camera".into()))
            .unwrap_err();

        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_missing_source_and_bad_format() {
        assert!(CamStreamBuilder::new().build().is_err());
        assert!(matches!(
            CamStreamBuilder::new().format(b"H264").unwrap_err(),
            Error::ImageFormatError(_)
        ));
    }

    /// Test that stereo rectifiers load their parameters from file
    #[test]
    fn test_rectifier_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();

        write!(
            file,
            r#"{{
                "image_size": [32, 24],
                "left": {{ "camera_matrix": [[30, 0, 16], [0, 30, 12], [0, 0, 1]] }},
                "right": {{ "camera_matrix": [[30, 0, 16], [0, 30, 12], [0, 0, 1]] }}
            }}"#
        ).unwrap();
        file.flush().unwrap();

        let rectifier = StereoRectifierBuilder::new(Size::new(32, 24))
            .rectif_params_from_file(file.path())
            .expect("Cannot load the rectification parameters")
            .build()
            .expect("Cannot build the rectifier");

        assert_eq!(rectifier.size(), Size::new(32, 24));
    }

    /// Test that malformed parameter files keep the deserialiser's error
    #[test]
    fn test_rectifier_bad_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();

        write!(file, r#"{{ "image_size": [32, 24] }}"#).unwrap();
        file.flush().unwrap();

        let err = StereoRectifierBuilder::new(Size::new(32, 24))
            .rectif_params_from_file(file.path())
            .err()
            .expect("Incomplete parameters were accepted");

        match err {
            Error::DeserialisationError(e) => assert!(!e.to_string().is_empty()),
            e => panic!("Expected a deserialisation error, got {}", e),
        }
    }

    #[test]
    fn test_rectifier_errors() {
        assert!(matches!(
            StereoRectifierBuilder::new(Size::new(8, 8))
                .rectif_params_from_file("does/not/exist.toml")
                .err(),
            Some(Error::FileNotFound(_))
        ));

        assert!(matches!(
            StereoRectifierBuilder::new(Size::new(8, 8)).build().err(),
            Some(Error::MissingCalibration)
        ));
    }
}
