//! # `stereo_camview` Error module
//!
//! Provides abstractions over errors which can occur during this crate's use.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

use serde_any;
use thiserror;

use crate::frame::Size;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Result type used by faillible functions inside the `stereo_camview` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors which can occur during use of the `stereo_camview` crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Cannot find file at {0:?}")]
    FileNotFound(PathBuf),

    #[error("Error deserialising data: {0}")]
    DeserialisationError(serde_any::Error),

    #[error("Invalid calibration parameters: {0}")]
    InvalidCalibration(String),

    #[error("Error building camera stream: {0}")]
    CamStreamBuildError(String),

    #[cfg(feature = "v4l2")]
    #[error("Error starting camera: {0}")]
    CamStartError(rscam::Error),

    #[error("Error capturing camera image: {0}")]
    CameraCaptureError(std::io::Error),

    #[error("Unsupported image format {0:?}")]
    ImageFormatError(String),

    #[error("Error occured while converting an image: {0}")]
    ImageConversionError(image::ImageError),

    #[error("Expected a {expected} frame, got {actual}")]
    SizeMismatch { expected: Size, actual: Size },

    #[error("Cannot parse {0:?} as a size, expected WIDTHxHEIGHT")]
    InvalidSize(String),

    #[error("The {0} camera source was not given")]
    MissingSource(&'static str),

    #[error("This mode needs a calibration parameter file")]
    MissingCalibration,

    #[error("The {0} backend is not available, rebuild with `--features {0}`")]
    BackendUnavailable(&'static str),

    #[error("Display error: {0}")]
    DisplayError(String),

    #[error("Cannot find an encoder for {0}")]
    EncoderUnavailable(&'static str),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(ffmpeg_next::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
