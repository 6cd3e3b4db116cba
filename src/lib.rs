//! # Mono and stereo camera viewer
//!
//! This crate provides interactive viewers and a recorder for one or two camera streams, with
//! optional stereo rectification of the pair.
//! Under the hood this uses [`rscam`](https://github.com/loyd/rscam) to access cameras over V4L2,
//! therefore currently only Linux is supported for live cameras.
//!
//! ## Dependencies
//!
//! Before installing make sure that the following dependencies are installed:
//!
//! - V4L2 - video for linux 2, for the `v4l2` feature (enabled by default)
//! - FFmpeg libraries, including the dev headers, for the optional `ffmpeg` feature which adds
//!   MP4 recording and video file playback
//!
//! ### Ubuntu
//!
//! ```shell
//! sudo apt install v4l-utils libavformat-dev libavcodec-dev libswscale-dev
//! ```
//!
//! ## Usage
//!
//! Every mode is run through [`run`] with a [`RunConfig`] and a [`DisplaySink`], or directly
//! through the mode functions with already opened streams:
//!
//! ```rust,no_run
//! use stereo_camview::prelude::*;
//!
//! let left = CamStreamBuilder::new()
//!     .source("/dev/video1".parse().unwrap())
//!     .expect("Cannot find left camera")
//!     .resolution((1280, 720))
//!     .format(b"MJPG")
//!     .unwrap()
//!     .build()
//!     .expect("Failed to open left camera");
//!
//! let right = CamStreamBuilder::new()
//!     .source("/dev/video2".parse().unwrap())
//!     .expect("Cannot find right camera")
//!     .build()
//!     .expect("Failed to open right camera");
//!
//! let mut display = HeadlessDisplay::new().press_char_at(100, 'q');
//! let stats = show_cameras(left, right, Session::new(Size::new(640, 480)), &mut display)
//!     .expect("Viewer failed");
//!
//! println!("{} pairs shown", stats.shown);
//! ```
//!
//! Keys are polled once per tick: `q` quits, and in record mode `s` starts recording.

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use builder::{CamStreamBuilder, Rectifiable, StereoRectifierBuilder};
pub use camstream::{CamStream, Source, SyntheticCamStream};
#[cfg(feature = "v4l2")]
pub use camstream::V4l2CamStream;
pub use display::{DisplaySink, HeadlessDisplay, Key};
#[cfg(feature = "window")]
pub use display::WindowDisplay;
pub use driver::{
    record_stereo_video, run, show_all, show_camera, show_cameras, show_rectified_cameras,
    CaptureSettings, Control, LoopStats, Mode, RecordState, RunConfig, Session,
    MONO_WINDOW, RECTIFIED_WINDOW, STEREO_WINDOW,
};
pub use error::{Error, Result};
#[cfg(feature = "ffmpeg")]
pub use crate::ffmpeg::{FileCamStream, Mp4Writer};
pub use frame::{Frame, PixelFormat, Size};
pub use record::{
    FrameWriter, ImageSequenceWriter, RecordFormat, StereoWriters, RECORD_FOURCC, RECORD_FPS,
};
pub use rectification::{
    draw_horizontal_lines, CameraParams, Rectify, StereoRectifParams, StereoRectifier,
};

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod builder;
mod camstream;
mod display;
mod driver;
mod error;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod frame;
mod record;
mod rectification;

pub mod prelude {
    pub use crate::{CamStreamBuilder, Rectifiable, StereoRectifierBuilder};
    pub use crate::{CamStream, Source, SyntheticCamStream};
    pub use crate::{DisplaySink, HeadlessDisplay, Key};
    pub use crate::{Frame, Size};
    pub use crate::{run, show_all, show_camera, show_cameras, show_rectified_cameras};
    pub use crate::{record_stereo_video, Mode, RunConfig, Session};
}
