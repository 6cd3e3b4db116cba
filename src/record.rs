//! # Recording Module
//!
//! Sinks which store frames, either as MP4 streams (with the `ffmpeg` feature) or as numbered
//! PNG image sequences.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::frame::{Frame, Size};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Frame rate recordings are written at, whatever the cameras deliver.
pub const RECORD_FPS: u32 = 15;

/// FourCC of the codec used for MP4 recordings.
pub const RECORD_FOURCC: &str = "MP4V";

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A sink frames can be appended to.
pub trait FrameWriter {
    /// Append a frame, which must have the size the writer was created with.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Number of frames appended so far.
    fn frames_written(&self) -> u64;

    /// Flush and close the output. Calling this more than once has no further effect.
    fn finish(&mut self) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Container used for recordings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    /// `<prefix>L.mp4` and `<prefix>R.mp4`
    Mp4,

    /// `<prefix>L/000000.png ...` and `<prefix>R/000000.png ...`
    Png,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Writes each frame to its own PNG file in a directory.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    size: Size,
    frames: u64,
}

/// The left and right outputs of a stereo recording.
pub struct StereoWriters {
    pub left: Box<dyn FrameWriter>,
    pub right: Box<dyn FrameWriter>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FromStr for RecordFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(RecordFormat::Mp4),
            "png" => Ok(RecordFormat::Png),
            other => Err(Error::ImageFormatError(other.to_string()))
        }
    }
}

impl RecordFormat {

    /// Output path for one side of a recording, `side` being `L` or `R`.
    pub fn output_path(&self, prefix: &str, side: char) -> PathBuf {
        match self {
            RecordFormat::Mp4 => PathBuf::from(format!("{}{}.mp4", prefix, side)),
            RecordFormat::Png => PathBuf::from(format!("{}{}", prefix, side)),
        }
    }

    /// Open a writer for frames of `size` at `path`.
    pub fn create(&self, path: &Path, size: Size, fps: u32) -> Result<Box<dyn FrameWriter>> {
        match self {
            RecordFormat::Png => Ok(Box::new(ImageSequenceWriter::create(path, size)?)),
            RecordFormat::Mp4 => create_mp4(path, size, fps),
        }
    }
}

impl ImageSequenceWriter {

    /// Create the output directory if needed.
    pub fn create<P: AsRef<Path>>(dir: P, size: Size) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            size,
            frames: 0,
        })
    }

    /// Path of the `index`th frame.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{:06}.png", index))
    }
}

impl FrameWriter for ImageSequenceWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.size() != self.size {
            return Err(Error::SizeMismatch { expected: self.size, actual: frame.size() });
        }

        let path = self.frame_path(self.frames);
        let saved = match frame {
            Frame::Gray(i) => i.save(&path),
            Frame::Color(i) => i.save(&path),
        };
        saved.map_err(Error::ImageConversionError)?;

        self.frames += 1;

        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl StereoWriters {

    /// Open `<prefix>L` and `<prefix>R` outputs in the given format.
    pub fn create(format: RecordFormat, prefix: &str, size: Size, fps: u32) -> Result<Self> {
        let left = format.create(&format.output_path(prefix, 'L'), size, fps)?;
        let right = format.create(&format.output_path(prefix, 'R'), size, fps)?;

        Ok(Self { left, right })
    }

    /// Append a pair of frames.
    pub fn write(&mut self, left: &Frame, right: &Frame) -> Result<()> {
        self.left.write(left)?;
        self.right.write(right)
    }

    /// Close both outputs, even if closing the left one fails.
    ///
    /// Returns the number of frames written to the left and right outputs.
    pub fn finish(&mut self) -> Result<(u64, u64)> {
        let left = self.left.finish();
        let right = self.right.finish();
        left?;
        right?;

        Ok((self.left.frames_written(), self.right.frames_written()))
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

#[cfg(feature = "ffmpeg")]
fn create_mp4(path: &Path, size: Size, fps: u32) -> Result<Box<dyn FrameWriter>> {
    Ok(Box::new(crate::ffmpeg::Mp4Writer::create(path, size, fps)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn create_mp4(_path: &Path, _size: Size, _fps: u32) -> Result<Box<dyn FrameWriter>> {
    Err(Error::BackendUnavailable("ffmpeg"))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn output_names() {
        assert_eq!(RecordFormat::Mp4.output_path("stereo", 'L'), PathBuf::from("stereoL.mp4"));
        assert_eq!(RecordFormat::Mp4.output_path("out/run", 'R'), PathBuf::from("out/runR.mp4"));
        assert_eq!(RecordFormat::Png.output_path("stereo", 'R'), PathBuf::from("stereoR"));

        assert_eq!("MP4".parse::<RecordFormat>().unwrap(), RecordFormat::Mp4);
        assert!("avi".parse::<RecordFormat>().is_err());
    }

    #[test]
    fn image_sequence_writes_numbered_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ImageSequenceWriter::create(dir.path().join("seq"), Size::new(4, 3)).unwrap();

        w.write(&Frame::Color(RgbImage::new(4, 3))).unwrap();
        w.write(&Frame::Gray(GrayImage::new(4, 3))).unwrap();
        w.finish().unwrap();

        assert_eq!(w.frames_written(), 2);
        assert!(w.frame_path(0).exists());
        assert!(w.frame_path(1).exists());
        assert!(!w.frame_path(2).exists());

        let back = image::open(w.frame_path(1)).unwrap();
        assert_eq!((back.width(), back.height()), (4, 3));
    }

    #[test]
    fn image_sequence_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ImageSequenceWriter::create(dir.path(), Size::new(4, 3)).unwrap();

        assert!(w.write(&Frame::Gray(GrayImage::new(3, 4))).is_err());
        assert_eq!(w.frames_written(), 0);
    }

    #[test]
    fn stereo_writers_count_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("pair");
        let prefix = prefix.to_str().unwrap();

        let mut w = StereoWriters::create(RecordFormat::Png, prefix, Size::new(2, 2), RECORD_FPS)
            .unwrap();
        let f = Frame::Gray(GrayImage::new(2, 2));
        w.write(&f, &f).unwrap();

        assert_eq!(w.finish().unwrap(), (1, 1));
        assert!(dir.path().join("pairL").join("000000.png").exists());
        assert!(dir.path().join("pairR").join("000000.png").exists());
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn mp4_needs_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("pair");

        assert!(matches!(
            StereoWriters::create(RecordFormat::Mp4, prefix.to_str().unwrap(), Size::new(2, 2), 15)
                .err(),
            Some(Error::BackendUnavailable("ffmpeg"))
        ));
    }
}
