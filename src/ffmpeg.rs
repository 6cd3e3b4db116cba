//! # FFmpeg Module
//!
//! Video file playback and MP4 recording through FFmpeg.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::Rational;
use image::RgbImage;

use crate::camstream::CamStream;
use crate::error::{Error, Result};
use crate::frame::{Frame, Size};
use crate::record::{FrameWriter, RECORD_FOURCC};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// A stream of frames decoded from a video file.
///
/// Once the file is exhausted every capture fails.
pub struct FileCamStream {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: scaling::Context,
    size: Size,
    fps: Option<f64>,
    flushed: bool,
}

/// Writes frames to an MP4 file using the MPEG-4 part 2 (`MP4V`) encoder.
pub struct Mp4Writer {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    size: Size,
    frames: u64,
    finished: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FileCamStream {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().map_err(Error::FfmpegError)?;

        let input = ffmpeg::format::input(&path).map_err(Error::FfmpegError)?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::CamStreamBuildError(format!("{:?} has no video track", path)))?;

        let stream_index = stream.index();
        let rate = stream.avg_frame_rate();
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            Some(f64::from(rate))
        }
        else {
            None
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(Error::FfmpegError)?
            .decoder()
            .video()
            .map_err(Error::FfmpegError)?;

        let size = Size::new(decoder.width(), decoder.height());

        let scaler = scaling::Context::get(
            decoder.format(),
            size.width,
            size.height,
            Pixel::RGB24,
            size.width,
            size.height,
            scaling::Flags::BILINEAR
        ).map_err(Error::FfmpegError)?;

        log::debug!("Opened {:?}, {} at {:?} fps", path, size, fps);

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            size,
            fps,
            flushed: false,
        })
    }

    /// The codec the video track was encoded with.
    pub fn codec(&self) -> ffmpeg::codec::Id {
        self.decoder.id()
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler.run(decoded, &mut rgb).map_err(Error::FfmpegError)?;

        let row_bytes = rgb.width() as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);

        let mut pixels = Vec::with_capacity(row_bytes * rgb.height() as usize);
        for row in 0..rgb.height() as usize {
            pixels.extend_from_slice(&data[row * stride..row * stride + row_bytes]);
        }

        RgbImage::from_raw(rgb.width(), rgb.height(), pixels)
            .map(Frame::Color)
            .ok_or_else(|| Error::ImageFormatError(String::from("RGB24")))
    }
}

impl CamStream for FileCamStream {
    fn capture(&mut self) -> Result<Frame> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }

            if self.flushed {
                return Err(Error::CameraCaptureError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "end of video file"
                )));
            }

            let next = self.input.packets().next().map(|(s, p)| (s.index(), p));

            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder.send_packet(&packet).map_err(Error::FfmpegError)?;
                },
                Some(_) => (),
                None => {
                    self.decoder.send_eof().map_err(Error::FfmpegError)?;
                    self.flushed = true;
                }
            }
        }
    }

    fn native_size(&self) -> Size {
        self.size
    }

    fn native_fps(&self) -> Option<f64> {
        self.fps
    }
}

impl Mp4Writer {

    /// Create `path` and write the container header.
    pub fn create(path: &Path, size: Size, fps: u32) -> Result<Self> {
        ffmpeg::init().map_err(Error::FfmpegError)?;

        let mut output = ffmpeg::format::output(&path).map_err(Error::FfmpegError)?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or(Error::EncoderUnavailable(RECORD_FOURCC))?;

        let encoder_time_base = Rational::new(1, fps as i32);

        let mut stream = output.add_stream(codec).map_err(Error::FfmpegError)?;
        let stream_index = stream.index();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(Error::FfmpegError)?;

        encoder.set_width(size.width);
        encoder.set_height(size.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_as(codec).map_err(Error::FfmpegError)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);
        stream.set_avg_frame_rate(Rational::new(fps as i32, 1));

        output.write_header().map_err(Error::FfmpegError)?;

        // The muxer may pick its own time base when writing the header
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            size.width,
            size.height,
            Pixel::YUV420P,
            size.width,
            size.height,
            scaling::Flags::BILINEAR
        ).map_err(Error::FfmpegError)?;

        log::debug!("Recording {:?} as {} at {} fps", path, RECORD_FOURCC, fps);

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            size,
            frames: 0,
            finished: false,
        })
    }

    /// Move every packet the encoder has ready into the container.
    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();

        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output).map_err(Error::FfmpegError)?;
        }

        Ok(())
    }
}

impl FrameWriter for Mp4Writer {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.size() != self.size {
            return Err(Error::SizeMismatch { expected: self.size, actual: frame.size() });
        }

        let image = frame.to_rgb();
        let row_bytes = self.size.width as usize * 3;

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.size.width, self.size.height);
        let stride = rgb.stride(0);
        {
            let data = rgb.data_mut(0);
            for (row, src) in image.as_raw().chunks_exact(row_bytes).enumerate() {
                data[row * stride..row * stride + row_bytes].copy_from_slice(src);
            }
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler.run(&rgb, &mut yuv).map_err(Error::FfmpegError)?;
        yuv.set_pts(Some(self.frames as i64));

        self.encoder.send_frame(&yuv).map_err(Error::FfmpegError)?;
        self.frames += 1;

        self.drain()
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder.send_eof().map_err(Error::FfmpegError)?;
        self.drain()?;
        self.output.write_trailer().map_err(Error::FfmpegError)?;

        log::debug!("Closed {:?} after {} frames", self.path, self.frames);

        Ok(())
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("Failed to close {:?}: {}", self.path, e);
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use image::Rgb;

    /// Rows are padded by FFmpeg, use a width which isn't a multiple of the alignment
    const SIZE: Size = Size { width: 34, height: 20 };

    fn flat(colour: [u8; 3]) -> Frame {
        Frame::Color(RgbImage::from_pixel(SIZE.width, SIZE.height, Rgb(colour)))
    }

    #[test]
    fn padded_rows_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.mp4");

        let mut writer = Mp4Writer::create(&path, SIZE, 15).unwrap();
        for _ in 0..5 {
            writer.write(&flat([200, 40, 40])).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 5);

        let mut stream = FileCamStream::open(&path).unwrap();
        let frame = stream.capture().unwrap().to_rgb();

        assert_eq!(frame.dimensions(), (SIZE.width, SIZE.height));

        // Lossy codec and chroma subsampling, only check the colour is roughly kept
        for (expected, actual) in [200u8, 40, 40].iter().zip(frame.get_pixel(17, 10).0.iter()) {
            assert!(
                (*expected as i32 - *actual as i32).abs() < 32,
                "expected {}, got {}",
                expected,
                actual
            );
        }
    }

    #[test]
    fn writer_rejects_other_sizes_and_finishes_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::create(&dir.path().join("size.mp4"), SIZE, 15).unwrap();

        let wrong = Frame::Color(RgbImage::new(SIZE.width + 2, SIZE.height));
        assert!(matches!(writer.write(&wrong), Err(Error::SizeMismatch { .. })));
        assert_eq!(writer.frames_written(), 0);

        writer.finish().unwrap();
        writer.finish().unwrap();
    }
}
