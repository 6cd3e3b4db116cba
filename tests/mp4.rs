//! # MP4 Recording Tests
//!
//! Records synthetic pairs to MP4 and reads the files back through FFmpeg.

#![cfg(feature = "ffmpeg")]

use std::path::Path;

use ffmpeg_next::codec;

use stereo_camview::prelude::*;
use stereo_camview::{FileCamStream, RecordFormat, StereoWriters, RECORD_FPS};

const TARGET: Size = Size { width: 640, height: 480 };

// -----------------------------------------------------------------------------------------------
// HELPERS
// -----------------------------------------------------------------------------------------------

/// Decode every frame of `path`, checking each one's size.
fn decoded_frames(path: &Path, size: Size) -> usize {
    let mut stream = FileCamStream::open(path).expect("Cannot open the recording");

    assert_eq!(stream.native_size(), size);
    assert_eq!(stream.codec(), codec::Id::MPEG4);

    let fps = stream.native_fps().expect("Recording has no frame rate");
    assert!((fps - RECORD_FPS as f64).abs() < 1e-3, "recorded at {} fps", fps);

    let mut frames = 0;
    while let Ok(frame) = stream.capture() {
        assert_eq!(frame.size(), size);
        frames += 1;

        assert!(frames <= 1000, "{:?} never ends", path);
    }

    frames
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn recorder_writes_playable_mp4_pair() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("stereo");
    let prefix = prefix.to_str().unwrap();

    let writers = StereoWriters::create(RecordFormat::Mp4, prefix, TARGET, RECORD_FPS).unwrap();

    let mut display = HeadlessDisplay::counting()
        .press_char_at(5, 's')
        .press_char_at(15, 'q');

    let stats = record_stereo_video(
        SyntheticCamStream::new(Size::new(1280, 720)),
        SyntheticCamStream::new(Size::new(1280, 720)),
        writers,
        Session::new(TARGET),
        &mut display
    ).unwrap();

    assert_eq!(stats.recorded, 10);
    assert!(display.is_closed());

    let left = RecordFormat::Mp4.output_path(prefix, 'L');
    let right = RecordFormat::Mp4.output_path(prefix, 'R');
    assert!(left.ends_with("stereoL.mp4"));
    assert!(right.ends_with("stereoR.mp4"));

    assert_eq!(decoded_frames(&left, TARGET), 10);
    assert_eq!(decoded_frames(&right, TARGET), 10);
}

#[test]
fn recorder_without_start_key_leaves_empty_but_valid_files() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("idle");
    let prefix = prefix.to_str().unwrap();

    let writers = StereoWriters::create(RecordFormat::Mp4, prefix, TARGET, RECORD_FPS).unwrap();
    let mut display = HeadlessDisplay::counting().press_char_at(3, 'q');

    let stats = record_stereo_video(
        SyntheticCamStream::new(TARGET),
        SyntheticCamStream::new(TARGET),
        writers,
        Session::new(TARGET),
        &mut display
    ).unwrap();

    assert_eq!(stats.recorded, 0);
    assert!(RecordFormat::Mp4.output_path(prefix, 'L').exists());
    assert!(RecordFormat::Mp4.output_path(prefix, 'R').exists());
}
