//! # Stereo Camera Test
//!
//! Designed to test stereo camera display with real hardware, run with
//! `cargo test -- --ignored` while two cameras are plugged in.

#![cfg(all(feature = "v4l2", feature = "window"))]

use stereo_camview::prelude::*;
use stereo_camview::WindowDisplay;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

#[test]
#[ignore]
fn stereo() -> Result<(), Box<dyn std::error::Error>> {

    let left = CamStreamBuilder::new()
        .source("/dev/video0".parse()?)?
        .interval((1, 30))
        .resolution((WIDTH, HEIGHT))
        .format(b"MJPG")?
        .build()?;

    let right = CamStreamBuilder::new()
        .source("/dev/video2".parse()?)?
        .interval((1, 30))
        .resolution((WIDTH, HEIGHT))
        .format(b"MJPG")?
        .build()?;

    let mut display = WindowDisplay::new();

    // Press q or Escape to finish
    let stats = show_cameras(left, right, Session::new(Size::new(WIDTH, HEIGHT)), &mut display)?;

    assert!(stats.ticks >= stats.shown);

    Ok(())
}
