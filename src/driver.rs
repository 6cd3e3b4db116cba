//! # Driver Module
//!
//! The viewer and recorder loops, and the `run` entry point which opens everything a mode needs
//! and dispatches to it.
//!
//! Every loop polls its sources once per tick, sequentially, and only uses a tick's frames if
//! every read of that tick succeeded. A failed read drops the whole tick, nothing is carried
//! over to the next one. Keys are polled once per tick after the frames have been handled.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

use derive_more::Display;

use crate::builder::{CamStreamBuilder, Rectifiable, StereoRectifierBuilder};
use crate::camstream::{CamStream, Source};
use crate::display::{DisplaySink, Key};
use crate::error::{Error, Result};
use crate::frame::{Frame, PixelFormat, Size};
use crate::record::{RecordFormat, StereoWriters, RECORD_FPS};
use crate::rectification::{draw_horizontal_lines, Rectify};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

pub const MONO_WINDOW: &str = "single camera";
pub const STEREO_WINDOW: &str = "stereo cameras";
pub const RECTIFIED_WINDOW: &str = "rectified stereo cameras";

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// The available run modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Mode {
    /// Show one source
    #[display(fmt = "mono")]
    Mono,

    /// Show two sources side by side
    #[display(fmt = "stereo")]
    Stereo,

    /// Show the rectified grayscale pair
    #[display(fmt = "rectified")]
    Rectified,

    /// Show both the grayscale pair and the rectified pair
    #[display(fmt = "all")]
    All,

    /// Show two sources and record them on request
    #[display(fmt = "record")]
    Record,
}

/// What the user asked for with a key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Quit,
    StartRecording,
}

/// State of the recorder. There is no way back to `Idle` once recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Idle,
    Recording,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Capture settings applied to V4L2 devices.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub resolution: Size,
    pub fps: u32,
    pub format: PixelFormat,
}

/// Everything needed to run a mode.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: Mode,

    pub left: Source,
    pub right: Option<Source>,

    /// Size every frame is resized to before being shown or written
    pub size: Size,

    pub capture: CaptureSettings,

    /// Rectification parameter file, needed by the rectified and all modes
    pub calibration: Option<PathBuf>,

    /// Recording output prefix
    pub output: String,
    pub format: RecordFormat,

    /// Stop after this many ticks even without a quit key
    pub max_ticks: Option<u64>,
}

/// Settings shared by every loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    pub size: Size,
    pub max_ticks: Option<u64>,
}

/// Counters from a finished loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Loop iterations
    pub ticks: u64,

    /// Ticks where every read succeeded and the frames were shown
    pub shown: u64,

    /// Ticks dropped because a read failed
    pub skipped: u64,

    /// Frames written per output, only non-zero for the recorder
    pub recorded: u64,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Mode {

    /// Whether the mode needs a right hand source.
    pub fn is_stereo(&self) -> bool {
        !matches!(self, Mode::Mono)
    }

    /// Whether the mode needs calibration parameters.
    pub fn needs_calibration(&self) -> bool {
        matches!(self, Mode::Rectified | Mode::All)
    }
}

impl Control {

    /// `q`, escape and closing the window quit, `s` starts recording.
    pub fn from_key(key: Key) -> Option<Control> {
        match key {
            Key::Char('q') | Key::Escape | Key::Closed => Some(Control::Quit),
            Key::Char('s') => Some(Control::StartRecording),
            _ => None
        }
    }
}

impl RecordState {

    /// Apply a control, returning the next state or `None` if the recorder should stop.
    pub fn apply(self, control: Control) -> Option<RecordState> {
        match control {
            Control::Quit => None,
            Control::StartRecording => Some(RecordState::Recording),
        }
    }

    pub fn is_recording(&self) -> bool {
        *self == RecordState::Recording
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            resolution: Size::new(640, 480),
            fps: 30,
            format: PixelFormat::Mjpg,
        }
    }
}

impl Session {
    pub fn new(size: Size) -> Self {
        Self { size, max_ticks: None }
    }

    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;

        self
    }

    fn is_done(&self, ticks: u64) -> bool {
        self.max_ticks.map_or(false, |m| ticks >= m)
    }
}

impl RunConfig {
    pub fn session(&self) -> Session {
        Session::new(self.size).with_max_ticks(self.max_ticks)
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Open the sources and sinks `config` asks for and run its mode until it stops.
pub fn run(config: &RunConfig, display: &mut dyn DisplaySink) -> Result<LoopStats> {
    let session = config.session();

    let left = open_source(config, &config.left, "left")?;

    match config.mode {
        Mode::Mono => {
            log::info!("resized to: {}", config.size);
            show_camera(left, session, display)
        },
        Mode::Stereo => {
            let right = open_right(config)?;
            show_cameras(left, right, session, display)
        },
        Mode::Rectified => {
            let right = open_right(config)?;
            let rectifier = open_rectifier(config)?;
            show_rectified_cameras(left, right, &rectifier, session, display)
        },
        Mode::All => {
            let right = open_right(config)?;
            let rectifier = open_rectifier(config)?;
            show_all(left, right, &rectifier, session, display)
        },
        Mode::Record => {
            let right = open_right(config)?;
            let writers = StereoWriters::create(
                config.format,
                &config.output,
                config.size,
                RECORD_FPS
            )?;
            let stats = record_stereo_video(left, right, writers, session, display)?;

            log::info!(
                "videos {} and {} saved",
                config.format.output_path(&config.output, 'L').display(),
                config.format.output_path(&config.output, 'R').display()
            );

            Ok(stats)
        },
    }
}

/// Show a single source.
pub fn show_camera<C: CamStream>(
    mut source: C,
    session: Session,
    display: &mut dyn DisplaySink
) -> Result<LoopStats> {
    let result = drive(session, display, |display| {
        match source.capture() {
            Ok(frame) => {
                display.show(MONO_WINDOW, &frame.resize(session.size))?;
                Ok(true)
            },
            Err(e) => {
                log::trace!("Dropping tick: {}", e);
                Ok(false)
            }
        }
    });

    close(display, result)
}

/// Show two sources side by side.
pub fn show_cameras<L: CamStream, R: CamStream>(
    mut left: L,
    mut right: R,
    session: Session,
    display: &mut dyn DisplaySink
) -> Result<LoopStats> {
    let result = drive(session, display, |display| {
        let (l, r) = match capture_pair(&mut left, &mut right) {
            Some(pair) => pair,
            None => return Ok(false)
        };

        let (l, r) = (l.resize(session.size), r.resize(session.size));
        display.show(STEREO_WINDOW, &Frame::hstack(&l, &r)?)?;

        Ok(true)
    });

    close(display, result)
}

/// Show the rectified grayscale pair with horizontal reference lines.
pub fn show_rectified_cameras<L: CamStream, R: CamStream>(
    mut left: L,
    mut right: R,
    rectifier: &dyn Rectify,
    session: Session,
    display: &mut dyn DisplaySink
) -> Result<LoopStats> {
    let result = drive(session, display, |display| {
        let (l, r) = match capture_pair(&mut left, &mut right) {
            Some(pair) => pair,
            None => return Ok(false)
        };

        let (l, r) = gray_pair(&l, &r, session.size);
        let (lr, rr) = rectify_pair(rectifier, &l, &r)?;
        display.show(RECTIFIED_WINDOW, &Frame::hstack(&lr, &rr)?)?;

        Ok(true)
    });

    close(display, result)
}

/// Show the grayscale pair and the rectified pair in two windows.
pub fn show_all<L: CamStream, R: CamStream>(
    mut left: L,
    mut right: R,
    rectifier: &dyn Rectify,
    session: Session,
    display: &mut dyn DisplaySink
) -> Result<LoopStats> {
    let result = drive(session, display, |display| {
        let (l, r) = match capture_pair(&mut left, &mut right) {
            Some(pair) => pair,
            None => return Ok(false)
        };

        let (l, r) = gray_pair(&l, &r, session.size);
        let (lr, rr) = rectify_pair(rectifier, &l, &r)?;

        display.show(STEREO_WINDOW, &Frame::hstack(&l, &r)?)?;
        display.show(RECTIFIED_WINDOW, &Frame::hstack(&lr, &rr)?)?;

        Ok(true)
    });

    close(display, result)
}

/// Show two sources side by side, recording them once `s` has been pressed.
///
/// The writers are finished on every exit path, whether or not anything was recorded.
pub fn record_stereo_video<L: CamStream, R: CamStream>(
    mut left: L,
    mut right: R,
    mut writers: StereoWriters,
    session: Session,
    display: &mut dyn DisplaySink
) -> Result<LoopStats> {
    log::info!("press s to start recording...");

    let mut state = RecordState::Idle;
    let mut stats = LoopStats::default();

    let result = (|| -> Result<()> {
        while !session.is_done(stats.ticks) {
            stats.ticks += 1;

            match capture_pair(&mut left, &mut right) {
                Some((l, r)) => {
                    let (l, r) = (l.resize(session.size), r.resize(session.size));
                    display.show(STEREO_WINDOW, &Frame::hstack(&l, &r)?)?;
                    stats.shown += 1;

                    if state.is_recording() {
                        writers.write(&l, &r)?;
                    }
                },
                None => stats.skipped += 1
            }

            let control = match display.wait_key()? {
                Some(key) => Control::from_key(key),
                None => None
            };

            if let Some(control) = control {
                match state.apply(control) {
                    Some(next) => {
                        if next != state {
                            log::info!("Recording started at tick {}", stats.ticks);
                        }
                        state = next;
                    },
                    None => break
                }
            }
        }

        Ok(())
    })();

    let finished = writers.finish();
    let closed = display.close();

    result?;
    let (frames_left, frames_right) = finished?;
    closed?;

    log::info!("Recording closed, {} left and {} right frames", frames_left, frames_right);

    stats.recorded = frames_left.min(frames_right);

    Ok(stats)
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Run `tick` until a quit key is pressed or the session's tick limit is hit.
///
/// `tick` returns whether it showed anything.
fn drive<F>(session: Session, display: &mut dyn DisplaySink, mut tick: F) -> Result<LoopStats>
where
    F: FnMut(&mut dyn DisplaySink) -> Result<bool>
{
    let mut stats = LoopStats::default();

    while !session.is_done(stats.ticks) {
        stats.ticks += 1;

        if tick(display)? {
            stats.shown += 1;
        }
        else {
            stats.skipped += 1;
        }

        if let Some(Control::Quit) = display.wait_key()?.and_then(Control::from_key) {
            break;
        }
    }

    Ok(stats)
}

/// Close the display whatever the result of the loop, returning the loop's error first.
fn close(display: &mut dyn DisplaySink, result: Result<LoopStats>) -> Result<LoopStats> {
    let closed = display.close();
    let stats = result?;
    closed?;

    log::debug!(
        "Stopped after {} ticks, {} shown, {} dropped",
        stats.ticks,
        stats.shown,
        stats.skipped
    );

    Ok(stats)
}

/// Read both sources, returning the pair only if both reads succeeded.
fn capture_pair<L: CamStream, R: CamStream>(left: &mut L, right: &mut R) -> Option<(Frame, Frame)> {
    let l = left.capture();
    let r = right.capture();

    match (l, r) {
        (Ok(l), Ok(r)) => Some((l, r)),
        (l, r) => {
            if let Err(e) = l {
                log::trace!("Dropping tick, left read failed: {}", e);
            }
            if let Err(e) = r {
                log::trace!("Dropping tick, right read failed: {}", e);
            }
            None
        }
    }
}

/// Convert to grayscale, then resize.
fn gray_pair(left: &Frame, right: &Frame, size: Size) -> (Frame, Frame) {
    (left.to_gray().resize(size), right.to_gray().resize(size))
}

fn rectify_pair(rectifier: &dyn Rectify, left: &Frame, right: &Frame) -> Result<(Frame, Frame)> {
    let (l, r) = rectifier.undistort_rectify(left, right)?;

    Ok((draw_horizontal_lines(l), draw_horizontal_lines(r)))
}

fn open_source(config: &RunConfig, source: &Source, side: &str) -> Result<Box<dyn CamStream>> {
    let stream = CamStreamBuilder::new()
        .source(source.clone())?
        .interval((1, config.capture.fps))
        .resolution((config.capture.resolution.width, config.capture.resolution.height))
        .format(config.capture.format.fourcc())?
        .build()?;

    match stream.native_fps() {
        Some(fps) => log::info!("{} {}: {} @ {} fps", side, source, stream.native_size(), fps),
        None => log::info!("{} {}: {}", side, source, stream.native_size()),
    }

    Ok(stream)
}

/// Open the right hand source of a stereo mode.
fn open_right(config: &RunConfig) -> Result<Box<dyn CamStream>> {
    let source = config.right.as_ref().ok_or(Error::MissingSource("right"))?;
    let right = open_source(config, source, "right")?;
    log::info!("resized to: {}", config.size);

    Ok(right)
}

fn open_rectifier(config: &RunConfig) -> Result<impl Rectify> {
    let path = config.calibration.as_ref().ok_or(Error::MissingCalibration)?;

    log::info!("Loading calibration from {:?}", path);

    StereoRectifierBuilder::new(config.size)
        .rectif_params_from_file(path)?
        .build()
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn keys_map_to_controls() {
        assert_eq!(Control::from_key(Key::Char('q')), Some(Control::Quit));
        assert_eq!(Control::from_key(Key::Escape), Some(Control::Quit));
        assert_eq!(Control::from_key(Key::Closed), Some(Control::Quit));
        assert_eq!(Control::from_key(Key::Char('s')), Some(Control::StartRecording));
        assert_eq!(Control::from_key(Key::Char('x')), None);
    }

    #[test]
    fn record_state_never_returns_to_idle() {
        let s = RecordState::Idle;
        assert!(!s.is_recording());

        let s = s.apply(Control::StartRecording).unwrap();
        assert!(s.is_recording());
        assert_eq!(s.apply(Control::StartRecording), Some(RecordState::Recording));

        assert_eq!(RecordState::Idle.apply(Control::Quit), None);
        assert_eq!(RecordState::Recording.apply(Control::Quit), None);
    }

    #[test]
    fn mode_requirements() {
        assert!(!Mode::Mono.is_stereo());
        assert!(Mode::Record.is_stereo());
        assert!(Mode::All.needs_calibration());
        assert!(!Mode::Stereo.needs_calibration());
        assert_eq!(Mode::Rectified.to_string(), "rectified");
    }

    #[test]
    fn session_tick_limit() {
        let s = Session::new(Size::new(1, 1));
        assert!(!s.is_done(1_000_000));

        let s = s.with_max_ticks(Some(3));
        assert!(!s.is_done(2));
        assert!(s.is_done(3));
    }
}
