//! stereo-camview - view, rectify and record one or two camera streams
//!
//! Keys: `q` quits, `s` starts recording in record mode.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use stereo_camview::{
    run, CaptureSettings, DisplaySink, HeadlessDisplay, Mode, PixelFormat, RecordFormat,
    RunConfig, Size, Source,
};

/// MP4 needs FFmpeg, fall back to image sequences without it.
const DEFAULT_FORMAT: &str = if cfg!(feature = "ffmpeg") { "mp4" } else { "png" };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
enum ModeArg {
    /// Show the left source only
    Mono,
    /// Show both sources side by side
    Stereo,
    /// Show the rectified pair
    Rectified,
    /// Show the raw and rectified pairs
    All,
    /// Show both sources and record them after `s` is pressed
    Record,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    mode: ModeArg,

    /// Left (or only) source: a device index, a /dev path, a video file or stub://WxH.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_LEFT", default_value = "0")]
    left: String,

    /// Right source, required by every mode except mono.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_RIGHT")]
    right: Option<String>,

    /// Width frames are resized to.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_WIDTH", default_value_t = 640)]
    width: u32,

    /// Height frames are resized to.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_HEIGHT", default_value_t = 480)]
    height: u32,

    /// Stereo rectification parameter file (TOML, YAML, JSON ...).
    #[arg(long, global = true, env = "STEREO_CAMVIEW_CALIBRATION")]
    calibration: Option<PathBuf>,

    /// Recording output prefix, outputs are <prefix>L and <prefix>R.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_OUTPUT", default_value = "stereo")]
    output: String,

    /// Recording format: png, or mp4 when built with the `ffmpeg` feature.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_FORMAT", default_value = DEFAULT_FORMAT)]
    format: String,

    /// Resolution requested from camera devices.
    #[arg(
        long,
        global = true,
        env = "STEREO_CAMVIEW_CAPTURE_RESOLUTION",
        default_value = "640x480"
    )]
    capture_resolution: String,

    /// Frame rate requested from camera devices.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_FPS", default_value_t = 30)]
    fps: u32,

    /// Pixel format requested from camera devices: MJPG or YUYV.
    #[arg(long, global = true, env = "STEREO_CAMVIEW_FOURCC", default_value = "MJPG")]
    fourcc: String,

    /// Run without opening any window.
    #[arg(long, global = true)]
    headless: bool,

    /// Stop after this many ticks.
    #[arg(long, global = true)]
    max_ticks: Option<u64>,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Mono => Mode::Mono,
            ModeArg::Stereo => Mode::Stereo,
            ModeArg::Rectified => Mode::Rectified,
            ModeArg::All => Mode::All,
            ModeArg::Record => Mode::Record,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = run_config(&args)?;

    if args.headless && config.max_ticks.is_none() {
        return Err(anyhow!("--headless needs --max-ticks, there is no way to press q"));
    }

    let mut display = open_display(args.headless)?;

    let stats = run(&config, display.as_mut())
        .with_context(|| format!("{} mode failed", config.mode))?;

    log::info!(
        "{} ticks, {} shown, {} dropped, {} recorded",
        stats.ticks,
        stats.shown,
        stats.skipped,
        stats.recorded
    );

    Ok(())
}

fn run_config(args: &Args) -> Result<RunConfig> {
    let mode = Mode::from(args.mode);

    let left: Source = args.left.parse().context("invalid --left")?;
    let right = match &args.right {
        Some(r) => Some(r.parse::<Source>().context("invalid --right")?),
        None if mode.is_stereo() => return Err(anyhow!("{} mode needs --right", mode)),
        None => None,
    };

    if mode.needs_calibration() && args.calibration.is_none() {
        return Err(anyhow!("{} mode needs --calibration", mode));
    }

    if args.width == 0 || args.height == 0 {
        return Err(anyhow!("--width and --height must be >= 1"));
    }

    if args.fps == 0 {
        return Err(anyhow!("--fps must be >= 1"));
    }

    let format = PixelFormat::from_fourcc(args.fourcc.to_ascii_uppercase().as_bytes())
        .ok_or_else(|| anyhow!("unsupported --fourcc {:?}", args.fourcc))?;

    Ok(RunConfig {
        mode,
        left,
        right,
        size: Size::new(args.width, args.height),
        capture: CaptureSettings {
            resolution: args
                .capture_resolution
                .parse()
                .context("invalid --capture-resolution")?,
            fps: args.fps,
            format,
        },
        calibration: args.calibration.clone(),
        output: args.output.clone(),
        format: args.format.parse::<RecordFormat>().context("invalid --format")?,
        max_ticks: args.max_ticks,
    })
}

#[cfg(feature = "window")]
fn open_display(headless: bool) -> Result<Box<dyn DisplaySink>> {
    if headless {
        Ok(Box::new(HeadlessDisplay::counting()))
    }
    else {
        Ok(Box::new(stereo_camview::WindowDisplay::new()))
    }
}

#[cfg(not(feature = "window"))]
fn open_display(headless: bool) -> Result<Box<dyn DisplaySink>> {
    if !headless {
        log::warn!("Built without the window feature, running headless");
    }

    Ok(Box::new(HeadlessDisplay::counting()))
}

#[cfg(test)]
mod tests {

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("stereo-camview").chain(args.iter().copied()))
            .expect("Cannot parse arguments")
    }

    #[test]
    fn mode_is_a_subcommand_with_global_flags() {
        let args = parse(&["stereo", "--right", "2", "--width", "320"]);
        assert_eq!(args.mode, ModeArg::Stereo);
        assert_eq!(args.right.as_deref(), Some("2"));
        assert_eq!(args.width, 320);

        let args = parse(&["--left", "stub://64x48", "mono"]);
        assert_eq!(args.mode, ModeArg::Mono);
        assert_eq!(args.left, "stub://64x48");

        assert!(Args::try_parse_from(["stereo-camview", "sideways"]).is_err());
    }

    #[test]
    fn default_recording_format_needs_no_missing_backend() {
        let config = run_config(&parse(&["record", "--right", "stub://8x8"])).unwrap();

        if cfg!(feature = "ffmpeg") {
            assert_eq!(config.format, RecordFormat::Mp4);
        }
        else {
            assert_eq!(config.format, RecordFormat::Png);
        }
    }

    #[test]
    fn stereo_modes_need_their_inputs() {
        assert!(run_config(&parse(&["stereo"])).is_err());
        assert!(run_config(&parse(&["rectified", "--right", "1"])).is_err());
        assert!(run_config(&parse(&["mono", "--width", "0"])).is_err());
        assert!(run_config(&parse(&["mono", "--fourcc", "H264"])).is_err());
    }
}
