mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use recorder::{
    AudioDevice, AudioSource, FfmpegSinkFactory, H264Preset, RecordingSession, SessionEvent,
    SessionStats, composite_cursor, init_ffmpeg, open_audio_source,
};
use screen_capture::{Rectangle, WindowId, WindowSource};
use screen_capture_x11::X11WindowSource;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

#[derive(Parser, Debug)]
#[command(version, about = "Record an X11 window into an MP4 file")]
struct Cli {
    /// Config file, defaults to the per-user `wincap.toml`
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// X display to connect to, defaults to `$DISPLAY`
    #[arg(long, global = true)]
    display: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a window until Ctrl-C or `--duration`
    Record(RecordArgs),

    /// List top-level windows, the active one is marked with `*`
    List,

    /// Save one frame of a window as PNG
    Snapshot {
        #[arg(long, value_parser = parse_window_id)]
        window: Option<WindowId>,

        #[arg(long)]
        no_cursor: bool,

        output: PathBuf,
    },

    /// Print the available x264 presets
    Presets,
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    /// Window id, hex (`0x3a00007`) or decimal. Defaults to the active window
    #[arg(long, value_parser = parse_window_id, conflicts_with = "root")]
    window: Option<WindowId>,

    /// Record the whole screen
    #[arg(long)]
    root: bool,

    /// Part of the window to record, `WxH+X+Y`
    #[arg(long, value_parser = parse_region)]
    region: Option<Rectangle>,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long)]
    preset: Option<H264Preset>,

    /// kbit/s
    #[arg(long)]
    video_bitrate: Option<u32>,

    /// kbit/s
    #[arg(long)]
    audio_bitrate: Option<u32>,

    /// `none`, `output` or `input`
    #[arg(long)]
    audio: Option<AudioDevice>,

    /// Output path, strftime escapes are expanded
    #[arg(short, long, value_name = "TEMPLATE")]
    output: Option<String>,

    #[arg(long)]
    no_cursor: bool,

    /// Only capture while the window has the input focus
    #[arg(long)]
    focused_only: bool,

    /// Capture the window directly instead of its offscreen pixmap
    #[arg(long)]
    no_composite: bool,

    /// Include the window manager frame
    #[arg(long)]
    decorations: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Transfer pixels with GetImage only
    #[arg(long)]
    no_shm: bool,
}

fn parse_window_id(s: &str) -> Result<WindowId, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => WindowId::from_str_radix(hex, 16),
        None => s.parse::<WindowId>(),
    };

    match parsed {
        Ok(0) => Err("window id must not be 0".to_string()),
        Ok(id) => Ok(id),
        Err(e) => Err(format!("invalid window id `{s}`: {e}")),
    }
}

fn parse_region(s: &str) -> Result<Rectangle, String> {
    let invalid = || format!("invalid region `{s}`, expected WxH+X+Y");

    let (size, offset) = s.split_once('+').ok_or_else(invalid)?;
    let (w, h) = size.split_once('x').ok_or_else(invalid)?;
    let (x, y) = offset.split_once('+').ok_or_else(invalid)?;

    let num = |v: &str| v.trim().parse::<i32>().map_err(|_| invalid());
    let region = Rectangle::new(num(x)?, num(y)?, num(w)?, num(h)?);

    if region.is_empty() || region.x < 0 || region.y < 0 {
        return Err(invalid());
    }

    Ok(region)
}

fn init_logger() {
    use std::io::Write;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            let ts = chrono::Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "[{} {style}{}{style:#} {} {}] {}",
                ts,
                record.level(),
                record
                    .file()
                    .unwrap_or("None")
                    .split('/')
                    .next_back()
                    .unwrap_or("None"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}

fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Command::Record(ref args) => record(&cli, args),
        Command::List => list(&cli),
        Command::Snapshot {
            window,
            no_cursor,
            ref output,
        } => snapshot(&cli, window, !no_cursor, output),
        Command::Presets => {
            for preset in H264Preset::all() {
                let marker = if preset == H264Preset::default() { "*" } else { " " };
                println!("{marker} {preset}");
            }
            Ok(())
        }
    }
}

fn connect(cli: &Cli, prefer_shm: bool) -> Result<X11WindowSource> {
    let source = X11WindowSource::connect_with(cli.display.as_deref(), prefer_shm)
        .context("connect to X server failed")?;
    log::info!(
        "capture backend: {:?}, extensions: {:?}",
        source.backend_kind(),
        source.extensions()
    );
    Ok(source)
}

fn target_window(source: &X11WindowSource, window: Option<WindowId>, root: bool) -> Result<WindowId> {
    if root {
        return Ok(source.root_window());
    }

    match window {
        Some(window) => Ok(window),
        None => source
            .active_window()?
            .context("no active window, pass --window or --root"),
    }
}

fn record(cli: &Cli, args: &RecordArgs) -> Result<()> {
    let mut settings = Config::load(cli.config.as_deref())?;
    apply_overrides(&mut settings, args);

    let source = Arc::new(connect(cli, !args.no_shm)?);
    let window = target_window(&source, args.window, args.root)?;

    let mut config = settings.recorder_config(window);
    if let Some(region) = args.region {
        config = config.with_region(region);
    }
    config.validate()?;

    init_ffmpeg()?;

    let audio: Option<Arc<dyn AudioSource>> = match open_audio_source(config.audio_device) {
        Ok(source) => source.map(Arc::from),
        Err(e) => {
            log::warn!("open audio {:?} failed, record without audio: {e}", config.audio_device);
            None
        }
    };

    let factory = FfmpegSinkFactory::new(&config, audio);
    let mut session = RecordingSession::new(config);
    let events = session.events();

    let stop_sig = session.get_stop_sig();
    ctrlc::set_handler(move || {
        log::info!("Ctrl-C, stopping");
        stop_sig.store(true, Ordering::Relaxed);
    })?;

    session.start(source, factory)?;
    log::info!("recording window {window:#x}");

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    while !session.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            session.stop();
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => log_event(&event),
            Err(e) if e.is_disconnected() => break,
            Err(_) => {}
        }
    }

    events.try_iter().for_each(|event| log_event(&event));

    let stats = session.wait()?;
    print_summary(&stats);
    Ok(())
}

fn apply_overrides(settings: &mut Config, args: &RecordArgs) {
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    if let Some(preset) = args.preset {
        settings.preset = preset;
    }
    if let Some(bitrate) = args.video_bitrate {
        settings.video_bitrate = bitrate;
    }
    if let Some(bitrate) = args.audio_bitrate {
        settings.audio_bitrate = bitrate;
    }
    if let Some(device) = args.audio {
        settings.audio_device = device;
    }
    if let Some(ref output) = args.output {
        settings.output_template = output.clone();
    }

    settings.include_cursor &= !args.no_cursor;
    settings.composite &= !args.no_composite;
    settings.focused_only |= args.focused_only;
    settings.include_decorations |= args.decorations;
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { path, region } => {
            log::info!("started `{}`, region {region:?}", path.display())
        }
        SessionEvent::Restarted { path, reason, .. } => {
            log::info!("restarted into `{}`: {reason}", path.display())
        }
        SessionEvent::Stopped(stats) => log::info!(
            "stopped after {:.1}s, {} frames",
            stats.duration.as_secs_f64(),
            stats.frames_captured
        ),
        SessionEvent::Failed(e) => log::warn!("recording failed: {e}"),
    }
}

fn print_summary(stats: &SessionStats) {
    println!(
        "{} frames captured, {} skipped, {} restarts, {:.1}s",
        stats.frames_captured,
        stats.frames_skipped,
        stats.restarts,
        stats.duration.as_secs_f64()
    );

    for file in &stats.files {
        println!(
            "  {}: {} frames, {} audio samples",
            file.path.display(),
            file.frames_encoded,
            file.audio_samples_encoded
        );
    }
}

fn list(cli: &Cli) -> Result<()> {
    let source = connect(cli, false)?;
    let active = source.active_window().ok().flatten();

    for info in source.list_windows()? {
        let marker = if Some(info.id) == active { "*" } else { " " };
        println!("{marker} {:#010x} {}", info.id, info.label());
    }

    Ok(())
}

fn snapshot(
    cli: &Cli,
    window: Option<WindowId>,
    include_cursor: bool,
    output: &Path,
) -> Result<()> {
    let source = connect(cli, true)?;
    let window = target_window(&source, window, false)?;

    let geometry = source.geometry(window)?;
    let region = Rectangle::from_size(geometry.size());
    if region.is_empty() {
        bail!("window {window:#x} has no visible area");
    }

    let mut frame = source.capture_region(window, region)?;
    if include_cursor {
        let absolute = region.translate(geometry.x, geometry.y);
        if let Some(cursor) = source.cursor_image(absolute) {
            composite_cursor(&mut frame, &cursor, absolute.origin());
        }
    }

    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba())
        .context("frame size does not match its pixel data")?;
    image
        .save(output)
        .with_context(|| format!("save `{}` failed", output.display()))?;

    println!("{}x{} -> {}", frame.width, frame.height, output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_id() {
        assert_eq!(parse_window_id("0x3a00007"), Ok(0x3a00007));
        assert_eq!(parse_window_id("0X3A00007"), Ok(0x3a00007));
        assert_eq!(parse_window_id("60817415"), Ok(60817415));
        assert!(parse_window_id("0").is_err());
        assert!(parse_window_id("0xzz").is_err());
        assert!(parse_window_id("").is_err());
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(parse_region("640x480+10+20"), Ok(Rectangle::new(10, 20, 640, 480)));
        assert!(parse_region("640x480").is_err());
        assert!(parse_region("0x480+0+0").is_err());
        assert!(parse_region("640x480+-1+0").is_err());
        assert!(parse_region("axb+0+0").is_err());
    }

    #[test]
    fn test_record_args() {
        let cli = Cli::try_parse_from([
            "wincap",
            "record",
            "--window",
            "0x1200003",
            "--fps",
            "30",
            "--preset",
            "veryfast",
            "--audio",
            "output",
            "--region",
            "100x50+0+0",
            "--no-cursor",
            "-o",
            "/tmp/out.mp4",
        ])
        .unwrap();

        let Command::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.window, Some(0x1200003));
        assert_eq!(args.fps, Some(30));
        assert_eq!(args.preset, Some(H264Preset::VeryFast));
        assert_eq!(args.audio, Some(AudioDevice::DefaultOutputMonitor));
        assert_eq!(args.region, Some(Rectangle::new(0, 0, 100, 50)));

        let mut settings = Config::default();
        apply_overrides(&mut settings, &args);
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.output_template, "/tmp/out.mp4");
        assert!(!settings.include_cursor);
        assert!(settings.composite);
    }

    #[test]
    fn test_window_and_root_conflict() {
        assert!(Cli::try_parse_from(["wincap", "record", "--root", "--window", "0x10"]).is_err());
        assert!(Cli::try_parse_from(["wincap", "--display", ":1", "record", "--root"]).is_ok());
    }

    #[test]
    fn test_snapshot_needs_output() {
        assert!(Cli::try_parse_from(["wincap", "snapshot"]).is_err());

        let cli = Cli::try_parse_from(["wincap", "snapshot", "shot.png"]).unwrap();
        assert!(matches!(cli.command, Command::Snapshot { window: None, .. }));
    }
}
