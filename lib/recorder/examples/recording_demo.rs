use recorder::{
    AudioDevice, AudioSource, FfmpegSinkFactory, RecorderConfig, RecordingSession, SessionEvent,
    open_audio_source,
};
use screen_capture::WindowSource;
use screen_capture_x11::X11WindowSource;
use std::{
    error::Error,
    sync::{Arc, atomic::Ordering},
    thread,
    time::Duration,
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let source = Arc::new(X11WindowSource::connect(None)?);
    let window = match source.active_window()? {
        Some(window) => window,
        None => source.root_window(),
    };

    log::info!("recording window {window:#x} for 5 seconds...");

    let config = RecorderConfig::new(window)
        .with_fps(30)
        .with_output_template("/tmp/wincap-demo-%H%M%S.mp4")
        .with_audio_device(AudioDevice::DefaultOutputMonitor);

    let audio: Option<Arc<dyn AudioSource>> = match open_audio_source(config.audio_device) {
        Ok(audio) => audio.map(Arc::from),
        Err(e) => {
            log::warn!("record without audio: {e}");
            None
        }
    };

    let factory = FfmpegSinkFactory::new(&config, audio);
    let mut session = RecordingSession::new(config);
    session.start(source, factory)?;

    let stop_sig = session.get_stop_sig();
    ctrlc::set_handler(move || {
        log::info!("Ctrl-C received, stopping recording...");
        stop_sig.store(true, Ordering::Relaxed);
    })?;

    let stop_sig = session.get_stop_sig();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(5));
        log::info!("5 seconds elapsed, stopping recording...");
        stop_sig.store(true, Ordering::Relaxed);
    });

    let events = session.events();
    thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                SessionEvent::Started { path, region } => {
                    log::info!("started `{}` {region:?}", path.display())
                }
                SessionEvent::Restarted { path, reason, .. } => {
                    log::info!("restarted into `{}`: {reason}", path.display())
                }
                SessionEvent::Stopped(_) => log::info!("stopped"),
                SessionEvent::Failed(e) => log::warn!("failed: {e}"),
            }
        }
    });

    let stats = session.wait()?;
    for file in &stats.files {
        log::info!(
            "saved `{}`: {} frames, {} audio samples",
            file.path.display(),
            file.frames_encoded,
            file.audio_samples_encoded
        );
    }

    Ok(())
}
