use recorder::{AudioDevice, AudioSource, PipewireAudioSource};
use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let stop_sig = Arc::new(AtomicBool::new(false));
    let stop_sig_clone = stop_sig.clone();
    ctrlc::set_handler(move || {
        log::debug!("Ctrl-C received, stopping recording...");
        stop_sig_clone.store(true, Ordering::Relaxed);
    })?;

    let source = PipewireAudioSource::open(AudioDevice::DefaultOutputMonitor)?;
    let spec = source.spec();
    log::info!("monitor `{}`, spec: {spec:?}", source.device_name());

    let start = Instant::now();
    let mut total = 0;
    while !stop_sig.load(Ordering::Relaxed) && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(40));

        let bytes = source.pop_accumulated();
        total += bytes.len();
        log::debug!("popped {} bytes", bytes.len());
    }

    log::info!(
        "captured {total} bytes, {:.2}s of audio",
        total as f64 / (spec.bytes_per_frame() * spec.sample_rate as usize) as f64
    );

    Ok(())
}
