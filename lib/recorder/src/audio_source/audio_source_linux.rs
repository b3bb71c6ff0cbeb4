use crate::{
    AudioDevice, PcmAccumulator,
    audio_source::{AudioSource, AudioSourceError, AudioSpec, SampleFormat},
};
use crossbeam::channel::{Sender, bounded};
use pipewire::{
    context::ContextRc,
    core::CoreRc,
    main_loop::MainLoopRc,
    spa::{param::audio::AudioFormat, pod::Pod},
    stream::{StreamBox, StreamFlags, StreamListener},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const SPEC: AudioSpec = AudioSpec {
    format: SampleFormat::F32,
    sample_rate: 48000,
    channels: 2,
};

/// PipeWire capture stream on the default sink monitor or default source.
///
/// The PipeWire main loop lives on its own thread; the stream's process
/// callback appends into a [`PcmAccumulator`].
pub struct PipewireAudioSource {
    device: AudioDevice,
    device_name: String,
    accumulator: PcmAccumulator,
    stop_sig: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PipewireAudioSource {
    pub fn open(device: AudioDevice) -> Result<Self, AudioSourceError> {
        if device == AudioDevice::None {
            return Err(AudioSourceError::NoDevice(device));
        }

        let accumulator = PcmAccumulator::new();
        let stop_sig = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);

        let handle = {
            let accumulator = accumulator.clone();
            let stop_sig = stop_sig.clone();

            thread::spawn(move || {
                if let Err(e) = run_main_loop(device, accumulator, stop_sig, &ready_tx) {
                    log::warn!("audio main loop exit with error: {e}");
                    _ = ready_tx.try_send(Err(e));
                }
            })
        };

        let mut source = Self {
            device,
            device_name: String::default(),
            accumulator,
            stop_sig,
            handle: Some(handle),
        };

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(name)) => {
                log::info!("record audio from `{name}` ({device:?}), spec: {SPEC:?}");
                source.device_name = name;
                Ok(source)
            }
            Ok(Err(e)) => {
                source.stop();
                Err(e)
            }
            Err(_) => {
                source.stop();
                Err(AudioSourceError::Timeout)
            }
        }
    }

    pub fn device(&self) -> AudioDevice {
        self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stops the main loop, waiting at most one second for its thread.
    pub fn stop(&mut self) {
        self.stop_sig.store(true, Ordering::Relaxed);

        let Some(handle) = self.handle.take() else {
            return;
        };

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if handle.is_finished() {
            if let Err(e) = handle.join() {
                log::warn!("join audio main loop thread failed: {e:?}");
            } else {
                log::info!("audio main loop thread exit");
            }
        } else {
            log::warn!("audio main loop thread did not exit in {STOP_TIMEOUT:?}, detach it");
        }
    }
}

impl Drop for PipewireAudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioSource for PipewireAudioSource {
    fn spec(&self) -> AudioSpec {
        SPEC
    }

    fn pop_accumulated(&self) -> Vec<u8> {
        self.accumulator.pop_accumulated()
    }
}

fn pw_err(what: &str) -> impl FnOnce(pipewire::Error) -> AudioSourceError + '_ {
    move |e| AudioSourceError::PipewireError(format!("{what} failed: {e}"))
}

fn run_main_loop(
    device: AudioDevice,
    accumulator: PcmAccumulator,
    stop_sig: Arc<AtomicBool>,
    ready: &Sender<Result<String, AudioSourceError>>,
) -> Result<(), AudioSourceError> {
    pipewire::init();

    let mainloop = MainLoopRc::new(None).map_err(pw_err("MainLoop new"))?;
    let context = ContextRc::new(&mainloop, None).map_err(pw_err("Context new"))?;
    let core = context.connect_rc(None).map_err(pw_err("Context connect"))?;

    let (node_id, node_name) = find_default_node(&mainloop, &core, device)?;

    let stream = create_stream(&core, device)?;
    let _listener = stream_register(&stream, accumulator)?;
    stream_connect(&stream, node_id)?;

    _ = ready.try_send(Ok(node_name));

    while !stop_sig.load(Ordering::Relaxed) {
        mainloop.loop_().iterate(Duration::from_millis(100));
    }

    if let Err(e) = stream.disconnect() {
        log::warn!("audio stream disconnect failed: {e}");
    }

    mainloop.quit();
    Ok(())
}

fn create_stream(core: &CoreRc, device: AudioDevice) -> Result<StreamBox<'_>, AudioSourceError> {
    let stream_props = if device == AudioDevice::DefaultOutputMonitor {
        pipewire::properties::properties! {
            "node.name" => "wincap-audio-capture",
            "media.class" => "Stream/Input/Audio",
            "audio.channels" => "2",
            "audio.rate" => "48000",
            "stream.monitor" => "true"
        }
    } else {
        pipewire::properties::properties! {
            "node.name" => "wincap-audio-capture",
            "media.class" => "Stream/Input/Audio",
            "audio.channels" => "2",
            "audio.rate" => "48000"
        }
    };

    StreamBox::new(core, "wincap-audio-capture", stream_props).map_err(pw_err("New StreamBox"))
}

fn stream_register(
    stream: &StreamBox,
    accumulator: PcmAccumulator,
) -> Result<StreamListener<()>, AudioSourceError> {
    stream
        .add_local_listener::<()>()
        .process(move |stream, _| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                log::warn!("No available audio buffer");
                return;
            };

            for data in buffer.datas_mut() {
                let offset = data.chunk().offset() as usize;
                let size = data.chunk().size() as usize;

                let Some(bytes) = data.data() else {
                    log::warn!("can not get audio data");
                    continue;
                };

                let end = (offset + size).min(bytes.len());
                accumulator.push(&bytes[offset.min(end)..end]);
            }
        })
        .register()
        .map_err(pw_err("stream register"))
}

fn stream_connect(stream: &StreamBox, node_id: u32) -> Result<(), AudioSourceError> {
    let obj = pipewire::spa::pod::object!(
        pipewire::spa::utils::SpaTypes::ObjectParamFormat,
        pipewire::spa::param::ParamType::EnumFormat,
        pipewire::spa::pod::property!(
            pipewire::spa::param::format::FormatProperties::MediaType,
            Id,
            pipewire::spa::param::format::MediaType::Audio
        ),
        pipewire::spa::pod::property!(
            pipewire::spa::param::format::FormatProperties::MediaSubtype,
            Id,
            pipewire::spa::param::format::MediaSubtype::Raw
        ),
        pipewire::spa::pod::property!(
            pipewire::spa::param::format::FormatProperties::AudioFormat,
            Id,
            AudioFormat::F32LE
        ),
        pipewire::spa::pod::property!(
            pipewire::spa::param::format::FormatProperties::AudioRate,
            Int,
            SPEC.sample_rate as i32
        ),
        pipewire::spa::pod::property!(
            pipewire::spa::param::format::FormatProperties::AudioChannels,
            Int,
            SPEC.channels as i32
        ),
    );

    let values: Vec<u8> = pipewire::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pipewire::spa::pod::Value::Object(obj),
    )
    .map_err(|e| AudioSourceError::PipewireError(format!("PodSerializer failed: {e}")))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| AudioSourceError::PipewireError("Pod from bytes is none".to_string()))?];

    stream
        .connect(
            pipewire::spa::utils::Direction::Input,
            Some(node_id),
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS | StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(pw_err("stream connect"))?;

    log::info!("connect audio stream to node {node_id}");
    Ok(())
}

/// Highest `priority.session` node of the class matching `device`.
fn find_default_node(
    mainloop: &MainLoopRc,
    core: &CoreRc,
    device: AudioDevice,
) -> Result<(u32, String), AudioSourceError> {
    let wanted = match device {
        AudioDevice::DefaultInputMonitor => "Audio/Source",
        _ => "Audio/Sink",
    };

    let registry = core.get_registry().map_err(pw_err("Get registry"))?;
    let best: Arc<Mutex<Option<(u32, i32, String)>>> = Arc::new(Mutex::new(None));
    let best_clone = best.clone();

    let _listener = registry
        .add_listener_local()
        .global(move |global| {
            if global.type_ == pipewire::types::ObjectType::Node
                && let Some(props) = &global.props
                && let (Some(media_class), Some(node_name)) =
                    (props.get("media.class"), props.get("node.name"))
                && media_class.starts_with(wanted)
            {
                let priority = props
                    .get("priority.session")
                    .and_then(|p| p.parse::<i32>().ok())
                    .unwrap_or_default();

                let mut best = best_clone.lock().unwrap_or_else(|p| p.into_inner());
                if best.as_ref().is_none_or(|(_, old, _)| *old < priority) {
                    *best = Some((global.id, priority, node_name.to_string()));
                }
            }
        })
        .register();

    for _ in 0..10 {
        mainloop.loop_().iterate(Duration::from_millis(100));
    }

    let found = best.lock().unwrap_or_else(|p| p.into_inner()).take();
    log::info!("default {wanted} node: {found:?}");

    found
        .map(|(id, _, name)| (id, name))
        .ok_or(AudioSourceError::NoDevice(device))
}
