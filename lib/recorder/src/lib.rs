//! # Recorder
//!
//! Records a single X11 window (or a region of it) into an MP4 file with an
//! H.264 video stream and an optional AAC stream taken from a PipeWire
//! monitor.
//!
//! ## Quick Start
//!
//! ```no_run
//! use recorder::{AudioDevice, FfmpegSinkFactory, RecorderConfig, RecordingSession, open_audio_source};
//! use screen_capture_x11::X11WindowSource;
//! use std::sync::Arc;
//!
//! let source = Arc::new(X11WindowSource::connect(None).unwrap());
//! let config = RecorderConfig::new(0x3a00007)
//!     .with_fps(30)
//!     .with_audio_device(AudioDevice::DefaultOutputMonitor)
//!     .with_output_template("/tmp/wincap-%H%M%S.mp4");
//!
//! let audio = open_audio_source(config.audio_device).unwrap().map(Arc::from);
//! let factory = FfmpegSinkFactory::new(&config, audio);
//!
//! let mut session = RecordingSession::new(config);
//! session.start(source, factory).unwrap();
//!
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! session.stop();
//!
//! let stats = session.wait().unwrap();
//! println!("{} frames in {:?}", stats.frames_captured, stats.duration);
//! ```
//!
//! ## Architecture
//!
//! One capture thread runs the whole pipeline:
//! 1. **Scheduler**: paces captures, watches the window, restarts on resize
//! 2. **Cursor overlay**: blends the cursor into the captured frame
//! 3. **Synchronizer**: runs an audio tick first while audio is not ahead
//! 4. **Encode pipelines**: convert, encode and drain packets into the muxer
//!
//! Audio samples arrive on the PipeWire thread and are handed over through a
//! [`PcmAccumulator`].
//!
//! ## Modules
//!
//! - [`recorder`]: capture scheduler and session lifecycle
//! - [`recorder_config`]: session parameters
//! - [`encoder_session`]: muxer plus pipelines behind the [`FrameSink`] seam
//! - [`video_encoder`]: H.264 pipeline
//! - [`audio_encoder`]: AAC pipeline
//! - [`audio_source`]: PipeWire capture

pub mod audio_encoder;
pub mod audio_source;
pub mod cursor_overlay;
pub mod encoder_session;
pub mod muxer;
pub mod pcm;
pub mod recorder;
pub mod recorder_config;
pub mod recorder_error;
pub mod stream_clock;
pub mod synchronizer;
pub mod video_encoder;

pub use audio_encoder::{AudioEncodePipeline, PlanarFifo};
pub use audio_source::{
    AudioSource, AudioSourceError, AudioSpec, BufferedAudioSource, SampleFormat,
    open_audio_source,
};
pub use crossbeam::channel::{Receiver, Sender};
pub use cursor_overlay::composite_cursor;
pub use encoder_session::{EncoderSession, FfmpegSinkFactory, FrameSink, SinkFactory, SinkStats};
pub use muxer::{Muxer, init_ffmpeg};
pub use pcm::{AudioTail, PcmAccumulator};
pub use recorder::{RecordingSession, SessionEvent, SessionState, SessionStats};
pub use recorder_config::{AudioDevice, H264Preset, RecorderConfig};
pub use recorder_error::{NativeFailure, RecorderError};
pub use stream_clock::{StreamClock, TimeBase};
pub use synchronizer::Synchronizer;
pub use video_encoder::{VideoEncodeConfig, VideoEncodePipeline};

#[cfg(target_os = "linux")]
pub use audio_source::PipewireAudioSource;
