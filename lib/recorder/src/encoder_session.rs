use crate::{
    H264Preset, RecorderConfig, RecorderError,
    audio_encoder::AudioEncodePipeline,
    audio_source::AudioSource,
    muxer::Muxer,
    synchronizer::Synchronizer,
    video_encoder::{VideoEncodeConfig, VideoEncodePipeline},
};
use screen_capture::FrameBuffer;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Totals of one output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub path: PathBuf,
    pub frames_encoded: u64,
    pub audio_samples_encoded: u64,
    pub packets_per_stream: Vec<u64>,

    /// Audio ticks run before a video frame, and those postponed because
    /// audio was ahead
    pub audio_ticks: u64,
    pub audio_deferred: u64,
}

/// Consumer of captured frames for one output file.
pub trait FrameSink {
    fn encode(&mut self, frame: &FrameBuffer) -> Result<(), RecorderError>;

    /// Flushes everything still buffered and closes the file.
    fn finish(self: Box<Self>) -> Result<SinkStats, RecorderError>;
}

/// Opens a [`FrameSink`] per session. Called on the capture thread, once at
/// start and again on every restart.
pub trait SinkFactory: Send {
    fn open(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn FrameSink>, RecorderError>;
}

/// Video and optional audio pipelines sharing one container.
///
/// The container is created first, both pipelines register their streams in
/// it, and only then is the header written.
pub struct EncoderSession {
    muxer: Muxer,
    video: VideoEncodePipeline,
    audio: Option<(AudioEncodePipeline, Arc<dyn AudioSource>)>,
    sync: Synchronizer,
}

impl EncoderSession {
    pub fn open(
        path: &Path,
        video: VideoEncodeConfig,
        audio: Option<(Arc<dyn AudioSource>, u32)>,
    ) -> Result<Self, RecorderError> {
        let mut muxer = Muxer::create(path)?;
        let video = VideoEncodePipeline::start(&mut muxer, video)?;

        let audio = match audio {
            Some((source, bitrate)) => {
                let pipeline = AudioEncodePipeline::start(&mut muxer, source.spec(), bitrate)?;

                let stale = source.pop_accumulated().len();
                if stale > 0 {
                    log::debug!("discard {stale} bytes of audio captured before the session");
                }

                Some((pipeline, source))
            }
            None => None,
        };

        muxer.write_header()?;

        Ok(Self {
            muxer,
            video,
            audio,
            sync: Synchronizer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.muxer.path()
    }

    pub fn video(&self) -> &VideoEncodePipeline {
        &self.video
    }

    pub fn audio(&self) -> Option<&AudioEncodePipeline> {
        self.audio.as_ref().map(|(pipeline, _)| pipeline)
    }

    /// Runs one audio tick when audio is not ahead, then encodes `frame`.
    pub fn encode_frame(&mut self, frame: &FrameBuffer) -> Result<i64, RecorderError> {
        if let Some((pipeline, source)) = self.audio.as_mut()
            && self.sync.before_video(Some(pipeline.clock()), self.video.clock())
        {
            let bytes = source.pop_accumulated();
            pipeline.encode(&mut self.muxer, &bytes)?;
        }

        self.video.encode(
            &mut self.muxer,
            &frame.pixel_data,
            frame.bytes_per_line,
            frame.height,
        )
    }

    /// Flushes video then audio, and writes the trailer.
    pub fn close(mut self) -> Result<SinkStats, RecorderError> {
        if let Some((pipeline, source)) = self.audio.as_mut() {
            let bytes = source.pop_accumulated();
            pipeline.encode(&mut self.muxer, &bytes)?;
        }

        self.video.flush(&mut self.muxer)?;
        if let Some((pipeline, _)) = self.audio.as_mut() {
            pipeline.flush(&mut self.muxer)?;
        }

        self.muxer.write_trailer()?;

        if let Some(audio) = self.audio() {
            log::debug!(
                "audio/video skew at close: {} video ticks",
                Synchronizer::skew(audio.clock(), self.video.clock())
            );
        }

        Ok(SinkStats {
            path: self.muxer.path().to_path_buf(),
            frames_encoded: self.video.clock().pts() as u64,
            audio_samples_encoded: self.audio().map(|a| a.samples_encoded()).unwrap_or(0),
            packets_per_stream: self.muxer.packets_written().to_vec(),
            audio_ticks: self.sync.audio_ticks(),
            audio_deferred: self.sync.audio_deferred(),
        })
    }
}

impl FrameSink for EncoderSession {
    fn encode(&mut self, frame: &FrameBuffer) -> Result<(), RecorderError> {
        self.encode_frame(frame).map(|_| ())
    }

    fn finish(self: Box<Self>) -> Result<SinkStats, RecorderError> {
        self.close()
    }
}

/// Builds ffmpeg backed [`EncoderSession`]s from a [`RecorderConfig`].
#[derive(Clone)]
pub struct FfmpegSinkFactory {
    fps: u32,
    preset: H264Preset,
    video_bitrate: u32,
    audio_bitrate: u32,
    audio: Option<Arc<dyn AudioSource>>,
}

impl FfmpegSinkFactory {
    pub fn new(config: &RecorderConfig, audio: Option<Arc<dyn AudioSource>>) -> Self {
        Self {
            fps: config.fps,
            preset: config.preset,
            video_bitrate: config.video_bitrate,
            audio_bitrate: config.audio_bitrate,
            audio,
        }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn FrameSink>, RecorderError> {
        let video = VideoEncodeConfig {
            width,
            height,
            fps: self.fps,
            bitrate: self.video_bitrate,
            preset: self.preset,
        };

        let audio = self.audio.clone().map(|source| (source, self.audio_bitrate));
        Ok(Box::new(EncoderSession::open(path, video, audio)?))
    }
}
