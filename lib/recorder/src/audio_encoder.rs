use crate::{
    RecorderError,
    audio_source::{AudioSpec, SampleFormat},
    muxer::Muxer,
    pcm::AudioTail,
    stream_clock::{StreamClock, TimeBase},
};
use ffmpeg_next::{
    self as ffmpeg, ChannelLayout, codec, encoder,
    format::{Sample, sample::Type},
    frame,
    software::resampling,
};

pub const AUDIO_SAMPLE_RATE: u32 = 44100;
pub const AUDIO_CHANNELS: usize = 2;

const FALLBACK_FRAME_SIZE: usize = 1024;

const CODEC_FORMAT: Sample = Sample::F32(Type::Planar);

/// Per-channel sample queue that hands out codec-sized frames.
///
/// Resampling does not produce a fixed number of samples per call, the
/// encoder wants exactly `frame_size` per frame except the last one.
#[derive(Debug, Clone)]
pub struct PlanarFifo {
    planes: Vec<Vec<f32>>,
}

impl PlanarFifo {
    pub fn new(channels: usize) -> Self {
        Self {
            planes: vec![Vec::new(); channels.max(1)],
        }
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Samples per channel currently queued.
    pub fn len(&self) -> usize {
        self.planes.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one slice per channel. Missing channels are filled with silence.
    pub fn push(&mut self, planes: &[&[f32]]) {
        let samples = planes.iter().map(|p| p.len()).max().unwrap_or(0);

        for (ch, queue) in self.planes.iter_mut().enumerate() {
            match planes.get(ch) {
                Some(p) => {
                    queue.extend_from_slice(p);
                    queue.resize(queue.len() + samples - p.len(), 0.0);
                }
                None => queue.resize(queue.len() + samples, 0.0),
            }
        }
    }

    /// Removes exactly `samples` per channel, `None` when fewer are queued.
    pub fn pop(&mut self, samples: usize) -> Option<Vec<Vec<f32>>> {
        if samples == 0 || self.len() < samples {
            return None;
        }

        Some(
            self.planes
                .iter_mut()
                .map(|queue| queue.drain(..samples).collect())
                .collect(),
        )
    }

    /// Removes everything left, at most `max` samples per channel.
    pub fn pop_partial(&mut self, max: usize) -> Option<Vec<Vec<f32>>> {
        let samples = self.len().min(max);
        self.pop(samples)
    }
}

fn source_sample(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::S16 => Sample::I16(Type::Packed),
        SampleFormat::F32 => Sample::F32(Type::Packed),
    }
}

fn channel_layout(channels: u16) -> ChannelLayout {
    if channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    }
}

/// AAC encoder fed from raw interleaved PCM.
///
/// Bytes are sliced into blocks of one codec frame of source samples, each
/// block is resampled to 44.1 kHz stereo float planar and re-framed through a
/// [`PlanarFifo`]. The clock counts samples handed to the codec.
pub struct AudioEncodePipeline {
    encoder: encoder::Audio,
    resampler: resampling::Context,
    source: AudioSpec,
    tail: AudioTail,
    fifo: PlanarFifo,
    frame_size: usize,
    time_base: TimeBase,
    clock: StreamClock,
    stream_index: usize,
}

impl AudioEncodePipeline {
    /// Opens the codec for `bitrate` kbit/s and registers the audio stream.
    pub fn start(muxer: &mut Muxer, source: AudioSpec, bitrate: u32) -> Result<Self, RecorderError> {
        if source.sample_rate == 0 || source.channels == 0 {
            return Err(RecorderError::InvalidConfig(format!(
                "unusable audio source spec: {source:?}"
            )));
        }

        let codec = encoder::find(codec::Id::AAC)
            .ok_or_else(|| RecorderError::Other("AAC encoder not found".to_string()))?;

        let time_base = TimeBase::new(1, AUDIO_SAMPLE_RATE as i32);

        let mut audio = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(RecorderError::ffmpeg("avcodec_alloc_context3"))?;

        audio.set_bit_rate(bitrate as usize * 1000);
        audio.set_rate(AUDIO_SAMPLE_RATE as i32);
        audio.set_format(CODEC_FORMAT);
        audio.set_channel_layout(ChannelLayout::STEREO);
        audio.set_time_base(ffmpeg::Rational::from(time_base));

        if muxer.needs_global_header() {
            audio.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = audio
            .open_as(codec)
            .map_err(RecorderError::ffmpeg("avcodec_open2"))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => FALLBACK_FRAME_SIZE,
            n => n,
        };

        let stream_index = muxer.add_stream(codec, &encoder, time_base)?;

        let resampler = resampling::Context::get(
            source_sample(source.format),
            channel_layout(source.channels),
            source.sample_rate,
            CODEC_FORMAT,
            ChannelLayout::STEREO,
            AUDIO_SAMPLE_RATE,
        )
        .map_err(RecorderError::ffmpeg("swr_init"))?;

        log::info!(
            "audio encoder {} opened: {AUDIO_SAMPLE_RATE} Hz stereo, {bitrate} kbit/s, frame size {frame_size}, source {source:?}",
            codec.name()
        );

        Ok(Self {
            encoder,
            resampler,
            source,
            tail: AudioTail::new(frame_size * source.bytes_per_frame()),
            fifo: PlanarFifo::new(AUDIO_CHANNELS),
            frame_size,
            time_base,
            clock: StreamClock::new(time_base),
            stream_index,
        })
    }

    pub fn clock(&self) -> &StreamClock {
        &self.clock
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples submitted to the codec so far.
    pub fn samples_encoded(&self) -> u64 {
        self.clock.pts() as u64
    }

    /// Appends `bytes` to the carry-over tail and encodes every whole block.
    /// Returns whether a frame reached the codec; too little data is a no-op.
    pub fn encode(&mut self, muxer: &mut Muxer, bytes: &[u8]) -> Result<bool, RecorderError> {
        self.tail.extend(bytes);

        let blocks = self.tail.take_blocks();
        if blocks.is_empty() {
            return Ok(false);
        }

        for block in blocks.chunks(self.tail.block_size()) {
            self.resample_block(block)?;
        }

        self.send_whole_frames(muxer)
    }

    /// Encodes the padded tail, the resampler delay and the short last frame,
    /// then drains the codec.
    pub fn flush(&mut self, muxer: &mut Muxer) -> Result<(), RecorderError> {
        if let Some(last) = self.tail.take_padded() {
            self.resample_block(&last)?;
        }

        let mut delayed = frame::Audio::new(CODEC_FORMAT, self.frame_size, ChannelLayout::STEREO);
        delayed.set_rate(AUDIO_SAMPLE_RATE);
        match self.resampler.flush(&mut delayed) {
            Ok(_) => self.push_resampled(&delayed),
            Err(e) => log::warn!("flush audio resampler failed: {e}"),
        }

        self.send_whole_frames(muxer)?;

        if let Some(planes) = self.fifo.pop_partial(self.frame_size) {
            self.send_planes(muxer, &planes)?;
        }

        self.encoder
            .send_eof()
            .map_err(RecorderError::ffmpeg("avcodec_send_frame"))?;

        let written = muxer.drain_encoder(&mut self.encoder, self.time_base, self.stream_index)?;
        log::debug!(
            "audio encoder flushed {written} packets, {} samples total",
            self.samples_encoded()
        );
        Ok(())
    }

    fn resample_block(&mut self, block: &[u8]) -> Result<(), RecorderError> {
        let layout = channel_layout(self.source.channels);
        let samples = block.len() / self.source.bytes_per_frame();

        let mut src = frame::Audio::new(source_sample(self.source.format), samples, layout);
        src.set_rate(self.source.sample_rate);

        let data = src.data_mut(0);
        let len = block.len().min(data.len());
        data[..len].copy_from_slice(&block[..len]);

        let capacity = samples * AUDIO_SAMPLE_RATE as usize / self.source.sample_rate as usize + 64;
        let mut dst = frame::Audio::new(CODEC_FORMAT, capacity, ChannelLayout::STEREO);
        dst.set_rate(AUDIO_SAMPLE_RATE);

        self.resampler
            .run(&src, &mut dst)
            .map_err(RecorderError::ffmpeg("swr_convert_frame"))?;

        self.push_resampled(&dst);
        Ok(())
    }

    fn push_resampled(&mut self, frame: &frame::Audio) {
        if frame.samples() == 0 {
            return;
        }

        let planes: Vec<&[f32]> = (0..AUDIO_CHANNELS)
            .map(|ch| &frame.plane::<f32>(ch)[..frame.samples()])
            .collect();
        self.fifo.push(&planes);
    }

    fn send_whole_frames(&mut self, muxer: &mut Muxer) -> Result<bool, RecorderError> {
        let mut sent = false;

        while let Some(planes) = self.fifo.pop(self.frame_size) {
            self.send_planes(muxer, &planes)?;
            sent = true;
        }

        Ok(sent)
    }

    fn send_planes(&mut self, muxer: &mut Muxer, planes: &[Vec<f32>]) -> Result<(), RecorderError> {
        let samples = planes.first().map(Vec::len).unwrap_or(0);
        if samples == 0 {
            return Ok(());
        }

        let mut frame = frame::Audio::new(CODEC_FORMAT, samples, ChannelLayout::STEREO);
        frame.set_rate(AUDIO_SAMPLE_RATE);

        for (ch, plane) in planes.iter().enumerate().take(AUDIO_CHANNELS) {
            frame.plane_mut::<f32>(ch)[..samples].copy_from_slice(plane);
        }

        let pts = self.clock.advance(samples as i64);
        frame.set_pts(Some(pts));

        self.encoder
            .send_frame(&frame)
            .map_err(RecorderError::ffmpeg("avcodec_send_frame"))?;

        muxer.drain_encoder(&mut self.encoder, self.time_base, self.stream_index)?;
        Ok(())
    }
}
