use crate::{
    H264Preset, RecorderError,
    muxer::Muxer,
    stream_clock::{StreamClock, TimeBase},
};
use ffmpeg_next::{
    self as ffmpeg, Dictionary, codec, encoder,
    format::Pixel,
    frame,
    software::scaling::{self, Flags},
};

pub const GOP_SIZE: u32 = 12;

/// Packed 32-bit capture layout in host byte order, `X` channel unused.
#[cfg(target_endian = "little")]
pub const CAPTURE_PIXEL: Pixel = Pixel::BGRZ;

#[cfg(target_endian = "big")]
pub const CAPTURE_PIXEL: Pixel = Pixel::ZRGB;

/// Width rounded down to a multiple of 8, height to an even value.
pub fn align_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width & !7, height & !1)
}

/// Copies `rows` rows of `row_bytes` from a strided buffer into a strided
/// destination. Short sources leave the remaining destination rows untouched.
pub fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> usize {
    let mut copied = 0;

    for y in 0..rows {
        let (s, d) = (y * src_stride, y * dst_stride);
        if s + row_bytes > src.len() || d + row_bytes > dst.len() {
            break;
        }

        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        copied += 1;
    }

    copied
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// kbit/s
    pub bitrate: u32,

    pub preset: H264Preset,
}

/// H.264 encoder fed with captured frames.
///
/// The capture is converted from [`CAPTURE_PIXEL`] to YUV420P with a
/// reusable destination frame; every frame takes the next video timestamp.
pub struct VideoEncodePipeline {
    encoder: encoder::Video,
    scaler: scaling::Context,
    src_frame: frame::Video,
    dst_frame: frame::Video,
    width: u32,
    height: u32,
    time_base: TimeBase,
    clock: StreamClock,
    stream_index: usize,
}

impl VideoEncodePipeline {
    /// Opens the codec and registers the video stream in `muxer`.
    pub fn start(muxer: &mut Muxer, config: VideoEncodeConfig) -> Result<Self, RecorderError> {
        let (width, height) = align_dimensions(config.width, config.height);
        if width == 0 || height == 0 {
            return Err(RecorderError::InvalidConfig(format!(
                "frame {}x{} too small to encode",
                config.width, config.height
            )));
        }

        let codec = encoder::find_by_name("libx264")
            .or_else(|| encoder::find(codec::Id::H264))
            .ok_or_else(|| RecorderError::Other("H264 encoder not found".to_string()))?;

        let time_base = TimeBase::new(1, config.fps as i32);

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(RecorderError::ffmpeg("avcodec_alloc_context3"))?;

        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(ffmpeg::Rational::from(time_base));
        video.set_frame_rate(Some(ffmpeg::Rational::new(config.fps as i32, 1)));
        video.set_bit_rate(config.bitrate as usize * 1000);
        video.set_gop(GOP_SIZE);
        video.set_max_b_frames(0);

        if muxer.needs_global_header() {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", config.preset.name());

        let encoder = video
            .open_with(opts)
            .map_err(RecorderError::ffmpeg("avcodec_open2"))?;

        let stream_index = muxer.add_stream(codec, &encoder, time_base)?;

        let scaler = scaling::Context::get(
            CAPTURE_PIXEL,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(RecorderError::ffmpeg("sws_getContext"))?;

        log::info!(
            "video encoder {} opened: {width}x{height} (captured {}x{}), {} fps, {} kbit/s, preset {}",
            codec.name(),
            config.width,
            config.height,
            config.fps,
            config.bitrate,
            config.preset
        );

        Ok(Self {
            encoder,
            scaler,
            src_frame: frame::Video::new(CAPTURE_PIXEL, width, height),
            dst_frame: frame::Video::new(Pixel::YUV420P, width, height),
            width,
            height,
            time_base,
            clock: StreamClock::new(time_base),
            stream_index,
        })
    }

    /// Encoded frame size after alignment.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clock(&self) -> &StreamClock {
        &self.clock
    }

    /// Converts and submits one frame. `stride` is the byte distance between
    /// rows of `pixels`. Returns the timestamp the frame was given.
    pub fn encode(
        &mut self,
        muxer: &mut Muxer,
        pixels: &[u8],
        stride: usize,
        height: u32,
    ) -> Result<i64, RecorderError> {
        let dst_stride = self.src_frame.stride(0);
        let rows = height.min(self.height) as usize;
        let copied = copy_rows(
            pixels,
            stride,
            self.src_frame.data_mut(0),
            dst_stride,
            self.width as usize * 4,
            rows,
        );

        if copied < rows {
            log::warn!("short capture buffer: copied {copied} of {rows} rows");
        }

        self.scaler
            .run(&self.src_frame, &mut self.dst_frame)
            .map_err(RecorderError::ffmpeg("sws_scale"))?;

        let pts = self.clock.advance(1);
        self.dst_frame.set_pts(Some(pts));

        self.encoder
            .send_frame(&self.dst_frame)
            .map_err(RecorderError::ffmpeg("avcodec_send_frame"))?;

        muxer.drain_encoder(&mut self.encoder, self.time_base, self.stream_index)?;
        Ok(pts)
    }

    /// Signals end of stream and writes the packets still buffered in the codec.
    pub fn flush(&mut self, muxer: &mut Muxer) -> Result<(), RecorderError> {
        self.encoder
            .send_eof()
            .map_err(RecorderError::ffmpeg("avcodec_send_frame"))?;

        let written = muxer.drain_encoder(&mut self.encoder, self.time_base, self.stream_index)?;
        log::debug!(
            "video encoder flushed {written} packets, {} frames total",
            self.clock.pts()
        );
        Ok(())
    }
}
