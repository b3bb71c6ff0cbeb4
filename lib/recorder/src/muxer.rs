use crate::{RecorderError, stream_clock::TimeBase};
use ffmpeg_next::{self as ffmpeg, Packet, Rational, codec, format};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const EAGAIN: i32 = 11;

/// Registers codecs and containers once per process.
pub fn init_ffmpeg() -> Result<(), RecorderError> {
    static INIT: OnceCell<()> = OnceCell::new();

    INIT.get_or_try_init(|| {
        ffmpeg::init().map_err(RecorderError::ffmpeg("ffmpeg_init"))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Warning);
        log::info!("ffmpeg initialized");
        Ok(())
    })
    .map(|_| ())
}

/// Drops packets that would move a stream's timestamps backwards.
#[derive(Debug, Default, Clone)]
pub struct PacketOrderGuard {
    last: Vec<Option<i64>>,
}

impl PacketOrderGuard {
    pub fn admit(&mut self, stream: usize, pts: Option<i64>) -> bool {
        if self.last.len() <= stream {
            self.last.resize(stream + 1, None);
        }

        let Some(pts) = pts else {
            return true;
        };

        match self.last[stream] {
            Some(last) if pts < last => false,
            _ => {
                self.last[stream] = Some(pts);
                true
            }
        }
    }

    pub fn last_pts(&self, stream: usize) -> Option<i64> {
        self.last.get(stream).copied().flatten()
    }
}

/// Output container, the single writer of one recording file.
///
/// Streams are registered by the encode pipelines before
/// [`Muxer::write_header`]; packets are written interleaved afterwards.
pub struct Muxer {
    path: PathBuf,
    octx: format::context::Output,
    header_written: bool,
    trailer_written: bool,
    guard: PacketOrderGuard,
    packets: Vec<u64>,
    dropped: u64,
}

impl Muxer {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        init_ffmpeg()?;

        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }

        let octx = format::output(&path)
            .map_err(RecorderError::ffmpeg("avformat_alloc_output_context2"))?;
        log::info!("create output `{}` ({})", path.display(), octx.format().name());

        Ok(Self {
            path,
            octx,
            header_written: false,
            trailer_written: false,
            guard: PacketOrderGuard::default(),
            packets: vec![],
            dropped: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn needs_global_header(&self) -> bool {
        self.octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER)
    }

    /// Adds a stream described by an opened encoder and returns its index.
    pub fn add_stream<P: Into<codec::Parameters>>(
        &mut self,
        codec: ffmpeg::Codec,
        parameters: P,
        time_base: TimeBase,
    ) -> Result<usize, RecorderError> {
        if self.header_written {
            return Err(RecorderError::Other(
                "can not add a stream after the header".to_string(),
            ));
        }

        let mut stream = self
            .octx
            .add_stream(codec)
            .map_err(RecorderError::ffmpeg("avformat_new_stream"))?;
        stream.set_parameters(parameters);
        stream.set_time_base(Rational::from(time_base));

        let index = stream.index();
        self.packets.resize(index + 1, 0);
        Ok(index)
    }

    pub fn stream_count(&self) -> usize {
        self.octx.nb_streams() as usize
    }

    /// Time base chosen by the container, final only after the header.
    pub fn stream_time_base(&self, index: usize) -> Option<TimeBase> {
        self.octx.stream(index).map(|s| TimeBase::from(s.time_base()))
    }

    pub fn write_header(&mut self) -> Result<(), RecorderError> {
        if self.header_written {
            return Ok(());
        }

        if self.stream_count() == 0 {
            return Err(RecorderError::Other("no stream registered".to_string()));
        }

        self.octx
            .write_header()
            .map_err(RecorderError::ffmpeg("avformat_write_header"))?;
        self.header_written = true;
        log::debug!("write header, {} streams", self.stream_count());
        Ok(())
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Writes a packet whose timestamps are already in the stream's time base.
    pub fn write_packet(
        &mut self,
        mut packet: Packet,
        stream: usize,
    ) -> Result<(), RecorderError> {
        if !self.header_written || self.trailer_written {
            return Err(RecorderError::Other(format!(
                "write packet outside header/trailer on `{}`",
                self.path.display()
            )));
        }

        if !self.guard.admit(stream, packet.pts()) {
            self.dropped += 1;
            log::warn!(
                "drop out of order packet on stream {stream}: pts {:?} < {:?}",
                packet.pts(),
                self.guard.last_pts(stream)
            );
            return Ok(());
        }

        packet.set_stream(stream);
        packet
            .write_interleaved(&mut self.octx)
            .map_err(RecorderError::ffmpeg("av_interleaved_write_frame"))?;

        if let Some(count) = self.packets.get_mut(stream) {
            *count += 1;
        }

        Ok(())
    }

    /// Moves every packet the encoder has ready into the container, rescaled
    /// from `codec_time_base` to the stream's time base. Stops on "need more
    /// input" and end of stream.
    pub fn drain_encoder(
        &mut self,
        encoder: &mut ffmpeg::encoder::Encoder,
        codec_time_base: TimeBase,
        stream: usize,
    ) -> Result<usize, RecorderError> {
        let stream_time_base = self
            .stream_time_base(stream)
            .ok_or_else(|| RecorderError::Other(format!("no stream {stream}")))?;

        let mut written = 0;
        loop {
            let mut packet = Packet::empty();
            match encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.rescale_ts(
                        Rational::from(codec_time_base),
                        Rational::from(stream_time_base),
                    );
                    self.write_packet(packet, stream)?;
                    written += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(RecorderError::ffmpeg("avcodec_receive_packet")(e)),
            }
        }

        Ok(written)
    }

    pub fn write_trailer(&mut self) -> Result<(), RecorderError> {
        if !self.header_written || self.trailer_written {
            return Ok(());
        }

        self.trailer_written = true;
        self.octx
            .write_trailer()
            .map_err(RecorderError::ffmpeg("av_write_trailer"))?;

        log::info!(
            "write trailer `{}`, packets per stream: {:?}, dropped: {}",
            self.path.display(),
            self.packets,
            self.dropped
        );
        Ok(())
    }

    pub fn packets_written(&self) -> &[u64] {
        &self.packets
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if self.header_written
            && !self.trailer_written
            && let Err(e) = self.write_trailer()
        {
            log::warn!("write trailer on drop failed: {e}");
        }
    }
}
