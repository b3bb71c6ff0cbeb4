use crate::{AudioDevice, PcmAccumulator};

#[cfg(target_os = "linux")]
mod audio_source_linux;

#[cfg(target_os = "linux")]
pub use audio_source_linux::PipewireAudioSource;

#[derive(Debug, thiserror::Error)]
pub enum AudioSourceError {
    #[error("Pipewire error: {0}")]
    PipewireError(String),

    #[error("No found audio device for {0:?}")]
    NoDevice(AudioDevice),

    #[error("Audio source startup timed out")]
    Timeout,

    #[error("Audio source is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Interleaved PCM layout delivered by an [`AudioSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes() * self.channels as usize
    }
}

/// A running capture stream on the audio server.
///
/// Samples are collected on the server's own thread; the capture loop only
/// drains them.
pub trait AudioSource: Send + Sync {
    fn spec(&self) -> AudioSpec;

    fn pop_accumulated(&self) -> Vec<u8>;
}

/// Source fed by hand, used when the samples come from elsewhere.
#[derive(Debug, Clone)]
pub struct BufferedAudioSource {
    spec: AudioSpec,
    accumulator: PcmAccumulator,
}

impl BufferedAudioSource {
    pub fn new(spec: AudioSpec) -> Self {
        Self {
            spec,
            accumulator: PcmAccumulator::new(),
        }
    }

    pub fn accumulator(&self) -> &PcmAccumulator {
        &self.accumulator
    }
}

impl AudioSource for BufferedAudioSource {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn pop_accumulated(&self) -> Vec<u8> {
        self.accumulator.pop_accumulated()
    }
}

/// Opens the platform audio source for `device`, `None` for [`AudioDevice::None`].
pub fn open_audio_source(
    device: AudioDevice,
) -> Result<Option<Box<dyn AudioSource>>, AudioSourceError> {
    if device == AudioDevice::None {
        return Ok(None);
    }

    #[cfg(target_os = "linux")]
    return Ok(Some(Box::new(PipewireAudioSource::open(device)?)));

    #[cfg(not(target_os = "linux"))]
    Err(AudioSourceError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_frame() {
        let spec = AudioSpec {
            format: SampleFormat::F32,
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(spec.bytes_per_frame(), 8);

        let spec = AudioSpec {
            format: SampleFormat::S16,
            sample_rate: 44100,
            channels: 1,
        };
        assert_eq!(spec.bytes_per_frame(), 2);
    }

    #[test]
    fn test_none_device_opens_nothing() {
        assert!(open_audio_source(AudioDevice::None).unwrap().is_none());
    }

    #[test]
    fn test_buffered_source() {
        let source = BufferedAudioSource::new(AudioSpec {
            format: SampleFormat::S16,
            sample_rate: 44100,
            channels: 2,
        });
        source.accumulator().push(&[1, 2, 3, 4]);
        assert_eq!(source.pop_accumulated(), vec![1, 2, 3, 4]);
        assert!(source.pop_accumulated().is_empty());
    }
}
