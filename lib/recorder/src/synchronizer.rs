use crate::stream_clock::StreamClock;

/// Orders audio and video work on the capture thread.
///
/// Before each video frame the audio clock, rescaled to the video time base,
/// is compared with the video clock. While audio is not ahead one audio tick
/// runs first, which keeps the skew below one audio frame.
#[derive(Debug, Default, Clone)]
pub struct Synchronizer {
    audio_ticks: u64,
    audio_deferred: u64,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when `audio` has not moved past `video`, ties included.
    pub fn audio_not_ahead(audio: &StreamClock, video: &StreamClock) -> bool {
        audio.pts_in(video.time_base()) <= video.pts()
    }

    /// Decides whether an audio tick must run before the next video frame.
    pub fn before_video(&mut self, audio: Option<&StreamClock>, video: &StreamClock) -> bool {
        let Some(audio) = audio else {
            return false;
        };

        if Self::audio_not_ahead(audio, video) {
            self.audio_ticks += 1;
            true
        } else {
            self.audio_deferred += 1;
            false
        }
    }

    /// Audio minus video, in video time base units.
    pub fn skew(audio: &StreamClock, video: &StreamClock) -> i64 {
        audio.pts_in(video.time_base()) - video.pts()
    }

    pub fn audio_ticks(&self) -> u64 {
        self.audio_ticks
    }

    pub fn audio_deferred(&self) -> u64 {
        self.audio_deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_clock::TimeBase;

    const VIDEO: TimeBase = TimeBase::new(1, 25);
    const AUDIO: TimeBase = TimeBase::new(1, 44100);
    const AAC_FRAME: i64 = 1024;

    #[test]
    fn test_tie_runs_audio_first() {
        let audio = StreamClock::new(AUDIO);
        let video = StreamClock::new(VIDEO);
        assert!(Synchronizer::audio_not_ahead(&audio, &video));

        let mut sync = Synchronizer::new();
        assert!(sync.before_video(Some(&audio), &video));
        assert!(!sync.before_video(None, &video));
        assert_eq!(sync.audio_ticks(), 1);
    }

    #[test]
    fn test_audio_ahead_is_deferred() {
        let mut audio = StreamClock::new(AUDIO);
        let video = StreamClock::new(VIDEO);
        audio.advance(AAC_FRAME);

        let mut sync = Synchronizer::new();
        assert!(!sync.before_video(Some(&audio), &video));
        assert_eq!(sync.audio_deferred(), 1);
        assert!(Synchronizer::skew(&audio, &video) > 0);
    }

    /// Audio arrives in real time at 48 kHz, one audio tick encodes every
    /// whole 1024-sample block available. Video must never run ahead of audio
    /// by more than one audio frame once audio is flowing.
    #[test]
    fn test_bounded_skew_with_realtime_audio() {
        let mut sync = Synchronizer::new();
        let mut audio = StreamClock::new(AUDIO);
        let mut video = StreamClock::new(VIDEO);

        let frame_in_video = AUDIO.rescale(AAC_FRAME, VIDEO).max(1);

        for tick in 0..250i64 {
            // 40 ms of capture at 44.1 kHz after resampling
            let mut available = (tick + 1) * 44100 / 25 - audio.pts();

            if sync.before_video(Some(&audio), &video) {
                while available >= AAC_FRAME {
                    audio.advance(AAC_FRAME);
                    available -= AAC_FRAME;
                }
                assert!(available < AAC_FRAME);
            }

            if audio.pts() > 0 {
                assert!(
                    video.pts() <= audio.pts_in(VIDEO) + frame_in_video,
                    "tick {tick}: video {} audio {}",
                    video.pts(),
                    audio.pts()
                );
            }

            video.advance(1);
        }

        assert_eq!(sync.audio_ticks(), 250);
    }
}
