use ffmpeg_next as ffmpeg;
use recorder::{
    AudioSource, AudioSpec, BufferedAudioSource, EncoderSession, H264Preset, SampleFormat,
    VideoEncodeConfig, init_ffmpeg,
};
use screen_capture::FrameBuffer;
use std::{path::Path, sync::Arc};

fn gradient(width: u32, height: u32, shift: u32) -> FrameBuffer {
    let data = (0..width * height)
        .flat_map(|i| (((i + shift) & 0xff) * 0x0001_0101).to_ne_bytes())
        .collect();
    FrameBuffer::new(width, height, 24, 0x21, 32, data)
}

fn video_config(width: u32, height: u32, bitrate: u32) -> VideoEncodeConfig {
    VideoEncodeConfig {
        width,
        height,
        fps: 25,
        bitrate,
        preset: H264Preset::Medium,
    }
}

/// Per stream packet timestamps of the written container, in file order.
fn read_back(path: &Path) -> Vec<Vec<i64>> {
    let mut input = ffmpeg::format::input(&path).unwrap();
    let mut streams = vec![vec![]; input.streams().count()];

    for (stream, packet) in input.packets() {
        if let Some(pts) = packet.pts() {
            streams[stream.index()].push(pts);
        }
    }

    streams
}

#[test]
#[ignore = "needs ffmpeg built with libx264"]
fn test_video_only_container() {
    init_ffmpeg().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");

    let mut session = EncoderSession::open(&path, video_config(1920, 1080, 4096), None).unwrap();
    assert!(session.audio().is_none());

    for i in 0..25 {
        let pts = session.encode_frame(&gradient(1920, 1080, i)).unwrap();
        assert_eq!(pts, i as i64);
    }

    let stats = session.close().unwrap();
    assert_eq!(stats.frames_encoded, 25);
    assert_eq!(stats.packets_per_stream.len(), 1);
    assert_eq!(stats.packets_per_stream[0], 25);
    assert_eq!(stats.audio_ticks, 0);

    let streams = read_back(&path);
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].len(), 25);
    assert!(streams[0].windows(2).all(|w| w[0] <= w[1]));
}

#[test]
#[ignore = "needs ffmpeg built with libx264"]
fn test_unaligned_padded_frames() {
    init_ffmpeg().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.mp4");

    let mut session = EncoderSession::open(&path, video_config(333, 201, 512), None).unwrap();
    assert_eq!(session.video().dimensions(), (328, 200));

    // rows padded to 1344 bytes
    let frame = FrameBuffer::new(333, 201, 24, 0x21, 32, vec![0x40; 1344 * 201]);
    assert_eq!(frame.bytes_per_line, 1344);

    for _ in 0..5 {
        session.encode_frame(&frame).unwrap();
    }

    assert_eq!(session.close().unwrap().frames_encoded, 5);
}

#[test]
#[ignore = "needs ffmpeg built with libx264"]
fn test_audio_and_video_interleave() {
    init_ffmpeg().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("av.mp4");

    let spec = AudioSpec {
        format: SampleFormat::F32,
        sample_rate: 48000,
        channels: 2,
    };
    let source = Arc::new(BufferedAudioSource::new(spec));
    let audio: Arc<dyn AudioSource> = source.clone();

    // captured before the session, must not end up in the file
    source.accumulator().push(&vec![0; 48000 * 8]);

    let mut session =
        EncoderSession::open(&path, video_config(640, 480, 1024), Some((audio, 64))).unwrap();
    assert_eq!(source.accumulator().pending(), 0);

    let frame_size = session.audio().unwrap().frame_size() as i64;
    let one_audio_frame = 25 * frame_size / 44100 + 1;

    // 40 ms of a 440 Hz tone per video frame
    let samples_per_frame = 48000 / 25;
    for i in 0..50 {
        let pcm: Vec<u8> = (0..samples_per_frame)
            .flat_map(|n| {
                let t = (i * samples_per_frame + n) as f32 / 48000.0;
                let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
                [v.to_le_bytes(), v.to_le_bytes()].concat()
            })
            .collect();
        source.accumulator().push(&pcm);

        let video_pts = session.encode_frame(&gradient(640, 480, i as u32)).unwrap();

        if let Some(audio) = session.audio()
            && audio.samples_encoded() > 0
        {
            let audio_pts = audio.clock().pts_in(session.video().clock().time_base());
            assert!(video_pts <= audio_pts + one_audio_frame);
        }
    }

    let stats = session.close().unwrap();
    assert_eq!(stats.frames_encoded, 50);
    assert_eq!(stats.packets_per_stream.len(), 2);
    assert!(stats.audio_samples_encoded >= 2 * 44100 * 9 / 10);
    assert!(stats.audio_ticks > 0);
    assert_eq!(stats.audio_ticks + stats.audio_deferred, 50);

    let streams = read_back(&path);
    assert_eq!(streams.len(), 2);
    for pts in &streams {
        assert!(!pts.is_empty());
        assert!(pts.windows(2).all(|w| w[0] <= w[1]));
    }
}
