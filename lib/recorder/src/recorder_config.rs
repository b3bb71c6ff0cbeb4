use chrono::{DateTime, Local};
use derive_setters::Setters;
use screen_capture::{Rectangle, WindowId};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_FPS: u32 = 25;
pub const MAX_FPS: u32 = 120;

/// x264 speed/quality presets, fastest first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Preset {
    UltraFast,
    SuperFast,
    VeryFast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    VerySlow,
}

impl H264Preset {
    pub fn all() -> [H264Preset; 9] {
        [
            H264Preset::UltraFast,
            H264Preset::SuperFast,
            H264Preset::VeryFast,
            H264Preset::Faster,
            H264Preset::Fast,
            H264Preset::Medium,
            H264Preset::Slow,
            H264Preset::Slower,
            H264Preset::VerySlow,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            H264Preset::UltraFast => "ultrafast",
            H264Preset::SuperFast => "superfast",
            H264Preset::VeryFast => "veryfast",
            H264Preset::Faster => "faster",
            H264Preset::Fast => "fast",
            H264Preset::Medium => "medium",
            H264Preset::Slow => "slow",
            H264Preset::Slower => "slower",
            H264Preset::VerySlow => "veryslow",
        }
    }
}

impl fmt::Display for H264Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for H264Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        H264Preset::all()
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown h264 preset `{s}`"))
    }
}

/// Which audio server device is recorded alongside the video.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioDevice {
    #[default]
    None,
    DefaultOutputMonitor,
    DefaultInputMonitor,
}

impl FromStr for AudioDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AudioDevice::None),
            "output" | "default-output-monitor" => Ok(AudioDevice::DefaultOutputMonitor),
            "input" | "default-input-monitor" => Ok(AudioDevice::DefaultInputMonitor),
            other => Err(format!("unknown audio device `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct RecorderConfig {
    /// Window to record, the root window records the whole screen
    #[setters(skip)]
    pub window: WindowId,

    /// Region relative to the window, `None` for the whole window
    #[setters(strip_option)]
    pub region: Option<Rectangle>,

    pub fps: u32,
    pub preset: H264Preset,

    /// kbit/s
    pub video_bitrate: u32,

    /// kbit/s
    pub audio_bitrate: u32,

    /// strftime-style template expanded at each session start
    #[setters(into)]
    pub output_template: String,

    pub include_cursor: bool,
    pub focused_only: bool,
    pub composite: bool,
    pub include_decorations: bool,
    pub audio_device: AudioDevice,
    pub focus_timeout: Duration,
    pub stop_timeout: Duration,
}

impl RecorderConfig {
    pub fn new(window: WindowId) -> Self {
        Self {
            window,
            region: None,
            fps: DEFAULT_FPS,
            preset: H264Preset::Medium,
            video_bitrate: 1024,
            audio_bitrate: 128,
            output_template: "wincap-%Y%m%d-%H%M%S.mp4".to_string(),
            include_cursor: true,
            focused_only: false,
            composite: true,
            include_decorations: false,
            audio_device: AudioDevice::None,
            focus_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> Result<(), crate::RecorderError> {
        use crate::RecorderError::InvalidConfig;

        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(InvalidConfig(format!(
                "fps must be in 1..={MAX_FPS}, got {}",
                self.fps
            )));
        }

        if self.video_bitrate == 0 {
            return Err(InvalidConfig("video bitrate must not be 0".to_string()));
        }

        if self.audio_device != AudioDevice::None && self.audio_bitrate == 0 {
            return Err(InvalidConfig("audio bitrate must not be 0".to_string()));
        }

        if self.output_template.trim().is_empty() {
            return Err(InvalidConfig("output template is empty".to_string()));
        }

        if let Some(region) = self.region
            && region.is_empty()
        {
            return Err(InvalidConfig(format!("empty region {region:?}")));
        }

        Ok(())
    }

    /// Time between two captures.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }

    /// Expands the output template for a session started at `now`.
    pub fn output_path(&self, now: DateTime<Local>) -> PathBuf {
        expand_template(&self.output_template, now)
    }
}

pub fn expand_template(template: &str, now: DateTime<Local>) -> PathBuf {
    use std::fmt::Write;

    let mut path = String::new();
    if write!(path, "{}", now.format(template)).is_err() {
        // malformed specifier, keep the template literally
        log::warn!("invalid output template `{template}`, use it verbatim");
        path = template.to_string();
    }

    PathBuf::from(path)
}

/// `path` itself when free, otherwise `stem-N.ext` with the first free `N`.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned());

    (1..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_config_default() {
        let config = RecorderConfig::new(0x400001);
        assert_eq!(config.fps, 25);
        assert_eq!(config.preset, H264Preset::Medium);
        assert_eq!(config.audio_device, AudioDevice::None);
        assert_eq!(config.frame_interval(), Duration::from_millis(40));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate() {
        assert!(RecorderConfig::new(1).with_fps(0).validate().is_err());
        assert!(RecorderConfig::new(1).with_fps(121).validate().is_err());
        assert!(RecorderConfig::new(1).with_video_bitrate(0).validate().is_err());
        assert!(RecorderConfig::new(1).with_output_template("  ").validate().is_err());
        assert!(
            RecorderConfig::new(1)
                .with_region(Rectangle::new(0, 0, 0, 10))
                .validate()
                .is_err()
        );
        assert!(
            RecorderConfig::new(1)
                .with_audio_device(AudioDevice::DefaultOutputMonitor)
                .with_audio_bitrate(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_presets_ordered_fastest_first() {
        let all = H264Preset::all();
        assert_eq!(all.first(), Some(&H264Preset::UltraFast));
        assert_eq!(all.last(), Some(&H264Preset::VerySlow));
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("Medium".parse::<H264Preset>(), Ok(H264Preset::Medium));
        assert_eq!("veryslow".parse::<H264Preset>(), Ok(H264Preset::VerySlow));
        assert!("turbo".parse::<H264Preset>().is_err());

        for preset in H264Preset::all() {
            assert_eq!(preset.name().parse::<H264Preset>(), Ok(preset));
        }
    }

    #[test]
    fn test_audio_device_parse() {
        assert_eq!("none".parse::<AudioDevice>(), Ok(AudioDevice::None));
        assert_eq!(
            "output".parse::<AudioDevice>(),
            Ok(AudioDevice::DefaultOutputMonitor)
        );
        assert_eq!(
            "default-input-monitor".parse::<AudioDevice>(),
            Ok(AudioDevice::DefaultInputMonitor)
        );
        assert!("hdmi".parse::<AudioDevice>().is_err());
    }

    #[test]
    fn test_expand_template() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            expand_template("/tmp/cap-%Y%m%d-%H%M%S.mp4", now),
            PathBuf::from("/tmp/cap-20240309-140507.mp4")
        );
        assert_eq!(
            expand_template("plain.mp4", now),
            PathBuf::from("plain.mp4")
        );
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        assert_eq!(unique_path(&path), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("out-1.mp4"));

        std::fs::write(dir.path().join("out-1.mp4"), b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("out-2.mp4"));
    }
}
