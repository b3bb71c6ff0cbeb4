use anyhow::{Context, Result};
use derivative::Derivative;
use platform_dirs::AppDirs;
use recorder::{AudioDevice, H264Preset, RecorderConfig};
use screen_capture::WindowId;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const APP_NAME: &str = "wincap";

/// Persisted recording preferences, `~/.config/wincap/wincap.toml`.
#[derive(Serialize, Deserialize, Derivative, Debug, Clone, PartialEq)]
#[derivative(Default)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub config_path: PathBuf,

    #[derivative(Default(value = "recorder::recorder_config::DEFAULT_FPS"))]
    pub fps: u32,

    pub preset: H264Preset,

    /// kbit/s
    #[derivative(Default(value = "1024"))]
    pub video_bitrate: u32,

    /// kbit/s
    #[derivative(Default(value = "128"))]
    pub audio_bitrate: u32,

    #[derivative(Default(value = "default_output_template()"))]
    pub output_template: String,

    #[derivative(Default(value = "true"))]
    pub include_cursor: bool,

    pub audio_device: AudioDevice,

    pub focused_only: bool,

    #[derivative(Default(value = "true"))]
    pub composite: bool,

    pub include_decorations: bool,
}

fn default_output_template() -> String {
    let dir = platform_dirs::UserDirs::new()
        .map(|dirs| dirs.video_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    dir.join("wincap-%Y%m%d-%H%M%S.mp4")
        .to_string_lossy()
        .into_owned()
}

impl Config {
    /// Loads `path`, or the per-user config file when `None`. A missing or
    /// broken per-user file is replaced by the defaults, the broken one is
    /// kept as `.bak`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("read config `{}` failed", path.display()))?;
                let mut config = toml::from_str::<Config>(&text)
                    .with_context(|| format!("parse config `{}` failed", path.display()))?;
                config.config_path = path.to_path_buf();
                Ok(config)
            }
            None => {
                let app_dirs = AppDirs::new(Some(APP_NAME), true)
                    .context("no config directory for this user")?;
                fs::create_dir_all(&app_dirs.config_dir)?;
                Self::load_or_init(&app_dirs.config_dir.join(format!("{APP_NAME}.toml")))
            }
        }
    }

    fn load_or_init(path: &Path) -> Result<Self> {
        let loaded = fs::read_to_string(path)
            .ok()
            .map(|text| toml::from_str::<Config>(&text));

        match loaded {
            Some(Ok(mut config)) => {
                config.config_path = path.to_path_buf();
                Ok(config)
            }
            other => {
                if let Some(Err(e)) = other {
                    log::warn!("invalid config `{}`, reset it: {e}", path.display());
                    let mut bak = path.as_os_str().to_owned();
                    bak.push(".bak");
                    _ = fs::copy(path, bak);
                }

                let config = Config {
                    config_path: path.to_path_buf(),
                    ..Default::default()
                };
                config.save()?;
                Ok(config)
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        fs::write(&self.config_path, text)
            .with_context(|| format!("save config `{}` failed", self.config_path.display()))?;
        Ok(())
    }

    /// Session parameters for `window` from the persisted values.
    pub fn recorder_config(&self, window: WindowId) -> RecorderConfig {
        RecorderConfig::new(window)
            .with_fps(self.fps)
            .with_preset(self.preset)
            .with_video_bitrate(self.video_bitrate)
            .with_audio_bitrate(self.audio_bitrate)
            .with_output_template(self.output_template.clone())
            .with_include_cursor(self.include_cursor)
            .with_audio_device(self.audio_device)
            .with_focused_only(self.focused_only)
            .with_composite(self.composite)
            .with_include_decorations(self.include_decorations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wincap.toml");
        fs::write(
            &path,
            "fps = 30\npreset = \"veryfast\"\naudio_device = \"default-output-monitor\"\n",
        )
        .unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.fps, 30);
        assert_eq!(config.preset, H264Preset::VeryFast);
        assert_eq!(config.audio_device, AudioDevice::DefaultOutputMonitor);
        assert_eq!(config.video_bitrate, 1024);
        assert!(config.include_cursor);
        assert!(config.composite);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(dir.path().join("nope.toml").as_path())).is_err());
    }

    #[test]
    fn test_init_writes_defaults_and_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wincap.toml");

        let config = Config::load_or_init(&path).unwrap();
        assert_eq!(config.fps, 25);
        assert!(path.exists());

        fs::write(&path, "fps = \"fast\"").unwrap();
        let config = Config::load_or_init(&path).unwrap();
        assert_eq!(config.fps, 25);
        assert!(dir.path().join("wincap.toml.bak").exists());

        let reloaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_recorder_config_carries_values() {
        let config = Config {
            fps: 60,
            focused_only: true,
            include_decorations: true,
            output_template: "/tmp/x-%S.mp4".to_string(),
            ..Default::default()
        };

        let rc = config.recorder_config(0x1200003);
        assert_eq!(rc.window, 0x1200003);
        assert_eq!(rc.fps, 60);
        assert!(rc.focused_only);
        assert!(rc.include_decorations);
        assert_eq!(rc.output_template, "/tmp/x-%S.mp4");
        assert!(rc.validate().is_ok());
    }
}
