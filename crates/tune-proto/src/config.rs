use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    /// Explicit mpv path; beside-exe and PATH are searched when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// 0-100, passed as `--volume`.
    #[serde(default = "default_volume")]
    pub volume: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_music_dirs")]
    pub music_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// What the session does when the engine cannot open a queued file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrepareErrorPolicy {
    /// Report the failure and move on to the next entry.
    #[default]
    Skip,
    /// Report the failure and stop where we are.
    Halt,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub on_prepare_error: PrepareErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Fingerprint service URL.  Recognition is disabled while empty.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u32,
    /// ffmpeg input format (`-f`), e.g. `pulse`, `alsa`, `avfoundation`, `dshow`.
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_input_device")]
    pub input_device: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_daemon_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            binary: None,
            volume: default_volume(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dirs: default_music_dirs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key: String::new(),
            sample_secs: default_sample_secs(),
            input_format: default_input_format(),
            input_device: default_input_device(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8990
}

fn default_volume() -> u8 {
    80
}

fn default_music_dirs() -> Vec<PathBuf> {
    vec![platform::default_music_dir()]
}

fn default_database_path() -> PathBuf {
    platform::data_dir().join("playlists.db")
}

fn default_sample_secs() -> u32 {
    10
}

fn default_input_format() -> String {
    #[cfg(target_os = "macos")]
    {
        "avfoundation".to_string()
    }
    #[cfg(windows)]
    {
        "dshow".to_string()
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        "pulse".to_string()
    }
}

fn default_input_device() -> String {
    #[cfg(target_os = "macos")]
    {
        ":0".to_string()
    }
    #[cfg(not(target_os = "macos"))]
    {
        "default".to_string()
    }
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn daemon_address(&self) -> String {
        format!("{}:{}", self.daemon.bind_address, self.daemon.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.daemon.bind_address, "127.0.0.1");
        assert_eq!(config.daemon_address(), platform::daemon_address());
        assert_eq!(config.playback.on_prepare_error, PrepareErrorPolicy::Skip);
        assert!(config.recognition.endpoint.is_empty());
        assert!(config.store.database_path.ends_with("tune/playlists.db"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            on_prepare_error = "halt"

            [library]
            music_dirs = ["/srv/music"]
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.on_prepare_error, PrepareErrorPolicy::Halt);
        assert_eq!(config.library.music_dirs, vec![PathBuf::from("/srv/music")]);
        assert_eq!(config.mpv.volume, 80);
        assert_eq!(config.recognition.sample_secs, 10);
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.daemon.port, config.daemon.port);
    }
}
