use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use fourline_session::{ApiConfig, ChannelConfig, DEFAULT_BOARD_SIZE, SessionId};

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [channel]
//                    url = "http://games.local:5000"
//
//   env var:         FOURLINE_CHANNEL__URL=http://games.local:5000
//
//   (double underscore = nesting; single underscore stays in field names)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiFileConfig,
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub board: BoardFileConfig,
    #[serde(default)]
    pub web: WebFileConfig,
}

/// HTTP API tunables (lives under `[api]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiFileConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

/// Realtime channel tunables (lives under `[channel]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_channel_url")]
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Unset retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<usize>,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            url: default_channel_url(),
            namespace: default_namespace(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardFileConfig {
    #[serde(default = "default_board_size")]
    pub size: usize,
}

impl Default for BoardFileConfig {
    fn default() -> Self {
        Self {
            size: default_board_size(),
        }
    }
}

/// Where the web front end lives, for share links.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebFileConfig {
    #[serde(default = "default_web_origin")]
    pub origin: String,
}

impl Default for WebFileConfig {
    fn default() -> Self {
        Self {
            origin: default_web_origin(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:5000/api".to_string()
}
fn default_api_timeout_secs() -> u64 {
    10
}
fn default_channel_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_namespace() -> String {
    "game".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_reconnect_initial_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    5000
}
fn default_board_size() -> usize {
    DEFAULT_BOARD_SIZE
}
fn default_web_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Build a figment that layers: defaults → config.toml → FOURLINE_* env vars.
///
///   `FOURLINE_API__BASE_URL=...`  →  `api.base_url = ...`
///   `FOURLINE_BOARD__SIZE=9`      →  `board.size = 9`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("FOURLINE_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct Settings {
    pub api: ApiConfig,
    pub channel: ChannelConfig,
    pub web_origin: String,
}

impl Settings {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        ensure!(fc.board.size > 0, "board.size must be at least 1");
        ensure!(
            fc.channel.reconnect_initial_ms > 0,
            "channel.reconnect_initial_ms must be at least 1"
        );
        ensure!(
            fc.channel.reconnect_initial_ms <= fc.channel.reconnect_max_ms,
            "channel.reconnect_initial_ms must not exceed channel.reconnect_max_ms"
        );

        Ok(Self {
            api: ApiConfig {
                base_url: fc.api.base_url.clone(),
                timeout: Duration::from_secs(fc.api.timeout_secs),
                board_size: fc.board.size,
            },
            channel: ChannelConfig {
                url: fc.channel.url.clone(),
                namespace: fc.channel.namespace.clone(),
                connect_timeout: Duration::from_secs(fc.channel.connect_timeout_secs),
                reconnect_initial: Duration::from_millis(fc.channel.reconnect_initial_ms),
                reconnect_max: Duration::from_millis(fc.channel.reconnect_max_ms),
                max_reconnect_attempts: fc.channel.max_reconnect_attempts,
            },
            web_origin: fc.web.origin.clone(),
        })
    }

    /// Link a second party can open to join `game_id`.
    pub fn share_link(&self, game_id: &SessionId) -> String {
        format!("{}/join/{}", self.web_origin.trim_end_matches('/'), game_id)
    }
}

/// Data directory plus the configuration resolved from it.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub file: FileConfig,
    pub settings: Settings,
}

impl AppConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".fourline"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let file: FileConfig = load_config(&data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", data_dir))?;
        let settings = Settings::from_file(&file)?;

        debug!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            file,
            settings,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.api.base_url, "http://127.0.0.1:5000/api");
        assert_eq!(fc.api.timeout_secs, 10);
        assert_eq!(fc.channel.url, "http://127.0.0.1:5000");
        assert_eq!(fc.channel.namespace, "game");
        assert_eq!(fc.channel.reconnect_initial_ms, 1000);
        assert_eq!(fc.channel.reconnect_max_ms, 5000);
        assert!(fc.channel.max_reconnect_attempts.is_none());
        assert_eq!(fc.board.size, 7);
        assert_eq!(fc.web.origin, "http://localhost:3000");
    }

    // ── Settings::from_file ─────────────────────────────────────────────

    #[test]
    fn test_settings_from_file() {
        let mut fc = FileConfig::default();
        fc.board.size = 9;
        fc.channel.connect_timeout_secs = 3;
        fc.channel.max_reconnect_attempts = Some(4);

        let s = Settings::from_file(&fc).unwrap();
        assert_eq!(s.api.board_size, 9);
        assert_eq!(s.api.timeout, Duration::from_secs(10));
        assert_eq!(s.channel.connect_timeout, Duration::from_secs(3));
        assert_eq!(s.channel.reconnect_initial, Duration::from_secs(1));
        assert_eq!(s.channel.max_reconnect_attempts, Some(4));
    }

    #[test]
    fn test_settings_reject_empty_board() {
        let mut fc = FileConfig::default();
        fc.board.size = 0;
        assert!(Settings::from_file(&fc).is_err());
    }

    #[test]
    fn test_settings_reject_inverted_backoff() {
        let mut fc = FileConfig::default();
        fc.channel.reconnect_initial_ms = 10_000;
        assert!(Settings::from_file(&fc).is_err());
    }

    #[test]
    fn test_settings_reject_zero_backoff() {
        let mut fc = FileConfig::default();
        fc.channel.reconnect_initial_ms = 0;
        assert!(Settings::from_file(&fc).is_err());
    }

    #[test]
    fn test_share_link() {
        let mut fc = FileConfig::default();
        fc.web.origin = "https://play.example.com/".to_string();
        let s = Settings::from_file(&fc).unwrap();
        assert_eq!(
            s.share_link(&SessionId::from(42)),
            "https://play.example.com/join/42"
        );
    }

    // ── AppConfig ───────────────────────────────────────────────────────

    #[test]
    fn test_app_config_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let config = AppConfig::new(Some(dir.clone())).unwrap();
        assert!(dir.exists());
        assert_eq!(config.data_dir, dir);
        assert_eq!(config.config_toml_path(), dir.join("config.toml"));
        assert_eq!(config.settings.api.board_size, 7);
    }

    #[test]
    fn test_config_toml_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[board]\nsize = 5\n\n[channel]\nnamespace = \"/match\"\nmax_reconnect_attempts = 3\n",
        )
        .unwrap();

        let config = AppConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(config.settings.api.board_size, 5);
        assert_eq!(config.settings.channel.namespace, "/match");
        assert_eq!(config.settings.channel.max_reconnect_attempts, Some(3));
        // Untouched sections keep their defaults
        assert_eq!(config.file.api.base_url, "http://127.0.0.1:5000/api");
    }

    #[test]
    fn test_invalid_toml_value_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[board]\nsize = \"big\"\n").unwrap();
        assert!(AppConfig::new(Some(tmp.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_file_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&FileConfig::default()).unwrap();
        assert!(text.contains("[api]"));
        assert!(text.contains("base_url = \"http://127.0.0.1:5000/api\""));
        assert!(!text.contains("max_reconnect_attempts"));
    }
}
