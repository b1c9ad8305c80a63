use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::status::BuildStatus;

/// ポーリング対象（CLI引数から一度だけ構築され、以後変更されない）
#[derive(Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// CircleCI APIトークン
    pub token: String,
    /// アカウント/組織名
    pub user: String,
    /// リポジトリ名
    pub repo: String,
    /// ブランチ名
    pub branch: String,
    /// ポーリング間隔（秒、1以上）
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

// The token must never end up in logs
impl std::fmt::Debug for PollConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollConfig")
            .field("token", &"***")
            .field("user", &self.user)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("interval_secs", &self.interval_secs)
            .finish()
    }
}

/// CI provider API設定
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// APIのベースURL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// リクエストタイムアウト（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://circleci.com".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl ApiConfig {
    fn validate(&self) -> Result<()> {
        // A zero timeout fails every request before it is sent
        if self.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 出力バックエンドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Raspberry Pi GPIO
    Gpio,
    /// In-memory lamps, state changes go to the log
    Sim,
}

/// 信号灯設定
///
/// Pin numbers are BCM. The defaults are physical pins 15/13/11.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    /// 出力バックエンド
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_green_pin")]
    pub green_pin: u8,
    #[serde(default = "default_yellow_pin")]
    pub yellow_pin: u8,
    #[serde(default = "default_red_pin")]
    pub red_pin: u8,
    /// Lamps light when the pin is driven low (relay boards)
    #[serde(default = "default_active_low")]
    pub active_low: bool,
    /// 起動時の論理状態（最初のポーリングまで表示されない）
    #[serde(default)]
    pub initial_status: BuildStatus,
}

fn default_backend() -> BackendKind {
    BackendKind::Gpio
}

fn default_green_pin() -> u8 {
    22
}

fn default_yellow_pin() -> u8 {
    27
}

fn default_red_pin() -> u8 {
    17
}

fn default_active_low() -> bool {
    true
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            green_pin: default_green_pin(),
            yellow_pin: default_yellow_pin(),
            red_pin: default_red_pin(),
            active_low: default_active_low(),
            initial_status: BuildStatus::default(),
        }
    }
}

impl IndicatorConfig {
    fn validate(&self) -> Result<()> {
        let pins = [self.green_pin, self.yellow_pin, self.red_pin];
        if pins[0] == pins[1] || pins[1] == pins[2] || pins[0] == pins[2] {
            anyhow::bail!(
                "Indicator pins must be distinct (green={}, yellow={}, red={})",
                self.green_pin,
                self.yellow_pin,
                self.red_pin
            );
        }
        if self.initial_status == BuildStatus::Error {
            anyhow::bail!("initial_status cannot be \"error\"");
        }
        Ok(())
    }
}

/// ログ設定
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// ログファイル（未設定時はstderr）
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// An explicitly given path must exist. The default path is optional and
    /// falls back to built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::config_path() {
                Ok(p) => (p, false),
                Err(_) => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        config.api.validate()?;
        config.indicator.validate()?;
        Ok(config)
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        // ~/.config/ci-traffic-light/config.toml を使用
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/ci-traffic-light/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "https://circleci.com");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.indicator.backend, BackendKind::Gpio);
        assert_eq!(
            (config.indicator.green_pin, config.indicator.yellow_pin, config.indicator.red_pin),
            (22, 27, 17)
        );
        assert!(config.indicator.active_low);
        assert_eq!(config.indicator.initial_status, BuildStatus::Unknown);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
timeout_secs = 3

[indicator]
backend = "sim"
red_pin = 5
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.api.timeout_secs, 3);
        assert_eq!(config.api.base_url, "https://circleci.com");
        assert_eq!(config.indicator.backend, BackendKind::Sim);
        assert_eq!(config.indicator.red_pin, 5);
        assert_eq!(config.indicator.green_pin, 22);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_rejects_duplicate_pins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indicator]\ngreen_pin = 17\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn test_load_rejects_error_initial_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indicator]\ninitial_status = \"error\"\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\ntimeout_secs = 0\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[indicator\nbackend = ").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_poll_config_debug_redacts_token() {
        let poll = PollConfig {
            token: "abc123".to_string(),
            user: "acme".to_string(),
            repo: "widgets".to_string(),
            branch: "master".to_string(),
            interval_secs: 10,
        };
        let debug = format!("{:?}", poll);
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("widgets"));
        assert_eq!(poll.interval(), std::time::Duration::from_secs(10));
    }
}
