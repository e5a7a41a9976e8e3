// Конфигурация приложения: файл (необязательный) + переменные окружения PEERCALL__*

use crate::bandwidth::BandwidthConvention;
use crate::peer::types::{IceServer, ServerConfig};
use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// директива EnvFilter, например `info` или `peercall_lib=debug`
    pub level: String,
    /// `pretty`, `compact` или `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // в режиме отладки подробнее
            level: if cfg!(debug_assertions) {
                "debug".into()
            } else {
                "info".into()
            },
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub signaling_url: Option<String>,
    pub ice_servers: Vec<ServerConfig>,
    pub stats_interval_ms: u64,
    pub audio_level_interval_ms: u64,
    /// 0 = без ограничения
    pub max_bitrate_kbps: u32,
    pub bandwidth_convention: BandwidthConvention,
    pub preferred_audio_codec: Option<String>,
    pub preferred_video_codec: Option<String>,
    pub auto_accept: bool,
    pub logging: LoggingConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: None,
            ice_servers: default_ice_servers(),
            stats_interval_ms: 2000,
            audio_level_interval_ms: 500,
            max_bitrate_kbps: 0,
            bandwidth_convention: BandwidthConvention::As,
            preferred_audio_codec: None,
            preferred_video_codec: None,
            auto_accept: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// Дефолтные STUN серверы Google
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

impl CallConfig {
    /// Загружает конфиг из файла (если указан) и окружения
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder
            .add_source(
                Environment::with_prefix("PEERCALL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// ICE серверы для соединений; невалидные записи пропускаются
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers
            .iter()
            .filter(|server| match server.validate() {
                Ok(()) => true,
                Err(reason) => {
                    warn!(id = %server.id, %reason, "skipping invalid ICE server");
                    false
                }
            })
            .map(ServerConfig::to_ice_server)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.stats_interval_ms, 2000);
        assert_eq!(config.audio_level_interval_ms, 500);
        assert_eq!(config.max_bitrate_kbps, 0);
        assert_eq!(config.bandwidth_convention, BandwidthConvention::As);
        assert_eq!(config.ice_servers().len(), 2);
        assert!(config.logging.enabled);
    }

    #[test]
    fn test_invalid_servers_skipped() {
        let mut config = CallConfig::default();
        let mut turn = ServerConfig::stun("relay", "relay.example.org:3478");
        turn.r#type = "turn".into();
        config.ice_servers.push(turn);
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert!(servers.iter().all(|s| s.urls[0].starts_with("stun:")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("peercall-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("peercall.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
signaling_url = "ws://127.0.0.1:8080/ws"
max_bitrate_kbps = 750
bandwidth_convention = "tias"
preferred_video_codec = "video/VP9"

[[ice_servers]]
id = "turn-1"
type = "turn"
url = "turn.example.org:3478"
username = "user"
credential = "secret"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = CallConfig::load(path.to_str()).unwrap();
        assert_eq!(config.signaling_url.as_deref(), Some("ws://127.0.0.1:8080/ws"));
        assert_eq!(config.max_bitrate_kbps, 750);
        assert_eq!(config.bandwidth_convention, BandwidthConvention::Tias);
        assert_eq!(config.stats_interval_ms, 2000);
        assert_eq!(config.logging.format, "json");
        assert!(config.logging.enabled);
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["turn:turn.example.org:3478".to_string()]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
