//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`CALLWIRE_CONFIG`, falling back to `config/callwire.toml`), then
//! `CALLWIRE__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub calling: CallingConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// STUN/TURN server handed to every peer connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallingConfig {
    pub enabled: bool,
    pub ice_servers: Vec<IceServerConfig>,
    pub udp_port_min: u16,
    pub udp_port_max: u16,
    /// SDP exchange plus provider handshake
    pub negotiation_timeout_secs: u64,
    /// ICE connectivity after the handshake
    pub media_connect_timeout_secs: u64,
    /// Callee answer on outgoing calls
    pub outgoing_answer_timeout_secs: u64,
    pub dtmf_buffer_size: usize,
    /// Directory IVR prompts are resolved against
    pub audio_dir: PathBuf,
    /// Looped to callers waiting for an agent; silence when unset
    pub hold_music: Option<PathBuf>,
    pub max_hold_secs: u64,
}

impl CallingConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn media_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.media_connect_timeout_secs)
    }

    pub fn outgoing_answer_timeout(&self) -> Duration {
        Duration::from_secs(self.outgoing_answer_timeout_secs)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_secs(self.max_hold_secs)
    }
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            udp_port_min: 10000,
            udp_port_max: 10100,
            negotiation_timeout_secs: 30,
            media_connect_timeout_secs: 15,
            outgoing_answer_timeout_secs: 30,
            dtmf_buffer_size: 32,
            audio_dir: PathBuf::from("audio"),
            hold_music: None,
            max_hold_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://postgres@localhost/callwire".to_string(),
                max_connections: 10,
                min_connections: 2,
            },
            calling: CallingConfig::default(),
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("CALLWIRE_CONFIG").unwrap_or_else(|_| "config/callwire".to_string());
        Self::load_from(&path)
    }

    /// Load configuration using `path` as the optional file layer
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CALLWIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_calling_config() {
        let config = Config::default();
        assert_eq!(config.calling.udp_port_min, 10000);
        assert_eq!(config.calling.udp_port_max, 10100);
        assert_eq!(config.calling.negotiation_timeout(), Duration::from_secs(30));
        assert_eq!(config.calling.media_connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.calling.dtmf_buffer_size, 32);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from("/nonexistent/callwire").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.whatsapp.base_url, "https://graph.facebook.com");
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callwire.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[calling]\nudp_port_min = 20000\nudp_port_max = 20050\nhold_music = \"hold.ogg\"\n\n[[calling.ice_servers]]\nurls = [\"turn:turn.example.com:3478\"]\nusername = \"u\"\ncredential = \"p\""
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.calling.udp_port_min, 20000);
        assert_eq!(config.calling.udp_port_max, 20050);
        assert_eq!(config.calling.hold_music, Some(PathBuf::from("hold.ogg")));
        assert_eq!(config.calling.ice_servers.len(), 1);
        assert_eq!(config.calling.ice_servers[0].username.as_deref(), Some("u"));
        // untouched keys keep their defaults
        assert_eq!(config.calling.negotiation_timeout_secs, 30);
    }
}
