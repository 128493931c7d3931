//! Configuration for dcfish.

use std::fs;
use std::path::{Path, PathBuf};

use dc_transport::TlsPolicy;
use serde::{Deserialize, Serialize};

/// Top-level configuration: one global section plus one `[[hub]]` table
/// per configured hub.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Settings shared across every hub connection.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Per-hub settings.
    #[serde(default, rename = "hub")]
    pub hubs: Vec<HubConfig>,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings global to the client identity and local share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Where downloaded files land.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Where in-progress downloads land before being moved to
    /// `download_dir`.
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: PathBuf,
    /// TLS posture for outgoing hub and C↔C connections.
    #[serde(default)]
    pub tls_policy: TlsPolicyConfig,
    /// Upload slot count.
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// 24-byte client identity, hex-encoded.
    #[serde(default = "default_identity_hex")]
    pub cid: String,
    /// 24-byte client identity preimage, hex-encoded.
    #[serde(default = "default_identity_hex")]
    pub pid: String,
    /// Roster/chat display colors, by message role.
    #[serde(default)]
    pub colors: ColorConfig,
}

/// Console colors for different kinds of displayed text. Field names match
/// the `color_*` configuration keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorConfig {
    /// Color for ordinary roster/chat text.
    #[serde(default = "default_color_normal")]
    pub color_normal: String,
    /// Color for operator-authored chat.
    #[serde(default = "default_color_op")]
    pub color_op: String,
    /// Color for system/status messages.
    #[serde(default = "default_color_system")]
    pub color_system: String,
    /// Color for error/fatal messages.
    #[serde(default = "default_color_error")]
    pub color_error: String,
}

/// TLS posture, mirrored from [`dc_transport::TlsPolicy`] so it derives
/// `serde` without adding a dependency to the transport crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsPolicyConfig {
    /// Never use TLS.
    #[default]
    Disabled,
    /// Use TLS if the peer offers it.
    Prefer,
    /// Refuse to connect without TLS.
    Require,
}

impl From<TlsPolicyConfig> for TlsPolicy {
    fn from(value: TlsPolicyConfig) -> Self {
        match value {
            TlsPolicyConfig::Disabled => Self::Disabled,
            TlsPolicyConfig::Prefer => Self::Prefer,
            TlsPolicyConfig::Require => Self::Require,
        }
    }
}

/// Per-hub connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// `host:port` of the hub.
    pub hubaddr: String,
    /// This client's display nick on this hub.
    pub nick: String,
    /// Password, if the hub requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Free-text description advertised in `$MyINFO`/`BINF`.
    #[serde(default)]
    pub description: String,
    /// Connection speed string advertised alongside the description.
    #[serde(default = "default_connection")]
    pub connection: String,
    /// E-mail address advertised in `$MyINFO`/`BINF`.
    #[serde(default)]
    pub email: String,
    /// Byte encoding this hub's legacy-protocol frames use (ignored on the
    /// modern protocol, which is always UTF-8).
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_incoming_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dcfish/incoming")
}

fn default_slots() -> u32 {
    3
}

fn default_identity_hex() -> String {
    "00".repeat(24)
}

fn default_connection() -> String {
    "100Mbps".to_string()
}

fn default_encoding() -> String {
    "cp1252".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_color_normal() -> String {
    "white".to_string()
}

fn default_color_op() -> String {
    "yellow".to_string()
}

fn default_color_system() -> String {
    "cyan".to_string()
}

fn default_color_error() -> String {
    "red".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            incoming_dir: default_incoming_dir(),
            tls_policy: TlsPolicyConfig::default(),
            slots: default_slots(),
            cid: default_identity_hex(),
            pid: default_identity_hex(),
            colors: ColorConfig::default(),
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            color_normal: default_color_normal(),
            color_op: default_color_op(),
            color_system: default_color_system(),
            color_error: default_color_error(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl GlobalConfig {
    /// Decode `cid` from hex into the 24-byte identity the protocol layer
    /// uses.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured string isn't 48 hex characters.
    pub fn cid_bytes(&self) -> anyhow::Result<[u8; 24]> {
        decode_identity(&self.cid)
    }

    /// Decode `pid` from hex into the 24-byte identity preimage.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured string isn't 48 hex characters.
    pub fn pid_bytes(&self) -> anyhow::Result<[u8; 24]> {
        decode_identity(&self.pid)
    }
}

fn decode_identity(hex_str: &str) -> anyhow::Result<[u8; 24]> {
    let bytes = hex::decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("identity must be 24 bytes, got {}", bytes.len()))
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// The platform-conventional config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dcfish/config.toml")
    }

    /// Load from the default path, writing out a fresh default file first
    /// if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Find a configured hub by its `host:port` address.
    #[must_use]
    pub fn hub(&self, hubaddr: &str) -> Option<&HubConfig> {
        self.hubs.iter().find(|h| h.hubaddr == hubaddr)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.global.cid_bytes()?;
        self.global.pid_bytes()?;

        if self.global.slots == 0 {
            anyhow::bail!("slots must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid log level: {}. must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        for hub in &self.hubs {
            Self::validate_host_port(&hub.hubaddr, "hub address")?;
            if hub.nick.is_empty() {
                anyhow::bail!("hub '{}' has an empty nick", hub.hubaddr);
            }
        }

        Ok(())
    }

    fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
        let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
        }

        let port_str = parts[0];
        let host = parts[1];

        let port: u16 = port_str
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;
        if port == 0 {
            anyhow::bail!("{name} '{addr}' has invalid port: 0");
        }

        if host.is_empty() {
            anyhow::bail!("{name} '{addr}' has empty hostname");
        }
        if host.contains("..") || host.contains('/') || host.contains('\\') {
            anyhow::bail!("{name} '{addr}' contains invalid characters");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.global.slots, 3);
    }

    #[test]
    fn rejects_zero_slots() {
        let mut config = Config::default();
        config.global.slots = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_identity_hex() {
        let mut config = Config::default();
        config.global.cid = "not-hex".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_hub_missing_port() {
        let mut config = Config::default();
        config.hubs.push(HubConfig {
            hubaddr: "hub.example.com".to_string(),
            nick: "me".to_string(),
            password: None,
            description: String::new(),
            connection: default_connection(),
            email: String::new(),
            encoding: default_encoding(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_preserves_hub_list() {
        let mut config = Config::default();
        config.hubs.push(HubConfig {
            hubaddr: "hub.example.com:411".to_string(),
            nick: "me".to_string(),
            password: Some("secret".to_string()),
            description: "testing".to_string(),
            connection: default_connection(),
            email: String::new(),
            encoding: default_encoding(),
        });

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.hubs.len(), 1);
        assert_eq!(deserialized.hubs[0].hubaddr, "hub.example.com:411");
        assert_eq!(deserialized.hubs[0].password.as_deref(), Some("secret"));
    }

    #[test]
    fn hub_lookup_by_address() {
        let mut config = Config::default();
        config.hubs.push(HubConfig {
            hubaddr: "hub.example.com:411".to_string(),
            nick: "me".to_string(),
            password: None,
            description: String::new(),
            connection: default_connection(),
            email: String::new(),
            encoding: default_encoding(),
        });
        assert!(config.hub("hub.example.com:411").is_some());
        assert!(config.hub("absent:1").is_none());
    }
}
