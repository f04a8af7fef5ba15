//! Configuration handling for the connect tool.
//!
//! Settings come from a YAML file, then `AFP_*` environment variables, then
//! command-line flags, each layer overriding the one before.

use afp_session::ConnectConfig;
use afp_wire::{AfpVersion, UamMask, VersionSet, DSI_DEFAULT_PORT};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Connect tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: Option<String>,
    /// Server port
    pub port: u16,
    /// User name; empty for guest access
    pub user: String,
    /// Password
    pub password: String,
    /// Acceptable method names; empty for all
    pub uams: Vec<String>,
    /// Highest AFP version to negotiate, e.g. "3.1"
    pub afp_version: Option<String>,
    /// Versions this client offers; empty for the built-in list
    pub client_versions: Vec<String>,
    /// TCP connect bound, e.g. "5s"
    pub connect_timeout: String,
    /// Per-reply bound, e.g. "5s"
    pub reply_timeout: String,
    /// Attention quantum offered to servers
    pub attention_quantum: u32,
    /// Receive quantum assigned to servers
    pub rx_quantum: u32,
    /// Largest reply payload accepted
    pub max_payload: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let defaults = ConnectConfig::default();
        Self {
            host: None,
            port: DSI_DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            uams: Vec::new(),
            afp_version: None,
            client_versions: Vec::new(),
            connect_timeout: humantime::format_duration(defaults.connect_timeout).to_string(),
            reply_timeout: humantime::format_duration(defaults.reply_timeout).to_string(),
            attention_quantum: defaults.attention_quantum,
            rx_quantum: defaults.rx_quantum,
            max_payload: defaults.max_payload,
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    afp: Option<ClientConfig>,
}

impl ClientConfig {
    /// Load from `config_path` (defaults when missing) and apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                root.afp.unwrap_or_default()
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `AFP_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("AFP_HOST") {
            info!("Host overridden by environment: {}", host);
            self.host = Some(host);
        }

        if let Some(port) = lookup("AFP_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.port = port;
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid AFP_PORT {:?}", port),
            }
        }

        if let Some(user) = lookup("AFP_USER") {
            self.user = user;
        }

        if let Some(password) = lookup("AFP_PASSWORD") {
            self.password = password;
        }

        if let Some(uams) = lookup("AFP_UAMS") {
            self.uams = uams
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(version) = lookup("AFP_VERSION") {
            self.afp_version = Some(version);
        }

        if let Some(timeout) = lookup("AFP_CONNECT_TIMEOUT") {
            self.connect_timeout = timeout;
        }

        if let Some(timeout) = lookup("AFP_REPLY_TIMEOUT") {
            self.reply_timeout = timeout;
        }
    }

    /// Requested version bound, if any
    pub fn requested_version(&self) -> Result<Option<AfpVersion>> {
        self.afp_version
            .as_deref()
            .map(|v| v.parse::<AfpVersion>().map_err(|e| anyhow!(e)))
            .transpose()
    }

    /// Acceptable methods, if restricted
    pub fn uam_mask(&self) -> Result<Option<UamMask>> {
        if self.uams.is_empty() {
            return Ok(None);
        }
        let mut mask = UamMask::empty();
        for name in &self.uams {
            mask |= UamMask::from_uam_name(name).ok_or_else(|| anyhow!("unknown UAM {:?}", name))?;
        }
        Ok(Some(mask))
    }

    /// Settings for the connect path
    pub fn connect_config(&self) -> Result<ConnectConfig> {
        let mut config = ConnectConfig {
            connect_timeout: parse_duration("connect_timeout", &self.connect_timeout)?,
            reply_timeout: parse_duration("reply_timeout", &self.reply_timeout)?,
            attention_quantum: self.attention_quantum,
            rx_quantum: self.rx_quantum,
            max_payload: self.max_payload,
            ..ConnectConfig::default()
        };

        if !self.client_versions.is_empty() {
            config.client_versions = self
                .client_versions
                .iter()
                .map(|v| v.parse::<AfpVersion>().map_err(|e| anyhow!(e)))
                .collect::<Result<VersionSet>>()?;
        }
        if config.client_versions.is_empty() {
            bail!("no client versions configured");
        }

        Ok(config)
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid {} {:?}", field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 548);
        assert_eq!(config.connect_timeout, "5s");
        assert_eq!(config.uam_mask().unwrap(), None);

        let connect = config.connect_config().unwrap();
        assert_eq!(connect.reply_timeout, Duration::from_secs(5));
        assert_eq!(connect.rx_quantum, 128 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
afp:
  host: nas.local
  port: 10548
  user: alice
  uams: ["Cleartxt Passwrd", "No User Authent"]
  afp_version: "3.1"
  client_versions: ["2.2", "3.0", "3.1"]
  reply_timeout: 1500ms
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.host.as_deref(), Some("nas.local"));
        assert_eq!(config.port, 10548);
        assert_eq!(config.requested_version().unwrap(), Some(AfpVersion::V31));
        assert_eq!(
            config.uam_mask().unwrap(),
            Some(UamMask::CLEARTXT_PASSWRD | UamMask::NO_USER_AUTHENT)
        );

        let connect = config.connect_config().unwrap();
        assert_eq!(connect.reply_timeout, Duration::from_millis(1500));
        assert_eq!(connect.connect_timeout, Duration::from_secs(5));
        assert_eq!(connect.client_versions.len(), 3);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.port, ClientConfig::default().port);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"afp: [not, a, map]").unwrap();
        assert!(ClientConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("AFP_HOST", "10.0.0.5"),
            ("AFP_PORT", "not-a-port"),
            ("AFP_UAMS", "DHX2, Cleartxt Passwrd"),
            ("AFP_REPLY_TIMEOUT", "250ms"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.port, 548);
        assert_eq!(
            config.uam_mask().unwrap(),
            Some(UamMask::DHX2 | UamMask::CLEARTXT_PASSWRD)
        );
        assert_eq!(
            config.connect_config().unwrap().reply_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_invalid_values() {
        let config = ClientConfig {
            uams: vec!["Telepathy".to_string()],
            afp_version: Some("9.9".to_string()),
            reply_timeout: "soon".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.uam_mask().is_err());
        assert!(config.requested_version().is_err());
        assert!(config.connect_config().is_err());
    }
}
