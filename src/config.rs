//! TOML-based configuration for the `blesocks` binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::communication::stream::{SecurityLevel, SocketOptions};
use crate::communication::Uuid128;
use crate::management::interface::Controller;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {}", path.display(), source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {}", source)]
    Parse {
        #[source]
        source: toml::de::Error,
    },
    #[error("{} holds no name.", path.display())]
    EmptyNameFile { path: PathBuf },
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default)]
    pub gatt: GattSection,
    #[serde(default)]
    pub forward: ForwardSection,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse { source })
    }
}

/// The `[radio]` section.
#[derive(Debug, Deserialize)]
pub struct RadioSection {
    #[serde(default)]
    pub controller: u16,
    #[serde(default)]
    pub security: SecurityLevel,
    #[serde(default = "default_recv_mtu")]
    pub recv_mtu: u16,
}

fn default_recv_mtu() -> u16 {
    2048
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            controller: 0,
            security: SecurityLevel::default(),
            recv_mtu: default_recv_mtu(),
        }
    }
}

impl RadioSection {
    pub fn controller(&self) -> Controller {
        Controller(self.controller)
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            security: Some(self.security),
            recv_mtu: Some(self.recv_mtu),
        }
    }
}

/// The `[gatt]` section: identifiers agreed between both ends.
#[derive(Debug, Deserialize)]
pub struct GattSection {
    #[serde(default = "default_service")]
    pub service: Uuid128,
    #[serde(default = "default_channel_characteristic")]
    pub channel_characteristic: Uuid128,
    #[serde(default = "default_handoff_characteristic")]
    pub handoff_characteristic: Uuid128,
}

fn default_service() -> Uuid128 {
    Uuid128::from_u128(0x79cf4eca_116a_4ded_8426_fb83e53bc1d7)
}

fn default_channel_characteristic() -> Uuid128 {
    Uuid128::from_u128(0xab76ead2_b6e6_4f12_a053_61cd0eed19f9)
}

fn default_handoff_characteristic() -> Uuid128 {
    Uuid128::from_u128(0x918ce61c_199f_419e_b6d5_59883a0049d8)
}

impl Default for GattSection {
    fn default() -> Self {
        Self {
            service: default_service(),
            channel_characteristic: default_channel_characteristic(),
            handoff_characteristic: default_handoff_characteristic(),
        }
    }
}

/// The `[forward]` section.
#[derive(Debug, Deserialize)]
pub struct ForwardSection {
    #[serde(default = "default_advertised_name")]
    pub advertised_name: String,
    /// A file whose first line replaces `advertised_name`.
    pub advertised_name_file: Option<PathBuf>,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_advertised_name() -> String {
    "blesocks forwarder".into()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1080))
}

impl Default for ForwardSection {
    fn default() -> Self {
        Self {
            advertised_name: default_advertised_name(),
            advertised_name_file: None,
            listen: default_listen(),
        }
    }
}

impl ForwardSection {
    /// The name to advertise under, read from `advertised_name_file` when set.
    pub fn advertised_name(&self) -> Result<String, ConfigError> {
        let path = match &self.advertised_name_file {
            Some(path) => path,
            None => return Ok(self.advertised_name.clone()),
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        match content.lines().next().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name.to_owned()),
            _ => Err(ConfigError::EmptyNameFile { path: path.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn defaults_test() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.radio.controller(), Controller(0));
        assert_eq!(config.radio.security, SecurityLevel::High);
        assert_eq!(config.radio.recv_mtu, 2048);
        assert_eq!(
            config.gatt.service.to_string(),
            "79cf4eca-116a-4ded-8426-fb83e53bc1d7"
        );
        assert_eq!(
            config.gatt.channel_characteristic.to_string(),
            "ab76ead2-b6e6-4f12-a053-61cd0eed19f9"
        );
        assert_eq!(
            config.gatt.handoff_characteristic.to_string(),
            "918ce61c-199f-419e-b6d5-59883a0049d8"
        );
        assert_eq!(config.forward.advertised_name().unwrap(), "blesocks forwarder");
        assert_eq!(config.forward.listen.to_string(), "127.0.0.1:1080");
    }

    #[test]
    pub fn sections_test() {
        let config = Config::parse(
            r#"
            [radio]
            controller = 1
            security = "medium"

            [gatt]
            service = "00001800-0000-1000-8000-00805f9b34fb"

            [forward]
            advertised_name = "kitchen"
            listen = "0.0.0.0:9050"
            "#,
        )
        .unwrap();

        assert_eq!(config.radio.controller(), Controller(1));
        assert_eq!(
            config.radio.socket_options().security,
            Some(SecurityLevel::Medium)
        );
        assert_eq!(config.radio.recv_mtu, 2048);
        assert_eq!(config.gatt.service, Uuid128::from(0x1800u16));
        assert_eq!(config.forward.advertised_name().unwrap(), "kitchen");
        assert_eq!(config.forward.listen.port(), 9050);
    }

    #[test]
    pub fn bad_config_test() {
        assert!(matches!(
            Config::parse("[gatt]\nservice = \"not-a-uuid\""),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::parse("[radio]\nsecurity = \"extreme\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    pub fn name_file_test() {
        let dir = std::env::temp_dir().join(format!("blesocks-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("name");
        std::fs::write(&path, "  living room  \nignored\n").unwrap();
        let forward = ForwardSection {
            advertised_name_file: Some(path.clone()),
            ..ForwardSection::default()
        };
        assert_eq!(forward.advertised_name().unwrap(), "living room");

        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            forward.advertised_name(),
            Err(ConfigError::EmptyNameFile { .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
