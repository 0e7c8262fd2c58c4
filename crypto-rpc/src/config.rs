//! Daemon configuration loading (§4.10, §6): a JSON document read once at startup and
//! turned into a validated [`DaemonConfig`], plus the access-control and key-database
//! descriptions it points at.

use {
    crate::{
        error::ConfigError,
        keystore::{access_control::AccessControlDescription, journal::KeyDatabaseDescription},
    },
    serde::Deserialize,
    std::{fs, path::Path},
};

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    #[serde(rename = "maxConnectionNum")]
    max_connection_num: u32,
    #[serde(rename = "keyAccessControl")]
    key_access_control: Option<String>,
    #[serde(rename = "idsmReporting", default)]
    idsm_reporting: bool,
    #[serde(rename = "socketPath")]
    socket_path: String,
    #[serde(rename = "keyDatabase")]
    key_database: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct X509StorageSection {
    root: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct X509AccessSection {
    #[serde(rename = "caConnectorId")]
    ca_connector_id: Option<u32>,
    #[serde(rename = "trustmasterId")]
    trustmaster_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct X509Section {
    #[serde(default)]
    storage: X509StorageSection,
    #[serde(default)]
    access: X509AccessSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DaemonConfigDescription {
    #[serde(rename = "Server")]
    server: ServerSection,
    #[serde(rename = "X.509", default)]
    x509: X509Section,
}

/// Daemon-wide, validated configuration (§6 "Daemon configuration"). Built only through
/// [`DaemonConfig::load`], which enforces the cross-field constraints the JSON shape on
/// its own cannot express.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub max_connection_num: u32,
    pub key_access_control_path: Option<String>,
    pub idsm_reporting: bool,
    pub socket_path: String,
    pub key_database_path: String,
    pub x509_storage_root: Option<String>,
    pub x509_ca_connector_id: Option<u32>,
    pub x509_trustmaster_id: Option<u32>,
}

impl DaemonConfig {
    /// Reads, parses, and validates the daemon configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let desc: DaemonConfigDescription =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_description(desc)
    }

    fn from_description(desc: DaemonConfigDescription) -> Result<Self, ConfigError> {
        if desc.server.max_connection_num == 0 {
            return Err(ConfigError::Validation(
                "Server.maxConnectionNum must be nonzero".into(),
            ));
        }
        let x509_access = desc.x509.access;
        if x509_access.ca_connector_id.is_some() != x509_access.trustmaster_id.is_some() {
            return Err(ConfigError::Validation(
                "X.509.access.caConnectorId and trustmasterId must be present together or not at all".into(),
            ));
        }
        Ok(Self {
            max_connection_num: desc.server.max_connection_num,
            key_access_control_path: desc.server.key_access_control,
            idsm_reporting: desc.server.idsm_reporting,
            socket_path: desc.server.socket_path,
            key_database_path: desc.server.key_database,
            x509_storage_root: desc.x509.storage.root,
            x509_ca_connector_id: x509_access.ca_connector_id,
            x509_trustmaster_id: x509_access.trustmaster_id,
        })
    }

    /// Loads the access-control description this configuration names, or an empty
    /// (enforcement-disabled) description when `Server.keyAccessControl` is absent (§6,
    /// §8 property 9).
    pub fn load_access_control(&self) -> Result<AccessControlDescription, ConfigError> {
        let Some(path) = &self.key_access_control_path else {
            return Ok(AccessControlDescription::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }

    /// Loads the key-database description this configuration names.
    pub fn load_key_database(&self) -> Result<KeyDatabaseDescription, ConfigError> {
        let path = &self.key_database_path;
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("crypto-rpc-config-test-{}-{}.json", std::process::id(), n));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_minimal_configuration() {
        let path = write_temp(
            r#"{
                "Server": {
                    "maxConnectionNum": 16,
                    "socketPath": "/run/crypto-rpc.sock",
                    "keyDatabase": "/etc/crypto-rpc/keys.json"
                }
            }"#,
        );
        let cfg = DaemonConfig::load(&path).unwrap();
        assert_eq!(cfg.max_connection_num, 16);
        assert_eq!(cfg.socket_path, "/run/crypto-rpc.sock");
        assert!(cfg.key_access_control_path.is_none());
        assert!(!cfg.idsm_reporting);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_zero_max_connections() {
        let path = write_temp(
            r#"{
                "Server": {
                    "maxConnectionNum": 0,
                    "socketPath": "/run/crypto-rpc.sock",
                    "keyDatabase": "/etc/crypto-rpc/keys.json"
                }
            }"#,
        );
        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rejects_partial_x509_access_ids() {
        let path = write_temp(
            r#"{
                "Server": {
                    "maxConnectionNum": 4,
                    "socketPath": "/run/crypto-rpc.sock",
                    "keyDatabase": "/etc/crypto-rpc/keys.json"
                },
                "X.509": {
                    "access": { "caConnectorId": 1000 }
                }
            }"#,
        );
        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn accepts_paired_x509_access_ids() {
        let path = write_temp(
            r#"{
                "Server": {
                    "maxConnectionNum": 4,
                    "socketPath": "/run/crypto-rpc.sock",
                    "keyDatabase": "/etc/crypto-rpc/keys.json"
                },
                "X.509": {
                    "access": { "caConnectorId": 1000, "trustmasterId": 1001 }
                }
            }"#,
        );
        let cfg = DaemonConfig::load(&path).unwrap();
        assert_eq!(cfg.x509_ca_connector_id, Some(1000));
        assert_eq!(cfg.x509_trustmaster_id, Some(1001));
        let _ = fs::remove_file(&path);
    }
}
