use crate::errors::GatewayError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CRYPTO_PATH: &str = "../test-network/organizations/peerOrganizations/org1.example.com";

/// Per-call-kind deadlines applied to every gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub evaluate: Duration,
    pub endorse: Duration,
    pub submit: Duration,
    pub commit_status: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            evaluate: Duration::from_secs(5),
            endorse: Duration::from_secs(15),
            submit: Duration::from_secs(5),
            commit_status: Duration::from_secs(60),
        }
    }
}

/// Connection, identity and contract settings, built once at startup.
///
/// Every field has a default matching the Fabric test network, so a YAML
/// file only needs the values it wants to change. Timeouts are fixed and
/// cannot be set from the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub msp_id: String,
    pub cert_path: PathBuf,
    pub key_dir: PathBuf,
    pub tls_cert_path: PathBuf,
    pub peer_endpoint: String,
    pub gateway_peer: String,
    pub channel_name: String,
    pub chaincode_name: String,
    #[serde(skip)]
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        let crypto = PathBuf::from(CRYPTO_PATH);
        Config {
            msp_id: "Org1MSP".to_string(),
            cert_path: crypto.join("users/User1@org1.example.com/msp/signcerts/cert.pem"),
            key_dir: crypto.join("users/User1@org1.example.com/msp/keystore/"),
            tls_cert_path: crypto.join("peers/peer0.org1.example.com/tls/ca.crt"),
            peer_endpoint: "localhost:7051".to_string(),
            gateway_peer: "peer0.org1.example.com".to_string(),
            channel_name: "mychannel".to_string(),
            chaincode_name: "basic".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Loads overrides from a YAML file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        // An empty document deserializes to unit, not to a map.
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content).map_err(|e| GatewayError::ConfigError(e.to_string()))
    }
}
