//! JSON node configuration.
//!
//! One file holds everything the operator provisions out of band: the key
//! pair, the listen port, the local endpoints, the UNL, and the genesis
//! account set every node in the cohort agrees on.

use crate::WalletError;
use pqledger_types::Digest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default TCP port of the node server.
pub const DEFAULT_PORT: u16 = 8330;

/// One UNL peer: its account id and known endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: Digest,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// One pre-seeded account of the genesis state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Hex-encoded public key.
    pub public_key: String,
    pub balance: u32,
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn default_scheme() -> String {
    "falcon1024".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_node_type() -> String {
    "validator".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Signature scheme name; fixed for the lifetime of the process.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// "validator" or "server".
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Hex-encoded local secret key; empty until generated.
    #[serde(default)]
    pub secret_key: String,
    /// Hex-encoded local public key; empty until generated.
    #[serde(default)]
    pub public_key: String,
    /// Endpoints this node advertises.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub unl: Vec<PeerEntry>,
    #[serde(default)]
    pub genesis_accounts: Vec<GenesisAccount>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            scheme: default_scheme(),
            listen_port: default_port(),
            node_type: default_node_type(),
            data_dir: default_data_dir(),
            secret_key: String::new(),
            public_key: String::new(),
            addresses: Vec::new(),
            unl: Vec::new(),
            genesis_accounts: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<NodeConfig, WalletError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn secret_key_bytes(&self) -> Result<Vec<u8>, WalletError> {
        hex::decode(self.secret_key.trim())
            .map_err(|e| WalletError::Config(format!("secret key is not valid hex: {e}")))
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>, WalletError> {
        hex::decode(self.public_key.trim())
            .map_err(|e| WalletError::Config(format!("public key is not valid hex: {e}")))
    }

    pub fn has_keys(&self) -> bool {
        !self.secret_key.is_empty() && !self.public_key.is_empty()
    }

    pub fn unl_ids(&self) -> Vec<Digest> {
        self.unl.iter().map(|p| p.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");

        let mut cfg = NodeConfig::default();
        cfg.scheme = "dilithium3".into();
        cfg.secret_key = hex::encode([1u8; 8]);
        cfg.public_key = hex::encode([2u8; 8]);
        cfg.unl.push(PeerEntry {
            id: Digest::sha512_of(b"peer").unwrap(),
            addresses: vec!["10.0.0.9".into()],
        });
        cfg.genesis_accounts.push(GenesisAccount {
            public_key: hex::encode([3u8; 33]),
            balance: 10_000,
            addresses: vec![],
        });
        cfg.save(&path).unwrap();

        let back = NodeConfig::load(&path).unwrap();
        assert_eq!(back.scheme, "dilithium3");
        assert_eq!(back.listen_port, DEFAULT_PORT);
        assert_eq!(back.unl.len(), 1);
        assert_eq!(back.secret_key_bytes().unwrap(), vec![1u8; 8]);
        assert!(back.has_keys());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: NodeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.scheme, "falcon1024");
        assert_eq!(cfg.listen_port, DEFAULT_PORT);
        assert_eq!(cfg.node_type, "validator");
        assert!(!cfg.has_keys());
    }
}
