use std::{fmt, path::PathBuf};

use ed25519_dalek::SigningKey;

pub const DEFAULT_DATA_DIR: &str = ".erc20";

/// Network whose ledger state a command operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Network {
    Local,
    Sepolia,
    Polygon,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Local => "local",
            Network::Sepolia => "sepolia",
            Network::Polygon => "polygon",
        }
    }

    /// Block explorer link for a transaction, if the network has one.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        match self {
            Network::Local => None,
            Network::Sepolia => Some(format!("https://sepolia.etherscan.io/tx/{tx_hash}")),
            Network::Polygon => Some(format!("https://polygonscan.com/tx/{tx_hash}")),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No value set for environment variable PRIVATE_KEY")]
    MissingPrivateKey,
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Settings resolved from flags and the environment.
#[derive(Clone)]
pub struct Config {
    pub network: Network,
    pub data_dir: PathBuf,
    sk_hex: Option<String>,
}

impl Config {
    pub fn new(network: Network, data_dir: PathBuf, sk_hex: Option<String>) -> Self {
        Self {
            network,
            data_dir,
            sk_hex: sk_hex.filter(|s| !s.trim().is_empty()),
        }
    }

    /// State for each network lives in its own subdirectory.
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(self.network.as_str())
    }

    pub fn signer(&self) -> Result<SigningKey, ConfigError> {
        let sk_hex = self.sk_hex.as_deref().ok_or(ConfigError::MissingPrivateKey)?;
        parse_sk_hex(sk_hex)
    }
}

pub fn parse_sk_hex(sk_hex: &str) -> Result<SigningKey, ConfigError> {
    let sk_hex = sk_hex.trim();
    let sk_hex = sk_hex.strip_prefix("0x").unwrap_or(sk_hex);
    let sk_bytes = hex::decode(sk_hex).map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;
    let arr: [u8; 32] = sk_bytes.as_slice().try_into().map_err(|_| {
        ConfigError::InvalidPrivateKey(format!(
            "must be 32 bytes (64 hex chars), got {}",
            sk_bytes.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(&arr))
}
