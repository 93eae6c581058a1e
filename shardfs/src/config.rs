use crate::fs::flake::MAX_NODE_ID;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub flake: FlakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the volume API listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory holding the on-disk chunk and metadata store.
    pub data_dir: PathBuf,
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    #[serde(default = "default_scope_id")]
    pub customer_id: u64,
    #[serde(default = "default_scope_id")]
    pub share_id: u64,
    /// Client addresses granted access. Empty means allow all.
    #[serde(default)]
    pub allowed_addrs: Vec<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakeConfig {
    #[serde(default = "default_scope_id")]
    pub node_id: u64,
    /// Milliseconds since the Unix epoch from which ID timestamps count.
    #[serde(default)]
    pub epoch_ms: u64,
}

impl Default for FlakeConfig {
    fn default() -> Self {
        Self {
            node_id: default_scope_id(),
            epoch_ms: 0,
        }
    }
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:8445".parse().expect("static address parses")
}

fn default_block_size() -> u64 {
    64 * 1024
}

fn default_scope_id() -> u64 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen: default_listen(),
                data_dir: PathBuf::from("/var/lib/shardfs"),
                block_size: default_block_size(),
                customer_id: default_scope_id(),
                share_id: default_scope_id(),
                allowed_addrs: Vec::new(),
            },
            flake: FlakeConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn write_default_config(path: &Path) -> Result<()> {
        let rendered =
            toml::to_string_pretty(&Settings::default()).context("failed to render defaults")?;
        std::fs::write(path, rendered)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.server.block_size == 0 {
            bail!("server.block_size must be nonzero");
        }
        if self.flake.node_id > MAX_NODE_ID {
            bail!("flake.node_id must be at most {MAX_NODE_ID}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardfs.toml");

        Settings::write_default_config(&path).unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.server.block_size, 64 * 1024);
        assert_eq!(settings.flake.node_id, 1);
        assert!(settings.server.allowed_addrs.is_empty());
    }

    #[test]
    fn bad_node_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardfs.toml");
        std::fs::write(
            &path,
            "[server]\ndata_dir = \"/tmp/x\"\n[flake]\nnode_id = 5000\n",
        )
        .unwrap();
        assert!(Settings::from_file(&path).is_err());
    }
}
