use std::path::{Path, PathBuf};

use pickaxe_types::{DEFAULT_PORT, DEFAULT_WORLD_SEED};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_world_seed")]
    pub world_seed: u64,
    #[serde(default = "default_world_dir")]
    pub world_dir: PathBuf,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_chat_history_path")]
    pub chat_history_path: PathBuf,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_world_seed() -> u64 {
    DEFAULT_WORLD_SEED
}

fn default_world_dir() -> PathBuf {
    PathBuf::from("world")
}

fn default_max_players() -> u32 {
    20
}

fn default_chat_history_path() -> PathBuf {
    PathBuf::from("chat_history.txt")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            world_seed: default_world_seed(),
            world_dir: default_world_dir(),
            max_players: default_max_players(),
            chat_history_path: default_chat_history_path(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("no config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
