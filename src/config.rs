use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
#[command(name = "zenswap", about = "Community marketplace for selling, buying, renting and swapping")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Record store backend
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Insert demo listings when the store has none
    #[arg(long)]
    pub seed: bool,
}

#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite tables queried with native operators
    #[default]
    Sqlite,
    /// One JSON file per collection
    File,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub listings: ListingsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// SQLite database file
    pub path: Option<PathBuf>,
    /// Directory holding the flat-file collections
    pub data_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ListingsConfig {
    /// Restrict update and delete to the listing's owner
    pub require_owner: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_file_bytes: 5 * 1024 * 1024,
            max_files: 6,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "zenswap_session".to_string(),
            session_hours: 168,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(backend) = cli.backend {
            config.database.backend = backend;
        }

        // Resolve paths relative to data dir
        config.resolve_paths(&data_dir);

        Ok(config)
    }

    /// Fills every unset path with its location under `data_dir`.
    pub fn resolve_paths(&mut self, data_dir: &Path) {
        if self.database.path.is_none() {
            self.database.path = Some(data_dir.join("zenswap.db"));
        }
        if self.database.data_path.is_none() {
            self.database.data_path = Some(data_dir.join("data"));
        }
        if self.storage.path.is_none() {
            self.storage.path = Some(data_dir.join("uploads"));
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".zenswap")
        })
    }

    pub fn db_path(&self) -> &Path {
        self.database
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new("zenswap.db"))
    }

    pub fn data_path(&self) -> &Path {
        self.database
            .data_path
            .as_deref()
            .unwrap_or_else(|| Path::new("data"))
    }

    pub fn uploads_path(&self) -> &Path {
        self.storage
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new("uploads"))
    }
}
