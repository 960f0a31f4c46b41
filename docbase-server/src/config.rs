//! Configuration for the server

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    http::HttpConfig,
    store::{self, SharedEngine},
};

/// Port the HTTP API listens on by default.
pub const DEFAULT_HTTP_PORT: u16 = 8042;

/// Default deadline for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server configuration
///
/// The config is usually loaded from a file with [`Self::load`].
///
/// The struct also implements [`Default`] which creates a config suitable for local development
/// and testing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Config for the HTTP server.
    pub http: HttpConfig,
    /// Where documents are stored.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Deadline for a single request. Requests run without deadline if unset.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

/// The storage engine to use.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// A redb database file.
    Persistent {
        /// Path to the database file. Defaults to [`Config::default_store_path`].
        path: Option<PathBuf>,
    },
    /// Keep everything in memory, lost on shutdown.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Persistent { path: None }
    }
}

impl StorageConfig {
    /// Open the configured engine.
    pub fn open(&self) -> Result<SharedEngine> {
        match self {
            Self::Persistent { path: Some(path) } => store::persistent(path),
            Self::Persistent { path: None } => store::persistent(Config::default_store_path()?),
            Self::Memory => Ok(store::in_memory()),
        }
    }
}

impl Config {
    /// Load the config from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: Config = toml::from_str(&s)?;
        Ok(config)
    }

    /// Get the data directory.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = if let Some(val) = env::var_os("DOCBASE_DATA_DIR") {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().ok_or_else(|| {
                anyhow!("operating environment provides no directory for application data")
            })?;
            path.join("docbase")
        };
        Ok(dir)
    }

    /// Get the path to the default database file.
    pub fn default_store_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("docbase-1.db"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: DEFAULT_HTTP_PORT,
                bind_addr: None,
            },
            storage: StorageConfig::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use testresult::TestResult;

    use super::*;

    #[tokio::test]
    async fn load_from_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
request_timeout = "5s"

[http]
port = 9000
bind_addr = "127.0.0.1"

[storage]
kind = "memory"
"#,
        )
        .await?;
        let config = Config::load(&path).await?;
        assert_eq!(config.http.port, 9000);
        assert_eq!(
            config.http.bind_addr,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        Ok(())
    }

    #[tokio::test]
    async fn optional_sections_default() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[http]\nport = 8042\n").await?;
        let config = Config::load(&path).await?;
        assert_eq!(config.storage, StorageConfig::Persistent { path: None });
        assert_eq!(config.request_timeout, None);
        Ok(())
    }

    #[test]
    fn persistent_storage_opens_at_path() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docs.db");
        let storage = StorageConfig::Persistent {
            path: Some(path.clone()),
        };
        storage.open()?;
        assert!(path.exists());
        Ok(())
    }
}
