use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TavernConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub limits: QuotaLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding tavern.db. Defaults to ./data.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Best-effort quota ceilings, enforced by the guard inside the creating
/// transaction. Passed in explicitly so tests can run with arbitrary limits.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaLimits {
    #[serde(default = "default_max_workspaces")]
    pub max_workspaces_per_user: i64,

    #[serde(default = "default_max_members")]
    pub max_members_per_workspace: i64,

    #[serde(default = "default_max_apps")]
    pub max_apps_per_workspace: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8790
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_max_workspaces() -> i64 {
    5
}
fn default_max_members() -> i64 {
    50
}
fn default_max_apps() -> i64 {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_workspaces_per_user: default_max_workspaces(),
            max_members_per_workspace: default_max_members(),
            max_apps_per_workspace: default_max_apps(),
        }
    }
}

impl TavernConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found, using default configuration.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: TavernConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
