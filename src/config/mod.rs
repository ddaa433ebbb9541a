//! Configuration structures and loading, following the teacher's
//! `Configuration::load` idiom: a TOML file parsed with `toml` and
//! `anyhow::Context` wrapping, values overridable by `GOBOX_`-prefixed
//! environment variables (the same "env overrides file" posture the
//! original Go source took with `viper.AutomaticEnv()`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfiguration,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub docker: DockerConfiguration,

    #[serde(default)]
    pub database: DatabaseConfiguration,

    #[serde(default)]
    pub session: SessionConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load the built-in defaults, used by `migrate`/`diagnostics` when no
    /// `--config` is given and no file exists yet.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            let mut config = Configuration::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GOBOX_SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("GOBOX_SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("GOBOX_ENVIRONMENT") {
            self.environment = v;
        }
        if let Ok(v) = std::env::var("GOBOX_DOCKER_SOCKET") {
            self.docker.socket = v;
        }
        if let Ok(v) = std::env::var("GOBOX_DOCKER_BASE_IMAGE") {
            self.docker.base_image = v;
        }
        if let Ok(v) = std::env::var("GOBOX_DOCKER_NETWORK") {
            self.docker.network = v;
        }
        if let Ok(v) = std::env::var("GOBOX_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server: ServerConfiguration::default(),
            environment: default_environment(),
            docker: DockerConfiguration::default(),
            database: DatabaseConfiguration::default(),
            session: SessionConfiguration::default(),
        }
    }
}

fn default_environment() -> String {
    "development".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    #[serde(default = "default_base_image")]
    pub base_image: String,

    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: i64,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    #[serde(default = "default_storage_limit_mb")]
    pub storage_limit_mb: i64,
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            base_image: default_base_image(),
            network: default_network(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit: default_cpu_limit(),
            storage_limit_mb: default_storage_limit_mb(),
        }
    }
}

impl DockerConfiguration {
    pub fn memory_limit_bytes(&self) -> i64 {
        self.memory_limit_mb * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

fn default_docker_socket() -> String {
    #[cfg(target_os = "windows")]
    {
        "npipe:////./pipe/docker_engine".into()
    }
    #[cfg(not(target_os = "windows"))]
    {
        "/var/run/docker.sock".into()
    }
}

fn default_base_image() -> String {
    "ubuntu:latest".into()
}

fn default_network() -> String {
    "gobox".into()
}

fn default_memory_limit_mb() -> i64 {
    256
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_storage_limit_mb() -> i64 {
    512
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfiguration {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gobox.sqlite3")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfiguration {
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_reap_interval_secs() -> u64 {
    60 * 60
}

fn default_max_idle_secs() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = Configuration::default();
        assert_eq!(config.session.shutdown_grace_secs, 5);
        assert_eq!(config.session.reap_interval_secs, 3600);
        assert_eq!(config.session.max_idle_secs, 86400);
        assert_eq!(config.docker.memory_limit_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.docker.storage_limit_mb, 512);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            [server]
            port = 9000
        "#;
        let config: Configuration = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
