//! `grievance.toml` configuration.
//!
//! Every section is optional; a missing file at the default location yields
//! the defaults. Relative paths are resolved against the directory holding
//! the configuration file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use grievance::{CategoryRoutes, NewDepartment};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "grievance.toml";
pub const DEFAULT_STORE_PATH: &str = "grievance.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Departments created by `grievance seed`, parents before children.
    #[serde(default)]
    pub departments: Vec<NewDepartment>,
    /// Category routes for complaints filed without a department.
    #[serde(default)]
    pub routing: CategoryRoutes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON snapshot file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// OTLP collector endpoint, e.g. `http://localhost:4317`. Export is off
    /// when absent.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "grievance".to_string()
}

impl Config {
    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads the file at `path`.
    ///
    /// A missing file is only tolerated at the default location.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG_PATH) => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config {}", path.display()));
            }
        };

        let mut config =
            Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.store.path.is_relative() {
            self.store.path = base.join(&self.store.path);
        }
    }
}
