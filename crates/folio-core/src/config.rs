//! Runtime configuration.
//!
//! Defaults cover a local playground checkout. A TOML file may override any
//! subset of fields; the CLI layers flag and environment overrides on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::channel::ChannelConfig;
use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FolioConfig {
    /// Evaluation timeout in milliseconds.
    pub timeout_ms: u64,
    /// Budget for context bring-up (`init` + `version`).
    pub init_timeout_ms: u64,
    /// Pause before the first evaluation on a fresh context.
    pub settle_delay_ms: u64,
    /// Renderer command line; the program must speak the JSON-lines protocol
    /// on stdio.
    pub renderer: Vec<String>,
    pub examples_dir: PathBuf,
    pub docs_dir: PathBuf,
    /// Playground URL that shareable links point at.
    pub base_url: String,
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            init_timeout_ms: 10_000,
            settle_delay_ms: 100,
            renderer: vec!["node".to_string(), "renderer/worker.mjs".to_string()],
            examples_dir: PathBuf::from("react-pdf-examples"),
            docs_dir: PathBuf::from("react-pdf-docs"),
            base_url: "http://localhost:3000/".to_string(),
        }
    }
}

impl FolioConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FolioConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.init_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "init_timeout_ms must be positive".into(),
            ));
        }
        if self.renderer.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Invalid("renderer command is empty".into()));
        }
        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("base_url {:?}: {err}", self.base_url)))
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            init_timeout_ms: self.init_timeout_ms,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            timeout_ms: self.timeout_ms,
            settle_delay_ms: self.settle_delay_ms,
            base_url: self.base_url.clone(),
        }
    }
}
