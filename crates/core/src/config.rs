use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{assets::get_default_config, engine::EngineConfiguration};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("File system error: {0}")]
    IO(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YAMLError(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    JSONError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u64),
    String(String),
}

/// Options read from a config file. Every field is optional and only present fields are
/// applied to a run.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default, alias = "spec_dir", skip_serializing_if = "Option::is_none")]
    pub spec_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_spec_with_no_expectations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_spec_on_expectation_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_spec_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<NumberOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
    #[serde(default, alias = "spec_files", skip_serializing_if = "Option::is_none")]
    pub spec_files: Option<Vec<String>>,
}

impl RunConfig {
    pub fn seed(&self) -> Result<Option<u64>, ConfigError> {
        match &self.seed {
            None => Ok(None),
            Some(NumberOrString::Number(n)) => Ok(Some(*n)),
            Some(NumberOrString::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Config(format!("Invalid seed '{s}'"))),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(NumberOrString::Number(seed));
        self
    }

    /// Engine options named by this config, renamed to the engine's vocabulary.
    pub fn engine_configuration(&self) -> Result<EngineConfiguration, ConfigError> {
        Ok(EngineConfiguration {
            fail_spec_with_no_expectations: self.fail_spec_with_no_expectations,
            one_failure_per_spec: self.stop_spec_on_expectation_failure,
            fail_fast: self.stop_on_spec_failure,
            random: self.random,
            seed: self.seed()?,
            spec_filter: None,
        })
    }

    /// Parses `content`, as JSON when `path` has a `.json` extension and YAML otherwise.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(content)?)
        } else if content.trim().is_empty() {
            Ok(Self::default())
        } else {
            Ok(serde_yaml::from_str(content)?)
        }
    }
}

/// Reads a config file, reporting a missing file as [`ConfigError::NotFound`].
#[instrument]
pub async fn read_config_file(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    RunConfig::parse(path, &content)
}

/// Returns whether `config_path` already existed, writing the default config if not.
#[instrument]
pub fn create_or_get_config_file(config_path: &Path) -> Result<(bool, PathBuf), ConfigError> {
    let parent_dir = config_path.parent().ok_or_else(|| {
        ConfigError::IO(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Config path has no parent directory",
        ))
    })?;

    if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
        fs::create_dir_all(parent_dir)?;
    }

    if config_path.exists() {
        Ok((true, config_path.to_path_buf()))
    } else {
        File::create(config_path)?.write_all(get_default_config().as_bytes())?;
        Ok((false, config_path.to_path_buf()))
    }
}
