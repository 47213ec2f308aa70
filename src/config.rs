use crate::error::Result;
use crate::ml::models::TrainingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Environment variable naming an optional override file
pub const CONFIG_PATH_ENV: &str = "CIVIC_PRIORITY_CONFIG";

/// Environment variable selecting the served model
pub const PRIORITY_MODEL_ENV: &str = "PRIORITY_MODEL";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Artifact storage configuration
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// HTTP serving configuration
    #[serde(default)]
    pub serving: ServingConfig,

    /// Training run configuration
    #[serde(default)]
    pub training: TrainingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, file and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/local.toml".to_string());

        let mut config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: CIVIC_PRIORITY_)
            .add_source(
                config::Environment::with_prefix("CIVIC_PRIORITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(model_name) = std::env::var(PRIORITY_MODEL_ENV) {
            config.apply_model_override(&model_name);
        }

        config.validate()?;
        Ok(config)
    }

    /// Select the served model, ignoring blank values
    pub fn apply_model_override(&mut self, model_name: &str) {
        let model_name = model_name.trim();
        if !model_name.is_empty() {
            self.serving.model_name = model_name.to_string();
        }
    }

    /// Check every section that carries rules
    pub fn validate(&self) -> Result<()> {
        self.serving.validate()?;
        self.training.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifacts: ArtifactsConfig::default(),
            serving: ServingConfig::default(),
            training: TrainingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Root directory for datasets, models and preprocessors
    #[serde(default = "default_artifacts_root")]
    pub root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifacts_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServingConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Artifact name of the model to serve
    #[serde(default = "default_model_name")]
    #[validate(length(min = 1))]
    pub model_name: String,

    /// Label whose probability orders ranked results
    #[serde(default = "default_high_priority_label")]
    #[validate(length(min = 1))]
    pub high_priority_label: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model_name: default_model_name(),
            high_priority_label: default_high_priority_label(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_artifacts_root() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model_name() -> String {
    "random_forest".to_string()
}

fn default_high_priority_label() -> String {
    "High".to_string()
}
