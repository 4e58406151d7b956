//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::flow::PropertySettings;

const CONFIG_FILE: &str = "edgeward.toml";
const SECTION: &str = "edgeward";

/// Service settings derived from environment variables, configuration files,
/// and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "EDGEWARD")]
pub struct EdgewardConfig {
    /// Directory holding the durable mod-san queue.
    #[ortho_config(default = "/var/lib/edgeward/mod_san_queue".to_owned())]
    pub queue_path: String,
    /// How often a blocking dequeue re-checks an empty queue, in
    /// milliseconds.
    #[ortho_config(default = 500)]
    pub queue_poll_interval_ms: u64,
    /// Upper bound on each provider call, in seconds.
    #[ortho_config(default = 30)]
    pub provider_timeout_secs: u64,
    /// Root URL of the vendor property management API.
    #[ortho_config(default = String::new())]
    pub papi_base_url: String,
    /// Property carrying the shared SAN certificate hostnames.
    #[ortho_config(default = String::new())]
    pub papi_property_id: String,
    /// Edge hostname prefix that SAN domains are pointed at.
    #[ortho_config(default = String::new())]
    pub san_cert_hostname: String,
    /// Address notified about property activations.
    pub notify_email: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{SECTION}] in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl EdgewardConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: check {} or {} in {CONFIG_FILE}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("edgeward")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the settings every process needs: the queue location and
    /// the timing knobs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] or [`ConfigError::Invalid`]
    /// naming the environment variable and TOML key to fix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.queue_path,
            &FieldMetadata::new("queue directory", "EDGEWARD_QUEUE_PATH", "queue_path"),
        )?;
        Self::require_positive(
            self.queue_poll_interval_ms,
            &FieldMetadata::new(
                "queue poll interval",
                "EDGEWARD_QUEUE_POLL_INTERVAL_MS",
                "queue_poll_interval_ms",
            ),
        )?;
        Self::require_positive(
            self.provider_timeout_secs,
            &FieldMetadata::new(
                "provider timeout",
                "EDGEWARD_PROVIDER_TIMEOUT_SECS",
                "provider_timeout_secs",
            ),
        )?;
        Ok(())
    }

    /// Validates the additional settings the mod-san worker needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a vendor setting is empty.
    pub fn validate_worker(&self) -> Result<(), ConfigError> {
        self.validate()?;
        Self::require_field(
            &self.papi_base_url,
            &FieldMetadata::new(
                "property API base URL",
                "EDGEWARD_PAPI_BASE_URL",
                "papi_base_url",
            ),
        )?;
        Self::require_field(
            &self.papi_property_id,
            &FieldMetadata::new(
                "SAN certificate property ID",
                "EDGEWARD_PAPI_PROPERTY_ID",
                "papi_property_id",
            ),
        )?;
        Self::require_field(
            &self.san_cert_hostname,
            &FieldMetadata::new(
                "SAN certificate edge hostname",
                "EDGEWARD_SAN_CERT_HOSTNAME",
                "san_cert_hostname",
            ),
        )?;
        Ok(())
    }

    /// Queue directory as a UTF-8 path.
    #[must_use]
    pub fn queue_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.queue_path.trim())
    }

    /// Blocking dequeue poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    /// Per provider call timeout.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Property the mod-san worker edits.
    #[must_use]
    pub fn property_settings(&self) -> PropertySettings {
        PropertySettings::new(self.papi_property_id.trim())
    }

    /// Activation notification recipients.
    #[must_use]
    pub fn notify_emails(&self) -> Vec<String> {
        self.notify_email
            .iter()
            .map(|email| email.trim())
            .filter(|email| !email.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
