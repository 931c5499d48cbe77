//! Configuration module.
//!
//! Parsing, validation, and global access for the server configuration:
//! general settings (listeners, storage, JIT, execution defaults) plus
//! `include.files` multi-file merging. TOML and YAML are both accepted,
//! detected by file extension.

use arc_swap::ArcSwap;
use log::info;
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::errors::Error;

// Sub-modules
mod byte_size;
mod duration;
mod general;
mod include;
pub mod tls;

#[cfg(test)]
mod tests;

// Re-exports
pub use byte_size::ByteSize;
pub use duration::Duration;
pub use general::General;
pub use include::{GeneralWithInclude, Include};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// Detect configuration format from file path extension.
    /// Returns Yaml for .yaml/.yml files, Toml for everything else.
    pub fn detect(path: &str) -> Self {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".yaml") || path_lower.ends_with(".yml") {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        }
    }
}

/// Parse configuration content based on format.
fn parse_config_content<T: serde::de::DeserializeOwned>(contents: &str, format: ConfigFormat) -> Result<T, Error> {
    match format {
        ConfigFormat::Toml => toml::from_str(contents).map_err(|err| Error::BadConfig(format!("TOML parse error: {err}"))),
        ConfigFormat::Yaml => {
            serde_yaml::from_str(contents).map_err(|err| Error::BadConfig(format!("YAML parse error: {err}")))
        }
    }
}

/// Recursively remove null values from a JSON value.
/// TOML does not support null, so we strip them before conversion.
fn remove_json_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                remove_json_nulls(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                remove_json_nulls(item);
            }
        }
        _ => {}
    }
}

/// Convert configuration content to TOML string for merging.
/// This allows mixing YAML and TOML files in include.files.
fn content_to_toml_string(contents: &str, format: ConfigFormat) -> Result<String, Error> {
    match format {
        ConfigFormat::Toml => Ok(contents.to_string()),
        ConfigFormat::Yaml => {
            let mut yaml_value: serde_json::Value =
                serde_yaml::from_str(contents).map_err(|err| Error::BadConfig(format!("YAML parse error: {err}")))?;
            remove_json_nulls(&mut yaml_value);
            toml::to_string_pretty(&yaml_value)
                .map_err(|err| Error::BadConfig(format!("YAML to TOML conversion error: {err}")))
        }
    }
}

/// Globally available configuration.
static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Configuration wrapper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    // Serializer maintains the order of fields in the struct so simple
    // fields must precede nested ones, or the TOML serializer produces
    // an ambiguous `ValueAfterTable` structure.
    #[serde(default = "Config::default_path", skip_serializing_if = "String::is_empty")]
    pub path: String,

    pub general: General,

    #[serde(default = "General::default_include", skip_serializing_if = "Include::is_empty")]
    pub include: Include,
}

impl Config {
    pub fn default_path() -> String {
        String::from("aul.toml")
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            path: Self::default_path(),
            general: General::default(),
            include: Include { files: Vec::new() },
        }
    }
}

impl Config {
    /// Print the active configuration to the log at startup.
    pub fn show(&self) {
        info!("Procedure directory: {:?}", self.general.procedure_dir);
        info!("Hot reload watch: {}", self.general.watch);
        info!("Default dialect: {}", self.general.default_dialect);
        info!(
            "Listeners: tds={} postgres={} mysql={} http={} grpc={}",
            self.general.listen_tds,
            self.general.listen_postgres,
            self.general.listen_mysql,
            self.general.listen_http,
            self.general.listen_grpc
        );
        info!(
            "JIT: enabled={} threshold={}",
            self.general.jit_enabled, self.general.jit_threshold
        );
        info!("Max connections: {}", self.general.max_connections);
        info!("Default execution timeout: {}", self.general.default_execution_timeout);
        info!(
            "Storage: type={} path={:?} cache_size={}B",
            self.general.storage_type, self.general.storage_path, self.general.sqlite_cache_size
        );
        info!("Shutdown timeout: {}ms", self.general.shutdown_timeout);
        match &self.general.tls_certificate {
            Some(cert) => info!("TLS certificate: {cert}"),
            None => info!("TLS support is disabled"),
        }
    }

    /// Validate the configuration.
    pub async fn validate(&mut self) -> Result<(), Error> {
        if self.general.listen_tds == 0
            && self.general.listen_postgres == 0
            && self.general.listen_mysql == 0
            && self.general.listen_http == 0
            && self.general.listen_grpc == 0
        {
            return Err(Error::BadConfig("at least one protocol listener must be enabled".to_string()));
        }

        if self.general.tls_rate_limit_per_second != 0 && self.general.tls_rate_limit_per_second < 100 {
            return Err(Error::BadConfig("tls rate limit should be >= 100 or 0".to_string()));
        }

        if self.general.tls_certificate.is_none() && self.general.tls_private_key.is_some() {
            return Err(Error::BadConfig("tls_private_key is set but tls_certificate is not".to_string()));
        }
        if self.general.tls_certificate.is_some() && self.general.tls_private_key.is_none() {
            return Err(Error::BadConfig("tls_certificate is set but tls_private_key is not".to_string()));
        }

        if let Some(mode) = self.general.tls_mode.clone() {
            let parsed = tls::TLSMode::from_string(&mode).map_err(Error::BadConfig)?;
            if (self.general.tls_certificate.is_none() || self.general.tls_private_key.is_none())
                && parsed != tls::TLSMode::Disable
            {
                return Err(Error::BadConfig(format!(
                    "tls_mode is {mode} but tls_certificate or tls_private_key is not set"
                )));
            }
            if parsed == tls::TLSMode::VerifyFull && self.general.tls_ca_cert.is_none() {
                return Err(Error::BadConfig(format!("tls_mode is {mode} but tls_ca_cert is not set")));
            }
        }

        if !self.general.procedure_dir.as_os_str().is_empty() && !self.general.procedure_dir.exists() {
            return Err(Error::BadConfig(format!(
                "procedure_dir {:?} does not exist",
                self.general.procedure_dir
            )));
        }

        Ok(())
    }
}

/// Get a read-only instance of the configuration from anywhere in the
/// app. ArcSwap makes this cheap and quick.
pub fn get_config() -> Config {
    (*(*CONFIG.load())).clone()
}

async fn load_file(path: &str) -> Result<String, Error> {
    let mut contents = String::new();
    let mut file = File::open(path)
        .await
        .map_err(|err| Error::BadConfig(format!("Could not open '{path}': {err}")))?;
    file.read_to_string(&mut contents)
        .await
        .map_err(|err| Error::BadConfig(format!("Could not read config file: {err}")))?;
    Ok(contents)
}

/// Parse the configuration file located at the path. Supports both TOML
/// (.toml) and YAML (.yaml, .yml) formats, auto-detected by extension.
pub async fn parse(path: &str) -> Result<(), Error> {
    let format = ConfigFormat::detect(path);

    // Parse only include.files = ["./path/to/file", ...] first.
    let include_only_config_contents = load_file(path).await?;
    let include_config: GeneralWithInclude = parse_config_content(&include_only_config_contents, format)?;

    // Merge main with include files via serde-toml-merge. Convert to
    // TOML string first (for YAML files), then parse to toml::Value.
    let main_toml_str = content_to_toml_string(&include_only_config_contents, format)?;
    let mut config_merged: toml::Value = main_toml_str
        .parse()
        .map_err(|err| Error::BadConfig(format!("Could not parse config file {path}: {err:?}")))?;

    for file in include_config.include.files {
        info!("Merge config with include file: {file}");
        let include_file_content = load_file(file.as_str()).await?;
        let include_format = ConfigFormat::detect(&file);
        let include_toml_str = content_to_toml_string(&include_file_content, include_format)?;
        let include_file_value: toml::Value = include_toml_str
            .parse()
            .map_err(|err| Error::BadConfig(format!("Could not parse include file {file}: {err:?}")))?;
        config_merged = serde_toml_merge::merge(config_merged, include_file_value)
            .map_err(|err| Error::BadConfig(format!("Could not merge config file {file}: {err:?}")))?;
    }

    let table = config_merged
        .as_table()
        .ok_or_else(|| Error::BadConfig(format!("Config file {path} did not parse to a table")))?;
    let mut config: Config =
        toml::from_str(&table.to_string()).map_err(|err| Error::BadConfig(format!("Could not merge config: {err:?}")))?;

    config.validate().await?;
    config.path = path.to_string();

    CONFIG.store(Arc::new(config));

    Ok(())
}
