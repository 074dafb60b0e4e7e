//! Server bootstrap settings.
//!
//! These are read once at startup and are not themselves runtime-tunable:
//! where the admin API listens, how logs are written, whether to export
//! metrics, host fact overrides, and where the overrides file lives.
//!
//! Every field has a default so an empty file (or no file) is valid.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub admin: AdminSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
    pub host: HostSettings,
    pub overrides: OverridesSettings,
}

/// Admin HTTP listener.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Bind address (e.g., "127.0.0.1:19122").
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:19122".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for this crate and `tower_http` when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    /// Prometheus scrape listener.
    pub address: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9091".to_string(),
        }
    }
}

/// Overrides for host facts that cannot be detected reliably, e.g. inside
/// containers without access to the GPU driver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostSettings {
    pub gpu_count: Option<u32>,
    pub total_memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OverridesSettings {
    /// TOML file of `[category] key = value` overrides applied at startup.
    pub path: Option<PathBuf>,

    /// Rewrite the file after every committed change.
    pub persist: bool,

    /// Re-apply the file when it changes on disk.
    pub watch: bool,
}

impl ServerSettings {
    pub fn admin_addr(&self) -> Result<SocketAddr, SettingsError> {
        parse_addr("admin.bind_address", &self.admin.bind_address)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, SettingsError> {
        parse_addr("metrics.address", &self.metrics.address)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.admin_addr()?;
        if self.metrics.enabled {
            self.metrics_addr()?;
        }
        if self.admin.request_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "admin.request_timeout_secs",
                reason: "must be greater than 0".into(),
            });
        }
        if self.host.gpu_count.is_some_and(|n| n > 1024) {
            return Err(SettingsError::Invalid {
                field: "host.gpu_count",
                reason: "must be at most 1024".into(),
            });
        }
        if self.host.total_memory_bytes == Some(0) {
            return Err(SettingsError::Invalid {
                field: "host.total_memory_bytes",
                reason: "must be greater than 0".into(),
            });
        }
        if (self.overrides.persist || self.overrides.watch) && self.overrides.path.is_none() {
            return Err(SettingsError::Invalid {
                field: "overrides.path",
                reason: "required when persist or watch is enabled".into(),
            });
        }
        Ok(())
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, SettingsError> {
    value.parse().map_err(|e| SettingsError::Invalid {
        field,
        reason: format!("`{value}` is not a socket address: {e}"),
    })
}

/// Parse and validate settings from TOML text.
pub fn from_toml(content: &str, path: &Path) -> Result<ServerSettings, SettingsError> {
    let settings: ServerSettings = toml::from_str(content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Load and validate settings from a TOML file.
pub fn load(path: &Path) -> Result<ServerSettings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = from_toml("", Path::new("server.toml")).unwrap();
        assert_eq!(settings, ServerSettings::default());
        assert_eq!(settings.admin_addr().unwrap().port(), 19122);
    }

    #[test]
    fn test_partial_sections() {
        let settings = from_toml(
            r#"
            [admin]
            bind_address = "0.0.0.0:8000"

            [host]
            gpu_count = 4

            [overrides]
            path = "/etc/milvus/overrides.toml"
            persist = true
            "#,
            Path::new("server.toml"),
        )
        .unwrap();

        assert_eq!(settings.admin.bind_address, "0.0.0.0:8000");
        assert_eq!(settings.admin.request_timeout_secs, 10);
        assert_eq!(settings.host.gpu_count, Some(4));
        assert!(settings.overrides.persist);
        assert!(!settings.overrides.watch);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        for (content, field) in [
            ("[admin]\nbind_address = \"localhost\"", "admin.bind_address"),
            ("[admin]\nrequest_timeout_secs = 0", "admin.request_timeout_secs"),
            ("[metrics]\nenabled = true\naddress = \"nope\"", "metrics.address"),
            ("[overrides]\nwatch = true", "overrides.path"),
        ] {
            match from_toml(content, Path::new("server.toml")) {
                Err(SettingsError::Invalid { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_field_type_is_parse_error() {
        let err = from_toml("[admin]\nrequest_timeout_secs = \"ten\"", Path::new("server.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
