//! Errors and replies exposed to transports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::LookupError;
use crate::config::service::SetOutcome;
use crate::config::validation::ValidationError;

/// Failure of a `get` or `set`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown config category `{category}`")]
    UnknownCategory { category: String },

    #[error("unknown config key `{key}` in category `{category}`")]
    UnknownKey { category: String, key: String },

    #[error("config `{category}.{key}` is read-only")]
    ReadOnly { category: String, key: String },

    #[error("invalid value for `{category}.{key}`: {source}")]
    InvalidValue {
        category: String,
        key: String,
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::UnknownCategory { .. } => ErrorKind::UnknownCategory,
            ConfigError::UnknownKey { .. } => ErrorKind::UnknownKey,
            ConfigError::ReadOnly { .. } => ErrorKind::ReadOnly,
            ConfigError::InvalidValue { .. } => ErrorKind::InvalidValue,
        }
    }
}

impl From<LookupError> for ConfigError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::UnknownCategory { category } => ConfigError::UnknownCategory { category },
            LookupError::UnknownKey { category, key } => ConfigError::UnknownKey {
                category: category.to_string(),
                key,
            },
        }
    }
}

/// Externally visible error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownCategory,
    UnknownKey,
    ReadOnly,
    InvalidValue,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownCategory => "unknown_category",
            ErrorKind::UnknownKey => "unknown_key",
            ErrorKind::ReadOnly => "read_only",
            ErrorKind::InvalidValue => "invalid_value",
        }
    }
}

/// Transport-neutral reply for `GetConfig` / `SetConfig`.
///
/// `message` is diagnostic text only; callers should branch on `ok` and
/// `error_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl ConfigReply {
    pub fn from_get(result: Result<String, ConfigError>) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                value: Some(value),
                error_kind: None,
                message: None,
                revision: None,
            },
            Err(e) => Self::failure(&e),
        }
    }

    pub fn from_set(result: Result<SetOutcome, ConfigError>) -> Self {
        match result {
            Ok(outcome) => Self {
                ok: true,
                value: None,
                error_kind: None,
                message: None,
                revision: Some(outcome.revision),
            },
            Err(e) => Self::failure(&e),
        }
    }

    fn failure(e: &ConfigError) -> Self {
        Self {
            ok: false,
            value: None,
            error_kind: Some(e.kind()),
            message: Some(e.to_string()),
            revision: None,
        }
    }
}
