//! Mapping of config replies onto HTTP.
//!
//! The JSON body is always a [`ConfigReply`]; the status code only mirrors
//! its error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::config::error::{ConfigReply, ErrorKind};

pub fn status_for(reply: &ConfigReply) -> StatusCode {
    match reply.error_kind {
        None => StatusCode::OK,
        Some(ErrorKind::UnknownCategory | ErrorKind::UnknownKey) => StatusCode::NOT_FOUND,
        Some(ErrorKind::ReadOnly) => StatusCode::FORBIDDEN,
        Some(ErrorKind::InvalidValue) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ConfigReply {
    fn into_response(self) -> Response {
        (status_for(&self), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::error::ConfigError;

    #[test]
    fn test_status_mapping() {
        let read_only = ConfigReply::from_get(Err(ConfigError::ReadOnly {
            category: "network".into(),
            key: "bind.port".into(),
        }));
        assert_eq!(status_for(&read_only), StatusCode::FORBIDDEN);

        let unknown = ConfigReply::from_get(Err(ConfigError::UnknownKey {
            category: "gpu".into(),
            key: "Enable".into(),
        }));
        assert_eq!(status_for(&unknown), StatusCode::NOT_FOUND);

        assert_eq!(status_for(&ConfigReply::from_get(Ok("1".into()))), StatusCode::OK);
    }
}
