// src/error.rs

use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input: missing file, empty field, unknown command argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No OAuth token on file for provider '{provider}'")]
    NotConnected { provider: String },

    #[error("Token refresh for '{provider}' failed ({status:?}): {body}")]
    RefreshFailed {
        provider: String,
        status: Option<u16>,
        body: String,
    },

    #[error("Run {run_id} has no parsed payload")]
    NoParsedPayload { run_id: String },

    #[error("Accounting API error {status}: {body}")]
    Integration { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config edit error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for the structured error object.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::NotConnected { .. } => "not_connected",
            Error::RefreshFailed { .. } => "refresh_failed",
            Error::NoParsedPayload { .. } => "no_parsed_payload",
            Error::Integration { .. } => "integration_error",
            Error::Config(_) | Error::Toml(_) | Error::TomlEdit(_) => "config_error",
            Error::Storage(_) | Error::Io(_) | Error::Json(_) => "internal_error",
            Error::Http(_) => "upstream_unreachable",
        }
    }

    /// HTTP-style status a transport layer would surface for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::NotConnected { .. } => 409,
            Error::NoParsedPayload { .. } => 422,
            Error::RefreshFailed { .. } | Error::Integration { .. } | Error::Http(_) => 502,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Structured error object. Upstream status and body are preserved so
    /// rejected bill or refresh calls can be diagnosed by the caller.
    pub fn to_json(&self) -> Value {
        let mut err = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        match self {
            Error::Integration { status, body } => {
                err["status"] = json!(status);
                err["body"] = upstream_body(body);
            }
            Error::RefreshFailed { status, body, .. } => {
                err["status"] = json!(status);
                err["body"] = upstream_body(body);
            }
            Error::NotConnected { provider } => {
                err["provider"] = json!(provider);
            }
            _ => {}
        }
        json!({ "error": err })
    }
}

fn upstream_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
