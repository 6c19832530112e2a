// src/parser_client.rs

use crate::error::{Error, Result};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Client for the external invoice parsing service.
pub struct ParserClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ParserClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Upload a file to `<base>/parse` and return the raw JSON result.
    ///
    /// Transport errors, non-2xx answers and bodies that do not look like a
    /// parse result all come back as errors; the caller decides what to do.
    pub async fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Value> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let url = format!("{}/parse", self.base_url);
        info!(url = %url, bytes = bytes.len(), "Sending file to parser");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Integration {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = response.json().await?;
        validate_shape(&parsed)?;
        Ok(parsed)
    }
}

/// A usable parse result is an object with an `items` array and a `totals`
/// object; the header is optional.
fn validate_shape(parsed: &Value) -> Result<()> {
    if !parsed.is_object() {
        return Err(Error::InvalidInput("parser returned a non-object body".into()));
    }
    if !parsed.get("items").is_some_and(Value::is_array) {
        return Err(Error::InvalidInput("parser result has no items array".into()));
    }
    if !parsed.get("totals").is_some_and(Value::is_object) {
        return Err(Error::InvalidInput("parser result has no totals object".into()));
    }
    Ok(())
}
