use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::WorkerError;

const ERROR_TEXT_WIDTH: usize = 120;

/// Truncate downstream response bodies so error messages stay readable.
fn shorten(text: &str) -> String {
    if text.chars().count() <= ERROR_TEXT_WIDTH {
        return text.to_string();
    }
    let mut out: String = text.chars().take(ERROR_TEXT_WIDTH).collect();
    out.push('…');
    out
}

/// Thin JSON client for one downstream management service.
///
/// Translates transport failures, HTTP errors and malformed bodies into the
/// [`WorkerError`] taxonomy so every worker reports the same way.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: &'static str,
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl ServiceClient {
    pub fn new(service: &'static str, base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client: Client::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Perform a request; statuses in `allowed_status` are returned to the
    /// caller instead of becoming errors. Empty bodies yield `None`.
    pub async fn request_allow(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        allowed_status: &[u16],
    ) -> Result<(u16, Option<Value>), WorkerError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WorkerError::ServiceUnavailable {
                service: self.service.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| WorkerError::ServiceUnavailable {
                service: self.service.to_string(),
                message: e.to_string(),
            })?;

        if status >= 400 && !allowed_status.contains(&status) {
            return Err(WorkerError::Api {
                service: self.service.to_string(),
                code: status,
                text: shorten(&text),
            });
        }

        if text.is_empty() {
            return Ok((status, None));
        }
        let value = serde_json::from_str(&text).map_err(|_| WorkerError::MalformedResponse {
            service: self.service.to_string(),
            text: shorten(&text),
        })?;
        Ok((status, Some(value)))
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, WorkerError> {
        let (_, value) = self.request_allow(method, path, body, &[]).await?;
        Ok(value)
    }

    /// GET that treats 404 as `None`.
    pub async fn get_or_none(&self, path: &str) -> Result<Option<Value>, WorkerError> {
        let (status, value) = self.request_allow(Method::GET, path, None, &[404]).await?;
        if status == 404 {
            return Ok(None);
        }
        Ok(value)
    }
}
