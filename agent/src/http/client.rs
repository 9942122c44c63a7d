//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;

/// JSON-over-HTTP client bound to one base URL
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    bearer: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: None,
        })
    }

    /// Attach a bearer token sent with every request
    pub fn with_bearer(mut self, token: Option<SecretString>) -> Self {
        self.bearer = token;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn check(method: &str, response: Response) -> Result<Response, AgentError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} failed: {} - {}", method, status, body);
        Err(AgentError::UpstreamError(format!("{}: {}", status, body)))
    }

    /// Make a POST request and decode the JSON response
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AgentError> {
        let response = self.post_raw(path, body).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request and return the response body as text
    pub async fn post_text<B: Serialize>(&self, path: &str, body: &B) -> Result<String, AgentError> {
        let response = self.post_raw(path, body).await?;
        Ok(response.text().await?)
    }

    /// Make a POST request and hand back the successful response for streaming
    pub async fn post_raw<B: Serialize>(&self, path: &str, body: &B) -> Result<Response, AgentError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let request = self.authorize(self.client.post(&url).json(body));
        let response = request.send().await?;
        Self::check("POST", response).await
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
