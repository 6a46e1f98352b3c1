//! HTTP Helpers

use std::collections::HashMap;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use reqwest::{Client, Method, Response};

use crate::error::Result;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.77 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/42.0.2311.135 Safari/537.36 Edge/12.246",
    "Mozilla/5.0 (X11; CrOS x86_64 8172.45.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/51.0.2704.64 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_2) AppleWebKit/601.3.9 (KHTML, like Gecko) Version/9.0.2 Safari/601.3.9",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/47.0.2526.111 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:15.0) Gecko/20100101 Firefox/15.0.1",
];

/// Pick a browser user agent at random
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// GET with query parameters
pub async fn http_get(url: &str, params: &[(&str, &str)]) -> Result<Response> {
    tracing::debug!("Try HTTP GET: {}", url);
    Ok(Client::new().get(url).query(params).send().await?)
}

/// POST a form and/or a JSON body
pub async fn http_post(
    url: &str,
    form: Option<&HashMap<String, String>>,
    json: Option<&serde_json::Value>,
) -> Result<Response> {
    tracing::debug!("Try HTTP POST: {}", url);
    let mut request = Client::new().post(url);
    if let Some(form) = form {
        request = request.form(form);
    }
    if let Some(json) = json {
        request = request.json(json);
    }
    Ok(request.send().await?)
}

/// A request whose decoded body is returned as text
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Also write the decoded body here
    pub save_to: Option<PathBuf>,
}

impl HttpRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            save_to: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn save_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_to = Some(path.into());
        self
    }

    /// Send with `client`; non-2xx statuses are errors
    pub async fn send(&self, client: &Client) -> Result<String> {
        tracing::debug!("Try HTTP request: {} {}", self.method, self.url);

        let mut request = client.request(self.method.clone(), &self.url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let text = async {
            let response = request.send().await?.error_for_status()?;
            response.text_with_charset("utf-8").await
        }
        .await
        .map_err(|e| {
            tracing::debug!("HTTP request {} failed: {}", self.url, e);
            e
        })?;

        if let Some(path) = &self.save_to {
            if let Err(e) = tokio::fs::write(path, &text).await {
                tracing::error!("Cant save html response to {}: {}", path.display(), e);
            }
        }
        Ok(text)
    }
}

/// Send `request` with a fresh client
pub async fn http_request(request: &HttpRequest) -> Result<String> {
    request.send(&Client::new()).await
}
