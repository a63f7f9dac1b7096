use crate::config::ScraperConfig;
use crate::scraper::error::TransportError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, SET_COOKIE};
use std::time::Duration;
use tracing::debug;

/// Body of a GET plus the session cookie the origin issued with it.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub body: String,
    /// `name=value` pairs from every `Set-Cookie`, joined as a `Cookie` header.
    pub cookie: Option<String>,
}

/// HTTP seam between the scraper and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedPage, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        cookie: Option<&str>,
    ) -> Result<String, TransportError>;
}

pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }
}

/// Collapse `Set-Cookie` headers into a single `Cookie` header value.
fn session_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();

    if pairs.is_empty() { None } else { Some(pairs.join("; ")) }
}

fn request_error(url: &str) -> impl FnOnce(reqwest::Error) -> TransportError + '_ {
    move |source| TransportError::Request { url: url.to_string(), source }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &str) -> Result<FetchedPage, TransportError> {
        debug!("GET {}", url);

        let resp = self.inner.get(url).send().await.map_err(request_error(url))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), url: url.to_string() });
        }

        // Headers first: the cookie belongs to this very response.
        let cookie = session_cookie(resp.headers());
        let body = resp.text().await.map_err(request_error(url))?;

        Ok(FetchedPage { body, cookie })
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        cookie: Option<&str>,
    ) -> Result<String, TransportError> {
        debug!("POST {}", url);

        let mut req = self
            .inner
            .post(url)
            .header(ACCEPT, "*/*")
            .header(ACCEPT_LANGUAGE, "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7")
            .header(CACHE_CONTROL, "no-cache")
            .json(payload);
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }

        let resp = req.send().await.map_err(request_error(url))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), url: url.to_string() });
        }
        resp.text().await.map_err(request_error(url))
    }
}
