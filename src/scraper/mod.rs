pub mod cleaner;
pub mod error;
pub mod http_client;
pub mod parsers;
pub mod phone;

#[cfg(test)]
pub mod fixtures;

use crate::config::ScraperConfig;
use crate::models::{ListingPage, ListingRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use url::Url;

use self::error::{ListingError, TransportError};
use self::http_client::{HttpClient, Transport};
use self::parsers::extract_details;
use self::phone::{extract_phone_ids, reveal_phone};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable listing source.
#[async_trait]
pub trait ListingSource: Send + Sync + 'static {
    /// Results page `page` (1-based). A failure here ends the run.
    async fn fetch_listing_page(&self, page: u32) -> Result<ListingPage, TransportError>;

    /// One complete record for a detail page, or why there is none.
    async fn fetch_listing(&self, url: &str) -> Result<ListingRecord, ListingError>;
}

// ── auto.ria scraper ──────────────────────────────────────────────────────────

pub struct AutoRiaScraper<T = HttpClient> {
    transport: T,
    base_url: Url,
    reveal_url: String,
}

impl AutoRiaScraper<HttpClient> {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Self::with_transport(HttpClient::new(config)?, config)
    }
}

impl<T: Transport> AutoRiaScraper<T> {
    pub fn with_transport(transport: T, config: &ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url {:?}", config.base_url))?;
        Ok(Self {
            transport,
            base_url,
            reveal_url: config.reveal_url.clone(),
        })
    }

    /// Results page URL: the base with its `page` query parameter set to `page`.
    pub fn listing_url(&self, page: u32) -> Url {
        let mut url = self.base_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("page", &page.to_string());
        url
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: Transport + 'static> ListingSource for AutoRiaScraper<T> {
    async fn fetch_listing_page(&self, page: u32) -> Result<ListingPage, TransportError> {
        let url = self.listing_url(page);
        let fetched = self.transport.get(url.as_str()).await?;
        Ok(ListingPage { number: page, url, html: fetched.body })
    }

    async fn fetch_listing(&self, url: &str) -> Result<ListingRecord, ListingError> {
        let page = self.transport.get(url).await?;

        let details = extract_details(&page.body)?;
        let ids = extract_phone_ids(&page.body, url)?;
        let phone = reveal_phone(&self.transport, &self.reveal_url, ids, page.cookie.as_deref()).await?;

        debug!("{}: {} ({} USD)", url, details.title, details.price_usd);
        Ok(ListingRecord::assemble(url, details, phone, Utc::now()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
