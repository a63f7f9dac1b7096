//! Failure taxonomy for the crawl.
//!
//! Only a [`TransportError`] on a listing page is fatal to a run; everything
//! wrapped in [`ListingError`] is scoped to a single detail page.
//!
//! Messages never repeat their source; render chains with `{:#}` through anyhow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A mandatory DOM anchor is missing or holds no usable value.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("missing required element: {0}")]
    MissingAnchor(&'static str),

    #[error("{field} is not a number: {text:?}")]
    NotANumber { field: &'static str, text: String },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("embedded state script not found")]
    StateScriptMissing,

    #[error("embedded state is not valid JSON")]
    StateJson(#[source] serde_json::Error),

    #[error("embedded state has no {0}")]
    MissingIdentifier(&'static str),

    #[error("no listing id in url {0}")]
    BadListingUrl(String),

    #[error("reveal call failed")]
    Reveal(#[source] TransportError),

    #[error("reveal response is not valid JSON")]
    RevealJson(#[source] serde_json::Error),

    #[error("reveal response carries no phone")]
    NoPhone,

    #[error("phone {0:?} is not a number")]
    BadPhone(String),
}

/// Why a single listing produced no record.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("transport")]
    Transport(#[from] TransportError),

    #[error("parse")]
    Parse(#[from] ParseError),

    #[error("phone")]
    Resolution(#[from] ResolveError),

    #[error("admission gate closed")]
    Cancelled,
}
