//! Seller phone resolution.
//!
//! Detail pages never carry the number itself. They embed a client-state blob
//! (`window.__PINIA__ = {...};`) whose first page structure lists the
//! `userId` / `phoneId` pair; together with the listing id from the URL those
//! unlock the number through the reveal endpoint.

use crate::models::{Identifier, PhoneIds, RevealRequest, RevealResponse};
use crate::scraper::cleaner::{auto_id_from_url, phone_to_number};
use crate::scraper::error::ResolveError;
use crate::scraper::http_client::Transport;
use ::scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

const STATE_MARKER: &str = "window.__PINIA__";

// ── Embedded state ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EmbeddedState {
    page: StatePage,
}

#[derive(Debug, Deserialize)]
struct StatePage {
    // Insertion order matters: the first structure is the listing itself.
    structures: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageStructure {
    #[serde(default)]
    additional_params: StructureParams,
}

#[derive(Debug, Default, Deserialize)]
struct StructureParams {
    #[serde(default)]
    phone: Option<PhoneBlock>,
}

#[derive(Debug, Deserialize)]
struct PhoneBlock {
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

/// Text of the inline script that assigns the state blob.
fn find_state_script(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("script").ok()?;
    doc.select(&sel)
        .map(|s| s.text().collect::<String>())
        .find(|body| body.contains(STATE_MARKER))
}

/// JSON literal on the right-hand side of the assignment, terminator stripped.
fn state_literal(script: &str) -> Option<&str> {
    let after_marker = &script[script.find(STATE_MARKER)? + STATE_MARKER.len()..];
    let rhs = after_marker.trim_start().strip_prefix('=')?.trim();
    Some(rhs.strip_suffix(';').unwrap_or(rhs).trim_end())
}

fn identifier(value: &Value) -> Option<Identifier> {
    serde_json::from_value(value.clone()).ok()
}

/// Pull `userId` / `phoneId` out of the embedded state and pair them with the
/// listing id from `listing_url`.
pub fn extract_phone_ids(html: &str, listing_url: &str) -> Result<PhoneIds, ResolveError> {
    let auto_id = auto_id_from_url(listing_url)?;

    let script = find_state_script(html).ok_or(ResolveError::StateScriptMissing)?;
    let literal = state_literal(&script).ok_or(ResolveError::StateScriptMissing)?;

    let state: EmbeddedState = serde_json::from_str(literal).map_err(ResolveError::StateJson)?;
    let first = state
        .page
        .structures
        .into_iter()
        .next()
        .ok_or(ResolveError::MissingIdentifier("page structure"))?
        .1;
    let structure: PageStructure = serde_json::from_value(first).map_err(ResolveError::StateJson)?;
    let pairs = structure
        .additional_params
        .phone
        .map(|p| p.data)
        .unwrap_or_default();

    let mut user_id = None;
    let mut phone_id = None;
    for pair in &pairs {
        let [key, value, ..] = pair.as_slice() else { continue };
        match key.as_str() {
            Some("userId") => user_id = identifier(value),
            Some("phoneId") => phone_id = identifier(value),
            _ => {}
        }
    }

    Ok(PhoneIds {
        auto_id,
        user_id: user_id.ok_or(ResolveError::MissingIdentifier("userId"))?,
        phone_id: phone_id.ok_or(ResolveError::MissingIdentifier("phoneId"))?,
    })
}

// ── Reveal call ───────────────────────────────────────────────────────────────

/// Parse the reveal endpoint's body into a stored phone number.
pub fn parse_reveal_response(body: &str) -> Result<i64, ResolveError> {
    let response: RevealResponse = serde_json::from_str(body).map_err(ResolveError::RevealJson)?;
    let raw = response.phone_str().ok_or(ResolveError::NoPhone)?;
    phone_to_number(raw)
}

/// Ask the reveal endpoint for the number behind `ids`, presenting the
/// session cookie issued with the detail page.
pub async fn reveal_phone<T: Transport + ?Sized>(
    transport: &T,
    reveal_url: &str,
    ids: PhoneIds,
    cookie: Option<&str>,
) -> Result<i64, ResolveError> {
    debug!("Revealing phone for listing {}", ids.auto_id);
    let payload = serde_json::to_value(RevealRequest::from(ids)).map_err(ResolveError::RevealJson)?;
    let body = transport
        .post_json(reveal_url, &payload, cookie)
        .await
        .map_err(ResolveError::Reveal)?;
    parse_reveal_response(&body)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
