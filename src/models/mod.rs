use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Placeholder stored when a listing shows no VIN or plate number.
pub const ABSENT: &str = "Відсутній";

// ── Listing record ────────────────────────────────────────────────────────────

/// One vehicle listing, as persisted. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub url: String,               // natural key
    pub title: String,
    pub price_usd: i64,
    pub odometer: i64,             // kilometres
    pub username: String,
    pub phone_number: i64,         // 380XXXXXXXXX
    pub image_url: String,
    pub images_count: i64,
    pub car_number: String,
    pub car_vin: String,
    pub datetime_found: DateTime<Utc>,
}

impl ListingRecord {
    pub fn assemble(
        url: &str,
        details: ListingDetails,
        phone_number: i64,
        datetime_found: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.to_string(),
            title: details.title,
            price_usd: details.price_usd,
            odometer: details.odometer,
            username: details.username,
            phone_number,
            image_url: details.image_url,
            images_count: details.images_count,
            car_number: details.car_number,
            car_vin: details.car_vin,
            datetime_found,
        }
    }
}

/// Everything the detail page yields without the phone reveal call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetails {
    pub title: String,
    pub price_usd: i64,
    pub odometer: i64,
    pub username: String,
    pub image_url: String,
    pub images_count: i64,
    pub car_number: String,
    pub car_vin: String,
}

// ── Listing pages ─────────────────────────────────────────────────────────────

/// A fetched results page, kept with its URL so relative links can be resolved.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub number: u32,
    pub url: Url,
    pub html: String,
}

/// Outcome of scanning a results page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingScan {
    pub links: Vec<String>,
    pub has_next: bool,
}

// ── Phone reveal protocol ─────────────────────────────────────────────────────

/// Identifier as found in the embedded page state; the reveal endpoint
/// expects it back in the same JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Identifier {
    Number(u64),
    Text(String),
}

/// The three identifiers the reveal endpoint needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PhoneIds {
    pub auto_id: String,
    pub user_id: Identifier,
    pub phone_id: Identifier,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRequest {
    pub block_id: &'static str,
    pub pop_up_id: &'static str,
    pub is_login_required: bool,
    pub is_confirm_phone_email_required: bool,
    pub auto_id: String,
    pub params: RevealParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealParams {
    pub user_id: Identifier,
    pub phone_id: Identifier,
}

impl From<PhoneIds> for RevealRequest {
    fn from(ids: PhoneIds) -> Self {
        Self {
            block_id: "autoPhone",
            pop_up_id: "autoPhone",
            is_login_required: false,
            is_confirm_phone_email_required: false,
            auto_id: ids.auto_id,
            params: RevealParams {
                user_id: ids.user_id,
                phone_id: ids.phone_id,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResponse {
    #[serde(default)]
    pub additional_params: Option<RevealAdditionalParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealAdditionalParams {
    #[serde(default)]
    pub phone_str: Option<String>,
}

impl RevealResponse {
    pub fn phone_str(&self) -> Option<&str> {
        self.additional_params
            .as_ref()
            .and_then(|p| p.phone_str.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

// ── Aggregates ────────────────────────────────────────────────────────────────

/// Store-wide aggregates for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSummary {
    pub listings: i64,
    pub min_price_usd: Option<i64>,
    pub avg_price_usd: Option<f64>,
    pub max_price_usd: Option<i64>,
    pub first_found: Option<DateTime<Utc>>,
    pub last_found: Option<DateTime<Utc>>,
}
