use crate::scraper::error::{ParseError, ResolveError};
use url::Url;

/// Localised "thousand" marker used in mileage labels ("120 тис. км").
const THOUSAND_MARKER: &str = "тис";

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ── Price / mileage ───────────────────────────────────────────────────────────

/// Parse a displayed price: every non-digit is dropped.
/// "12 500 $" → 12500 | "" → error
pub fn clean_price(s: &str) -> Result<i64, ParseError> {
    digits_only(s).parse().map_err(|_| ParseError::NotANumber {
        field: "price",
        text: s.to_string(),
    })
}

/// Parse a mileage label into kilometres.
/// "120 тис. км" → 120000 | "85000" → 85000 | "" → 0
///
/// The marker alone decides the multiplier, not the magnitude.
pub fn clean_odometer(s: &str) -> i64 {
    let digits = digits_only(s);
    if digits.is_empty() {
        return 0;
    }
    let Ok(value) = digits.parse::<i64>() else {
        return 0;
    };
    if s.contains(THOUSAND_MARKER) {
        value.checked_mul(1000).unwrap_or(0)
    } else {
        value
    }
}

/// Parse a small counter such as the photo badge ("1 / 24" second span → 24).
pub fn clean_count(s: &str) -> Option<i64> {
    digits_only(s).parse().ok()
}

// ── Phone ─────────────────────────────────────────────────────────────────────

/// Normalise a revealed phone to digits with the `380` country code.
/// "(067) 123-45-67" → "380671234567" | "380671234567" → unchanged | "671234567" → "380671234567"
pub fn normalise_phone(raw: &str) -> Option<String> {
    let digits = digits_only(raw);
    if digits.is_empty() {
        return None;
    }
    let phone = if digits.starts_with("380") {
        digits
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("380{}", rest)
    } else {
        format!("380{}", digits)
    };
    Some(phone)
}

/// Normalise and convert to the stored integer form.
pub fn phone_to_number(raw: &str) -> Result<i64, ResolveError> {
    normalise_phone(raw)
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ResolveError::BadPhone(raw.to_string()))
}

// ── Listing id ────────────────────────────────────────────────────────────────

/// Listing id from a detail URL: last `_` token of the final path segment
/// without its extension.
/// ".../auto_toyota_camry_38912345.html" → "38912345"
pub fn auto_id_from_url(url: &str) -> Result<String, ResolveError> {
    let bad = || ResolveError::BadListingUrl(url.to_string());

    let parsed = Url::parse(url).map_err(|_| bad())?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()))
        .ok_or_else(bad)?;

    let stem = segment.strip_suffix(".html").unwrap_or(segment);
    let id = stem.rsplit('_').next().unwrap_or(stem);

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    Ok(id.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
