use crate::models::{ABSENT, ListingDetails, ListingScan};
use crate::scraper::cleaner::{clean_count, clean_odometer, clean_price};
use crate::scraper::error::ParseError;
use ::scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let Ok(sel) = Selector::parse(css) else {
        warn!("invalid selector {:?}", css);
        return None;
    };
    scope.select(&sel).next()
}

/// Text of the first match, `None` when absent or blank.
fn first_text(scope: ElementRef<'_>, css: &str) -> Option<String> {
    select_first(scope, css)
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn required_text(scope: ElementRef<'_>, css: &str, anchor: &'static str) -> Result<String, ParseError> {
    first_text(scope, css).ok_or(ParseError::MissingAnchor(anchor))
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Detail links on a results page, skipping new-car adverts and sold-out cards,
/// plus whether an enabled "next" control is present.
pub fn scan_listing_page(html: &str, page_url: &Url) -> ListingScan {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let mut links: Vec<String> = Vec::new();

    if let Ok(card_sel) = Selector::parse("section.ticket-item") {
        for card in root.select(&card_sel) {
            if card.value().attr("data-advertisement-type") == Some("NewAuto") {
                continue;
            }
            if select_first(card, ".sold-out").is_some() {
                continue;
            }
            let Some(href) = select_first(card, "a.m-link-ticket")
                .and_then(|a| a.value().attr("href"))
                .filter(|h| !h.trim().is_empty())
            else {
                continue;
            };

            match page_url.join(href.trim()) {
                Ok(abs) => {
                    let abs = abs.to_string();
                    if !links.contains(&abs) {
                        links.push(abs);
                    }
                }
                Err(e) => warn!("Skipping unresolvable link {:?}: {}", href, e),
            }
        }
    }

    let has_next = select_first(root, "a.js-next")
        .map(|a| !a.value().classes().any(|c| c == "disabled"))
        .unwrap_or(false);

    debug!("Scanned {}: {} links, has_next={}", page_url, links.len(), has_next);
    ListingScan { links, has_next }
}

// ── Detail page ───────────────────────────────────────────────────────────────

/// Extract every field except the phone. Title, price and seller name are
/// mandatory; everything else falls back to a neutral value.
pub fn extract_details(html: &str) -> Result<ListingDetails, ParseError> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let title = required_text(root, "#sideTitleTitle span", "title")?;
    let price_text = required_text(root, "#sidePrice strong", "price")?;
    let price_usd = clean_price(&price_text)?;
    let username = required_text(root, "#sellerInfoUserName span.titleM", "seller name")?;

    let odometer = first_text(root, "#basicInfoTableMainInfo0 span")
        .map(|t| clean_odometer(&t))
        .unwrap_or(0);

    let image_url = select_first(root, "#photoSlider .picture img")
        .and_then(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    // Badge reads "<current> / <total>"; the total is the second span.
    let images_count = select_first(root, "#photoSlider .common-badge")
        .and_then(|badge| {
            let span = Selector::parse("span").ok()?;
            badge.select(&span).nth(1).map(text_of)
        })
        .and_then(|t| clean_count(&t))
        .unwrap_or(0);

    let car_number = first_text(root, ".car-number").unwrap_or_else(|| ABSENT.to_string());
    let car_vin = resolve_vin(root);

    Ok(ListingDetails {
        title,
        price_usd,
        odometer,
        username,
        image_url,
        images_count,
        car_number,
        car_vin,
    })
}

/// VIN badge first, then the last token of the registry warning banner.
fn resolve_vin(root: ElementRef<'_>) -> String {
    if let Some(vin) = first_text(root, "#badgesVinGrid .badge-template") {
        return vin;
    }
    first_text(root, "#mvs #mvsWarningTitle .titleS")
        .and_then(|banner| banner.split_whitespace().last().map(str::to_string))
        .unwrap_or_else(|| ABSENT.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
