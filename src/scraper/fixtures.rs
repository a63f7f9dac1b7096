//! HTML fixtures shaped like the origin site's markup.

use serde_json::json;

pub const BASE: &str = "https://auto.ria.com/uk/car/used/";

pub fn detail_url(slug: &str, id: u64) -> String {
    format!("https://auto.ria.com/uk/auto_{}_{}.html", slug, id)
}

/// One summary card on a results page.
pub struct Card<'a> {
    pub href: &'a str,
    pub ad_type: Option<&'a str>,
    pub sold_out: bool,
}

impl<'a> Card<'a> {
    pub fn used(href: &'a str) -> Self {
        Self { href, ad_type: None, sold_out: false }
    }
}

#[derive(Clone, Copy)]
pub enum Next {
    Absent,
    Disabled,
    Enabled,
}

pub fn listing_html(cards: &[Card<'_>], next: Next) -> String {
    let mut body = String::from("<html><body><div id=\"searchResults\">");
    for card in cards {
        let ad_type = card
            .ad_type
            .map(|t| format!(" data-advertisement-type=\"{}\"", t))
            .unwrap_or_default();
        let sold = if card.sold_out { "<div class=\"sold-out\">Продано</div>" } else { "" };
        body.push_str(&format!(
            "<section class=\"ticket-item\"{ad_type}>{sold}\
             <div class=\"content\"><a class=\"m-link-ticket\" href=\"{href}\">car</a></div>\
             </section>",
            href = card.href,
        ));
    }
    body.push_str("</div><nav class=\"pagination\">");
    match next {
        Next::Absent => {}
        Next::Disabled => body.push_str("<a class=\"page-link js-next disabled\">›</a>"),
        Next::Enabled => body.push_str("<a class=\"page-link js-next\" href=\"?page=2\">›</a>"),
    }
    body.push_str("</nav></body></html>");
    body
}

/// Detail-page knobs; `Default` is a fully populated listing.
pub struct Detail<'a> {
    pub title: Option<&'a str>,
    pub price: Option<&'a str>,
    pub odometer: Option<&'a str>,
    pub username: Option<&'a str>,
    pub plate: Option<&'a str>,
    pub vin_badge: Option<&'a str>,
    pub mvs_warning: Option<&'a str>,
    pub state: Option<String>,
}

impl Default for Detail<'_> {
    fn default() -> Self {
        Self {
            title: Some("Toyota Camry 2018"),
            price: Some("18 500 $"),
            odometer: Some("120 тис. км"),
            username: Some("Олександр"),
            plate: Some("AA 1234 BB"),
            vin_badge: Some("JTNB11HK1J3000001"),
            mvs_warning: None,
            state: Some(pinia_script(json!(777), json!(555))),
        }
    }
}

pub fn pinia_script(user_id: serde_json::Value, phone_id: serde_json::Value) -> String {
    let state = json!({
        "page": {
            "structures": {
                "finalPage": {
                    "additionalParams": {
                        "phone": {
                            "data": [
                                ["userId", user_id],
                                ["phoneId", phone_id],
                                ["title", "Показати телефон"]
                            ]
                        }
                    }
                },
                "sidebar": { "additionalParams": {} }
            }
        }
    });
    format!("window.__PINIA__ = {};", state)
}

pub fn detail_html(d: &Detail<'_>) -> String {
    let mut h = String::from("<html><head><script>window.dataLayer = [];</script>");
    if let Some(state) = &d.state {
        h.push_str(&format!("<script>{}</script>", state));
    }
    h.push_str("</head><body>");
    if let Some(t) = d.title {
        h.push_str(&format!("<h1 id=\"sideTitleTitle\"><span>{}</span></h1>", t));
    }
    if let Some(p) = d.price {
        h.push_str(&format!("<div id=\"sidePrice\"><strong>{}</strong></div>", p));
    }
    h.push_str(
        "<div id=\"photoSlider\"><div class=\"picture\">\
         <img data-src=\"https://cdn.riastatic.com/photos/auto/1f.jpg\" src=\"/placeholder.svg\"></div>\
         <div class=\"common-badge\"><span>1</span><span>24</span></div></div>",
    );
    if let Some(o) = d.odometer {
        h.push_str(&format!("<div id=\"basicInfoTableMainInfo0\"><span>{}</span></div>", o));
    }
    if let Some(p) = d.plate {
        h.push_str(&format!("<span class=\"car-number\">{}</span>", p));
    }
    if let Some(v) = d.vin_badge {
        h.push_str(&format!("<div id=\"badgesVinGrid\"><span class=\"badge-template\">{}</span></div>", v));
    }
    if let Some(w) = d.mvs_warning {
        h.push_str(&format!(
            "<div id=\"mvs\"><div id=\"mvsWarningTitle\"><span class=\"titleS\">{}</span></div></div>",
            w
        ));
    }
    if let Some(u) = d.username {
        h.push_str(&format!("<div id=\"sellerInfoUserName\"><span class=\"titleM\">{}</span></div>", u));
    }
    h.push_str("</body></html>");
    h
}

pub fn reveal_json(phone: &str) -> String {
    json!({ "additionalParams": { "phoneStr": phone } }).to_string()
}
