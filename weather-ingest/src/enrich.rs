use chrono::{DateTime, Utc};
use common_geoip::{GeoIpClient, GeoIpError, Location};
use isolang::Language;
use thiserror::Error;
use url::Url;
use weather_common::types::{LeadEvent, LeadEventMessage, Page, User};

pub const PAGE_VIEW: &str = "page_view";
pub const PAGE_BEHAVIOR: &str = "page_behavior";

#[derive(Error, Debug)]
pub enum EnrichError {
    /// The record will never become valid, it is dropped without retry.
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("geoip lookup failed: {0}")]
    GeoIp(#[from] GeoIpError),
}

impl EnrichError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, EnrichError::Invalid(_))
    }
}

pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: &str) -> Result<Option<Location>, GeoIpError>;
}

impl GeoLocator for GeoIpClient {
    fn locate(&self, ip: &str) -> Result<Option<Location>, GeoIpError> {
        GeoIpClient::locate(self, ip)
    }
}

fn require(field: &str, value: &str) -> Result<(), EnrichError> {
    if value.trim().is_empty() {
        return Err(EnrichError::Invalid(format!("missing {field}")));
    }
    Ok(())
}

/// Resolves the location of a lead event and classifies its referrer.
pub fn enrich_lead_event(
    geo: &dyn GeoLocator,
    mut message: LeadEventMessage,
    now: DateTime<Utc>,
) -> Result<LeadEvent, EnrichError> {
    require("brand", &message.brand)?;
    require("url", &message.url)?;
    require("name", &message.name)?;

    if message.name == PAGE_VIEW {
        message.referrer_type = classify_referrer(&message.referrer, &message.url).to_string();
    }

    let location = if should_locate(&message) {
        geo.locate(&message.ip)?.unwrap_or_default()
    } else {
        Location::default()
    };

    Ok(LeadEvent {
        datetime: now,
        message,
        location_country: location.country,
        location_city: location.city,
    })
}

// Without consent the address is never resolved, whatever the collector sent.
fn should_locate(message: &LeadEventMessage) -> bool {
    message.consent && !message.ip.trim().is_empty() && message.name != PAGE_BEHAVIOR
}

/// `direct` without referrer, `internal` when it shares the page's host,
/// otherwise the medium guessed from the referring host.
pub fn classify_referrer(referrer: &str, page_url: &str) -> &'static str {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return "direct";
    }

    let Some(referrer_host) = host_of(referrer) else {
        return "unknown";
    };
    if host_of(page_url).is_some_and(|page_host| page_host == referrer_host) {
        return "internal";
    }
    medium_for_host(&referrer_host)
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}

const SEARCH_ENGINES: &[&str] = &[
    "baidu",
    "bing",
    "brave",
    "duckduckgo",
    "ecosia",
    "google",
    "qwant",
    "startpage",
    "yahoo",
    "yandex",
];
const SOCIAL_NETWORKS: &[&str] = &[
    "bsky", "facebook", "fb", "instagram", "linkedin", "lnkd", "pinterest", "reddit", "t",
    "threads", "tiktok", "twitter", "x", "youtube",
];
const WEBMAILS: &[&str] = &["gmail", "outlook", "proton", "protonmail", "zimbra"];
const SECOND_LEVEL_SUFFIXES: &[&str] = &["ac", "co", "com", "gov", "net", "org"];

fn medium_for_host(host: &str) -> &'static str {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let site = site_label(&labels);

    let is_webmail = matches!(labels.first(), Some(&"mail") | Some(&"webmail"));
    if is_webmail || WEBMAILS.contains(&site) {
        "email"
    } else if SEARCH_ENGINES.contains(&site) {
        "search"
    } else if SOCIAL_NETWORKS.contains(&site) {
        "social"
    } else {
        "unknown"
    }
}

// "news.google.co.uk" -> "google"
fn site_label<'a>(labels: &[&'a str]) -> &'a str {
    match labels {
        [.., site, second, _] if SECOND_LEVEL_SUFFIXES.contains(second) => *site,
        [.., site, _] => *site,
        [only] => *only,
        [] => "",
    }
}

/// Drops pages whose declared locale doesn't match the language of their text.
pub fn validate_page(page: Page) -> Result<Page, EnrichError> {
    require("brand", &page.brand)?;
    require("url", &page.url)?;

    let declared = declared_language(&page.language)
        .ok_or_else(|| EnrichError::Invalid(format!("unparseable locale {:?}", page.language)))?;

    let text = format!("{} {} {}", page.title, page.description, page.content);
    let detected = whatlang::detect_lang(&text)
        .ok_or_else(|| EnrichError::Invalid("undetectable content language".to_string()))?;

    if detected.code() != declared.to_639_3() {
        return Err(EnrichError::Invalid(format!(
            "content language {} doesn't match page locale {}",
            detected.code(),
            page.language
        )));
    }
    Ok(page)
}

/// Base language of a locale such as `fr`, `fr-FR` or `en_US`.
pub fn declared_language(locale: &str) -> Option<Language> {
    let base = locale.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    match base.len() {
        2 => Language::from_639_1(&base),
        3 => Language::from_639_3(&base),
        _ => None,
    }
}

pub fn validate_user(user: User) -> Result<User, EnrichError> {
    require("brand", &user.brand)?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{lead_event_message, page, FakeGeo, ENGLISH_ARTICLE, FRENCH_ARTICLE};

    #[test]
    fn referrer_classification() {
        let url = "https://meteo-lyon.fr/orages";
        assert_eq!(classify_referrer("", url), "direct");
        assert_eq!(classify_referrer("https://meteo-lyon.fr/", url), "internal");
        assert_eq!(classify_referrer("https://www.google.fr/", url), "search");
        assert_eq!(classify_referrer("https://news.google.co.uk/", url), "search");
        assert_eq!(classify_referrer("https://t.co/abc", url), "social");
        assert_eq!(classify_referrer("https://mail.google.com/", url), "email");
        assert_eq!(classify_referrer("https://some-blog.net/post", url), "unknown");
        assert_eq!(classify_referrer("not a url", url), "unknown");
    }

    #[test]
    fn consented_events_are_located() {
        let geo = FakeGeo::with("31.28.64.3", "United Kingdom", "London");
        let message = lead_event_message(true, "31.28.64.3");

        let event = enrich_lead_event(&geo, message, Utc::now()).unwrap();
        assert_eq!(event.location_country, "United Kingdom");
        assert_eq!(event.location_city, "London");
        assert_eq!(geo.lookups(), 1);
    }

    #[test]
    fn events_without_consent_are_never_located() {
        let geo = FakeGeo::with("31.28.64.3", "United Kingdom", "London");
        let message = lead_event_message(false, "31.28.64.3");

        let event = enrich_lead_event(&geo, message, Utc::now()).unwrap();
        assert_eq!(event.location_country, "");
        assert_eq!(event.location_city, "");
        assert_eq!(geo.lookups(), 0);
    }

    #[test]
    fn behaviour_events_and_empty_ips_are_not_located() {
        let geo = FakeGeo::with("31.28.64.3", "United Kingdom", "London");

        let mut behaviour = lead_event_message(true, "31.28.64.3");
        behaviour.name = PAGE_BEHAVIOR.to_string();
        enrich_lead_event(&geo, behaviour, Utc::now()).unwrap();

        enrich_lead_event(&geo, lead_event_message(true, ""), Utc::now()).unwrap();
        assert_eq!(geo.lookups(), 0);
    }

    #[test]
    fn unknown_addresses_give_an_empty_location() {
        let geo = FakeGeo::default();
        let event = enrich_lead_event(&geo, lead_event_message(true, "10.1.2.3"), Utc::now()).unwrap();
        assert_eq!(event.location_country, "");
        assert_eq!(geo.lookups(), 1);
    }

    #[test]
    fn page_views_get_their_referrer_type() {
        let geo = FakeGeo::default();
        let mut message = lead_event_message(false, "");
        message.referrer = "https://meteo-lyon.fr/".to_string();
        message.referrer_type = "search".to_string();

        let event = enrich_lead_event(&geo, message, Utc::now()).unwrap();
        assert_eq!(event.message.referrer_type, "internal");
    }

    #[test]
    fn locale_parsing() {
        assert_eq!(declared_language("fr"), Language::from_639_1("fr"));
        assert_eq!(declared_language("fr-FR"), Language::from_639_1("fr"));
        assert_eq!(declared_language("en_US"), Language::from_639_1("en"));
        assert_eq!(declared_language("EN"), Language::from_639_1("en"));
        assert_eq!(declared_language(""), None);
        assert_eq!(declared_language("zz-ZZ"), None);
        assert_eq!(declared_language("french"), None);
    }

    #[test]
    fn matching_languages_are_valid() {
        assert!(validate_page(page("fr-FR", FRENCH_ARTICLE)).is_ok());
        assert!(validate_page(page("en_US", ENGLISH_ARTICLE)).is_ok());
    }

    #[test]
    fn mismatching_languages_are_permanently_invalid() {
        let err = validate_page(page("fr-FR", ENGLISH_ARTICLE)).unwrap_err();
        assert!(err.is_permanent());

        let err = validate_page(page("klingon", FRENCH_ARTICLE)).unwrap_err();
        assert!(err.is_permanent());
    }
}
