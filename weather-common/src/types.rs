use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A tenant, as listed in the `brand` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Brand {
    pub name: String,
    pub page_view_threshold: i32,
}

/// Reading behaviour reported by the beacon alongside an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metas {
    #[serde(rename = "timeSpent", default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<f64>,
    #[serde(rename = "readingRate", default, skip_serializing_if = "Option::is_none")]
    pub reading_rate: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadEventMessage {
    pub brand: String,
    pub uuid: Uuid,
    pub lead_uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub page_type: String,
    #[serde(default)]
    pub page_language: String,
    #[serde(default)]
    pub device: String,
    pub url: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub referrer_type: String,
    #[serde(default)]
    pub relevant_referrer: String,
    #[serde(default)]
    pub metas: Metas,
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub ip: String,
}

/// A lead event once enriched, ready to be appended to the analytical log.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadEvent {
    pub datetime: DateTime<Utc>,
    pub message: LeadEventMessage,
    pub location_country: String,
    pub location_city: String,
}

/// Current state of a page, as stored in the `page` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Page {
    pub brand: String,
    pub url: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub page_type: String,
    pub language: String,
    pub publication_date: DateTime<Utc>,
    #[serde(default)]
    pub modification_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub sub_section: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMessage {
    pub datetime: DateTime<Utc>,
    #[serde(flatten)]
    pub page: Page,
}

/// Current state of a lead's account, as stored in the `"user"` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub brand: String,
    pub lead_uuid: Uuid,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_subscriber: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub datetime: DateTime<Utc>,
    #[serde(flatten)]
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lead_event_keeps_unknown_metas() {
        let message: LeadEventMessage = serde_json::from_value(json!({
            "brand": "meteo-lyon",
            "uuid": "0191b9a4-5a3c-7cc5-9a6e-6d5f4c1f2a10",
            "lead_uuid": "0191b9a4-5a3c-7cc5-9a6e-6d5f4c1f2a11",
            "name": "page_behavior",
            "url": "https://meteo-lyon.fr/orages",
            "metas": { "timeSpent": 42.5, "readingRate": 0.8, "scrollDepth": 90 },
            "consent": true,
            "ip": "31.28.64.3"
        }))
        .unwrap();

        assert_eq!(message.metas.time_spent, Some(42.5));
        assert_eq!(message.metas.reading_rate, Some(0.8));
        assert_eq!(message.metas.extra.get("scrollDepth"), Some(&json!(90)));
        assert_eq!(message.referrer, "");
    }

    #[test]
    fn page_message_flattens_the_page() {
        let message: PageMessage = serde_json::from_value(json!({
            "datetime": "2024-10-01T08:00:00Z",
            "brand": "meteo-lyon",
            "url": "https://meteo-lyon.fr/orages",
            "type": "article",
            "language": "fr-FR",
            "publication_date": "2024-09-30T18:12:00Z",
            "title": "Orages sur Lyon",
            "description": "",
            "content": "",
            "section": "actualites",
            "is_paid": false
        }))
        .unwrap();

        assert_eq!(message.page.page_type, "article");
        assert_eq!(message.page.modification_date, None);
        assert_eq!(message.page.sub_section, None);
    }
}
