use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{LeadEvent, Page, User};

/// A row type living in one of the append-only analytical tables.
pub trait AnalyticalRow: Row + Serialize + Send + Sync + 'static {
    const TABLE: &'static str;
}

// Timestamps are DateTime64(3) columns, carried as epoch milliseconds.
fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct LeadEventRow {
    pub datetime: i64,
    pub brand: String,
    #[serde(with = "clickhouse::serde::uuid")]
    pub uuid: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub name: String,
    pub page_type: String,
    pub page_language: String,
    pub device: String,
    pub url: String,
    pub referrer: String,
    pub referrer_type: String,
    pub relevant_referrer: String,
    pub metas: String,
    pub consent: bool,
    pub ip: String,
    pub location_country: String,
    pub location_city: String,
}

impl AnalyticalRow for LeadEventRow {
    const TABLE: &'static str = "lead_event";
}

impl LeadEventRow {
    pub fn new(event: &LeadEvent) -> Result<Self, serde_json::Error> {
        let message = &event.message;
        Ok(Self {
            datetime: millis(event.datetime),
            brand: message.brand.clone(),
            uuid: message.uuid,
            lead_uuid: message.lead_uuid,
            name: message.name.clone(),
            page_type: message.page_type.clone(),
            page_language: message.page_language.clone(),
            device: message.device.clone(),
            url: message.url.clone(),
            referrer: message.referrer.clone(),
            referrer_type: message.referrer_type.clone(),
            relevant_referrer: message.relevant_referrer.clone(),
            metas: serde_json::to_string(&message.metas)?,
            consent: message.consent,
            ip: message.ip.clone(),
            location_country: event.location_country.clone(),
            location_city: event.location_city.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PageRow {
    pub datetime: i64,
    pub brand: String,
    pub url: String,
    pub page_type: String,
    pub language: String,
    pub publication_date: i64,
    pub modification_date: Option<i64>,
    pub title: String,
    pub description: String,
    pub content: String,
    pub section: String,
    pub sub_section: Option<String>,
    pub image: Option<String>,
    pub is_paid: bool,
}

impl AnalyticalRow for PageRow {
    const TABLE: &'static str = "page";
}

impl PageRow {
    pub fn new(page: &Page, datetime: DateTime<Utc>) -> Self {
        Self {
            datetime: millis(datetime),
            brand: page.brand.clone(),
            url: page.url.clone(),
            page_type: page.page_type.clone(),
            language: page.language.clone(),
            publication_date: millis(page.publication_date),
            modification_date: page.modification_date.map(millis),
            title: page.title.clone(),
            description: page.description.clone(),
            content: page.content.clone(),
            section: page.section.clone(),
            sub_section: page.sub_section.clone(),
            image: page.image.clone(),
            is_paid: page.is_paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct UserRow {
    pub datetime: i64,
    pub brand: String,
    #[serde(with = "clickhouse::serde::uuid")]
    pub lead_uuid: Uuid,
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscriber: bool,
}

impl AnalyticalRow for UserRow {
    const TABLE: &'static str = "user";
}

impl UserRow {
    pub fn new(user: &User, datetime: DateTime<Utc>) -> Self {
        Self {
            datetime: millis(datetime),
            brand: user.brand.clone(),
            lead_uuid: user.lead_uuid,
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_subscriber: user.is_subscriber,
        }
    }
}
