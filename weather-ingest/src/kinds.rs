use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use weather_common::{
    rows::{AnalyticalRow, LeadEventRow, PageRow, UserRow},
    types::{LeadEvent, LeadEventMessage, Page, PageMessage, User, UserMessage},
};

use crate::{
    detect::{detect_page, detect_user, WriteDecision},
    enrich::{enrich_lead_event, validate_page, validate_user, EnrichError, GeoLocator},
};

/// A validated record along with the analytical row mirroring it.
pub struct Enriched<R, W> {
    pub record: R,
    pub row: W,
}

/// Binds one message schema to its relational record and analytical row.
pub trait EntityKind: Send + Sync + 'static {
    const NAME: &'static str;

    type Message: DeserializeOwned + Send;
    type Record: Clone + Send + Sync + 'static;
    type Row: AnalyticalRow;

    fn enrich(
        &self,
        message: Self::Message,
        now: DateTime<Utc>,
    ) -> Result<Enriched<Self::Record, Self::Row>, EnrichError>;

    fn detect(current: Option<&Self::Record>, incoming: &Self::Record) -> WriteDecision;
}

pub struct PageKind;

impl EntityKind for PageKind {
    const NAME: &'static str = "page";

    type Message = PageMessage;
    type Record = Page;
    type Row = PageRow;

    fn enrich(
        &self,
        message: PageMessage,
        _now: DateTime<Utc>,
    ) -> Result<Enriched<Page, PageRow>, EnrichError> {
        let page = validate_page(message.page)?;
        let row = PageRow::new(&page, message.datetime);
        Ok(Enriched { record: page, row })
    }

    fn detect(current: Option<&Page>, incoming: &Page) -> WriteDecision {
        detect_page(current, incoming)
    }
}

pub struct UserKind;

impl EntityKind for UserKind {
    const NAME: &'static str = "user";

    type Message = UserMessage;
    type Record = User;
    type Row = UserRow;

    fn enrich(
        &self,
        message: UserMessage,
        _now: DateTime<Utc>,
    ) -> Result<Enriched<User, UserRow>, EnrichError> {
        let user = validate_user(message.user)?;
        let row = UserRow::new(&user, message.datetime);
        Ok(Enriched { record: user, row })
    }

    fn detect(current: Option<&User>, incoming: &User) -> WriteDecision {
        detect_user(current, incoming)
    }
}

pub struct LeadEventKind {
    geo: Arc<dyn GeoLocator>,
}

impl LeadEventKind {
    pub fn new(geo: Arc<dyn GeoLocator>) -> Self {
        Self { geo }
    }
}

impl EntityKind for LeadEventKind {
    const NAME: &'static str = "lead_event";

    type Message = LeadEventMessage;
    type Record = LeadEvent;
    type Row = LeadEventRow;

    fn enrich(
        &self,
        message: LeadEventMessage,
        now: DateTime<Utc>,
    ) -> Result<Enriched<LeadEvent, LeadEventRow>, EnrichError> {
        let event = enrich_lead_event(self.geo.as_ref(), message, now)?;
        let row = LeadEventRow::new(&event)
            .map_err(|e| EnrichError::Invalid(format!("unencodable metas: {e}")))?;
        Ok(Enriched { record: event, row })
    }

    // Events are facts, every one of them is appended
    fn detect(_current: Option<&LeadEvent>, _incoming: &LeadEvent) -> WriteDecision {
        WriteDecision::Insert
    }
}
