use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common_geoip::{GeoIpError, Location};
use maxminddb::MaxMindDBError;
use uuid::Uuid;
use weather_common::analytics::{AnalyticalSink, AnalyticsError};
use weather_common::types::{LeadEventMessage, Metas, Page, User};

use crate::detect::WriteDecision;
use crate::enrich::GeoLocator;
use crate::message::{Delivery, DeliveryError};
use crate::store::{Record, RelationalStore, StagingTransaction, StoreError};

pub const ENGLISH_ARTICLE: &str = "Heavy thunderstorms are expected across the valley this \
    evening, with strong gusts of wind and hail likely in the northern districts. Residents are \
    advised to stay indoors and to keep away from trees and power lines until the storm has passed.";

pub const FRENCH_ARTICLE: &str = "De violents orages sont attendus sur la vallée ce soir, avec \
    de fortes rafales de vent et de la grêle probable dans les quartiers nord. Les habitants sont \
    invités à rester chez eux et à se tenir éloignés des arbres et des lignes électriques jusqu'au \
    passage de l'orage.";

pub fn lead_event_message(consent: bool, ip: &str) -> LeadEventMessage {
    LeadEventMessage {
        brand: "meteo-lyon".to_string(),
        uuid: Uuid::now_v7(),
        lead_uuid: Uuid::from_u128(0x0191_b9a4_5a3c_7cc5_9a6e_6d5f_4c1f_2a11),
        name: "page_view".to_string(),
        page_type: "article".to_string(),
        page_language: "fr".to_string(),
        device: "mobile".to_string(),
        url: "https://meteo-lyon.fr/orages".to_string(),
        referrer: String::new(),
        referrer_type: String::new(),
        relevant_referrer: String::new(),
        metas: Metas {
            time_spent: Some(42.0),
            reading_rate: Some(0.8),
            ..Default::default()
        },
        consent,
        ip: ip.to_string(),
    }
}

pub fn page(locale: &str, content: &str) -> Page {
    Page {
        brand: "meteo-lyon".to_string(),
        url: "https://meteo-lyon.fr/orages".to_string(),
        page_type: "article".to_string(),
        language: locale.to_string(),
        publication_date: Utc.with_ymd_and_hms(2024, 9, 30, 18, 12, 0).unwrap(),
        modification_date: None,
        title: String::new(),
        description: String::new(),
        content: content.to_string(),
        section: "actualites".to_string(),
        sub_section: None,
        image: None,
        is_paid: false,
    }
}

pub fn user(is_subscriber: bool) -> User {
    User {
        brand: "meteo-lyon".to_string(),
        lead_uuid: Uuid::from_u128(0x0191_b9a4_5a3c_7cc5_9a6e_6d5f_4c1f_2a11),
        user_id: "42".to_string(),
        email: "camille@example.com".to_string(),
        first_name: "Camille".to_string(),
        last_name: "Martin".to_string(),
        is_subscriber,
    }
}

#[derive(Clone, Default)]
pub struct FakeGeo {
    known: HashMap<String, Location>,
    broken: Option<String>,
    lookups: Arc<AtomicUsize>,
}

impl FakeGeo {
    pub fn with(ip: &str, country: &str, city: &str) -> Self {
        let mut geo = Self::default();
        geo.known.insert(
            ip.to_string(),
            Location {
                country: country.to_string(),
                city: city.to_string(),
            },
        );
        geo
    }

    /// Lookups of `ip` fail as if the database were corrupt.
    pub fn broken(ip: &str) -> Self {
        Self {
            broken: Some(ip.to_string()),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl GeoLocator for FakeGeo {
    fn locate(&self, ip: &str) -> Result<Option<Location>, GeoIpError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken.as_deref() == Some(ip) {
            return Err(GeoIpError::LookupError(MaxMindDBError::InvalidDatabaseError(
                "truncated".to_string(),
            )));
        }
        Ok(self.known.get(ip).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
}

/// Hands out in-memory deliveries and remembers how each was settled.
#[derive(Clone, Default)]
pub struct Deliveries {
    settled: Arc<Mutex<Vec<Option<Settlement>>>>,
    order: Arc<Mutex<Vec<usize>>>,
}

impl Deliveries {
    pub fn raw(&self, payload: &[u8]) -> TestDelivery {
        let mut settled = self.settled.lock().unwrap();
        settled.push(None);
        TestDelivery {
            id: settled.len() - 1,
            payload: payload.to_vec(),
            settled: self.settled.clone(),
            order: self.order.clone(),
        }
    }

    pub fn json(&self, payload: serde_json::Value) -> TestDelivery {
        self.raw(&serde_json::to_vec(&payload).unwrap())
    }

    /// Settlements in the order the deliveries were created. Panics on a
    /// delivery that was never settled.
    pub fn outcomes(&self) -> Vec<Settlement> {
        self.settled
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(id, s)| s.unwrap_or_else(|| panic!("delivery {id} was never settled")))
            .collect()
    }

    /// Settlements so far, `None` for deliveries still pending.
    pub fn snapshot(&self) -> Vec<Option<Settlement>> {
        self.settled.lock().unwrap().clone()
    }

    /// Delivery ids in the order they were settled.
    pub fn settle_order(&self) -> Vec<usize> {
        self.order.lock().unwrap().clone()
    }
}

pub struct TestDelivery {
    id: usize,
    payload: Vec<u8>,
    settled: Arc<Mutex<Vec<Option<Settlement>>>>,
    order: Arc<Mutex<Vec<usize>>>,
}

impl TestDelivery {
    fn settle(self, settlement: Settlement) -> Result<(), DeliveryError> {
        let mut settled = self.settled.lock().unwrap();
        if settled[self.id].is_some() {
            return Err(DeliveryError::Other(format!(
                "delivery {} settled twice",
                self.id
            )));
        }
        settled[self.id] = Some(settlement);
        self.order.lock().unwrap().push(self.id);
        Ok(())
    }
}

#[async_trait]
impl Delivery for TestDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn redelivery_count(&self) -> u32 {
        0
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        self.settle(Settlement::Acked)
    }

    async fn nack(self) -> Result<(), DeliveryError> {
        self.settle(Settlement::Nacked)
    }
}

#[derive(Clone)]
pub struct MemorySink<R> {
    rows: Arc<Mutex<Vec<R>>>,
    failing: bool,
}

impl<R> Default for MemorySink<R> {
    fn default() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            failing: false,
        }
    }
}

impl<R: Clone> MemorySink<R> {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<R> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> AnalyticalSink<R> for MemorySink<R> {
    async fn append(&self, rows: Vec<R>) -> Result<(), AnalyticsError> {
        if self.failing {
            return Err(AnalyticsError::Encode(
                serde_json::from_str::<()>("unavailable").unwrap_err(),
            ));
        }
        self.rows.lock().unwrap().extend(rows);
        Ok(())
    }
}

struct MemoryState<T: Record> {
    rows: HashMap<T::Key, T>,
    writes: usize,
    failing_keys: Vec<T::Key>,
    fail_begins: bool,
    fail_commits: bool,
}

/// A relational store whose transactions work on a copy of the rows, swapped
/// in on commit.
#[derive(Clone)]
pub struct MemoryStore<T: Record> {
    state: Arc<Mutex<MemoryState<T>>>,
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                rows: HashMap::new(),
                writes: 0,
                failing_keys: Vec::new(),
                fail_begins: false,
                fail_commits: false,
            })),
        }
    }
}

impl<T: Record> MemoryStore<T> {
    pub fn rows(&self) -> Vec<T> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    /// Committed writes.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn fail_writes_for(&self, key: T::Key) {
        self.state.lock().unwrap().failing_keys.push(key);
    }

    pub fn fail_begins(&self) {
        self.state.lock().unwrap().fail_begins = true;
    }

    pub fn fail_commits(&self) {
        self.state.lock().unwrap().fail_commits = true;
    }
}

#[async_trait]
impl<T: Record> RelationalStore<T> for MemoryStore<T> {
    async fn begin(&self) -> Result<Box<dyn StagingTransaction<T>>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_begins {
            return Err(StoreError::Other("connection refused".to_string()));
        }
        Ok(Box::new(MemoryTransaction {
            staged: state.rows.clone(),
            writes: 0,
            store: self.clone(),
        }))
    }
}

struct MemoryTransaction<T: Record> {
    staged: HashMap<T::Key, T>,
    writes: usize,
    store: MemoryStore<T>,
}

#[async_trait]
impl<T: Record> StagingTransaction<T> for MemoryTransaction<T> {
    async fn current(&mut self, probe: &T) -> Result<Option<T>, StoreError> {
        Ok(self.staged.get(&probe.key()).cloned())
    }

    async fn write(&mut self, record: &T, decision: WriteDecision) -> Result<(), StoreError> {
        let key = record.key();
        if self.store.state.lock().unwrap().failing_keys.contains(&key) {
            return Err(StoreError::Other(format!("{decision:?} of {key:?} failed")));
        }
        self.staged.insert(key, record.clone());
        self.writes += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            staged,
            writes,
            store,
        } = *self;
        let mut state = store.state.lock().unwrap();
        if state.fail_commits {
            return Err(StoreError::Other("commit refused".to_string()));
        }
        state.rows = staged;
        state.writes += writes;
        Ok(())
    }
}
