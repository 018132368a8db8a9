use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Connection, FromRow, PgConnection, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;
use weather_common::types::{Page, User};

use crate::detect::WriteDecision;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// A record with a natural key in the relational store.
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

impl Record for Page {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.brand.clone(), self.url.clone())
    }
}

impl Record for User {
    type Key = (String, Uuid);

    fn key(&self) -> Self::Key {
        (self.brand.clone(), self.lead_uuid)
    }
}

#[async_trait]
pub trait RelationalStore<T>: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StagingTransaction<T>>, StoreError>;
}

/// One batch worth of relational writes. Reads see what the same transaction
/// already wrote, and a failed `current` or `write` leaves earlier writes in place.
#[async_trait]
pub trait StagingTransaction<T>: Send {
    async fn current(&mut self, probe: &T) -> Result<Option<T>, StoreError>;

    async fn write(&mut self, record: &T, decision: WriteDecision) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PgRecord: Record + for<'r> FromRow<'r, PgRow> + Unpin {
    async fn fetch_current(&self, conn: &mut PgConnection) -> Result<Option<Self>, sqlx::Error>;

    async fn insert(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error>;

    async fn update(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl<T: PgRecord> RelationalStore<T> for PgStore {
    async fn begin(&self) -> Result<Box<dyn StagingTransaction<T>>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStaging { tx }))
    }
}

struct PgStaging {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl<T: PgRecord> StagingTransaction<T> for PgStaging {
    async fn current(&mut self, probe: &T) -> Result<Option<T>, StoreError> {
        // A failed read aborts the transaction just like a failed write
        let mut savepoint = Connection::begin(&mut *self.tx).await?;
        match probe.fetch_current(&mut savepoint).await {
            Ok(current) => {
                savepoint.commit().await?;
                Ok(current)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn write(&mut self, record: &T, decision: WriteDecision) -> Result<(), StoreError> {
        // Each statement gets its own savepoint, a failing one would otherwise
        // abort the whole batch transaction.
        let mut savepoint = Connection::begin(&mut *self.tx).await?;
        let res = match decision {
            WriteDecision::Insert => record.insert(&mut savepoint).await,
            WriteDecision::Update => record.update(&mut savepoint).await,
            WriteDecision::Unchanged => Ok(()),
        };
        match res {
            Ok(()) => savepoint.commit().await?,
            Err(e) => {
                savepoint.rollback().await?;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PgRecord for Page {
    async fn fetch_current(&self, conn: &mut PgConnection) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Page>(
            r#"
            SELECT brand, url, type, language, publication_date, modification_date, title,
                   description, content, section, sub_section, image, is_paid
            FROM page
            WHERE brand = $1 AND url = $2
            "#,
        )
        .bind(&self.brand)
        .bind(&self.url)
        .fetch_optional(conn)
        .await
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO page (brand, url, type, language, publication_date, modification_date,
                              title, description, content, section, sub_section, image, is_paid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (brand, url) DO UPDATE SET
                type = EXCLUDED.type,
                language = EXCLUDED.language,
                publication_date = EXCLUDED.publication_date,
                modification_date = EXCLUDED.modification_date,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                content = EXCLUDED.content,
                section = EXCLUDED.section,
                sub_section = EXCLUDED.sub_section,
                image = EXCLUDED.image,
                is_paid = EXCLUDED.is_paid,
                content_vector = NULL
            "#,
        )
        .bind(&self.brand)
        .bind(&self.url)
        .bind(&self.page_type)
        .bind(&self.language)
        .bind(self.publication_date)
        .bind(self.modification_date)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.content)
        .bind(&self.section)
        .bind(&self.sub_section)
        .bind(&self.image)
        .bind(self.is_paid)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        // The content changed, so its term vector has to be computed again
        sqlx::query(
            r#"
            UPDATE page SET
                modification_date = $3,
                title = $4,
                description = $5,
                content = $6,
                section = $7,
                sub_section = $8,
                image = $9,
                is_paid = $10,
                content_vector = NULL
            WHERE brand = $1 AND url = $2
            "#,
        )
        .bind(&self.brand)
        .bind(&self.url)
        .bind(self.modification_date)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.content)
        .bind(&self.section)
        .bind(&self.sub_section)
        .bind(&self.image)
        .bind(self.is_paid)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PgRecord for User {
    async fn fetch_current(&self, conn: &mut PgConnection) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT brand, lead_uuid, user_id, email, first_name, last_name, is_subscriber
            FROM "user"
            WHERE brand = $1 AND lead_uuid = $2
            "#,
        )
        .bind(&self.brand)
        .bind(self.lead_uuid)
        .fetch_optional(conn)
        .await
    }

    async fn insert(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO "user" (brand, lead_uuid, user_id, email, first_name, last_name, is_subscriber)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (brand, lead_uuid) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                email = EXCLUDED.email,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                is_subscriber = EXCLUDED.is_subscriber
            "#,
        )
        .bind(&self.brand)
        .bind(self.lead_uuid)
        .bind(&self.user_id)
        .bind(&self.email)
        .bind(&self.first_name)
        .bind(&self.last_name)
        .bind(self.is_subscriber)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE "user" SET
                user_id = $3,
                email = $4,
                first_name = $5,
                last_name = $6,
                is_subscriber = $7
            WHERE brand = $1 AND lead_uuid = $2
            "#,
        )
        .bind(&self.brand)
        .bind(self.lead_uuid)
        .bind(&self.user_id)
        .bind(&self.email)
        .bind(&self.first_name)
        .bind(&self.last_name)
        .bind(self.is_subscriber)
        .execute(conn)
        .await?;
        Ok(())
    }
}
