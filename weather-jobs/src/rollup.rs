use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use tracing::error;
use uuid::Uuid;

/// One natural key column value of a rollup row, after `brand`.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupKey {
    Text(String),
    Uuid(Uuid),
}

impl From<String> for RollupKey {
    fn from(value: String) -> Self {
        RollupKey::Text(value)
    }
}

impl From<Uuid> for RollupKey {
    fn from(value: Uuid) -> Self {
        RollupKey::Uuid(value)
    }
}

/// Incoming aggregates for one rollup row.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupValues {
    pub count: i64,
    pub averages: Vec<f64>,
}

/// Upsert into a rollup table keyed on `(brand, keys.., calculation_period)`.
///
/// On conflict the count columns are summed and every average becomes
/// `ROUND((old_avg + new_avg) / (old_count + new_count), 2)`. This is not a
/// count-weighted mean, and downstream consumers are calibrated on it. A zero
/// summed count keeps the incoming average.
#[derive(Debug, Clone)]
pub struct MergeUpsert {
    table: &'static str,
    keys: usize,
    averages: usize,
    sql: String,
}

impl MergeUpsert {
    pub fn new(table: &'static str, keys: &[&str], count: &str, averages: &[&str]) -> Self {
        let mut columns = vec!["brand"];
        columns.extend_from_slice(keys);
        let conflict = format!("{}, calculation_period", columns.join(", "));
        columns.push("calculation_period");
        columns.push(count);
        columns.extend_from_slice(averages);

        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut updates = vec![format!("{count} = {table}.{count} + EXCLUDED.{count}")];
        for avg in averages {
            updates.push(format!(
                "{avg} = COALESCE(ROUND((({table}.{avg} + EXCLUDED.{avg}) / NULLIF({table}.{count} + EXCLUDED.{count}, 0))::NUMERIC, 2)::DOUBLE PRECISION, EXCLUDED.{avg})"
            ));
        }

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders}) ON CONFLICT ({conflict}) DO UPDATE SET {}",
            columns.join(", "),
            updates.join(", ")
        );

        Self {
            table,
            keys: keys.len(),
            averages: averages.len(),
            sql,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns false when the row was skipped for a non-positive count.
    pub async fn execute<'c, E>(
        &self,
        executor: E,
        brand: &str,
        keys: &[RollupKey],
        period: DateTime<Utc>,
        values: &RollupValues,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'c, Database = Postgres>,
    {
        if values.count <= 0 {
            error!(
                table = self.table,
                brand,
                count = values.count,
                "Skipping rollup row without views"
            );
            return Ok(false);
        }
        if keys.len() != self.keys || values.averages.len() != self.averages {
            return Err(sqlx::Error::Protocol(format!(
                "{} expects {} keys and {} averages",
                self.table, self.keys, self.averages
            )));
        }

        let mut query = sqlx::query(&self.sql).bind(brand);
        for key in keys {
            query = match key {
                RollupKey::Text(text) => query.bind(text.as_str()),
                RollupKey::Uuid(uuid) => query.bind(*uuid),
            };
        }
        query = query.bind(period).bind(values.count);
        for avg in &values.averages {
            query = query.bind(*avg);
        }

        query.execute(executor).await?;
        Ok(true)
    }
}

/// Deletes the rows of `table` whose `calculation_period` is before `cutoff`.
pub async fn purge_before<'c, E>(
    executor: E,
    table: &'static str,
    brand: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!("DELETE FROM {table} WHERE brand = $1 AND calculation_period < $2");
    let result = sqlx::query(&sql)
        .bind(brand)
        .bind(cutoff)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::PgPool;

    fn article_metrics() -> MergeUpsert {
        MergeUpsert::new(
            "article_metrics",
            &["url"],
            "view_count",
            &["avg_time_spent", "avg_reading_rate"],
        )
    }

    fn url() -> Vec<RollupKey> {
        vec![RollupKey::from("https://meteo-lyon.fr/orages".to_string())]
    }

    async fn stored(db: &PgPool) -> Vec<(i64, f64, f64)> {
        sqlx::query_as(
            "SELECT view_count, avg_time_spent, avg_reading_rate FROM article_metrics ORDER BY calculation_period",
        )
        .fetch_all(db)
        .await
        .unwrap()
    }

    #[test]
    fn builds_conflict_target_from_keys() {
        let sql = MergeUpsert::new("lead_article_view_count", &["lead_uuid"], "view_count", &[])
            .sql()
            .to_string();
        assert!(sql.starts_with(
            "INSERT INTO lead_article_view_count (brand, lead_uuid, calculation_period, view_count) VALUES ($1, $2, $3, $4)"
        ));
        assert!(sql.contains("ON CONFLICT (brand, lead_uuid, calculation_period)"));
        assert!(sql.ends_with(
            "view_count = lead_article_view_count.view_count + EXCLUDED.view_count"
        ));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn merges_with_the_summed_average_formula(db: PgPool) {
        let upsert = article_metrics();
        let hour = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();

        let first = RollupValues {
            count: 10,
            averages: vec![50.0, 0.5],
        };
        let second = RollupValues {
            count: 5,
            averages: vec![80.0, 0.7],
        };
        assert!(upsert
            .execute(&db, "meteo-lyon", &url(), hour, &first)
            .await
            .unwrap());
        assert!(upsert
            .execute(&db, "meteo-lyon", &url(), hour, &second)
            .await
            .unwrap());

        // (50 + 80) / 15 and (0.5 + 0.7) / 15
        assert_eq!(stored(&db).await, vec![(15, 8.67, 0.08)]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn periods_and_brands_are_separate_rows(db: PgPool) {
        let upsert = article_metrics();
        let hour = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();
        let values = RollupValues {
            count: 3,
            averages: vec![12.0, 0.4],
        };

        upsert
            .execute(&db, "meteo-lyon", &url(), hour, &values)
            .await
            .unwrap();
        upsert
            .execute(&db, "meteo-lyon", &url(), hour + Duration::hours(1), &values)
            .await
            .unwrap();
        upsert
            .execute(&db, "meteo-paris", &url(), hour, &values)
            .await
            .unwrap();

        assert_eq!(stored(&db).await.len(), 3);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rows_without_views_are_skipped(db: PgPool) {
        let upsert = article_metrics();
        let hour = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();
        let empty = RollupValues {
            count: 0,
            averages: vec![0.0, 0.0],
        };

        let written = upsert
            .execute(&db, "meteo-lyon", &url(), hour, &empty)
            .await
            .unwrap();

        assert!(!written);
        assert!(stored(&db).await.is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn purge_only_touches_old_rows_of_the_brand(db: PgPool) {
        let upsert = article_metrics();
        let now = Utc.with_ymd_and_hms(2024, 10, 17, 14, 0, 0).unwrap();
        let values = RollupValues {
            count: 1,
            averages: vec![1.0, 1.0],
        };
        for (brand, age) in [("meteo-lyon", 5), ("meteo-lyon", 1), ("meteo-paris", 5)] {
            upsert
                .execute(&db, brand, &url(), now - Duration::days(age), &values)
                .await
                .unwrap();
        }

        let deleted = purge_before(&db, "article_metrics", "meteo-lyon", now - Duration::days(2))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(stored(&db).await.len(), 2);
    }
}
