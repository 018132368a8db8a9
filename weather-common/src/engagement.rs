use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::round2;

/// A lead's rolled up activity over one 30 day window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub views: i64,
    pub avg_time_spent: f64,
    pub avg_reading_rate: f64,
}

impl WindowMetrics {
    pub fn new(views: i64, avg_time_spent: f64, avg_reading_rate: f64) -> Self {
        Self {
            views,
            avg_time_spent,
            avg_reading_rate,
        }
    }
}

/// Momentum of a lead over three consecutive windows, oldest first.
///
/// Returns 0 when the two older windows are empty, which covers leads without
/// any activity as well as brand new ones, and -1 when the most recent window
/// is empty. Otherwise the weighted deltas of views, time spent and reading
/// rate are normalised by the total view count, rounded to two decimals and
/// clamped to `[-1, 1]`.
pub fn engagement_score(windows: &[WindowMetrics; 3]) -> f64 {
    let [first, second, third] = windows;
    if first.views == 0 && second.views == 0 {
        return 0.0;
    }
    if third.views == 0 {
        return -1.0;
    }
    let total_views = first.views + second.views + third.views;

    let (v1, v2, v3) = (first.views as f64, second.views as f64, third.views as f64);
    let weighted = 0.2 * (v2 - v1)
        + 0.5 * (v3 - v2)
        + 0.1 * (second.avg_time_spent - first.avg_time_spent)
        + 0.3 * (third.avg_time_spent - second.avg_time_spent)
        + 0.1 * (second.avg_reading_rate - first.avg_reading_rate)
        + 0.3 * (third.avg_reading_rate - second.avg_reading_rate);

    round2(weighted / total_views as f64).clamp(-1.0, 1.0)
}

#[derive(sqlx::FromRow)]
struct WindowRow {
    window_index: i32,
    views: i64,
    avg_time_spent: f64,
    avg_reading_rate: f64,
}

/// Reads the 90-60, 60-30 and 30-0 days windows of `lead_engagement_metrics`.
///
/// Views are summed per window. The averages of a window are taken over every
/// row of the last 90 days, rows outside the window counting as 0, so a window
/// weighs in proportion to how many of the lead's periods fall into it.
pub async fn fetch_engagement_windows(
    pool: &PgPool,
    brand: &str,
    lead_uuid: Uuid,
) -> Result<[WindowMetrics; 3], sqlx::Error> {
    let rows = sqlx::query_as::<_, WindowRow>(
        r#"
        SELECT
            w.idx AS window_index,
            COALESCE(SUM(m.view_count) FILTER (WHERE m.in_window), 0)::BIGINT AS views,
            ROUND(COALESCE(AVG(CASE WHEN m.in_window THEN m.avg_time_spent ELSE 0 END), 0)::NUMERIC, 2)::DOUBLE PRECISION AS avg_time_spent,
            ROUND(COALESCE(AVG(CASE WHEN m.in_window THEN m.avg_reading_rate ELSE 0 END), 0)::NUMERIC, 2)::DOUBLE PRECISION AS avg_reading_rate
        FROM (VALUES (0, 90, 60), (1, 60, 30), (2, 30, 0)) AS w(idx, from_days, to_days)
        LEFT JOIN LATERAL (
            SELECT
                view_count,
                avg_time_spent,
                avg_reading_rate,
                calculation_period >= NOW() - make_interval(days => w.from_days)
                    AND (calculation_period < NOW() - make_interval(days => w.to_days)
                        OR (w.to_days = 0 AND calculation_period <= NOW())) AS in_window
            FROM lead_engagement_metrics
            WHERE brand = $1
                AND lead_uuid = $2
                AND calculation_period >= NOW() - INTERVAL '90 days'
        ) m ON TRUE
        GROUP BY w.idx
        ORDER BY w.idx
        "#,
    )
    .bind(brand)
    .bind(lead_uuid)
    .fetch_all(pool)
    .await?;

    let mut windows = [WindowMetrics::default(); 3];
    for row in rows {
        if let Some(window) = usize::try_from(row.window_index)
            .ok()
            .and_then(|i| windows.get_mut(i))
        {
            *window = WindowMetrics::new(row.views, row.avg_time_spent, row.avg_reading_rate);
        }
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn views(v1: i64, v2: i64, v3: i64) -> [WindowMetrics; 3] {
        [
            WindowMetrics::new(v1, 0.0, 0.0),
            WindowMetrics::new(v2, 0.0, 0.0),
            WindowMetrics::new(v3, 0.0, 0.0),
        ]
    }

    #[test]
    fn no_activity_scores_zero() {
        assert_eq!(engagement_score(&views(0, 0, 0)), 0.0);
    }

    #[test]
    fn new_leads_score_zero() {
        let windows = [
            WindowMetrics::new(0, 0.0, 0.0),
            WindowMetrics::new(0, 0.0, 0.0),
            WindowMetrics::new(5, 30.0, 0.5),
        ];
        assert_eq!(engagement_score(&windows), 0.0);
    }

    #[test]
    fn stalled_activity_scores_minus_one() {
        assert_eq!(engagement_score(&views(5, 5, 0)), -1.0);
        assert_eq!(engagement_score(&views(12, 0, 0)), -1.0);
    }

    #[test]
    fn growing_and_shrinking_audiences() {
        // (0.2 * 10 + 0.5 * 10) / 60
        assert_eq!(engagement_score(&views(10, 20, 30)), 0.12);
        assert_eq!(engagement_score(&views(30, 20, 10)), -0.12);
    }

    #[test]
    fn reading_behaviour_moves_the_score() {
        let windows = [
            WindowMetrics::new(4, 10.0, 0.5),
            WindowMetrics::new(4, 20.0, 0.5),
            WindowMetrics::new(4, 40.0, 0.5),
        ];
        // (0.1 * 10 + 0.3 * 20) / 12
        assert_eq!(engagement_score(&windows), 0.58);
    }

    #[test]
    fn score_is_clamped() {
        let windows = [
            WindowMetrics::new(0, 0.0, 0.0),
            WindowMetrics::new(1, 0.0, 0.0),
            WindowMetrics::new(1, 600.0, 1.0),
        ];
        assert_eq!(engagement_score(&windows), 1.0);

        let windows = [
            WindowMetrics::new(1, 900.0, 1.0),
            WindowMetrics::new(1, 0.0, 0.0),
            WindowMetrics::new(1, 0.0, 0.0),
        ];
        assert_eq!(engagement_score(&windows), -1.0);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn windows_split_the_last_ninety_days(db: PgPool) {
        let lead = Uuid::now_v7();
        let now = Utc::now();
        let seeded: [(i64, i64, f64); 4] = [(75, 3, 10.0), (45, 5, 20.0), (10, 7, 30.0), (2, 1, 50.0)];
        for (days_ago, view_count, time_spent) in seeded {
            sqlx::query(
                "INSERT INTO lead_engagement_metrics (brand, lead_uuid, calculation_period, view_count, avg_time_spent, avg_reading_rate)
                 VALUES ('meteo-lyon', $1, $2, $3, $4, 0.5)",
            )
            .bind(lead)
            .bind(now - Duration::days(days_ago))
            .bind(view_count)
            .bind(time_spent)
            .execute(&db)
            .await
            .unwrap();
        }

        let windows = fetch_engagement_windows(&db, "meteo-lyon", lead)
            .await
            .unwrap();
        // Averages run over all 4 rows, the ones outside a window count as 0
        assert_eq!(windows[0], WindowMetrics::new(3, 2.5, 0.13));
        assert_eq!(windows[1], WindowMetrics::new(5, 5.0, 0.13));
        assert_eq!(windows[2], WindowMetrics::new(8, 20.0, 0.25));

        let other = fetch_engagement_windows(&db, "meteo-paris", lead)
            .await
            .unwrap();
        assert_eq!(other, [WindowMetrics::default(); 3]);
    }
}
