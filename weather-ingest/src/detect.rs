use chrono::{DateTime, Timelike, Utc};
use weather_common::types::{Page, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Insert,
    Update,
    Unchanged,
}

impl WriteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDecision::Insert => "insert",
            WriteDecision::Update => "update",
            WriteDecision::Unchanged => "unchanged",
        }
    }
}

/// A page changes when its modification date does, compared to the second.
pub fn detect_page(current: Option<&Page>, incoming: &Page) -> WriteDecision {
    let Some(current) = current else {
        return WriteDecision::Insert;
    };
    let seconds = |d: Option<DateTime<Utc>>| d.and_then(|d| d.with_nanosecond(0));
    if seconds(current.modification_date) != seconds(incoming.modification_date) {
        WriteDecision::Update
    } else {
        WriteDecision::Unchanged
    }
}

/// A user changes when its subscription does.
pub fn detect_user(current: Option<&User>, incoming: &User) -> WriteDecision {
    match current {
        None => WriteDecision::Insert,
        Some(current) if current.is_subscriber != incoming.is_subscriber => WriteDecision::Update,
        Some(_) => WriteDecision::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{page, user};
    use chrono::{Duration, TimeZone};

    #[test]
    fn new_pages_are_inserted() {
        assert_eq!(detect_page(None, &page("fr", "")), WriteDecision::Insert);
    }

    #[test]
    fn pages_follow_their_modification_date() {
        let t1 = Utc.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap();
        let mut current = page("fr", "");
        current.modification_date = Some(t1);

        let mut incoming = current.clone();
        incoming.title = "A new title alone is not a change".to_string();
        assert_eq!(
            detect_page(Some(&current), &incoming),
            WriteDecision::Unchanged
        );

        incoming.modification_date = Some(t1 + Duration::milliseconds(300));
        assert_eq!(
            detect_page(Some(&current), &incoming),
            WriteDecision::Unchanged
        );

        incoming.modification_date = Some(t1 + Duration::minutes(5));
        assert_eq!(detect_page(Some(&current), &incoming), WriteDecision::Update);

        incoming.modification_date = None;
        assert_eq!(detect_page(Some(&current), &incoming), WriteDecision::Update);
    }

    #[test]
    fn users_follow_their_subscription() {
        let current = user(false);
        assert_eq!(detect_user(None, &current), WriteDecision::Insert);
        assert_eq!(
            detect_user(Some(&current), &user(false)),
            WriteDecision::Unchanged
        );
        assert_eq!(detect_user(Some(&current), &user(true)), WriteDecision::Update);
    }
}
