//! Time-window pruning of per-category daily activity.
//!
//! Activity is stored as `field.<category>.<YYYY-MM-DD> = value`. Date keys
//! are calendar days in the store's timezone (UTC); a leaf is pruned when its
//! day is strictly before the cutoff day.

use super::{BuildOutcome, DocumentRef};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use document_store::{Document, FieldPath};
use serde_json::Value;
use tracing::warn;

pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// First day that is kept: `now` minus `retention_days` whole days.
pub fn cutoff_date(now: DateTime<Utc>, retention_days: i64) -> NaiveDate {
    now.date_naive()
        .checked_sub_signed(Duration::days(retention_days))
        .unwrap_or(NaiveDate::MIN)
}

/// Delete every activity leaf dated before `cutoff`.
///
/// Unparseable date keys and non-map categories are counted as malformed and
/// left in place.
pub fn build_activity_pruning(
    collection: &str,
    field: &str,
    cutoff: NaiveDate,
    actors: &[Document],
) -> BuildOutcome {
    let mut outcome = BuildOutcome::default();
    let base = FieldPath::field(field);

    for actor in actors {
        let categories = match actor.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Object(categories)) => categories,
            Some(_) => {
                warn!(user_id = %actor.id, field, "Skipping user with non-map activity field");
                outcome.malformed += 1;
                continue;
            }
        };

        for (category, days) in categories {
            let Value::Object(days) = days else {
                warn!(user_id = %actor.id, category = %category, "Activity category is not a map");
                outcome.malformed += 1;
                continue;
            };

            for date_key in days.keys() {
                let day = match NaiveDate::parse_from_str(date_key, DATE_KEY_FORMAT) {
                    Ok(day) => day,
                    Err(e) => {
                        warn!(
                            user_id = %actor.id,
                            category = %category,
                            date_key = %date_key,
                            error = %e,
                            "Unparseable activity date, leaving it in place"
                        );
                        outcome.malformed += 1;
                        continue;
                    }
                };

                if day < cutoff {
                    outcome.change_set.delete_field(
                        DocumentRef::new(collection, actor.id.clone()),
                        base.child(category.clone()).child(date_key.clone()),
                    );
                }
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_cutoff_ignores_time_of_day() {
        assert_eq!(
            cutoff_date(now(), 10),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        assert_eq!(
            cutoff_date(Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap(), 10),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_boundary_day_is_retained() {
        let actors = vec![Document::from_json(
            "u1",
            json!({"dailyActivityByTheme": {"Histoire": {
                "2024-03-10": 4,
                "2024-03-09": 2,
                "2024-03-20": 1
            }}}),
        )];

        let outcome =
            build_activity_pruning("Users", "dailyActivityByTheme", cutoff_date(now(), 10), &actors);

        let paths: Vec<String> = outcome
            .change_set
            .iter()
            .flat_map(|m| match &m.kind {
                crate::change_set::MutationKind::UpdateFields(changes) => {
                    changes.iter().map(|(p, _)| p.to_string()).collect::<Vec<_>>()
                }
                crate::change_set::MutationKind::DeleteDocument => Vec::new(),
            })
            .collect();
        assert_eq!(paths, vec!["dailyActivityByTheme.Histoire.2024-03-09".to_string()]);
    }

    #[test]
    fn test_malformed_dates_are_skipped_not_deleted() {
        let actors = vec![Document::from_json(
            "u1",
            json!({"dailyActivityByTheme": {
                "Histoire": {"yesterday": 1, "2024-02-30": 1, "2023-01-01": 1},
                "Sciences": 12
            }}),
        )];

        let outcome =
            build_activity_pruning("Users", "dailyActivityByTheme", cutoff_date(now(), 10), &actors);

        assert_eq!(outcome.malformed, 3);
        assert_eq!(outcome.change_set.len(), 1);
        assert_eq!(outcome.change_set.field_change_count(), 1);
    }

    #[test]
    fn test_users_without_activity_are_skipped() {
        let actors = vec![
            Document::from_json("u1", json!({})),
            Document::from_json("u2", json!({"dailyActivityByTheme": null})),
        ];
        let outcome =
            build_activity_pruning("Users", "dailyActivityByTheme", cutoff_date(now(), 10), &actors);
        assert!(outcome.change_set.is_empty());
        assert_eq!(outcome.malformed, 0);
    }
}
