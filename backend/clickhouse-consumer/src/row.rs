use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::TapEvent;

/// Row struct for the stream_place_events table
///
/// Serialized as one JSONEachRow object; field names are the column names.
/// Optional event fields collapse to empty strings / `{}` so every column is
/// always present, except `created_at` which is Nullable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamPlaceEventRow {
    pub at_uri: String,
    pub ingested_at: i64,
    pub created_at: Option<i64>,
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub event_type: String,
    pub action: String,
    pub is_backfill: u8,
    pub record_data: Map<String, Value>,
}

impl StreamPlaceEventRow {
    /// Build the storage row for a tap event
    ///
    /// Never fails: an unparseable `createdAt` is stored as NULL.
    pub fn from_event(event: &TapEvent) -> Self {
        let created_at = event.created_at.as_deref().and_then(|raw| {
            match parse_datetime_best_effort(raw) {
                Some(dt) => Some(dt.timestamp_millis()),
                None => {
                    warn!(
                        at_uri = %event.at_uri,
                        created_at = raw,
                        "unparseable createdAt, storing NULL"
                    );
                    None
                }
            }
        });

        Self {
            at_uri: event.at_uri.clone(),
            ingested_at: event.timestamp,
            created_at,
            did: event.did.clone(),
            collection: event.collection.clone().unwrap_or_default(),
            rkey: event.rkey.clone().unwrap_or_default(),
            event_type: event.kind.as_str().to_string(),
            action: event
                .action
                .map(|a| a.as_str().to_string())
                .unwrap_or_default(),
            is_backfill: u8::from(event.is_backfill),
            record_data: event.record_data.clone().unwrap_or_default(),
        }
    }
}

impl From<&TapEvent> for StreamPlaceEventRow {
    fn from(event: &TapEvent) -> Self {
        Self::from_event(event)
    }
}

fn parse_datetime_best_effort(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Timezone-less layouts are taken as UTC
    for layout in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    // Date-only values are midnight UTC
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{decode, EventAction, EventKind};
    use serde_json::json;

    fn record_event() -> TapEvent {
        TapEvent {
            kind: EventKind::Record,
            did: "did:plc:abc".to_string(),
            at_uri: "at://did:plc:abc/app.foo/xyz".to_string(),
            timestamp: 1700000000000,
            created_at: None,
            action: Some(EventAction::Create),
            is_backfill: false,
            collection: Some("app.foo".to_string()),
            rkey: Some("xyz".to_string()),
            record_data: None,
        }
    }

    #[test]
    fn test_scenario_event_maps_to_expected_row() {
        let raw = br#"{"type":"record","did":"did:plc:abc","atUri":"at://did:plc:abc/app.foo/xyz","timestamp":1700000000000,"isBackfill":false,"collection":"app.foo","rkey":"xyz","action":"create"}"#;
        let event = decode(Some(raw)).unwrap().unwrap();

        let row = StreamPlaceEventRow::from_event(&event);

        assert_eq!(
            row,
            StreamPlaceEventRow {
                at_uri: "at://did:plc:abc/app.foo/xyz".to_string(),
                ingested_at: 1700000000000,
                created_at: None,
                did: "did:plc:abc".to_string(),
                collection: "app.foo".to_string(),
                rkey: "xyz".to_string(),
                event_type: "record".to_string(),
                action: "create".to_string(),
                is_backfill: 0,
                record_data: Map::new(),
            }
        );
    }

    #[test]
    fn test_mapping_is_pure() {
        let event = TapEvent {
            created_at: Some("2023-11-14T22:13:20.000Z".to_string()),
            record_data: json!({"b": 2, "a": [1, 2]}).as_object().cloned(),
            ..record_event()
        };
        assert_eq!(
            StreamPlaceEventRow::from_event(&event),
            StreamPlaceEventRow::from_event(&event)
        );
    }

    #[test]
    fn test_missing_optionals_get_defaults() {
        let event = TapEvent {
            kind: EventKind::Identity,
            action: None,
            collection: None,
            rkey: None,
            record_data: None,
            ..record_event()
        };

        let row = StreamPlaceEventRow::from_event(&event);

        assert_eq!(row.collection, "");
        assert_eq!(row.rkey, "");
        assert_eq!(row.action, "");
        assert!(row.record_data.is_empty());
        assert_eq!(row.event_type, "identity");
    }

    #[test]
    fn test_backfill_flag_encoding() {
        let live = StreamPlaceEventRow::from_event(&record_event());
        let backfill = StreamPlaceEventRow::from_event(&TapEvent {
            is_backfill: true,
            ..record_event()
        });
        assert_eq!(live.is_backfill, 0);
        assert_eq!(backfill.is_backfill, 1);
    }

    #[test]
    fn test_created_at_parsed_to_millis() {
        let event = TapEvent {
            created_at: Some("2023-11-14T22:13:20.123Z".to_string()),
            ..record_event()
        };
        let row = StreamPlaceEventRow::from_event(&event);
        assert_eq!(row.created_at, Some(1700000000123));
    }

    #[test]
    fn test_unparseable_created_at_becomes_null() {
        let event = TapEvent {
            created_at: Some("last tuesday".to_string()),
            ..record_event()
        };
        let row = StreamPlaceEventRow::from_event(&event);
        assert_eq!(row.created_at, None);
    }

    #[test]
    fn test_parse_datetime_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_datetime_best_effort("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(
            parse_datetime_best_effort("2024-01-02T05:04:05+02:00"),
            Some(expected)
        );
        assert_eq!(parse_datetime_best_effort("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_datetime_best_effort("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_datetime_best_effort(""), None);
    }

    #[test]
    fn test_date_only_created_at_is_midnight_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_datetime_best_effort("2024-01-02"), Some(expected));

        let event = TapEvent {
            created_at: Some("2024-01-02".to_string()),
            ..record_event()
        };
        assert_eq!(
            StreamPlaceEventRow::from_event(&event).created_at,
            Some(expected.timestamp_millis())
        );
        assert_eq!(parse_datetime_best_effort("2024-13-02"), None);
    }

    #[test]
    fn test_row_serializes_with_column_names() {
        let row = StreamPlaceEventRow::from_event(&record_event());
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(
            value,
            json!({
                "at_uri": "at://did:plc:abc/app.foo/xyz",
                "ingested_at": 1700000000000i64,
                "created_at": null,
                "did": "did:plc:abc",
                "collection": "app.foo",
                "rkey": "xyz",
                "event_type": "record",
                "action": "create",
                "is_backfill": 0,
                "record_data": {}
            })
        );
    }
}
