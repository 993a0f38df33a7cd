//! Opaque listing cursor over `(created_at, id)`.
//!
//! The cursor is a base64url-encoded JSON pair. Scans order by
//! `(created_utc DESC, transaction_id DESC)`, so a decoded cursor
//! strictly upper-bounds every row on subsequent pages; rows inserted
//! after the cursor was issued can never reappear.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    pub created_utc: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    #[serde(rename = "createdAt")]
    created_at: String,
    id: String,
}

impl ListCursor {
    pub fn new(created_utc: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_utc, id }
    }

    pub fn encode(&self) -> String {
        let payload = CursorPayload {
            created_at: self
                .created_utc
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            id: self.id.to_string(),
        };
        // CursorPayload is two strings; serialization cannot fail.
        let json = serde_json::to_string(&payload).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let bad_cursor = || AppError::BadRequest(anyhow::anyhow!("Invalid cursor"));

        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| bad_cursor())?;
        let json = String::from_utf8(bytes).map_err(|_| bad_cursor())?;
        let payload: CursorPayload = serde_json::from_str(&json).map_err(|_| bad_cursor())?;

        let created_utc = DateTime::parse_from_rfc3339(&payload.created_at)
            .map_err(|_| bad_cursor())?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(&payload.id).map_err(|_| bad_cursor())?;

        Ok(Self { created_utc, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips() {
        let cursor = ListCursor::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            Uuid::new_v4(),
        );
        let decoded = ListCursor::decode(&cursor.encode()).expect("decodes");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn round_trips_with_sub_second_precision() {
        let cursor = ListCursor::new(
            Utc.timestamp_opt(1_705_315_800, 123_456_000).unwrap(),
            Uuid::new_v4(),
        );
        let decoded = ListCursor::decode(&cursor.encode()).expect("decodes");
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn rejects_garbage_base64() {
        assert!(ListCursor::decode("!!!not-base64!!!").is_err());
    }

    #[test]
    fn rejects_non_json_payload() {
        let raw = URL_SAFE_NO_PAD.encode("just some text");
        assert!(ListCursor::decode(&raw).is_err());
    }

    #[test]
    fn rejects_bad_date() {
        let raw = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"createdAt":"not-a-date","id":"{}"}}"#,
            Uuid::new_v4()
        ));
        assert!(ListCursor::decode(&raw).is_err());
    }

    #[test]
    fn rejects_bad_uuid() {
        let raw = URL_SAFE_NO_PAD
            .encode(r#"{"createdAt":"2024-01-15T10:30:00.000000Z","id":"not-a-uuid"}"#);
        assert!(ListCursor::decode(&raw).is_err());
    }
}
