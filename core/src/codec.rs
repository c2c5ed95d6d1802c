//! Response decoding.
//!
//! Payloads are JSON. `flexible_date` lets models accept the handful of date
//! layouts APIs commonly emit without a custom deserializer per field.

use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::types::Payload;

/// Decode a payload into `T`.
pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, ApiError> {
    serde_json::from_slice(&payload.body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Serde helpers for `DateTime<Utc>` fields.
///
/// Tried in order: RFC 3339 (with or without fractional seconds),
/// `yyyy-MM-ddTHH:mm:ss.SSS±hhmm`, `yyyy-MM-dd HH:mm:ss ±hhmm`, `yyyy-MM-dd`
/// (midnight UTC).
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Release {
///     #[serde(with = "netcache_core::codec::flexible_date")]
///     at: DateTime<Utc>,
/// }
/// ```
pub mod flexible_date {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S %z"];
    const DATE_FORMAT: &str = "%Y-%m-%d";

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(raw, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("cannot decode date string {raw}")))
    }

    /// Same rules for `Option<DateTime<Utc>>`; `null` decodes to `None`.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("cannot decode date string {raw}"))
                }),
            }
        }
    }
}
