use serde::{Deserialize, Deserializer, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// The current time in UTC.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and the offset-less ISO 8601 form the backend emits for
/// naive UTC datetimes (`2024-05-01T12:30:00.123456`), which is read as UTC.
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(datetime) => Ok(datetime),
        Err(err) => {
            let naive = format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
            );
            PrimitiveDateTime::parse(s, naive)
                .map(PrimitiveDateTime::assume_utc)
                .map_err(|_| err)
        }
    }
}

/// Deserialize a backend timestamp into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_rfc3339() {
        let parsed = parse("2024-05-01T12:30:00Z").unwrap();
        assert_eq!(parsed, datetime!(2024-05-01 12:30:00 UTC));
    }

    #[test]
    fn parses_naive_as_utc() {
        let parsed = parse("2024-05-01T12:30:00.250000").unwrap();
        assert_eq!(parsed, datetime!(2024-05-01 12:30:00.25 UTC));
        let parsed = parse("2024-05-01T12:30:00").unwrap();
        assert_eq!(parsed, datetime!(2024-05-01 12:30:00 UTC));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("yesterday").is_err());
    }
}
