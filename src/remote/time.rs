//! Arrival timestamp normalisation.
//!
//! The remote reports arrivals as `2023-06-01T12:00:00.000Z`. Callers hand us
//! either that string or a timestamp they already parsed; both normalise to
//! the same `DateTime<Utc>`.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const ARRIVAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Anything that can be normalised into an arrival instant.
pub trait IntoArrival {
    fn into_arrival(self) -> Result<DateTime<Utc>, chrono::ParseError>;
}

impl IntoArrival for DateTime<Utc> {
    fn into_arrival(self) -> Result<DateTime<Utc>, chrono::ParseError> {
        Ok(self)
    }
}

impl IntoArrival for &str {
    fn into_arrival(self) -> Result<DateTime<Utc>, chrono::ParseError> {
        match NaiveDateTime::parse_from_str(self, ARRIVAL_FORMAT) {
            Ok(naive) => Ok(naive.and_utc()),
            // Offsets other than `Z` are still valid RFC 3339.
            Err(_) => DateTime::parse_from_rfc3339(self).map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl IntoArrival for &String {
    fn into_arrival(self) -> Result<DateTime<Utc>, chrono::ParseError> {
        self.as_str().into_arrival()
    }
}

impl IntoArrival for String {
    fn into_arrival(self) -> Result<DateTime<Utc>, chrono::ParseError> {
        self.as_str().into_arrival()
    }
}

/// Normalise an arrival string or timestamp. Idempotent on timestamps.
pub fn parse_arrival<T: IntoArrival>(value: T) -> Result<DateTime<Utc>, chrono::ParseError> {
    value.into_arrival()
}

/// Serialise an arrival in the remote's wire format, keeping sub-second precision.
pub fn format_arrival(arrival: &DateTime<Utc>) -> String {
    arrival.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_fractional_seconds() {
        let parsed = parse_arrival("2023-06-01T12:30:45.123Z").unwrap();
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 45).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_round_trip_preserves_instant() {
        for raw in [
            "2023-06-01T12:30:45.123Z",
            "2024-01-31T23:59:59.999999Z",
            "2024-02-29T00:00:00Z",
        ] {
            let parsed = parse_arrival(raw).unwrap();
            let reparsed = parse_arrival(format_arrival(&parsed)).unwrap();
            assert_eq!(parsed, reparsed, "round trip changed {}", raw);
        }
    }

    #[test]
    fn test_parsed_timestamp_passes_through_unchanged() {
        let now = Utc::now();
        assert_eq!(parse_arrival(now).unwrap(), now);

        let once = parse_arrival("2023-06-01T12:30:45.123Z").unwrap();
        let twice = parse_arrival(once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_offset_timestamps_are_accepted() {
        let parsed = parse_arrival("2023-06-01T14:30:45.5+02:00").unwrap();
        assert_eq!(parsed, parse_arrival("2023-06-01T12:30:45.500Z").unwrap());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_arrival("next tuesday").is_err());
        assert!(parse_arrival("").is_err());
    }
}
