use time::{format_description::FormatItem, macros::format_description, PrimitiveDateTime};

/// Layout of the export's "Read Date and End Time" column, e.g. `27-10-2024 01:30`.
pub const READ_TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[day]-[month]-[year] [hour]:[minute]");

#[derive(thiserror::Error, Debug)]
#[error("invalid read timestamp '{text}': {source}")]
pub struct ReadTimestampError {
    pub text: String,
    #[source]
    pub source: time::error::Parse,
}

/// Parse an interval end time as supplied by the portal.
///
/// The result is a naive local wall-clock time: the export carries no offset.
pub fn parse_read_timestamp(text: &str) -> Result<PrimitiveDateTime, ReadTimestampError> {
    PrimitiveDateTime::parse(text.trim(), READ_TIMESTAMP_FORMAT).map_err(|source| {
        ReadTimestampError {
            text: text.to_string(),
            source,
        }
    })
}

/// One interval meter reading.
///
/// `identity_key` is the end timestamp exactly as the portal printed it. It is
/// used verbatim for deduplication because the same text names two different
/// intervals on the autumn DST fallback night.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRecord {
    pub meter_id: String,
    pub meter_serial: String,
    pub read_type: String,
    /// kW or kWh depending on `read_type`.
    pub value: f64,
    pub read_timestamp: PrimitiveDateTime,
    pub identity_key: String,
}

impl ReadingRecord {
    pub fn new(
        meter_id: impl Into<String>,
        meter_serial: impl Into<String>,
        read_type: impl Into<String>,
        value: f64,
        read_end: impl Into<String>,
    ) -> Result<Self, ReadTimestampError> {
        let identity_key = read_end.into();
        let read_timestamp = parse_read_timestamp(&identity_key)?;
        Ok(Self {
            meter_id: meter_id.into(),
            meter_serial: meter_serial.into(),
            read_type: read_type.into(),
            value,
            read_timestamp,
            identity_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_portal_timestamp() {
        let ts = parse_read_timestamp("27-10-2024 01:30").unwrap();
        assert_eq!(ts, datetime!(2024-10-27 01:30));
    }

    #[test]
    fn rejects_iso_timestamp() {
        let err = parse_read_timestamp("2024-10-27 01:30").unwrap_err();
        assert_eq!(err.text, "2024-10-27 01:30");
    }

    #[test]
    fn record_keeps_key_verbatim() {
        let r = ReadingRecord::new(
            "10000000001",
            "000000000024",
            "Active Import Interval (kW)",
            0.25,
            "01-01-2024 00:30",
        )
        .unwrap();
        assert_eq!(r.identity_key, "01-01-2024 00:30");
        assert_eq!(r.read_timestamp, datetime!(2024-01-01 00:30));
    }
}
