use std::collections::BTreeMap;

use meter_client::domain::ReadingRecord;
use time::OffsetDateTime;

pub const TAG_METER_ID: &str = "MPRN";
pub const TAG_METER_SERIAL: &str = "MeterSerialNumber";
pub const TAG_READ_TYPE: &str = "ReadType";
pub const FIELD_READING: &str = "reading";

/// One time-series point per meter reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub field: String,
    pub value: f64,
    pub timestamp: OffsetDateTime,
}

impl Point {
    /// Build the point for a reading.
    ///
    /// The naive wall-clock end time is taken as UTC with no offset applied,
    /// matching how the ledger stores it.
    pub fn from_reading(measurement: &str, record: &ReadingRecord) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_METER_ID.to_string(), record.meter_id.clone());
        tags.insert(TAG_METER_SERIAL.to_string(), record.meter_serial.clone());
        tags.insert(TAG_READ_TYPE.to_string(), record.read_type.clone());

        Self {
            measurement: measurement.to_string(),
            tags,
            field: FIELD_READING.to_string(),
            value: record.value,
            timestamp: record.read_timestamp.assume_utc(),
        }
    }

    /// Encode as a single line-protocol line, without the trailing newline.
    pub fn to_line(&self) -> String {
        let mut out = String::with_capacity(160);
        self.write_line(&mut out);
        out
    }

    pub fn write_line(&self, out: &mut String) {
        escape_measurement(&self.measurement, out);

        for (key, value) in &self.tags {
            push_tag(out, key, value);
        }

        out.push(' ');
        escape_ident(&self.field, out);
        out.push('=');
        out.push_str(&self.value.to_string());

        // timestamp (nanos)
        out.push(' ');
        out.push_str(&self.timestamp.unix_timestamp_nanos().to_string());
    }
}

/// Tag keys, tag values and field keys escape commas, spaces and equals.
fn escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

/// Measurements only escape commas and spaces.
fn escape_measurement(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    escape_ident(key, out);
    out.push('=');
    escape_ident(value, out);
}
