use csv::{StringRecord, Trim};
use meter_client::domain::{columns, ReadingRecord};
use serde::Deserialize;

/// What to do with a row whose value or timestamp cannot be converted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadRowPolicy {
    /// Fail the run; partial ingestion risks silent data loss.
    #[default]
    Abort,
    /// Log, count and drop the row.
    Skip,
}

#[derive(thiserror::Error, Debug)]
pub enum MalformedInputError {
    #[error("export has no header row")]
    MissingHeader,
    #[error("export header lacks required column '{column}'")]
    MissingColumn { column: &'static str },
    #[error("line {line}: missing field '{column}'")]
    MissingField { line: u64, column: &'static str },
    #[error("line {line}: invalid read value '{value}'")]
    InvalidValue { line: u64, value: String },
    #[error("line {line}: invalid read timestamp '{text}'")]
    InvalidTimestamp { line: u64, text: String },
    #[error("line {line}: unreadable CSV record: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },
}

impl MalformedInputError {
    /// Row-level conversion failures, which `BadRowPolicy::Skip` may drop.
    fn is_row_conversion(&self) -> bool {
        matches!(self, Self::InvalidValue { .. } | Self::InvalidTimestamp { .. })
    }
}

/// Header positions of the required columns.
struct ColumnIndex {
    read_end: usize,
    meter_id: usize,
    meter_serial: usize,
    read_type: usize,
    read_value: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> Result<Self, MalformedInputError> {
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(MalformedInputError::MissingHeader);
        }

        let position = |column: &'static str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
                .ok_or(MalformedInputError::MissingColumn { column })
        };

        Ok(Self {
            read_end: position(columns::READ_END)?,
            meter_id: position(columns::METER_ID)?,
            meter_serial: position(columns::METER_SERIAL)?,
            read_type: position(columns::READ_TYPE)?,
            read_value: position(columns::READ_VALUE)?,
        })
    }
}

fn record_to_reading(
    record: &StringRecord,
    index: &ColumnIndex,
) -> Result<ReadingRecord, MalformedInputError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    let get = |idx: usize, column: &'static str| {
        record
            .get(idx)
            .ok_or(MalformedInputError::MissingField { line, column })
    };

    // A reading without an end time or meter has no identity to dedup on.
    let identity = |idx: usize, column: &'static str| {
        get(idx, column).and_then(|v| {
            if v.is_empty() {
                Err(MalformedInputError::MissingField { line, column })
            } else {
                Ok(v)
            }
        })
    };

    let read_end = identity(index.read_end, columns::READ_END)?;
    let meter_id = identity(index.meter_id, columns::METER_ID)?;
    let meter_serial = get(index.meter_serial, columns::METER_SERIAL)?;
    let read_type = get(index.read_type, columns::READ_TYPE)?;
    let value_str = get(index.read_value, columns::READ_VALUE)?;

    let value = value_str
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MalformedInputError::InvalidValue {
            line,
            value: value_str.to_string(),
        })?;

    ReadingRecord::new(meter_id, meter_serial, read_type, value, read_end).map_err(|e| {
        MalformedInputError::InvalidTimestamp { line, text: e.text }
    })
}

/// Convert a raw export into reading records, preserving row order.
pub fn parse_export(
    raw: &str,
    policy: BadRowPolicy,
) -> Result<Vec<ReadingRecord>, MalformedInputError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(raw.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|source| MalformedInputError::Csv { line: 1, source })?
        .clone();
    let index = ColumnIndex::from_headers(&headers)?;

    let mut records = Vec::new();
    let mut skipped: u64 = 0;

    for result in rdr.records() {
        let record = result.map_err(|source| MalformedInputError::Csv {
            line: source.position().map(|p| p.line()).unwrap_or(0),
            source,
        })?;

        match record_to_reading(&record, &index) {
            Ok(reading) => records.push(reading),
            Err(e) if policy == BadRowPolicy::Skip && e.is_row_conversion() => {
                tracing::warn!(error = %e, "skipping unconvertible export row");
                metrics::counter!("meter_ingest_parse_rows_skipped_total").increment(1);
                skipped += 1;
            }
            Err(e) => {
                metrics::counter!("meter_ingest_parse_errors_total").increment(1);
                return Err(e);
            }
        }
    }

    tracing::debug!(parsed = records.len(), skipped, "export parsed");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "MPRN,Meter Serial Number,Read Value,Read Type,Read Date and End Time";

    fn export(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn parses_rows_in_source_order() {
        let raw = export(&[
            "10000000001,000000000024,0.110000,Active Import Interval (kW),01-01-2024 00:30",
            "10000000001,000000000024,0.095000,Active Import Interval (kW),01-01-2024 00:00",
            "10000000001,000000000024,0.102000,Active Import Interval (kW),01-01-2024 01:00",
        ]);
        let records = parse_export(&raw, BadRowPolicy::Abort).unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.identity_key.as_str()).collect();
        assert_eq!(keys, ["01-01-2024 00:30", "01-01-2024 00:00", "01-01-2024 01:00"]);
        assert_eq!(records[1].value, 0.095);
        assert_eq!(records[0].read_type, "Active Import Interval (kW)");
    }

    #[test]
    fn columns_are_matched_by_name_not_position() {
        let raw = "Read Date and End Time,Read Type,Read Value,Meter Serial Number,MPRN,Extra\n\
                   01-01-2024 00:30,Active Import Interval (kW),1.5,SER1,MPRN1,ignored";
        let records = parse_export(raw, BadRowPolicy::Abort).unwrap();
        assert_eq!(records[0].meter_id, "MPRN1");
        assert_eq!(records[0].meter_serial, "SER1");
        assert_eq!(records[0].value, 1.5);
    }

    #[test]
    fn leading_bom_is_ignored() {
        let raw = format!("\u{feff}{}", export(&["1,S,0.5,T,01-01-2024 00:30"]));
        let records = parse_export(&raw, BadRowPolicy::Abort).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn empty_input_is_missing_header() {
        let err = parse_export("", BadRowPolicy::Abort).unwrap_err();
        assert!(matches!(err, MalformedInputError::MissingHeader));
    }

    #[test]
    fn header_without_required_column_fails() {
        let raw = "MPRN,Meter Serial Number,Read Value,Read Date and End Time\n\
                   1,S,0.5,01-01-2024 00:30";
        let err = parse_export(raw, BadRowPolicy::Abort).unwrap_err();
        assert!(matches!(
            err,
            MalformedInputError::MissingColumn { column: "Read Type" }
        ));
    }

    #[test]
    fn short_row_fails_even_when_skipping() {
        let raw = export(&["1,S,0.5"]);
        let err = parse_export(&raw, BadRowPolicy::Skip).unwrap_err();
        assert!(matches!(err, MalformedInputError::MissingField { line: 2, .. }));
    }

    #[test]
    fn bad_value_aborts_by_default() {
        let raw = export(&["1,S,0.5,T,01-01-2024 00:30", "1,S,n/a,T,01-01-2024 01:00"]);
        let err = parse_export(&raw, BadRowPolicy::Abort).unwrap_err();
        assert!(matches!(err, MalformedInputError::InvalidValue { line: 3, .. }));
    }

    #[test]
    fn non_finite_value_is_invalid() {
        let raw = export(&["1,S,NaN,T,01-01-2024 00:30"]);
        let err = parse_export(&raw, BadRowPolicy::Abort).unwrap_err();
        assert!(matches!(err, MalformedInputError::InvalidValue { .. }));
    }

    #[test]
    fn skip_policy_drops_only_bad_rows() {
        let raw = export(&[
            "1,S,0.5,T,01-01-2024 00:30",
            "1,S,,T,01-01-2024 01:00",
            "1,S,0.7,T,2024-01-01T01:30",
            "1,S,0.6,T,01-01-2024 01:30",
        ]);
        let records = parse_export(&raw, BadRowPolicy::Skip).unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.identity_key.as_str()).collect();
        assert_eq!(keys, ["01-01-2024 00:30", "01-01-2024 01:30"]);
    }

    #[test]
    fn row_of_empty_fields_is_reported_not_dropped() {
        let raw = export(&["1,S,0.5,T,01-01-2024 00:30", ",,,,"]);
        for policy in [BadRowPolicy::Abort, BadRowPolicy::Skip] {
            let err = parse_export(&raw, policy).unwrap_err();
            assert!(matches!(
                err,
                MalformedInputError::MissingField {
                    line: 3,
                    column: "Read Date and End Time"
                }
            ));
        }
    }

    #[test]
    fn empty_meter_id_is_missing_field() {
        let raw = export(&[",S,0.5,T,01-01-2024 00:30"]);
        let err = parse_export(&raw, BadRowPolicy::Skip).unwrap_err();
        assert!(matches!(
            err,
            MalformedInputError::MissingField { column: "MPRN", .. }
        ));
    }

    #[test]
    fn trailing_blank_line_is_not_a_row() {
        let raw = format!("{}\n\n", export(&["1,S,0.5,T,01-01-2024 00:30"]));
        assert_eq!(parse_export(&raw, BadRowPolicy::Abort).unwrap().len(), 1);
    }
}
