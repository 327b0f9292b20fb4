//! Local ledger of every reading ever downloaded.
//!
//! The file is a JSON array of objects keyed by the export's own column names,
//! so ledgers written by earlier versions of the tool load unchanged.

use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use meter_client::domain::{columns, ReadingRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

#[derive(thiserror::Error, Debug)]
pub enum CorruptLedgerError {
    #[error("failed to read ledger {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger {} is not a record list: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger {} entry {index}: {reason}", .path.display())]
    Entry { path: PathBuf, index: usize, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerWriteError {
    #[error("failed to write ledger {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    #[serde(rename = "MPRN")]
    meter_id: String,
    #[serde(rename = "Meter Serial Number")]
    meter_serial: String,
    #[serde(rename = "Read Value")]
    read_value: ReadValue,
    #[serde(rename = "Read Type")]
    read_type: String,
    #[serde(rename = "Read Date and End Time")]
    read_end: String,
}

/// Values are written as text, as they appear in the export; older ledgers
/// may hold numbers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ReadValue {
    Text(String),
    Number(f64),
}

impl From<&ReadingRecord> for LedgerEntry {
    fn from(r: &ReadingRecord) -> Self {
        LedgerEntry {
            meter_id: r.meter_id.clone(),
            meter_serial: r.meter_serial.clone(),
            read_value: ReadValue::Text(r.value.to_string()),
            read_type: r.read_type.clone(),
            read_end: r.identity_key.clone(),
        }
    }
}

impl TryFrom<LedgerEntry> for ReadingRecord {
    type Error = String;

    fn try_from(e: LedgerEntry) -> Result<Self, Self::Error> {
        let value = match e.read_value {
            ReadValue::Number(v) => v,
            ReadValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|err| format!("invalid '{}' value '{s}': {err}", columns::READ_VALUE))?,
        };
        ReadingRecord::new(e.meter_id, e.meter_serial, e.read_type, value, e.read_end)
            .map_err(|err| err.to_string())
    }
}

pub fn identity_keys(records: &[ReadingRecord]) -> HashSet<String> {
    records.iter().map(|r| r.identity_key.clone()).collect()
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored records in stored order; empty when no ledger exists yet.
    ///
    /// Anything unreadable is an error rather than an empty ledger, otherwise
    /// the whole history would be re-sent downstream.
    pub fn load(&self) -> Result<Vec<ReadingRecord>, CorruptLedgerError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no ledger yet, starting empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(CorruptLedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entries: Vec<LedgerEntry> = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| CorruptLedgerError::Decode {
                path: self.path.clone(),
                source,
            })?;

        let records = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                ReadingRecord::try_from(entry).map_err(|reason| CorruptLedgerError::Entry {
                    path: self.path.clone(),
                    index,
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "ledger loaded");
        Ok(records)
    }

    /// Atomically replace the ledger content with `records`.
    ///
    /// Writes a temp file in the ledger's directory, syncs it and renames it
    /// over the old file, so an interrupted run leaves either the old or the
    /// new ledger.
    pub fn replace(&self, records: &[ReadingRecord]) -> Result<(), LedgerWriteError> {
        let io_err = |source: io::Error| LedgerWriteError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let entries: Vec<LedgerEntry> = records.iter().map(LedgerEntry::from).collect();

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut w, &entries)?;
            w.write_all(b"\n").map_err(io_err)?;
            w.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "ledger replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(key: &str, value: f64) -> ReadingRecord {
        ReadingRecord::new(
            "10000000001",
            "000000000024",
            "Active Import Interval (kW)",
            value,
            key,
        )
        .unwrap()
    }

    #[test]
    fn missing_ledger_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("esb_readings.json"));
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn replace_then_load_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("esb_readings.json"));
        let records = vec![
            reading("27-10-2024 01:30", 0.3),
            reading("27-10-2024 01:00", 0.125),
            reading("27-10-2024 01:00", 1e-7),
            reading("01-01-2024 00:30", 12.0),
        ];

        ledger.replace(&records).unwrap();
        assert_eq!(ledger.load().unwrap(), records);
    }

    #[test]
    fn replace_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("esb_readings.json"));
        ledger.replace(&[reading("01-01-2024 00:30", 1.0)]).unwrap();
        ledger.replace(&[reading("01-01-2024 01:00", 2.0)]).unwrap();

        let loaded = ledger.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity_key, "01-01-2024 01:00");

        // Only the ledger itself remains; no stray temp files.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn replace_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("state").join("ledger.json"));
        ledger.replace(&[reading("01-01-2024 00:30", 1.0)]).unwrap();
        assert_eq!(ledger.load().unwrap().len(), 1);
    }

    #[test]
    fn loads_ledger_written_with_string_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esb_readings.json");
        fs::write(
            &path,
            r#"[
  {
    "MPRN": "10000000001",
    "Meter Serial Number": "000000000024",
    "Read Value": "0.217000",
    "Read Type": "Active Import Interval (kW)",
    "Read Date and End Time": "05-02-2024 23:30"
  },
  {
    "MPRN": "10000000001",
    "Meter Serial Number": "000000000024",
    "Read Value": 0.5,
    "Read Type": "Active Import Interval (kW)",
    "Read Date and End Time": "05-02-2024 23:00",
    "Unexpected": "kept out"
  }
]"#,
        )
        .unwrap();

        let records = Ledger::new(&path).load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 0.217);
        assert_eq!(records[0].identity_key, "05-02-2024 23:30");
        assert_eq!(records[1].value, 0.5);
    }

    #[test]
    fn undecodable_ledger_is_corrupt_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esb_readings.json");
        fs::write(&path, "[{\"MPRN\": \"1\",").unwrap();
        let err = Ledger::new(&path).load().unwrap_err();
        assert!(matches!(err, CorruptLedgerError::Decode { .. }));
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esb_readings.json");
        fs::write(&path, "").unwrap();
        assert!(Ledger::new(&path).load().is_err());
    }

    #[test]
    fn bad_timestamp_entry_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esb_readings.json");
        fs::write(
            &path,
            r#"[{"MPRN":"1","Meter Serial Number":"S","Read Value":"1",
                 "Read Type":"T","Read Date and End Time":"yesterday"}]"#,
        )
        .unwrap();
        let err = Ledger::new(&path).load().unwrap_err();
        assert!(matches!(err, CorruptLedgerError::Entry { index: 0, .. }));
    }

    #[test]
    fn identity_keys_collects_every_key() {
        let keys = identity_keys(&[
            reading("01-01-2024 00:30", 1.0),
            reading("01-01-2024 01:00", 2.0),
        ]);
        assert!(keys.contains("01-01-2024 00:30"));
        assert!(keys.contains("01-01-2024 01:00"));
    }
}
