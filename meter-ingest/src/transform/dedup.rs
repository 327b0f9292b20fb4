use std::collections::HashSet;

use meter_client::domain::ReadingRecord;
use time::Date;

use super::dst::{ambiguous_identity_keys, DstWindow};

/// Splits a fresh export into the readings the ledger has not seen yet.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    ambiguous: HashSet<String>,
}

impl Deduplicator {
    pub fn new(ambiguous: HashSet<String>) -> Self {
        Self { ambiguous }
    }

    /// Deduplicator for a run on `run_date`, with DST keys for the surrounding years.
    pub fn for_run(run_date: Date, window: DstWindow) -> Self {
        Self::new(ambiguous_identity_keys(run_date, window))
    }

    pub fn is_ambiguous(&self, identity_key: &str) -> bool {
        self.ambiguous.contains(identity_key)
    }

    /// Records of `fresh` whose identity key is not in `previous`, in source order.
    ///
    /// A key seen earlier in the same batch also excludes a record, unless the
    /// key is DST-ambiguous: those name two physical readings, so both
    /// occurrences come through.
    pub fn diff<'a>(
        &self,
        fresh: &'a [ReadingRecord],
        previous: &'a HashSet<String>,
    ) -> Vec<&'a ReadingRecord> {
        let mut seen: HashSet<&'a str> = previous.iter().map(String::as_str).collect();
        let mut new_entries = Vec::new();

        for record in fresh {
            let key = record.identity_key.as_str();
            if seen.contains(key) {
                tracing::trace!(identity_key = key, "already ingested");
                continue;
            }
            if !self.is_ambiguous(key) {
                seen.insert(key);
            }
            new_entries.push(record);
        }

        new_entries
    }
}
