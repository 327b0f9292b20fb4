pub mod columns;
mod reading;

pub use reading::{parse_read_timestamp, ReadTimestampError, ReadingRecord, READ_TIMESTAMP_FORMAT};
