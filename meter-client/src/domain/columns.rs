//! Column names of the portal's interval export ("HDF" CSV).
//!
//! The ledger reuses these names as its JSON keys.

pub const METER_ID: &str = "MPRN";
pub const METER_SERIAL: &str = "Meter Serial Number";
pub const READ_VALUE: &str = "Read Value";
pub const READ_TYPE: &str = "Read Type";
pub const READ_END: &str = "Read Date and End Time";

/// Every column a row must carry.
pub const REQUIRED: [&str; 5] = [READ_END, METER_ID, METER_SERIAL, READ_TYPE, READ_VALUE];
